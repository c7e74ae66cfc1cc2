use clap::Parser;

mod cli;
mod commands;
mod exit_codes;
mod output;

use cli::Cli;

fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => mne_rs::config::get_config("MNE_LOGGING_LEVEL")
            .ok()
            .flatten()
            .map(|level| mne_rs::config::logging_level_from_str(&level))
            .unwrap_or(log::LevelFilter::Warn),
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(log_level(cli.verbose))
        .format_timestamp(None)
        .init();

    let exit_code = match cli.command {
        cli::Command::Info(args) => commands::info::execute(args),
        cli::Command::BrowseRaw(args) => commands::browse_raw::execute(args),
        cli::Command::Filter(args) => commands::filter::execute(args),
        cli::Command::FindEvents(args) => commands::find_events::execute(args),
        cli::Command::Average(args) => commands::average::execute(args),
        cli::Command::ProcessRaw(args) => commands::process_raw::execute(args).await,
        cli::Command::CheckVersions(args) => commands::check_versions::execute(args),
    };

    std::process::exit(exit_code);
}
