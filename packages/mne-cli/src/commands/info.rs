use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use mne_rs::config::{self, MneConfig};
use mne_rs::MneCRunner;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct ConfigOutput {
    stim_channel: String,
    logging_level: Option<String>,
    dont_write_home: bool,
    skip_testing_dataset_tests: bool,
    data_path: Option<String>,
    mne_root: Option<String>,
    freesurfer_home: Option<String>,
    neuromag2ft_root: Option<String>,
}

#[derive(Serialize)]
struct InfoOutput {
    cli_version: String,
    platform: String,
    arch: String,
    config_path: String,
    config: ConfigOutput,
    mne_c_bin: Option<String>,
    mne_c_found: bool,
}

fn display(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.display().to_string())
}

pub fn execute(args: InfoArgs) -> i32 {
    let config = match MneConfig::load() {
        Ok(config) => config,
        Err(e) => return output::fail(e),
    };
    let runner = MneCRunner::discover()
        .map_err(|e| log::debug!("MNE-C not available: {}", e))
        .ok();

    let info = InfoOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        config_path: config::config_path().display().to_string(),
        config: ConfigOutput {
            stim_channel: config.stim_channel.clone(),
            logging_level: config.logging_level.map(|l| l.to_string()),
            dont_write_home: config.dont_write_home,
            skip_testing_dataset_tests: config.skip_testing_dataset_tests,
            data_path: display(&config.data_path),
            mne_root: display(&config.mne_root),
            freesurfer_home: display(&config.freesurfer_home),
            neuromag2ft_root: display(&config.neuromag2ft_root),
        },
        mne_c_bin: runner.as_ref().map(|r| r.bin_dir().display().to_string()),
        mne_c_found: runner.is_some(),
    };

    if args.json {
        return output::print_json(&info);
    }

    let unset = || "not set".to_string();
    println!("mne CLI v{}", info.cli_version);
    println!("Platform: {} ({})", info.platform, info.arch);
    println!();
    println!("Config file: {}", info.config_path);
    println!("Stim channel: {}", info.config.stim_channel);
    println!(
        "Logging level: {}",
        info.config.logging_level.clone().unwrap_or_else(unset)
    );
    println!("Data path: {}", info.config.data_path.clone().unwrap_or_else(unset));
    println!(
        "FreeSurfer home: {}",
        info.config.freesurfer_home.clone().unwrap_or_else(unset)
    );
    println!();
    match info.mne_c_bin {
        Some(ref path) => println!("MNE-C binaries: {}", path),
        None => println!("MNE-C binaries: not found (set $MNE_ROOT)"),
    }

    exit_codes::SUCCESS
}
