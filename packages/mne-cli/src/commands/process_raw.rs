use crate::cli::{ProcessRawArgs, ProjSwitch};
use crate::exit_codes;
use crate::output;
use mne_rs::command::process_raw_args;
use mne_rs::{MneCRunner, ProcessRawParams};

fn build_params(args: &ProcessRawArgs) -> ProcessRawParams {
    ProcessRawParams {
        raw: args.raw.clone(),
        cov: args.cov.clone(),
        ave: args.ave.clone(),
        proj: args.proj.map(|p| matches!(p, ProjSwitch::On)),
        filter: !args.filteroff,
        options: args.options.clone(),
    }
}

pub async fn execute(args: ProcessRawArgs) -> i32 {
    let params = build_params(&args);

    if args.dry_run {
        return match process_raw_args(&params) {
            Ok(cmd_args) => {
                println!("mne_process_raw {}", cmd_args.join(" "));
                exit_codes::SUCCESS
            }
            Err(e) => output::fail(e),
        };
    }

    let runner = match &args.mne_root {
        Some(root) => MneCRunner::new(root.join("bin")),
        None => MneCRunner::discover(),
    };
    let runner = match runner {
        Ok(runner) => runner,
        Err(e) => return output::fail(e),
    };

    match runner.process_raw(&params).await {
        Ok(stdout) => {
            if !stdout.is_empty() {
                print!("{}", stdout);
            }
            exit_codes::SUCCESS
        }
        Err(e) => output::fail(e),
    }
}
