use crate::cli::CheckVersionsArgs;
use crate::exit_codes;
use crate::output;
use mne_rs::versions::{check_versions, parse_installed, BuildMatrix, VersionPin};
use mne_rs::MneError;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct PinStatus {
    package: String,
    env_var: &'static str,
    expected: String,
    installed: Option<String>,
    ok: bool,
}

#[derive(Serialize)]
struct CheckOutput {
    ok: bool,
    pins: Vec<PinStatus>,
    error: Option<String>,
}

fn pins_from_args(args: &CheckVersionsArgs) -> Vec<VersionPin> {
    BuildMatrix::from_lookup(|key| match key {
        "NUMPY" => Some(args.numpy.clone()),
        "SCIPY" => Some(args.scipy.clone()),
        "MPL" => Some(args.mpl.clone()),
        _ => None,
    })
    .pins()
}

fn installed_from_args(args: &CheckVersionsArgs) -> Result<BTreeMap<String, String>, MneError> {
    args.installed.iter().map(|spec| parse_installed(spec)).collect()
}

pub fn execute(args: CheckVersionsArgs) -> i32 {
    let installed = match installed_from_args(&args) {
        Ok(installed) => installed,
        Err(e) => return output::fail(e),
    };
    let pins = pins_from_args(&args);
    let result = check_versions(&pins, &installed);

    let statuses: Vec<PinStatus> = pins
        .iter()
        .filter(|p| p.is_active())
        .map(|p| {
            let found = installed.get(&p.package).cloned();
            PinStatus {
                package: p.package.clone(),
                env_var: p.env_var,
                expected: p.expected.clone(),
                ok: found.as_deref().is_some_and(|v| p.matches(v)),
                installed: found,
            }
        })
        .collect();

    if args.json {
        let report = CheckOutput {
            ok: result.is_ok(),
            pins: statuses,
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        let code = output::print_json(&report);
        return match result {
            Ok(()) => code,
            Err(e) => exit_codes::for_error(&e),
        };
    }

    if statuses.is_empty() {
        println!("No version pins set");
    }
    for status in &statuses {
        println!(
            "{:<12} {:<6} pinned {:<8} installed {}",
            status.package,
            if status.ok { "ok" } else { "FAIL" },
            status.expected,
            status.installed.as_deref().unwrap_or("-")
        );
    }
    match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => output::fail(e),
    }
}
