use crate::cli::{ConsecutiveArg, FindEventsArgs};
use crate::exit_codes;
use crate::output;
use mne_rs::events::{format_events, Consecutive};
use mne_rs::{find_events, write_events, FindEventsParams, Raw};
use serde::Serialize;

#[derive(Serialize)]
struct EventOutput {
    sample: i64,
    time: f64,
    previous: i32,
    id: i32,
}

pub fn execute(args: FindEventsArgs) -> i32 {
    let raw = match Raw::read(&args.raw, false) {
        Ok(raw) => raw,
        Err(e) => return output::fail(e),
    };

    let params = FindEventsParams {
        stim_channel: args.stim_channel.clone(),
        consecutive: match args.consecutive {
            ConsecutiveArg::Never => Consecutive::Never,
            ConsecutiveArg::Increasing => Consecutive::Increasing,
            ConsecutiveArg::Always => Consecutive::Always,
        },
        mask: args.mask,
        min_samples: args.min_samples,
    };
    let events = match find_events(&raw, &params) {
        Ok(events) => events,
        Err(e) => return output::fail(e),
    };
    log::info!("{} events found", events.len());

    if let Some(path) = &args.output {
        if let Err(e) = write_events(path, &events) {
            return output::fail(e);
        }
        eprintln!("Wrote {} events to {}", events.len(), path.display());
        return exit_codes::SUCCESS;
    }

    if args.json {
        let rows: Vec<EventOutput> = events
            .iter()
            .map(|e| EventOutput {
                sample: e.sample,
                time: (e.sample - raw.first_samp()) as f64 / raw.sfreq(),
                previous: e.previous,
                id: e.id,
            })
            .collect();
        return output::print_json(&rows);
    }

    match output::write_output(&format_events(&events), None) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}
