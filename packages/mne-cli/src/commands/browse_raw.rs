use crate::cli::BrowseRawArgs;
use crate::exit_codes;
use crate::output;
use mne_rs::{MneError, Raw};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct ChannelSummary {
    name: String,
    kind: &'static str,
    bad: bool,
    min: f64,
    max: f64,
    ptp: f64,
}

#[derive(Serialize)]
struct RawSummary {
    file: String,
    sfreq: f64,
    n_channels: usize,
    n_times: usize,
    first_samp: i64,
    duration: f64,
    highpass: f64,
    lowpass: f64,
    bads: Vec<String>,
    segment: [f64; 2],
    channels: Vec<ChannelSummary>,
}

fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>, MneError> {
    let mut files = Vec::new();
    for pattern in patterns {
        let entries = glob::glob(pattern).map_err(|e| {
            MneError::InvalidParameter(format!("Invalid pattern '{}': {}", pattern, e))
        })?;
        let before = files.len();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => log::warn!("Skipping unreadable path: {}", e),
            }
        }
        if files.len() == before {
            return Err(MneError::FileNotFound(format!(
                "no recording matches '{}'",
                pattern
            )));
        }
    }
    Ok(files)
}

fn summarize(path: &Path, start: f64, duration: f64) -> Result<RawSummary, MneError> {
    let raw = Raw::read(path, false)?;
    let info = raw.info();
    let first = raw.time_as_index(start)?;
    let n = (duration * raw.sfreq()).round().max(1.0) as usize;
    let stop = (first + n).min(raw.n_times());
    let data = raw.get_data(None, first, stop)?;

    let channels = info
        .chs
        .iter()
        .enumerate()
        .map(|(i, ch)| {
            let row = data.row(i);
            let (min, max) = (row.min(), row.max());
            ChannelSummary {
                name: ch.name.clone(),
                kind: ch.kind.as_str(),
                bad: info.bads.contains(&ch.name),
                min,
                max,
                ptp: max - min,
            }
        })
        .collect();

    Ok(RawSummary {
        file: path.display().to_string(),
        sfreq: raw.sfreq(),
        n_channels: info.n_channels(),
        n_times: raw.n_times(),
        first_samp: raw.first_samp(),
        duration: raw.duration(),
        highpass: info.highpass,
        lowpass: info.lowpass,
        bads: info.bads.clone(),
        segment: [first as f64 / raw.sfreq(), stop as f64 / raw.sfreq()],
        channels,
    })
}

fn print_summary(summary: &RawSummary) {
    println!("{}", summary.file);
    println!(
        "  {} channels, {} samples at {} Hz ({:.3} s, first sample {})",
        summary.n_channels, summary.n_times, summary.sfreq, summary.duration, summary.first_samp
    );
    println!("  Filter: {} - {} Hz", summary.highpass, summary.lowpass);
    if !summary.bads.is_empty() {
        println!("  Bad channels: {}", summary.bads.join(", "));
    }
    println!("  Segment {:.3} - {:.3} s:", summary.segment[0], summary.segment[1]);
    println!("  {:<12} {:<5} {:>12} {:>12} {:>12}", "Channel", "Kind", "Min", "Max", "PTP");
    for ch in &summary.channels {
        println!(
            "  {:<12} {:<5} {:>12.4e} {:>12.4e} {:>12.4e}{}",
            ch.name,
            ch.kind,
            ch.min,
            ch.max,
            ch.ptp,
            if ch.bad { "  (bad)" } else { "" }
        );
    }
}

pub fn execute(args: BrowseRawArgs) -> i32 {
    if !(args.duration > 0.0) {
        eprintln!("Error: --duration must be positive");
        return exit_codes::INPUT_ERROR;
    }
    let files = match expand_patterns(&args.patterns) {
        Ok(files) => files,
        Err(e) => return output::fail(e),
    };

    let mut summaries = Vec::with_capacity(files.len());
    for path in &files {
        log::info!("Reading {}", path.display());
        match summarize(path, args.start, args.duration) {
            Ok(summary) => summaries.push(summary),
            Err(e) => return output::fail(e),
        }
    }

    if args.json {
        return output::print_json(&summaries);
    }
    for (i, summary) in summaries.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_summary(summary);
    }
    exit_codes::SUCCESS
}
