use crate::cli::AverageArgs;
use crate::exit_codes;
use crate::output;
use mne_rs::info::MegPick;
use mne_rs::{
    find_events, pick_types, read_events, Baseline, Epochs, EpochsParams, EventId, Evoked,
    FindEventsParams, MneError, PickSpec, Raw, Thresholds,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct AverageOutput {
    file: String,
    comment: String,
    n_events: usize,
    nave: usize,
    n_dropped: usize,
    drop_reasons: Vec<(usize, Vec<String>)>,
    peak_channel: Option<String>,
    peak_time: Option<f64>,
    peak_value: Option<f64>,
}

fn build_params(args: &AverageArgs, raw: &Raw) -> Result<EpochsParams, MneError> {
    let mut params = EpochsParams::new(args.tmin, args.tmax);
    params.baseline = if args.no_baseline {
        None
    } else {
        Some(Baseline::new(args.bmin, Some(args.bmax)))
    };
    params.reject = args.reject.as_deref().map(Thresholds::parse).transpose()?;
    params.flat = args.flat.as_deref().map(Thresholds::parse).transpose()?;
    // data channels plus the artifact channels rejection looks at
    let spec = PickSpec {
        meg: MegPick::All,
        eeg: true,
        eog: true,
        ecg: true,
        ..Default::default()
    };
    params.picks = Some(pick_types(raw.info(), &spec));
    Ok(params)
}

fn run(args: &AverageArgs) -> Result<(Evoked, Epochs), MneError> {
    let raw = Arc::new(Raw::read(&args.raw, false)?);
    let events = match &args.events {
        Some(path) => read_events(path)?,
        None => find_events(&raw, &FindEventsParams::default())?,
    };

    let event_id = EventId::from_pairs(args.event_id.iter().map(|&id| (id.to_string(), id)));
    let params = build_params(args, &raw)?;
    let mut epochs = Epochs::new(raw, &events, event_id, params)?;
    epochs.drop_bad()?;
    epochs.pick_types(&PickSpec::data())?;

    let evoked = epochs.average()?;
    evoked.save(&args.out)?;
    Ok((evoked, epochs))
}

pub fn execute(args: AverageArgs) -> i32 {
    let (evoked, epochs) = match run(&args) {
        Ok(result) => result,
        Err(e) => return output::fail(e),
    };

    let drop_reasons: Vec<(usize, Vec<String>)> = epochs
        .drop_log()
        .iter()
        .enumerate()
        .filter(|(_, reasons)| !reasons.is_empty())
        .map(|(i, reasons)| (i, reasons.clone()))
        .collect();
    let peak = evoked.peak();
    let summary = AverageOutput {
        file: args.out.display().to_string(),
        comment: evoked.comment.clone(),
        n_events: epochs.drop_log().len(),
        nave: evoked.nave,
        n_dropped: drop_reasons.len(),
        drop_reasons,
        peak_channel: peak.as_ref().map(|p| p.0.clone()),
        peak_time: peak.as_ref().map(|p| p.1),
        peak_value: peak.as_ref().map(|p| p.2),
    };

    if args.json {
        return output::print_json(&summary);
    }

    println!("Averaged {} of {} epochs into {}", summary.nave, summary.n_events, summary.file);
    for (i, reasons) in &summary.drop_reasons {
        println!("  epoch {} dropped: {}", i, reasons.join(", "));
    }
    if let (Some(ch), Some(time), Some(value)) =
        (&summary.peak_channel, summary.peak_time, summary.peak_value)
    {
        println!("Peak: {} at {:.3} s ({:.4e})", ch, time, value);
    }
    exit_codes::SUCCESS
}
