use crate::cli::FilterArgs;
use crate::exit_codes;
use crate::output;
use mne_rs::Raw;

pub fn execute(args: FilterArgs) -> i32 {
    if args.highpass.is_none() && args.lowpass.is_none() && args.notch.is_empty() && args.decim.is_none() {
        eprintln!("Error: nothing to do, give --highpass, --lowpass, --notch or --decim");
        return exit_codes::INPUT_ERROR;
    }

    let mut raw = match Raw::read(&args.raw, true) {
        Ok(raw) => raw,
        Err(e) => return output::fail(e),
    };

    if args.highpass.is_some() || args.lowpass.is_some() {
        if let Err(e) = raw.filter(args.highpass, args.lowpass, None) {
            return output::fail(e);
        }
    }
    if !args.notch.is_empty() {
        if let Err(e) = raw.notch_filter(&args.notch, args.notch_q, None) {
            return output::fail(e);
        }
    }
    if let Some(decim) = args.decim {
        if let Err(e) = raw.decimate(decim) {
            return output::fail(e);
        }
    }

    if let Err(e) = raw.save(&args.out) {
        return output::fail(e);
    }

    let info = raw.info();
    eprintln!(
        "Wrote {} ({} channels, {} samples at {} Hz, {} - {} Hz)",
        args.out.display(),
        info.n_channels(),
        raw.n_times(),
        raw.sfreq(),
        info.highpass,
        info.lowpass
    );
    exit_codes::SUCCESS
}
