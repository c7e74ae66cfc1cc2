use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mne",
    version,
    about = "MEG and EEG data processing command-line tool",
    long_about = "Inspect, filter and epoch MEG/EEG recordings, and drive the MNE-C tools.\n\
                  MNE-C commands need $MNE_ROOT or --mne-root."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show version, configuration and MNE-C location
    Info(InfoArgs),
    /// Summarize raw recordings matching one or more glob patterns
    BrowseRaw(BrowseRawArgs),
    /// Band-pass, notch filter and decimate a raw recording
    Filter(FilterArgs),
    /// Detect events on a stim channel
    FindEvents(FindEventsArgs),
    /// Epoch a raw recording around events and save the average
    Average(AverageArgs),
    /// Run mne_process_raw from MNE-C
    ProcessRaw(ProcessRawArgs),
    /// Check installed package versions against the build-matrix pins
    CheckVersions(CheckVersionsArgs),
}

#[derive(Args)]
pub struct InfoArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct BrowseRawArgs {
    /// Raw recordings or glob patterns (e.g. "data/*_raw.json")
    #[arg(required = true, num_args = 1..)]
    pub patterns: Vec<String>,

    /// Start of the previewed segment in seconds
    #[arg(long, default_value_t = 0.0)]
    pub start: f64,

    /// Length of the previewed segment in seconds
    #[arg(long, default_value_t = 1.0)]
    pub duration: f64,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct FilterArgs {
    /// Input raw recording
    #[arg(long)]
    pub raw: PathBuf,

    /// Output raw recording
    #[arg(short, long)]
    pub out: PathBuf,

    /// High-pass corner in Hz
    #[arg(long)]
    pub highpass: Option<f64>,

    /// Low-pass corner in Hz
    #[arg(long)]
    pub lowpass: Option<f64>,

    /// Line frequencies to notch out (e.g. 60 120 180)
    #[arg(long, num_args = 1..)]
    pub notch: Vec<f64>,

    /// Notch quality factor
    #[arg(long, default_value_t = 30.0)]
    pub notch_q: f64,

    /// Decimation factor applied after filtering
    #[arg(long)]
    pub decim: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ConsecutiveArg {
    Never,
    Increasing,
    Always,
}

#[derive(Args)]
pub struct FindEventsArgs {
    /// Input raw recording
    #[arg(long)]
    pub raw: PathBuf,

    /// Stim channel name
    #[arg(long, env = "MNE_STIM_CHANNEL")]
    pub stim_channel: Option<String>,

    /// Which value transitions count as events
    #[arg(long, value_enum, default_value_t = ConsecutiveArg::Increasing)]
    pub consecutive: ConsecutiveArg,

    /// Bit mask applied to the stim values
    #[arg(long)]
    pub mask: Option<i32>,

    /// Discard events shorter than this many samples
    #[arg(long, default_value_t = 0)]
    pub min_samples: usize,

    /// Write the events file here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct AverageArgs {
    /// Input raw recording
    #[arg(long)]
    pub raw: PathBuf,

    /// Events file; events are detected on the stim channel when omitted
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Event ids to average together
    #[arg(long, required = true, num_args = 1..)]
    pub event_id: Vec<i32>,

    /// Epoch start relative to the event in seconds
    #[arg(long, default_value_t = -0.2, allow_hyphen_values = true)]
    pub tmin: f64,

    /// Epoch end relative to the event in seconds
    #[arg(long, default_value_t = 0.5, allow_hyphen_values = true)]
    pub tmax: f64,

    /// Baseline start in seconds (epoch start if omitted)
    #[arg(long, allow_hyphen_values = true)]
    pub bmin: Option<f64>,

    /// Baseline end in seconds
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub bmax: f64,

    /// Skip baseline correction
    #[arg(long, default_value_t = false, conflicts_with_all = ["bmin"])]
    pub no_baseline: bool,

    /// Peak-to-peak rejection thresholds, e.g. "grad=4e-10,eog=150e-6"
    #[arg(long)]
    pub reject: Option<String>,

    /// Flatness thresholds, same format as --reject
    #[arg(long)]
    pub flat: Option<String>,

    /// Output evoked file
    #[arg(short, long)]
    pub out: PathBuf,

    /// Print the summary as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ProjSwitch {
    On,
    Off,
}

#[derive(Args)]
pub struct ProcessRawArgs {
    /// Raw recordings to process
    #[arg(long, required = true, num_args = 1..)]
    pub raw: Vec<PathBuf>,

    /// Covariance definition files, one per raw file
    #[arg(long, num_args = 1..)]
    pub cov: Vec<PathBuf>,

    /// Averaging definition files, one per raw file
    #[arg(long, num_args = 1..)]
    pub ave: Vec<PathBuf>,

    /// Turn SSP projections on or off
    #[arg(long, value_enum)]
    pub proj: Option<ProjSwitch>,

    /// Disable the default filtering
    #[arg(long, default_value_t = false)]
    pub filteroff: bool,

    /// Additional options as "key=value" (e.g. "lowpass=40" "save=out_raw.fif")
    #[arg(long = "option", num_args = 1.., value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,

    /// MNE-C installation root
    #[arg(long, env = "MNE_ROOT")]
    pub mne_root: Option<PathBuf>,

    /// Print the command line instead of running it
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct CheckVersionsArgs {
    /// Pinned numpy version prefix
    #[arg(long, env = "NUMPY", default_value = "")]
    pub numpy: String,

    /// Pinned scipy version prefix
    #[arg(long, env = "SCIPY", default_value = "")]
    pub scipy: String,

    /// Pinned matplotlib version prefix
    #[arg(long, env = "MPL", default_value = "")]
    pub mpl: String,

    /// Installed versions as "package=version"
    #[arg(long, num_args = 1..)]
    pub installed: Vec<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid option '{}': expected 'key=value'", s))?;
    let key = key.trim().trim_start_matches("--");
    if key.is_empty() {
        return Err(format!("Invalid option '{}': empty key", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
