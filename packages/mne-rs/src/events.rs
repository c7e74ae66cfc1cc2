//! Trigger events: detection on stim channels and the event text format.

use crate::config;
use crate::error::{MneError, Result};
use crate::info::ChannelKind;
use crate::io::Raw;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// A trigger: absolute sample (including `first_samp`), the stim value just
/// before it, and the new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sample: i64,
    pub previous: i32,
    pub id: i32,
}

impl Event {
    pub fn new(sample: i64, previous: i32, id: i32) -> Self {
        Self {
            sample,
            previous,
            id,
        }
    }
}

/// Which stim transitions count as events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consecutive {
    /// Only transitions from zero to a non-zero value
    Never,
    /// Zero to non-zero, or an increase between two non-zero values
    #[default]
    Increasing,
    /// Any change to a non-zero value
    Always,
}

impl Consecutive {
    fn accepts(&self, previous: i32, current: i32) -> bool {
        if current == 0 || current == previous {
            return false;
        }
        match self {
            Self::Never => previous == 0,
            Self::Increasing => previous == 0 || current > previous,
            Self::Always => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindEventsParams {
    /// Stim channel name; defaults to `MNE_STIM_CHANNEL`, then `STI 014`,
    /// then the first stim channel in the recording
    pub stim_channel: Option<String>,
    pub consecutive: Consecutive,
    /// Bit mask applied to the stim values before detection
    pub mask: Option<i32>,
    /// Events whose value lasts fewer samples than this are discarded
    pub min_samples: usize,
}

fn resolve_stim_channel(raw: &Raw, requested: Option<&str>) -> Result<usize> {
    let info = raw.info();
    if let Some(name) = requested {
        return info
            .channel_index(name)
            .ok_or_else(|| MneError::ChannelNotFound(name.to_string()));
    }

    let configured = config::get_config("MNE_STIM_CHANNEL")?
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| config::DEFAULT_STIM_CHANNEL.to_string());
    if let Some(idx) = info.channel_index(&configured) {
        return Ok(idx);
    }

    info.chs
        .iter()
        .position(|c| c.kind == ChannelKind::Stim)
        .ok_or_else(|| {
            MneError::ChannelNotFound(format!(
                "no stim channel (looked for '{}' and any stim channel)",
                configured
            ))
        })
}

/// Detect events as value transitions on a stim channel.
pub fn find_events(raw: &Raw, params: &FindEventsParams) -> Result<Vec<Event>> {
    let stim = resolve_stim_channel(raw, params.stim_channel.as_deref())?;
    let data = raw.get_data(Some(&[stim]), 0, raw.n_times())?;
    let values: Vec<i32> = data
        .row(0)
        .iter()
        .map(|&v| {
            let v = v.round() as i32;
            match params.mask {
                Some(mask) => v & mask,
                None => v,
            }
        })
        .collect();

    let mut events = Vec::new();
    for i in 1..values.len() {
        let (previous, current) = (values[i - 1], values[i]);
        if !params.consecutive.accepts(previous, current) {
            continue;
        }
        if params.min_samples > 1 {
            let duration = values[i..].iter().take_while(|&&v| v == current).count();
            if duration < params.min_samples {
                continue;
            }
        }
        events.push(Event::new(raw.first_samp() + i as i64, previous, current));
    }

    log::info!(
        "{} events found on {}",
        events.len(),
        raw.info().chs[stim].name
    );
    Ok(events)
}

/// Keep events whose id is in `include`.
pub fn pick_events(events: &[Event], include: &[i32]) -> Vec<Event> {
    events
        .iter()
        .filter(|e| include.contains(&e.id))
        .copied()
        .collect()
}

/// Parse the event text format.
///
/// Each non-comment line is `sample previous id`, or `sample time previous
/// id` where the time column is ignored.
pub fn parse_events(content: &str) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        let (sample, previous, id) = match cols.as_slice() {
            [s, p, i] => (*s, *p, *i),
            [s, _time, p, i] => (*s, *p, *i),
            _ => {
                return Err(MneError::ParseError(format!(
                    "event line {}: expected 3 or 4 columns, found {}",
                    lineno + 1,
                    cols.len()
                )))
            }
        };
        let parse_err = |what: &str, v: &str| {
            MneError::ParseError(format!(
                "event line {}: invalid {} '{}'",
                lineno + 1,
                what,
                v
            ))
        };
        events.push(Event::new(
            sample.parse().map_err(|_| parse_err("sample", sample))?,
            previous.parse().map_err(|_| parse_err("previous value", previous))?,
            id.parse().map_err(|_| parse_err("event id", id))?,
        ));
    }
    Ok(events)
}

pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MneError::FileNotFound(path.display().to_string()));
    }
    parse_events(&std::fs::read_to_string(path)?)
}

pub fn format_events(events: &[Event]) -> String {
    let mut out = String::new();
    for e in events {
        let _ = writeln!(out, "{} {} {}", e.sample, e.previous, e.id);
    }
    out
}

pub fn write_events(path: impl AsRef<Path>, events: &[Event]) -> Result<()> {
    std::fs::write(path, format_events(events))?;
    Ok(())
}
