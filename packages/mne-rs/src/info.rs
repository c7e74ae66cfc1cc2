//! Measurement info: channel metadata and channel picking.

use crate::error::{MneError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sensor type of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Mag,
    Grad,
    Eeg,
    Eog,
    Ecg,
    Stim,
    Misc,
}

impl ChannelKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mag" => Some(Self::Mag),
            "grad" => Some(Self::Grad),
            "eeg" => Some(Self::Eeg),
            "eog" => Some(Self::Eog),
            "ecg" => Some(Self::Ecg),
            "stim" => Some(Self::Stim),
            "misc" => Some(Self::Misc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mag => "mag",
            Self::Grad => "grad",
            Self::Eeg => "eeg",
            Self::Eog => "eog",
            Self::Ecg => "ecg",
            Self::Stim => "stim",
            Self::Misc => "misc",
        }
    }

    pub fn is_meg(&self) -> bool {
        matches!(self, Self::Mag | Self::Grad)
    }

    /// Channels carrying brain signal (valid for filtering and covariance).
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Mag | Self::Grad | Self::Eeg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
    /// Multiplier applied when converting stored values to SI units
    #[serde(default = "default_unit_scale")]
    pub unit_scale: f64,
}

fn default_unit_scale() -> f64 {
    1.0
}

impl ChannelInfo {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unit_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub sfreq: f64,
    pub chs: Vec<ChannelInfo>,
    #[serde(default)]
    pub bads: Vec<String>,
    #[serde(default)]
    pub meas_date: Option<DateTime<Utc>>,
    /// Highpass corner already applied to the data (Hz)
    #[serde(default)]
    pub highpass: f64,
    /// Lowpass corner already applied to the data (Hz). Missing or zero in a
    /// file means unfiltered, read back as Nyquist.
    #[serde(default)]
    pub lowpass: f64,
    #[serde(default)]
    pub description: Option<String>,
}

impl Info {
    pub fn new(sfreq: f64, chs: Vec<ChannelInfo>) -> Result<Self> {
        if !(sfreq > 0.0) || !sfreq.is_finite() {
            return Err(MneError::InvalidParameter(format!(
                "Sampling frequency must be positive, got {}",
                sfreq
            )));
        }
        let info = Self {
            sfreq,
            chs,
            bads: Vec::new(),
            meas_date: None,
            highpass: 0.0,
            lowpass: sfreq / 2.0,
            description: None,
        };
        info.check_unique_names()?;
        Ok(info)
    }

    /// Clamp the filter corners read from a file to `[0, nyquist]`.
    pub(crate) fn normalize_filter_bounds(&mut self) {
        let nyquist = self.nyquist();
        if !(self.lowpass > 0.0) || self.lowpass > nyquist {
            self.lowpass = nyquist;
        }
        if !(self.highpass >= 0.0) {
            self.highpass = 0.0;
        }
    }

    pub(crate) fn check_unique_names(&self) -> Result<()> {
        let mut names: Vec<&str> = self.chs.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(MneError::InvalidParameter(format!(
                "Duplicate channel name: {}",
                w[0]
            )));
        }
        Ok(())
    }

    pub fn n_channels(&self) -> usize {
        self.chs.len()
    }

    pub fn ch_names(&self) -> Vec<String> {
        self.chs.iter().map(|c| c.name.clone()).collect()
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.chs.iter().position(|c| c.name == name)
    }

    pub fn nyquist(&self) -> f64 {
        self.sfreq / 2.0
    }

    /// Restrict to `picks`, in the order given. Bads not picked are dropped.
    pub fn pick_info(&self, picks: &[usize]) -> Result<Self> {
        let mut chs = Vec::with_capacity(picks.len());
        for &p in picks {
            let ch = self.chs.get(p).ok_or_else(|| {
                MneError::InvalidParameter(format!(
                    "Pick index {} out of range for {} channels",
                    p,
                    self.chs.len()
                ))
            })?;
            chs.push(ch.clone());
        }
        let bads = self
            .bads
            .iter()
            .filter(|b| chs.iter().any(|c| &c.name == *b))
            .cloned()
            .collect();
        Ok(Self {
            chs,
            bads,
            ..self.clone()
        })
    }
}

/// Which MEG sensors to pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MegPick {
    #[default]
    None,
    All,
    Mag,
    Grad,
}

/// Channels removed from a pick
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Exclude {
    #[default]
    Bads,
    Nothing,
    Names(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct PickSpec {
    pub meg: MegPick,
    pub eeg: bool,
    pub eog: bool,
    pub ecg: bool,
    pub stim: bool,
    pub misc: bool,
    /// Names always added to the pick
    pub include: Vec<String>,
    pub exclude: Exclude,
}

impl PickSpec {
    pub fn meg() -> Self {
        Self {
            meg: MegPick::All,
            ..Default::default()
        }
    }

    pub fn data() -> Self {
        Self {
            meg: MegPick::All,
            eeg: true,
            ..Default::default()
        }
    }

    fn wants(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Mag => matches!(self.meg, MegPick::All | MegPick::Mag),
            ChannelKind::Grad => matches!(self.meg, MegPick::All | MegPick::Grad),
            ChannelKind::Eeg => self.eeg,
            ChannelKind::Eog => self.eog,
            ChannelKind::Ecg => self.ecg,
            ChannelKind::Stim => self.stim,
            ChannelKind::Misc => self.misc,
        }
    }
}

/// Indices of the channels matching `spec`, in ascending order.
pub fn pick_types(info: &Info, spec: &PickSpec) -> Vec<usize> {
    let excluded: Vec<&str> = match &spec.exclude {
        Exclude::Bads => info.bads.iter().map(String::as_str).collect(),
        Exclude::Nothing => Vec::new(),
        Exclude::Names(names) => names.iter().map(String::as_str).collect(),
    };

    info.chs
        .iter()
        .enumerate()
        .filter(|(_, ch)| spec.wants(ch.kind) || spec.include.contains(&ch.name))
        .filter(|(_, ch)| !excluded.contains(&ch.name.as_str()))
        .map(|(i, _)| i)
        .collect()
}

/// Indices of `names`, in the order of `names`.
pub fn pick_channels(info: &Info, names: &[String]) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|n| {
            info.channel_index(n)
                .ok_or_else(|| MneError::ChannelNotFound(n.clone()))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_info() -> Info {
        let mut info = Info::new(
            100.0,
            vec![
                ChannelInfo::new("MEG 0111", ChannelKind::Grad),
                ChannelInfo::new("MEG 0112", ChannelKind::Grad),
                ChannelInfo::new("MEG 0113", ChannelKind::Mag),
                ChannelInfo::new("EEG 001", ChannelKind::Eeg),
                ChannelInfo::new("EOG 061", ChannelKind::Eog),
                ChannelInfo::new("STI 014", ChannelKind::Stim),
            ],
        )
        .unwrap();
        info.bads = vec!["MEG 0112".to_string()];
        info
    }

    #[test]
    fn test_pick_meg_excludes_bads() {
        let info = sample_info();
        assert_eq!(pick_types(&info, &PickSpec::meg()), vec![0, 2]);
    }

    #[test]
    fn test_pick_mag_only() {
        let info = sample_info();
        let spec = PickSpec {
            meg: MegPick::Mag,
            ..Default::default()
        };
        assert_eq!(pick_types(&info, &spec), vec![2]);
    }

    #[test]
    fn test_pick_include_and_exclude_nothing() {
        let info = sample_info();
        let spec = PickSpec {
            meg: MegPick::Grad,
            eog: true,
            include: vec!["STI 014".to_string()],
            exclude: Exclude::Nothing,
            ..Default::default()
        };
        assert_eq!(pick_types(&info, &spec), vec![0, 1, 4, 5]);
    }

    #[test]
    fn test_pick_channels_by_name() {
        let info = sample_info();
        let picks =
            pick_channels(&info, &["EEG 001".to_string(), "MEG 0111".to_string()]).unwrap();
        assert_eq!(picks, vec![3, 0]);
        assert!(pick_channels(&info, &["nope".to_string()]).is_err());
    }

    #[test]
    fn test_pick_info_keeps_bads_subset() {
        let info = sample_info();
        let sub = info.pick_info(&[1, 3]).unwrap();
        assert_eq!(sub.ch_names(), vec!["MEG 0112", "EEG 001"]);
        assert_eq!(sub.bads, vec!["MEG 0112".to_string()]);
        let sub = info.pick_info(&[0]).unwrap();
        assert!(sub.bads.is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let chs = vec![
            ChannelInfo::new("A", ChannelKind::Eeg),
            ChannelInfo::new("A", ChannelKind::Eeg),
        ];
        assert!(Info::new(100.0, chs).is_err());
        assert!(Info::new(0.0, vec![]).is_err());
    }
}
