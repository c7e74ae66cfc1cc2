//! Event-locked segments of a raw recording.
//!
//! Epochs either hold their data in memory (`preload`) or read each segment
//! from the raw on demand. Both paths run the same baseline, rejection and
//! decimation steps, so they produce identical data.

use crate::error::{MneError, Result};
use crate::events::Event;
use crate::evoked::{rescale, Baseline, Evoked};
use crate::info::{pick_types, ChannelKind, Info, PickSpec};
use crate::io::Raw;
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Drop-log reason for events whose window leaves the recording
pub const DROP_TOO_SHORT: &str = "TOO_SHORT";
/// Drop-log reason used by `equalize_event_counts`
pub const DROP_EQUALIZED: &str = "EQUALIZED_COUNT";

/// Condition names mapped to event codes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventId(BTreeMap<String, i32>);

impl EventId {
    /// A single code, named after itself
    pub fn single(id: i32) -> Self {
        let mut map = BTreeMap::new();
        map.insert(id.to_string(), id);
        Self(map)
    }

    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, i32)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.0.get(name).copied()
    }

    pub fn contains_id(&self, id: i32) -> bool {
        self.0.values().any(|&v| v == id)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-channel-type amplitude limits (peak-to-peak)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Thresholds(BTreeMap<ChannelKind, f64>);

impl Thresholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ChannelKind, value: f64) -> Self {
        self.0.insert(kind, value);
        self
    }

    pub fn get(&self, kind: ChannelKind) -> Option<f64> {
        self.0.get(&kind).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `grad=4000e-13,mag=4e-12,eog=150e-6`.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut thresholds = Self::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (kind, value) = part.split_once('=').ok_or_else(|| {
                MneError::InvalidParameter(format!(
                    "Invalid threshold '{}': expected 'type=value'",
                    part
                ))
            })?;
            let kind = ChannelKind::from_str(kind.trim()).ok_or_else(|| {
                MneError::InvalidParameter(format!("Unknown channel type '{}'", kind))
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                MneError::InvalidParameter(format!("Invalid threshold value '{}'", value))
            })?;
            if !(value >= 0.0) {
                return Err(MneError::InvalidParameter(format!(
                    "Threshold for {} must be non-negative",
                    kind.as_str()
                )));
            }
            thresholds = thresholds.with(kind, value);
        }
        Ok(thresholds)
    }
}

#[derive(Debug, Clone)]
pub struct EpochsParams {
    pub tmin: f64,
    pub tmax: f64,
    pub baseline: Option<Baseline>,
    /// Raw channel indices; all channels if `None`
    pub picks: Option<Vec<usize>>,
    pub reject: Option<Thresholds>,
    pub flat: Option<Thresholds>,
    pub preload: bool,
    pub decim: usize,
}

impl EpochsParams {
    pub fn new(tmin: f64, tmax: f64) -> Self {
        Self {
            tmin,
            tmax,
            baseline: Some(Baseline::pre_stimulus()),
            picks: None,
            reject: None,
            flat: None,
            preload: false,
            decim: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Epochs {
    raw: Arc<Raw>,
    info: Info,
    picks: Vec<usize>,
    events: Vec<Event>,
    event_id: EventId,
    tmin: f64,
    tmax: f64,
    start_offset: i64,
    full_times: Vec<f64>,
    times: Vec<f64>,
    baseline: Option<Baseline>,
    reject: Option<Thresholds>,
    flat: Option<Thresholds>,
    decim: usize,
    selection: Vec<usize>,
    drop_log: Vec<Vec<String>>,
    bad_dropped: bool,
    data: Option<Vec<DMatrix<f64>>>,
}

impl Epochs {
    pub fn new(
        raw: Arc<Raw>,
        events: &[Event],
        event_id: EventId,
        params: EpochsParams,
    ) -> Result<Self> {
        if params.tmin > params.tmax {
            return Err(MneError::InvalidParameter(format!(
                "tmin ({}) must be less than or equal to tmax ({})",
                params.tmin, params.tmax
            )));
        }
        if params.decim == 0 {
            return Err(MneError::InvalidParameter(
                "decim must be at least 1".to_string(),
            ));
        }
        if event_id.is_empty() {
            return Err(MneError::InvalidParameter(
                "At least one event id is required".to_string(),
            ));
        }

        let n_raw_ch = raw.info().n_channels();
        let picks = params
            .picks
            .clone()
            .unwrap_or_else(|| (0..n_raw_ch).collect());
        let mut info = raw.info().pick_info(&picks)?;
        info.sfreq = raw.sfreq() / params.decim as f64;
        info.lowpass = info.lowpass.min(info.nyquist());

        let events: Vec<Event> = events
            .iter()
            .filter(|e| event_id.contains_id(e.id))
            .copied()
            .collect();
        if events.is_empty() {
            return Err(MneError::InvalidParameter(format!(
                "No events matching event ids {:?}",
                event_id.names()
            )));
        }

        let sfreq = raw.sfreq();
        let start_offset = (params.tmin * sfreq).round() as i64;
        let stop_offset = (params.tmax * sfreq).round() as i64;
        let full_times: Vec<f64> = (start_offset..=stop_offset)
            .map(|s| s as f64 / sfreq)
            .collect();
        let times: Vec<f64> = full_times.iter().copied().step_by(params.decim).collect();

        if let Some(baseline) = &params.baseline {
            baseline.indices(&full_times)?;
        }

        let n_events = events.len();
        let mut epochs = Self {
            raw,
            info,
            picks,
            events,
            event_id,
            tmin: params.tmin,
            tmax: params.tmax,
            start_offset,
            full_times,
            times,
            baseline: params.baseline,
            reject: params.reject.filter(|t| !t.is_empty()),
            flat: params.flat.filter(|t| !t.is_empty()),
            decim: params.decim,
            selection: (0..n_events).collect(),
            drop_log: vec![Vec::new(); n_events],
            bad_dropped: false,
            data: None,
        };

        log::info!(
            "{} matching events, epoch window {} - {} s ({} samples)",
            n_events,
            epochs.tmin,
            epochs.tmax,
            epochs.full_times.len()
        );

        if params.preload {
            epochs.drop_bad_inner(true)?;
        }
        Ok(epochs)
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn ch_names(&self) -> Vec<String> {
        self.info.ch_names()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Index of each kept epoch in the matched event list
    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    pub fn drop_log(&self) -> &[Vec<String>] {
        &self.drop_log
    }

    pub fn sfreq(&self) -> f64 {
        self.info.sfreq
    }

    pub fn is_preloaded(&self) -> bool {
        self.data.is_some()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Read, baseline-correct and decimate one epoch. `None` when the window
    /// leaves the recording. The second value lists rejection reasons.
    fn load_epoch(&self, event: &Event) -> Result<Option<(DMatrix<f64>, Vec<String>)>> {
        let start = event.sample - self.raw.first_samp() + self.start_offset;
        let stop = start + self.full_times.len() as i64;
        if start < 0 || stop > self.raw.n_times() as i64 {
            return Ok(None);
        }

        let mut data = self
            .raw
            .get_data(Some(&self.picks), start as usize, stop as usize)?;

        if let Some(baseline) = &self.baseline {
            let stim_rows: Vec<usize> = self
                .info
                .chs
                .iter()
                .enumerate()
                .filter(|(_, c)| c.kind == ChannelKind::Stim)
                .map(|(i, _)| i)
                .collect();
            let saved: Vec<_> = stim_rows.iter().map(|&r| data.row(r).clone_owned()).collect();
            rescale(&mut data, &self.full_times, baseline)?;
            for (&r, row) in stim_rows.iter().zip(saved) {
                data.set_row(r, &row);
            }
        }

        let reasons = self.check_amplitudes(&data);

        if self.decim > 1 {
            let cols: Vec<usize> = (0..data.ncols()).step_by(self.decim).collect();
            data = data.select_columns(cols.iter());
        }
        Ok(Some((data, reasons)))
    }

    fn check_amplitudes(&self, data: &DMatrix<f64>) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.reject.is_none() && self.flat.is_none() {
            return reasons;
        }
        for (r, ch) in self.info.chs.iter().enumerate() {
            let row = data.row(r);
            let ptp = row.max() - row.min();
            let too_big = self
                .reject
                .as_ref()
                .and_then(|t| t.get(ch.kind))
                .is_some_and(|limit| ptp > limit);
            let too_flat = self
                .flat
                .as_ref()
                .and_then(|t| t.get(ch.kind))
                .is_some_and(|limit| ptp < limit);
            if too_big || too_flat {
                reasons.push(ch.name.clone());
            }
        }
        reasons
    }

    fn drop_bad_inner(&mut self, keep_data: bool) -> Result<()> {
        if self.bad_dropped {
            return Ok(());
        }
        let mut kept_events = Vec::with_capacity(self.events.len());
        let mut kept_selection = Vec::with_capacity(self.events.len());
        let mut kept_data = Vec::new();

        for (event, &sel) in self.events.iter().zip(&self.selection) {
            match self.load_epoch(event)? {
                None => {
                    log::debug!("Dropping event at sample {}: outside data", event.sample);
                    self.drop_log[sel].push(DROP_TOO_SHORT.to_string());
                }
                Some((_, reasons)) if !reasons.is_empty() => {
                    log::debug!(
                        "Rejecting epoch at sample {} based on {}",
                        event.sample,
                        reasons.join(", ")
                    );
                    self.drop_log[sel].extend(reasons);
                }
                Some((data, _)) => {
                    kept_events.push(*event);
                    kept_selection.push(sel);
                    if keep_data {
                        kept_data.push(data);
                    }
                }
            }
        }

        let n_dropped = self.events.len() - kept_events.len();
        if n_dropped > 0 {
            log::info!("{} bad epochs dropped", n_dropped);
        }
        self.events = kept_events;
        self.selection = kept_selection;
        if keep_data {
            self.data = Some(kept_data);
        }
        self.bad_dropped = true;
        Ok(())
    }

    /// Apply rejection to every epoch without keeping the data in memory.
    pub fn drop_bad(&mut self) -> Result<()> {
        self.drop_bad_inner(false)
    }

    /// Read all remaining epochs into memory.
    pub fn load_data(&mut self) -> Result<()> {
        if self.data.is_some() {
            return Ok(());
        }
        if !self.bad_dropped {
            return self.drop_bad_inner(true);
        }
        let data = self.collect_data()?;
        self.data = Some(data);
        Ok(())
    }

    fn collect_data(&self) -> Result<Vec<DMatrix<f64>>> {
        self.events
            .iter()
            .map(|e| {
                self.load_epoch(e)?.map(|(d, _)| d).ok_or_else(|| {
                    MneError::InvalidParameter(format!(
                        "Epoch at sample {} is outside the raw data",
                        e.sample
                    ))
                })
            })
            .collect()
    }

    /// Good epochs, each `channels x times`.
    pub fn get_data(&mut self) -> Result<Vec<DMatrix<f64>>> {
        self.drop_bad()?;
        match &self.data {
            Some(data) => Ok(data.clone()),
            None => self.collect_data(),
        }
    }

    /// Mean over good epochs.
    pub fn average(&mut self) -> Result<Evoked> {
        let data = self.get_data()?;
        let first = data.first().ok_or_else(|| {
            MneError::InvalidParameter("Cannot average: all epochs were dropped".to_string())
        })?;
        let mut sum = DMatrix::zeros(first.nrows(), first.ncols());
        for epoch in &data {
            sum += epoch;
        }
        sum /= data.len() as f64;

        let mut evoked = Evoked::new(self.info.clone(), self.times.clone(), sum, data.len())?;
        evoked.comment = self.event_id.names().join(" + ");
        Ok(evoked)
    }

    /// Keep the channels at `positions` (indices into the current channels).
    fn keep_channels(&mut self, positions: &[usize]) -> Result<()> {
        self.info = self.info.pick_info(positions)?;
        self.picks = positions.iter().map(|&p| self.picks[p]).collect();
        if let Some(data) = &mut self.data {
            for epoch in data.iter_mut() {
                *epoch = epoch.select_rows(positions.iter());
            }
        }
        Ok(())
    }

    /// Remove channels by position in the current channel list.
    pub fn drop_picks(&mut self, positions: &[usize]) -> Result<()> {
        let n = self.info.n_channels();
        if let Some(&bad) = positions.iter().find(|&&p| p >= n) {
            return Err(MneError::InvalidParameter(format!(
                "Channel position {} out of range for {} channels",
                bad, n
            )));
        }
        let keep: Vec<usize> = (0..n).filter(|p| !positions.contains(p)).collect();
        self.keep_channels(&keep)
    }

    pub fn drop_channels(&mut self, names: &[String]) -> Result<()> {
        let positions = names
            .iter()
            .map(|name| {
                self.info
                    .channel_index(name)
                    .ok_or_else(|| MneError::ChannelNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.drop_picks(&positions)
    }

    pub fn pick_types(&mut self, spec: &PickSpec) -> Result<()> {
        let keep = pick_types(&self.info, spec);
        if keep.is_empty() {
            return Err(MneError::InvalidParameter(
                "No channels match the selection".to_string(),
            ));
        }
        self.keep_channels(&keep)
    }

    /// Remove epochs at `positions`, recording `reason` in the drop log.
    pub fn drop_epochs(&mut self, positions: &[usize], reason: &str) -> Result<()> {
        self.drop_bad()?;
        let n = self.events.len();
        if let Some(&bad) = positions.iter().find(|&&p| p >= n) {
            return Err(MneError::InvalidParameter(format!(
                "Epoch position {} out of range for {} epochs",
                bad, n
            )));
        }
        for &p in positions {
            self.drop_log[self.selection[p]].push(reason.to_string());
        }
        let keep = |i: &usize| !positions.contains(i);
        self.events = (0..n).filter(keep).map(|i| self.events[i]).collect();
        self.selection = (0..n).filter(keep).map(|i| self.selection[i]).collect();
        if let Some(data) = self.data.take() {
            self.data = Some(
                data.into_iter()
                    .enumerate()
                    .filter(|(i, _)| keep(i))
                    .map(|(_, d)| d)
                    .collect(),
            );
        }
        Ok(())
    }

    fn positions_of(&self, name: &str) -> Result<Vec<usize>> {
        let id = self
            .event_id
            .get(name)
            .ok_or_else(|| MneError::InvalidParameter(format!("Unknown condition '{}'", name)))?;
        Ok(self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.id == id)
            .map(|(i, _)| i)
            .collect())
    }

    /// Epochs of a single condition.
    pub fn condition(&mut self, name: &str) -> Result<Epochs> {
        self.drop_bad()?;
        let positions = self.positions_of(name)?;
        let id = self.event_id.get(name).unwrap_or_default();

        let mut subset = self.clone();
        subset.event_id = EventId::from_pairs([(name.to_string(), id)]);
        let others: Vec<usize> = (0..self.events.len())
            .filter(|i| !positions.contains(i))
            .collect();
        subset.events = positions.iter().map(|&i| self.events[i]).collect();
        subset.selection = positions.iter().map(|&i| self.selection[i]).collect();
        if let Some(data) = &self.data {
            subset.data = Some(positions.iter().map(|&i| data[i].clone()).collect());
        }
        log::debug!(
            "Condition '{}': {} epochs ({} excluded)",
            name,
            positions.len(),
            others.len()
        );
        Ok(subset)
    }

    /// Drop epochs so every named condition has the same count.
    ///
    /// The smallest condition is kept whole; larger ones keep the epochs
    /// closest in time to the smallest condition's events.
    pub fn equalize_event_counts(&mut self, names: &[&str]) -> Result<()> {
        if names.len() < 2 {
            return Ok(());
        }
        self.drop_bad()?;
        let groups: Vec<Vec<usize>> = names
            .iter()
            .map(|n| self.positions_of(n))
            .collect::<Result<_>>()?;

        let (smallest, target) = groups
            .iter()
            .enumerate()
            .min_by_key(|(_, g)| g.len())
            .map(|(i, g)| (i, g.len()))
            .unwrap_or((0, 0));
        let anchors: Vec<i64> = groups[smallest]
            .iter()
            .map(|&p| self.events[p].sample)
            .collect();

        let mut to_drop = Vec::new();
        for (gi, group) in groups.iter().enumerate() {
            if gi == smallest || group.len() <= target {
                continue;
            }
            let mut scored: Vec<(i64, usize)> = group
                .iter()
                .map(|&p| {
                    let s = self.events[p].sample;
                    let dist = anchors.iter().map(|a| (a - s).abs()).min().unwrap_or(0);
                    (dist, p)
                })
                .collect();
            scored.sort();
            to_drop.extend(scored[target..].iter().map(|&(_, p)| p));
        }
        to_drop.sort_unstable();
        to_drop.dedup();
        log::info!(
            "Equalizing {} conditions to {} epochs each ({} dropped)",
            names.len(),
            target,
            to_drop.len()
        );
        self.drop_epochs(&to_drop, DROP_EQUALIZED)
    }
}
