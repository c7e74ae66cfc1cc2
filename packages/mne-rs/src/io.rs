//! Continuous (raw) recordings.
//!
//! A raw file is a JSON header (`*.json`) next to a binary body (`*.bin`)
//! holding little-endian `f32` samples in sample-major order: all channels of
//! sample 0, then all channels of sample 1, and so on. That layout matches
//! the column-major storage of a `channels x times` `DMatrix`, so preloading
//! is a straight copy and lazy segment reads are one contiguous slice.

use crate::error::{MneError, Result};
use crate::filter::{self, NotchFilter, DEFAULT_ORDER};
use crate::info::{pick_channels, Info};
use memmap2::Mmap;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const RAW_FORMAT_VERSION: u32 = 1;
const BYTES_PER_SAMPLE: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHeader {
    pub format_version: u32,
    pub info: Info,
    pub first_samp: i64,
    pub n_times: usize,
    /// Body file name, relative to the header
    pub data_file: String,
}

#[derive(Debug)]
enum RawStorage {
    Memory(DMatrix<f64>),
    Mapped(Mmap),
}

/// Continuous recording, either in memory or memory-mapped from disk.
#[derive(Debug)]
pub struct Raw {
    info: Info,
    first_samp: i64,
    n_times: usize,
    storage: RawStorage,
    filename: Option<PathBuf>,
}

/// Open a file and map it into memory (read-only)
fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}

fn body_path_for(header_path: &Path) -> PathBuf {
    header_path.with_extension("bin")
}

impl Raw {
    /// Build an in-memory raw from a `channels x times` matrix.
    pub fn from_array(info: Info, data: DMatrix<f64>, first_samp: i64) -> Result<Self> {
        if data.nrows() != info.n_channels() {
            return Err(MneError::ShapeMismatch(format!(
                "Data has {} rows but info has {} channels",
                data.nrows(),
                info.n_channels()
            )));
        }
        info.check_unique_names()?;
        Ok(Self {
            n_times: data.ncols(),
            info,
            first_samp,
            storage: RawStorage::Memory(data),
            filename: None,
        })
    }

    /// Read a raw file. With `preload == false` the body stays memory-mapped.
    pub fn read(path: impl AsRef<Path>, preload: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MneError::FileNotFound(path.display().to_string()));
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return Err(MneError::UnsupportedFileType(format!(
                "{} (expected a .json raw header)",
                path.display()
            )));
        }

        let mut header: RawHeader = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if header.format_version != RAW_FORMAT_VERSION {
            return Err(MneError::ParseError(format!(
                "raw header: unsupported format version {}",
                header.format_version
            )));
        }
        header.info.check_unique_names()?;
        header.info.normalize_filter_bounds();

        let body_path = path
            .parent()
            .map(|p| p.join(&header.data_file))
            .unwrap_or_else(|| PathBuf::from(&header.data_file));
        let mmap = mmap_file(&body_path)?;

        let expected = header.n_times * header.info.n_channels() * BYTES_PER_SAMPLE;
        if mmap.len() != expected {
            return Err(MneError::ParseError(format!(
                "raw body {}: expected {} bytes, found {}",
                body_path.display(),
                expected,
                mmap.len()
            )));
        }

        log::info!(
            "Opened raw {} ({} channels x {} samples, {:.3} s)",
            path.display(),
            header.info.n_channels(),
            header.n_times,
            header.n_times as f64 / header.info.sfreq
        );

        let mut raw = Self {
            info: header.info,
            first_samp: header.first_samp,
            n_times: header.n_times,
            storage: RawStorage::Mapped(mmap),
            filename: Some(path.to_path_buf()),
        };
        if preload {
            raw.load_data()?;
        }
        Ok(raw)
    }

    /// Write header and body. `path` must end in `.json`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return Err(MneError::UnsupportedFileType(format!(
                "{} (raw files are saved as .json + .bin)",
                path.display()
            )));
        }
        let body_path = body_path_for(path);
        let data_file = body_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MneError::InvalidParameter(format!("Invalid path {:?}", path)))?
            .to_string();

        let data = self.get_data(None, 0, self.n_times)?;
        let scales: Vec<f64> = self.info.chs.iter().map(|c| c.unit_scale).collect();

        let mut writer = BufWriter::new(File::create(&body_path)?);
        for t in 0..self.n_times {
            for (c, scale) in scales.iter().enumerate() {
                let stored = (data[(c, t)] / scale) as f32;
                writer.write_all(&stored.to_le_bytes())?;
            }
        }
        writer.flush()?;

        let header = RawHeader {
            format_version: RAW_FORMAT_VERSION,
            info: self.info.clone(),
            first_samp: self.first_samp,
            n_times: self.n_times,
            data_file,
        };
        std::fs::write(path, serde_json::to_string_pretty(&header)?)?;

        log::info!("Saved raw to {}", path.display());
        Ok(())
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut Info {
        &mut self.info
    }

    pub fn sfreq(&self) -> f64 {
        self.info.sfreq
    }

    pub fn n_times(&self) -> usize {
        self.n_times
    }

    pub fn first_samp(&self) -> i64 {
        self.first_samp
    }

    pub fn last_samp(&self) -> i64 {
        self.first_samp + self.n_times as i64 - 1
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn is_preloaded(&self) -> bool {
        matches!(self.storage, RawStorage::Memory(_))
    }

    pub fn duration(&self) -> f64 {
        self.n_times as f64 / self.info.sfreq
    }

    /// Sample times in seconds relative to the first sample
    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times)
            .map(|i| i as f64 / self.info.sfreq)
            .collect()
    }

    /// Nearest sample index of `time` (seconds from the first sample).
    pub fn time_as_index(&self, time: f64) -> Result<usize> {
        let idx = (time * self.info.sfreq).round();
        if idx < 0.0 || idx as usize >= self.n_times.max(1) {
            return Err(MneError::InvalidParameter(format!(
                "Time {} s is outside the recording (0 - {:.3} s)",
                time,
                self.duration()
            )));
        }
        Ok(idx as usize)
    }

    /// Samples `[start, stop)` of `picks` (all channels if `None`).
    pub fn get_data(
        &self,
        picks: Option<&[usize]>,
        start: usize,
        stop: usize,
    ) -> Result<DMatrix<f64>> {
        if start > stop || stop > self.n_times {
            return Err(MneError::InvalidParameter(format!(
                "Invalid sample range [{}, {}) for {} samples",
                start, stop, self.n_times
            )));
        }
        let n_ch = self.info.n_channels();
        let all: Vec<usize>;
        let picks = match picks {
            Some(p) => p,
            None => {
                all = (0..n_ch).collect();
                &all
            }
        };
        if let Some(&bad) = picks.iter().find(|&&p| p >= n_ch) {
            return Err(MneError::InvalidParameter(format!(
                "Pick index {} out of range for {} channels",
                bad, n_ch
            )));
        }

        let n = stop - start;
        match &self.storage {
            RawStorage::Memory(data) => Ok(DMatrix::from_fn(picks.len(), n, |r, c| {
                data[(picks[r], start + c)]
            })),
            RawStorage::Mapped(mmap) => {
                let bytes = &mmap[start * n_ch * BYTES_PER_SAMPLE..stop * n_ch * BYTES_PER_SAMPLE];
                let chs = &self.info.chs;
                Ok(DMatrix::from_fn(picks.len(), n, |r, c| {
                    let ch = picks[r];
                    let offset = (c * n_ch + ch) * BYTES_PER_SAMPLE;
                    let raw = [
                        bytes[offset],
                        bytes[offset + 1],
                        bytes[offset + 2],
                        bytes[offset + 3],
                    ];
                    f32::from_le_bytes(raw) as f64 * chs[ch].unit_scale
                }))
            }
        }
    }

    /// Pull a memory-mapped body into memory.
    pub fn load_data(&mut self) -> Result<()> {
        if self.is_preloaded() {
            return Ok(());
        }
        let data = self.get_data(None, 0, self.n_times)?;
        self.storage = RawStorage::Memory(data);
        log::debug!("Loaded {} samples into memory", self.n_times);
        Ok(())
    }

    fn data_mut(&mut self, operation: &str) -> Result<&mut DMatrix<f64>> {
        match &mut self.storage {
            RawStorage::Memory(data) => Ok(data),
            RawStorage::Mapped(_) => Err(MneError::NotPreloaded(operation.to_string())),
        }
    }

    fn default_filter_picks(&self, picks: Option<&[usize]>) -> Vec<usize> {
        match picks {
            Some(p) => p.to_vec(),
            None => self
                .info
                .chs
                .iter()
                .enumerate()
                .filter(|(_, ch)| ch.kind.is_data())
                .map(|(i, _)| i)
                .collect(),
        }
    }

    fn apply_per_channel<F>(&mut self, picks: &[usize], operation: &str, f: F) -> Result<()>
    where
        F: Fn(&[f64]) -> Vec<f64> + Sync,
    {
        let n_ch = self.info.n_channels();
        if let Some(&bad) = picks.iter().find(|&&p| p >= n_ch) {
            return Err(MneError::InvalidParameter(format!(
                "Pick index {} out of range for {} channels",
                bad, n_ch
            )));
        }
        let data = self.data_mut(operation)?;
        let rows: Vec<Vec<f64>> = picks
            .iter()
            .map(|&p| data.row(p).iter().copied().collect())
            .collect();
        let filtered: Vec<Vec<f64>> = rows.par_iter().map(|row| f(row)).collect();
        for (&p, row) in picks.iter().zip(filtered) {
            for (t, v) in row.into_iter().enumerate() {
                data[(p, t)] = v;
            }
        }
        Ok(())
    }

    /// Zero-phase Butterworth filtering of `picks` (data channels if `None`).
    pub fn filter(
        &mut self,
        l_freq: Option<f64>,
        h_freq: Option<f64>,
        picks: Option<&[usize]>,
    ) -> Result<()> {
        let sfreq = self.info.sfreq;
        let Some(design) = filter::design_filter(sfreq, l_freq, h_freq, DEFAULT_ORDER)? else {
            log::warn!("No filter corner given, data left unchanged");
            return Ok(());
        };
        let picks = self.default_filter_picks(picks);
        log::info!(
            "Filtering {} channels: highpass {:?} Hz, lowpass {:?} Hz",
            picks.len(),
            l_freq,
            h_freq
        );

        self.apply_per_channel(&picks, "filtering", |row| design.clone().filtfilt(row))?;

        if let Some(l) = l_freq {
            self.info.highpass = self.info.highpass.max(l);
        }
        if let Some(h) = h_freq {
            self.info.lowpass = self.info.lowpass.min(h);
        }
        Ok(())
    }

    /// Remove line noise at `freqs` (e.g. 50, 100, 150 Hz).
    pub fn notch_filter(&mut self, freqs: &[f64], q_factor: f64, picks: Option<&[usize]>) -> Result<()> {
        if freqs.is_empty() {
            return Err(MneError::InvalidParameter(
                "At least one notch frequency is required".to_string(),
            ));
        }
        if !(q_factor > 0.0) {
            return Err(MneError::InvalidParameter(format!(
                "Notch quality factor must be positive, got {}",
                q_factor
            )));
        }
        let design = NotchFilter::design_multi(freqs, self.info.sfreq, q_factor);
        if design.n_sections() == 0 {
            return Err(MneError::InvalidParameter(format!(
                "No notch frequency below Nyquist ({} Hz)",
                self.info.nyquist()
            )));
        }
        let picks = self.default_filter_picks(picks);
        self.apply_per_channel(&picks, "notch filtering", |row| design.clone().filtfilt(row))
    }

    /// Anti-alias filter and keep every `factor`-th sample.
    ///
    /// Stim channels are subsampled without filtering so trigger values stay
    /// intact.
    pub fn decimate(&mut self, factor: usize) -> Result<()> {
        if factor == 0 {
            return Err(MneError::InvalidParameter(
                "Decimation factor must be at least 1".to_string(),
            ));
        }
        if factor == 1 {
            return Ok(());
        }
        let sfreq = self.info.sfreq;
        let cutoff = filter::antialias_cutoff(sfreq, factor);
        let kinds: Vec<_> = self.info.chs.iter().map(|c| c.kind).collect();
        let data = self.data_mut("decimation")?;

        let rows: Vec<Vec<f64>> = (0..data.nrows())
            .map(|r| data.row(r).iter().copied().collect())
            .collect();
        let decimated: Vec<Vec<f64>> = rows
            .par_iter()
            .zip(kinds.par_iter())
            .map(|(row, kind)| {
                if kind.is_data() {
                    filter::decimate(row, sfreq, factor)
                } else {
                    Ok(row.iter().copied().step_by(factor).collect())
                }
            })
            .collect::<Result<_>>()?;

        let n_times = decimated.first().map(|r| r.len()).unwrap_or(0);
        *data = DMatrix::from_fn(decimated.len(), n_times, |r, c| decimated[r][c]);

        self.n_times = n_times;
        self.first_samp /= factor as i64;
        self.info.sfreq = sfreq / factor as f64;
        self.info.lowpass = self.info.lowpass.min(cutoff);
        log::info!(
            "Decimated by {}: {} Hz -> {} Hz",
            factor,
            sfreq,
            self.info.sfreq
        );
        Ok(())
    }

    /// Keep `[tmin, tmax]` seconds (relative to the first sample).
    pub fn crop(&mut self, tmin: f64, tmax: Option<f64>) -> Result<()> {
        let start = self.time_as_index(tmin)?;
        let stop = match tmax {
            Some(t) => self.time_as_index(t)? + 1,
            None => self.n_times,
        };
        if start >= stop {
            return Err(MneError::InvalidParameter(format!(
                "tmin ({}) must be less than tmax ({:?})",
                tmin, tmax
            )));
        }
        let data = self.data_mut("cropping")?;
        *data = data.columns(start, stop - start).into_owned();
        self.first_samp += start as i64;
        self.n_times = stop - start;
        Ok(())
    }

    /// Keep only `names`, in the order given.
    pub fn pick_channels(&mut self, names: &[String]) -> Result<()> {
        let picks = pick_channels(&self.info, names)?;
        let info = self.info.pick_info(&picks)?;
        let data = self.data_mut("channel picking")?;
        *data = data.select_rows(picks.iter());
        self.info = info;
        Ok(())
    }

    pub fn drop_channels(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            if self.info.channel_index(name).is_none() {
                return Err(MneError::ChannelNotFound(name.clone()));
            }
        }
        let keep: Vec<String> = self
            .info
            .ch_names()
            .into_iter()
            .filter(|n| !names.contains(n))
            .collect();
        self.pick_channels(&keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{ChannelInfo, ChannelKind};
    use std::f64::consts::PI;

    fn make_raw() -> Raw {
        let info = Info::new(
            100.0,
            vec![
                ChannelInfo::new("EEG 001", ChannelKind::Eeg),
                ChannelInfo::new("EEG 002", ChannelKind::Eeg),
                ChannelInfo::new("STI 014", ChannelKind::Stim),
            ],
        )
        .unwrap();
        let data = DMatrix::from_fn(3, 500, |r, c| match r {
            0 => (2.0 * PI * 5.0 * c as f64 / 100.0).sin(),
            1 => c as f64 * 0.5,
            _ => {
                if c % 100 == 10 {
                    1.0
                } else {
                    0.0
                }
            }
        });
        Raw::from_array(info, data, 1000).unwrap()
    }

    #[test]
    fn test_save_read_preload_and_mapped_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_raw.json");
        let raw = make_raw();
        raw.save(&path).unwrap();

        let mapped = Raw::read(&path, false).unwrap();
        let loaded = Raw::read(&path, true).unwrap();
        assert!(!mapped.is_preloaded());
        assert!(loaded.is_preloaded());
        assert_eq!(mapped.first_samp(), 1000);
        assert_eq!(mapped.last_samp(), 1499);

        let a = mapped.get_data(Some(&[1, 0]), 20, 60).unwrap();
        let b = loaded.get_data(Some(&[1, 0]), 20, 60).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.shape(), (2, 40));
        assert!((a[(0, 0)] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_read_rejects_wrong_extension_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.fif");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(
            Raw::read(&path, true),
            Err(MneError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            Raw::read(dir.path().join("missing.json"), true),
            Err(MneError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short_raw.json");
        make_raw().save(&path).unwrap();
        std::fs::write(dir.path().join("short_raw.bin"), [0u8; 12]).unwrap();
        assert!(matches!(Raw::read(&path, false), Err(MneError::ParseError(_))));
    }

    #[test]
    fn test_header_without_lowpass_reads_nyquist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old_raw.json");
        make_raw().save(&path).unwrap();
        let mut header: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        header["info"].as_object_mut().unwrap().remove("lowpass");
        std::fs::write(&path, header.to_string()).unwrap();

        let mut raw = Raw::read(&path, true).unwrap();
        assert_eq!(raw.info().lowpass, 50.0);
        raw.filter(None, Some(20.0), None).unwrap();
        assert_eq!(raw.info().lowpass, 20.0);
    }

    #[test]
    fn test_filter_requires_preload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lazy_raw.json");
        make_raw().save(&path).unwrap();
        let mut raw = Raw::read(&path, false).unwrap();
        assert!(matches!(
            raw.filter(None, Some(20.0), None),
            Err(MneError::NotPreloaded(_))
        ));
        raw.load_data().unwrap();
        raw.filter(None, Some(20.0), None).unwrap();
        assert_eq!(raw.info().lowpass, 20.0);
    }

    #[test]
    fn test_filter_leaves_stim_untouched() {
        let mut raw = make_raw();
        let before = raw.get_data(Some(&[2]), 0, 500).unwrap();
        raw.filter(Some(1.0), Some(30.0), None).unwrap();
        let after = raw.get_data(Some(&[2]), 0, 500).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_decimate_updates_sfreq_and_first_samp() {
        let mut raw = make_raw();
        raw.decimate(4).unwrap();
        assert_eq!(raw.sfreq(), 25.0);
        assert_eq!(raw.n_times(), 125);
        assert_eq!(raw.first_samp(), 250);
        assert!(raw.info().lowpass <= 100.0 / 12.0 + 1e-12);
    }

    #[test]
    fn test_crop_and_drop_channels() {
        let mut raw = make_raw();
        raw.crop(1.0, Some(2.0)).unwrap();
        assert_eq!(raw.n_times(), 101);
        assert_eq!(raw.first_samp(), 1100);

        raw.drop_channels(&["EEG 002".to_string()]).unwrap();
        assert_eq!(raw.info().ch_names(), vec!["EEG 001", "STI 014"]);
        assert!(raw.drop_channels(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_time_as_index() {
        let raw = make_raw();
        assert_eq!(raw.time_as_index(0.104).unwrap(), 10);
        assert!(raw.time_as_index(-1.0).is_err());
        assert!(raw.time_as_index(10.0).is_err());
    }
}
