//! Stockwell (S) transform with epoch-averaged power and inter-trial coherence.

use crate::error::{MneError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::cell::RefCell;
use std::f64::consts::PI;

thread_local! {
    static FFT_PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

#[derive(Debug, Clone)]
pub struct StockwellParams {
    /// Lowest frequency (Hz); the first positive FFT bin if `None`
    pub fmin: Option<f64>,
    /// Highest frequency (Hz); the highest positive FFT bin if `None`
    pub fmax: Option<f64>,
    /// Gaussian window width; 1.0 is the classical transform
    pub width: f64,
    pub decim: usize,
    pub return_itc: bool,
}

impl Default for StockwellParams {
    fn default() -> Self {
        Self {
            fmin: None,
            fmax: None,
            width: 1.0,
            decim: 1,
            return_itc: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AverageTfr {
    pub ch_names: Vec<String>,
    pub freqs: Vec<f64>,
    pub times: Vec<f64>,
    /// One `n_freqs x n_times` matrix per channel
    pub power: Vec<DMatrix<f64>>,
    pub itc: Option<Vec<DMatrix<f64>>>,
    pub nave: usize,
}

impl AverageTfr {
    pub fn channel_power(&self, name: &str) -> Option<&DMatrix<f64>> {
        self.ch_names
            .iter()
            .position(|c| c == name)
            .map(|i| &self.power[i])
    }
}

fn fft_in_place(buf: &mut [Complex<f64>], inverse: bool) {
    FFT_PLANNER.with(|planner| {
        let mut planner = planner.borrow_mut();
        let fft = if inverse {
            planner.plan_fft_inverse(buf.len())
        } else {
            planner.plan_fft_forward(buf.len())
        };
        fft.process(buf);
    });
    if inverse {
        let n = buf.len() as f64;
        for v in buf.iter_mut() {
            *v /= n;
        }
    }
}

/// Signed FFT bin frequencies, in the usual FFT output order.
fn fft_freqs(n: usize, sfreq: f64) -> Vec<f64> {
    (0..n)
        .map(|k| {
            let k = if k < n.div_ceil(2) { k as f64 } else { k as f64 - n as f64 };
            k * sfreq / n as f64
        })
        .collect()
}

fn closest_bin(freqs: &[f64], target: f64) -> usize {
    freqs
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
        .map_or(0, |(i, _)| i)
}

/// Frequency-domain Gaussian windows for bins `start_f..stop_f`.
fn precompute_windows(
    n: usize,
    start_f: usize,
    stop_f: usize,
    sfreq: f64,
    width: f64,
) -> Vec<Vec<Complex<f64>>> {
    let raw: Vec<f64> = fft_freqs(n, sfreq).iter().map(|f| f / n as f64).collect();
    let mut tw = Vec::with_capacity(n);
    tw.push(raw[0]);
    tw.extend(raw[1..].iter().rev());

    (start_f..stop_f)
        .map(|f| {
            let f = f as f64;
            let mut window: Vec<f64> = if f == 0.0 {
                vec![1.0; n]
            } else {
                tw.iter()
                    .map(|t| {
                        f / ((2.0 * PI).sqrt() * width)
                            * (-0.5 / (width * width) * f * f * t * t).exp()
                    })
                    .collect()
            };
            let sum: f64 = window.iter().sum();
            for w in window.iter_mut() {
                *w /= sum;
            }
            let mut buf: Vec<Complex<f64>> =
                window.into_iter().map(|w| Complex::new(w, 0.0)).collect();
            fft_in_place(&mut buf, false);
            buf
        })
        .collect()
}

/// Power (and ITC) of one channel across epochs.
fn channel_power_itc(
    signals: &[Vec<f64>],
    n_fft: usize,
    n_times: usize,
    start_f: usize,
    windows: &[Vec<Complex<f64>>],
    decim: usize,
    compute_itc: bool,
) -> (DMatrix<f64>, Option<DMatrix<f64>>) {
    let n_out = n_times.div_ceil(decim);
    let n_epochs = signals.len() as f64;
    let mut power = DMatrix::zeros(windows.len(), n_out);
    let mut itc = compute_itc.then(|| DMatrix::zeros(windows.len(), n_out));

    let spectra: Vec<Vec<Complex<f64>>> = signals
        .iter()
        .map(|x| {
            let mut buf: Vec<Complex<f64>> = x
                .iter()
                .map(|&v| Complex::new(v, 0.0))
                .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
                .take(n_fft)
                .collect();
            fft_in_place(&mut buf, false);
            buf
        })
        .collect();

    let mut st = vec![Complex::new(0.0, 0.0); n_fft];
    let mut phase_sum = vec![Complex::new(0.0, 0.0); n_out];
    for (i_f, window) in windows.iter().enumerate() {
        let f = start_f + i_f;
        phase_sum.iter_mut().for_each(|v| *v = Complex::new(0.0, 0.0));
        for spectrum in &spectra {
            for (j, s) in st.iter_mut().enumerate() {
                *s = spectrum[(f + j) % n_fft] * window[j];
            }
            fft_in_place(&mut st, true);
            for (o, t) in (0..n_times).step_by(decim).enumerate() {
                let value = st[t];
                let mut amp = value.norm();
                if amp == 0.0 {
                    amp = 1.0;
                }
                phase_sum[o] += value / amp;
                power[(i_f, o)] += amp * amp / n_epochs;
            }
        }
        if let Some(itc) = itc.as_mut() {
            for (o, p) in phase_sum.iter().enumerate() {
                itc[(i_f, o)] = (p / n_epochs).norm();
            }
        }
    }
    (power, itc)
}

/// Stockwell power averaged over epochs, for each channel.
///
/// `epochs_data` holds `channels x times` matrices of equal shape.
pub fn tfr_stockwell(
    epochs_data: &[DMatrix<f64>],
    ch_names: &[String],
    sfreq: f64,
    times: &[f64],
    params: &StockwellParams,
) -> Result<AverageTfr> {
    if !(params.width > 0.0) {
        return Err(MneError::InvalidParameter(format!(
            "width must be positive, got {}",
            params.width
        )));
    }
    if params.decim == 0 {
        return Err(MneError::InvalidParameter(
            "decim must be at least 1".to_string(),
        ));
    }
    if let (Some(lo), Some(hi)) = (params.fmin, params.fmax) {
        if lo >= hi {
            return Err(MneError::InvalidParameter(format!(
                "fmin ({}) must be below fmax ({})",
                lo, hi
            )));
        }
    }
    let first = epochs_data.first().ok_or_else(|| {
        MneError::InvalidParameter("No epochs to transform".to_string())
    })?;
    let (n_channels, n_times) = first.shape();
    if epochs_data.iter().any(|e| e.shape() != (n_channels, n_times)) {
        return Err(MneError::ShapeMismatch(
            "All epochs must have the same shape".to_string(),
        ));
    }
    if ch_names.len() != n_channels || times.len() != n_times {
        return Err(MneError::ShapeMismatch(format!(
            "Data is {}x{} but got {} channel names and {} times",
            n_channels,
            n_times,
            ch_names.len(),
            times.len()
        )));
    }

    let n_fft = n_times.next_power_of_two();
    let all_freqs = fft_freqs(n_fft, sfreq);
    let positive = &all_freqs[..n_fft / 2];
    let fmin = params
        .fmin
        .unwrap_or_else(|| positive.get(1).copied().unwrap_or(0.0));
    let fmax = params
        .fmax
        .unwrap_or_else(|| positive.last().copied().unwrap_or(0.0));
    let start_f = closest_bin(positive, fmin);
    let stop_f = closest_bin(positive, fmax);
    if start_f >= stop_f {
        return Err(MneError::InvalidParameter(format!(
            "No frequency bins between {} and {} Hz with {} FFT points",
            fmin, fmax, n_fft
        )));
    }
    let freqs = all_freqs[start_f..stop_f].to_vec();
    log::info!(
        "Stockwell transform: {} epochs, {} channels, {} frequencies ({:.2} - {:.2} Hz), n_fft = {}",
        epochs_data.len(),
        n_channels,
        freqs.len(),
        freqs[0],
        freqs[freqs.len() - 1],
        n_fft
    );

    let windows = precompute_windows(n_fft, start_f, stop_f, sfreq, params.width);
    let results: Vec<(DMatrix<f64>, Option<DMatrix<f64>>)> = (0..n_channels)
        .into_par_iter()
        .map(|ch| {
            let signals: Vec<Vec<f64>> = epochs_data
                .iter()
                .map(|e| e.row(ch).iter().copied().collect())
                .collect();
            channel_power_itc(
                &signals,
                n_fft,
                n_times,
                start_f,
                &windows,
                params.decim,
                params.return_itc,
            )
        })
        .collect();

    let (power, itc): (Vec<_>, Vec<_>) = results.into_iter().unzip();
    let itc = if params.return_itc {
        Some(itc.into_iter().flatten().collect())
    } else {
        None
    };

    Ok(AverageTfr {
        ch_names: ch_names.to_vec(),
        freqs,
        times: times.iter().copied().step_by(params.decim).collect(),
        power,
        itc,
        nave: epochs_data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_epochs(freq: f64, n_epochs: usize) -> (Vec<DMatrix<f64>>, Vec<f64>) {
        let sfreq = 100.0;
        let n = 200;
        let times: Vec<f64> = (0..n).map(|i| i as f64 / sfreq).collect();
        let epoch = DMatrix::from_fn(2, n, |r, c| {
            let t = times[c];
            if r == 0 {
                (2.0 * PI * freq * t).sin()
            } else {
                0.5 * (2.0 * PI * 2.0 * freq * t).sin()
            }
        });
        (vec![epoch; n_epochs], times)
    }

    fn names() -> Vec<String> {
        vec!["EEG 001".to_string(), "EEG 002".to_string()]
    }

    #[test]
    fn test_power_peaks_at_signal_frequency() {
        let (data, times) = sine_epochs(10.0, 2);
        let tfr = tfr_stockwell(&data, &names(), 100.0, &times, &StockwellParams::default()).unwrap();
        assert_eq!(tfr.power.len(), 2);
        assert_eq!(tfr.power[0].shape(), (tfr.freqs.len(), 200));

        let peak_freq = |power: &DMatrix<f64>| {
            let col = 100;
            let best = (0..power.nrows())
                .max_by(|&a, &b| power[(a, col)].total_cmp(&power[(b, col)]))
                .unwrap();
            tfr.freqs[best]
        };
        assert!((peak_freq(&tfr.power[0]) - 10.0).abs() < 1.0);
        assert!((peak_freq(&tfr.power[1]) - 20.0).abs() < 1.0);
        assert!(tfr.channel_power("EEG 002").is_some());
        assert!(tfr.itc.is_none());
    }

    #[test]
    fn test_identical_epochs_have_unit_itc() {
        let (data, times) = sine_epochs(10.0, 3);
        let params = StockwellParams {
            fmin: Some(5.0),
            fmax: Some(30.0),
            return_itc: true,
            ..Default::default()
        };
        let tfr = tfr_stockwell(&data, &names(), 100.0, &times, &params).unwrap();
        assert_eq!(tfr.nave, 3);
        let itc = tfr.itc.unwrap();
        assert!(itc[0].iter().all(|&v| (v - 1.0).abs() < 1e-9));
        assert!(tfr.freqs[0] >= 4.0 && tfr.freqs[tfr.freqs.len() - 1] <= 30.0);
    }

    #[test]
    fn test_decim() {
        let (data, times) = sine_epochs(10.0, 1);
        let params = StockwellParams {
            decim: 3,
            ..Default::default()
        };
        let tfr = tfr_stockwell(&data, &names(), 100.0, &times, &params).unwrap();
        assert_eq!(tfr.times.len(), 67);
        assert_eq!(tfr.power[0].ncols(), 67);
    }

    #[test]
    fn test_invalid_params() {
        let (data, times) = sine_epochs(10.0, 1);
        let bad_width = StockwellParams {
            width: 0.0,
            ..Default::default()
        };
        assert!(tfr_stockwell(&data, &names(), 100.0, &times, &bad_width).is_err());
        let bad_range = StockwellParams {
            fmin: Some(30.0),
            fmax: Some(10.0),
            ..Default::default()
        };
        assert!(tfr_stockwell(&data, &names(), 100.0, &times, &bad_range).is_err());
        assert!(tfr_stockwell(&data, &names()[..1], 100.0, &times, &StockwellParams::default()).is_err());
        assert!(tfr_stockwell(&[], &names(), 100.0, &times, &StockwellParams::default()).is_err());
    }
}
