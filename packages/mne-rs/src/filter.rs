//! Digital filtering of continuous data.
//!
//! IIR Butterworth and notch filters built from second-order sections
//! (biquads), applied forward and backward for zero phase distortion.

use crate::error::{MneError, Result};
use std::f64::consts::PI;

/// Default Butterworth order used for raw data filtering
pub const DEFAULT_ORDER: usize = 4;

/// Second-order section (biquad) coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// State for a single biquad section (Direct Form II Transposed)
#[derive(Debug, Clone, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

#[derive(Debug, Clone)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let c = &self.coeffs;
        let output = c.b0 * input + self.state.z1;
        self.state.z1 = c.b1 * input - c.a1 * output + self.state.z2;
        self.state.z2 = c.b2 * input - c.a2 * output;
        output
    }
}

/// Cascaded second-order sections filter
#[derive(Debug, Clone)]
pub struct SosFilter {
    sections: Vec<BiquadFilter>,
}

impl SosFilter {
    pub fn new(sections: Vec<BiquadCoeffs>) -> Self {
        Self {
            sections: sections.into_iter().map(BiquadFilter::new).collect(),
        }
    }

    pub fn coefficients(&self) -> Vec<BiquadCoeffs> {
        self.sections.iter().map(|s| s.coeffs).collect()
    }

    pub fn n_sections(&self) -> usize {
        self.sections.len()
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        self.sections
            .iter_mut()
            .fold(input, |acc, section| section.process(acc))
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.state = BiquadState::default();
        }
    }

    /// Causal filtering; the filter state is reset first.
    pub fn filter(&mut self, signal: &[f64]) -> Vec<f64> {
        self.reset();
        signal.iter().map(|&s| self.process(s)).collect()
    }

    /// Zero-phase filtering: forward pass, then backward pass.
    ///
    /// The signal is padded at both ends by odd reflection to limit edge
    /// transients; the padding is removed from the output.
    pub fn filtfilt(&mut self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let padlen = (3 * (2 * self.sections.len() + 1)).min(n - 1);

        let mut ext = Vec::with_capacity(n + 2 * padlen);
        let first = signal[0];
        let last = signal[n - 1];
        ext.extend((1..=padlen).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend_from_slice(signal);
        ext.extend((1..=padlen).map(|i| 2.0 * last - signal[n - 1 - i]));

        let mut forward = self.filter(&ext);
        forward.reverse();
        let mut backward = self.filter(&forward);
        backward.reverse();

        backward[padlen..padlen + n].to_vec()
    }
}

/// Butterworth filter designer
pub struct ButterworthFilter;

impl ButterworthFilter {
    pub fn lowpass(cutoff: f64, sample_rate: f64, order: usize) -> SosFilter {
        let wn = Self::prewarp(cutoff, sample_rate);
        SosFilter::new(Self::design_lowpass(wn, order))
    }

    pub fn highpass(cutoff: f64, sample_rate: f64, order: usize) -> SosFilter {
        let wn = Self::prewarp(cutoff, sample_rate);
        SosFilter::new(Self::design_highpass(wn, order))
    }

    /// Bandpass as a highpass cascaded with a lowpass
    pub fn bandpass(low: f64, high: f64, sample_rate: f64, order: usize) -> SosFilter {
        let mut sections = Self::design_highpass(Self::prewarp(low, sample_rate), order);
        sections.extend(Self::design_lowpass(Self::prewarp(high, sample_rate), order));
        SosFilter::new(sections)
    }

    /// Prewarp frequency for bilinear transform
    fn prewarp(freq: f64, sample_rate: f64) -> f64 {
        (PI * freq / sample_rate).tan()
    }

    /// Damping term of the k-th analog Butterworth pole pair
    fn pole_damping(k: usize, order: usize) -> f64 {
        let theta = PI * (2.0 * k as f64 + 1.0) / (2.0 * order as f64);
        2.0 * theta.sin()
    }

    fn design_lowpass(wn: f64, order: usize) -> Vec<BiquadCoeffs> {
        let order = order.max(1);
        let num_sections = (order + 1) / 2;
        let mut sections = Vec::with_capacity(num_sections);

        for k in 0..num_sections {
            if order % 2 == 1 && k == num_sections - 1 {
                // H(s) = wn / (s + wn)
                let k_coeff = wn / (1.0 + wn);
                sections.push(BiquadCoeffs {
                    b0: k_coeff,
                    b1: k_coeff,
                    b2: 0.0,
                    a1: (wn - 1.0) / (wn + 1.0),
                    a2: 0.0,
                });
            } else {
                let alpha = Self::pole_damping(k, order);
                let wn2 = wn * wn;
                let denom = 1.0 + alpha * wn + wn2;

                sections.push(BiquadCoeffs {
                    b0: wn2 / denom,
                    b1: 2.0 * wn2 / denom,
                    b2: wn2 / denom,
                    a1: 2.0 * (wn2 - 1.0) / denom,
                    a2: (1.0 - alpha * wn + wn2) / denom,
                });
            }
        }

        sections
    }

    fn design_highpass(wn: f64, order: usize) -> Vec<BiquadCoeffs> {
        let order = order.max(1);
        let num_sections = (order + 1) / 2;
        let mut sections = Vec::with_capacity(num_sections);

        for k in 0..num_sections {
            if order % 2 == 1 && k == num_sections - 1 {
                // H(s) = s / (s + wn)
                let k_coeff = 1.0 / (1.0 + wn);
                sections.push(BiquadCoeffs {
                    b0: k_coeff,
                    b1: -k_coeff,
                    b2: 0.0,
                    a1: (wn - 1.0) / (wn + 1.0),
                    a2: 0.0,
                });
            } else {
                let alpha = Self::pole_damping(k, order);
                let wn2 = wn * wn;
                let denom = 1.0 + alpha * wn + wn2;

                sections.push(BiquadCoeffs {
                    b0: 1.0 / denom,
                    b1: -2.0 / denom,
                    b2: 1.0 / denom,
                    a1: 2.0 * (wn2 - 1.0) / denom,
                    a2: (1.0 - alpha * wn + wn2) / denom,
                });
            }
        }

        sections
    }
}

/// Notch (band-reject) filter for line noise
pub struct NotchFilter;

impl NotchFilter {
    /// `q_factor`: higher is narrower, typical 30-50
    pub fn design(center_freq: f64, sample_rate: f64, q_factor: f64) -> SosFilter {
        let w0 = 2.0 * PI * center_freq / sample_rate;
        let bandwidth = w0 / q_factor;

        let cos_w0 = w0.cos();
        let alpha = w0.sin() * (bandwidth / 2.0).sinh();
        let a0 = 1.0 + alpha;

        SosFilter::new(vec![BiquadCoeffs {
            b0: 1.0 / a0,
            b1: -2.0 * cos_w0 / a0,
            b2: 1.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }])
    }

    /// One notch per frequency below Nyquist, cascaded
    pub fn design_multi(freqs: &[f64], sample_rate: f64, q_factor: f64) -> SosFilter {
        let nyquist = sample_rate / 2.0;
        let sections = freqs
            .iter()
            .filter(|&&f| f > 0.0 && f < nyquist)
            .flat_map(|&f| Self::design(f, sample_rate, q_factor).coefficients())
            .collect();
        SosFilter::new(sections)
    }
}

fn check_cutoff(name: &str, freq: f64, sfreq: f64) -> Result<()> {
    let nyquist = sfreq / 2.0;
    if !(freq > 0.0) || freq >= nyquist {
        return Err(MneError::InvalidParameter(format!(
            "{} ({} Hz) must be in (0, {}) Hz",
            name, freq, nyquist
        )));
    }
    Ok(())
}

/// Design the filter selected by the presence of `l_freq` / `h_freq`.
///
/// Returns `None` when neither corner is given.
pub fn design_filter(
    sfreq: f64,
    l_freq: Option<f64>,
    h_freq: Option<f64>,
    order: usize,
) -> Result<Option<SosFilter>> {
    match (l_freq, h_freq) {
        (None, None) => Ok(None),
        (Some(l), None) => {
            check_cutoff("Highpass cutoff", l, sfreq)?;
            Ok(Some(ButterworthFilter::highpass(l, sfreq, order)))
        }
        (None, Some(h)) => {
            check_cutoff("Lowpass cutoff", h, sfreq)?;
            Ok(Some(ButterworthFilter::lowpass(h, sfreq, order)))
        }
        (Some(l), Some(h)) => {
            check_cutoff("Highpass cutoff", l, sfreq)?;
            check_cutoff("Lowpass cutoff", h, sfreq)?;
            if l >= h {
                return Err(MneError::InvalidParameter(format!(
                    "Low cutoff ({} Hz) must be less than high cutoff ({} Hz)",
                    l, h
                )));
            }
            Ok(Some(ButterworthFilter::bandpass(l, h, sfreq, order)))
        }
    }
}

/// Zero-phase filter a single signal.
pub fn filter_data(
    signal: &[f64],
    sfreq: f64,
    l_freq: Option<f64>,
    h_freq: Option<f64>,
    order: usize,
) -> Result<Vec<f64>> {
    match design_filter(sfreq, l_freq, h_freq, order)? {
        Some(mut filter) => Ok(filter.filtfilt(signal)),
        None => Ok(signal.to_vec()),
    }
}

/// Lowpass corner used before decimating by `factor`
pub fn antialias_cutoff(sfreq: f64, factor: usize) -> f64 {
    sfreq / (3.0 * factor as f64)
}

/// Anti-alias, then keep every `factor`-th sample.
pub fn decimate(signal: &[f64], sfreq: f64, factor: usize) -> Result<Vec<f64>> {
    if factor == 0 {
        return Err(MneError::InvalidParameter(
            "Decimation factor must be at least 1".to_string(),
        ));
    }
    if factor == 1 {
        return Ok(signal.to_vec());
    }
    let filtered = filter_data(
        signal,
        sfreq,
        None,
        Some(antialias_cutoff(sfreq, factor)),
        DEFAULT_ORDER,
    )?;
    Ok(filtered.into_iter().step_by(factor).collect())
}
