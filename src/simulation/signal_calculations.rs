//! Radio signal and timing calculations.
//!
//! Contains helpers for:
//! - Channel coherence time estimates (session-wide and per link)
//! - OFDM subcarrier grids
//! - Conversion of a channel impulse response into a frequency response
//! - Wideband loss and propagation delay of a link
//!
//! Units:
//! - Time: nanoseconds (`SimTime`) at the API, seconds inside formulas
//! - Frequency: Hz
//! - Power ratios: dB

use num_complex::Complex64;
use std::f64::consts::PI;
use thiserror::Error;

use super::types::{NANOS_PER_SECOND, SimTime};

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Highest node speed the coherence-time model accepts (m/s).
pub const MAX_COHERENCE_SPEED: f64 = 100.0;

/// Lowest carrier frequency the coherence-time model accepts (Hz).
pub const MIN_COHERENCE_FREQUENCY: f64 = 1e6;

/// Inputs outside the domain of the coherence-time model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoherenceTimeError {
    #[error("speed {0} m/s outside 0..=100 m/s")]
    SpeedOutOfRange(f64),
    #[error("carrier frequency {0} Hz below 1 MHz")]
    FrequencyTooLow(f64),
}

/// Channel coherence time in nanoseconds, `Tc = 0.423 · c / (v · fc)`.
///
/// A speed of zero yields `SimTime::MAX` (the channel never decorrelates).
///
/// # Errors
///
/// Returns an error if `v` is outside `0..=100` m/s or `fc` is below 1 MHz.
pub fn coherence_time(v: f64, fc: f64) -> Result<SimTime, CoherenceTimeError> {
    if !(0.0..=MAX_COHERENCE_SPEED).contains(&v) {
        return Err(CoherenceTimeError::SpeedOutOfRange(v));
    }
    if !(fc >= MIN_COHERENCE_FREQUENCY) {
        return Err(CoherenceTimeError::FrequencyTooLow(fc));
    }
    // Float-to-int casts saturate, so v = 0 maps to SimTime::MAX
    Ok((0.423 * SPEED_OF_LIGHT * NANOS_PER_SECOND / (v * fc)).ceil() as SimTime)
}

/// Coherence time of a single link from the relative speed of its endpoints,
/// `Tc = 9 · c / (16π · v · fc)`, truncated to nanoseconds.
///
/// Relative speeds may exceed the per-node speed limit, so no domain check.
pub fn link_coherence_time(relative_speed: f64, fc: f64) -> SimTime {
    (9.0 * SPEED_OF_LIGHT * NANOS_PER_SECOND / (16.0 * PI * relative_speed * fc)) as SimTime
}

/// Subcarrier offsets from the carrier, in Hz, centered on zero.
///
/// Even sizes run from `-n/2` to `n/2 - 1`, odd sizes from `-(n-1)/2` to `(n-1)/2`.
pub fn subcarrier_frequencies(fft_size: u32, subcarrier_spacing: f64) -> Vec<f64> {
    subcarrier_indices(fft_size).map(|k| k as f64 * subcarrier_spacing).collect()
}

/// Integer subcarrier grid as reported to the network simulator.
pub fn subcarrier_grid(fft_size: u32, subcarrier_spacing: f64) -> Vec<i64> {
    subcarrier_indices(fft_size).map(|k| (k as f64 * subcarrier_spacing).round() as i64).collect()
}

fn subcarrier_indices(fft_size: u32) -> impl Iterator<Item = i64> {
    let n = fft_size as i64;
    let start = if n % 2 == 0 { -n / 2 } else { -(n - 1) / 2 };
    start..start + n
}

/// Channel frequency response of a multipath impulse response.
///
/// `H(f) = Σ aᵢ · exp(-j2π f τᵢ)` for every frequency in `frequencies`.
/// Paths with a negative delay are padding and are skipped. With `normalize`
/// the response is scaled to unit average energy per subcarrier.
pub fn to_frequency_response(frequencies: &[f64], amplitudes: &[Complex64], delays: &[f64], normalize: bool) -> Vec<Complex64> {
    let mut response: Vec<Complex64> = frequencies
        .iter()
        .map(|&f| {
            amplitudes
                .iter()
                .zip(delays)
                .filter(|(_, tau)| **tau >= 0.0)
                .map(|(a, &tau)| a * Complex64::from_polar(1.0, -2.0 * PI * f * tau))
                .sum()
        })
        .collect();

    if normalize {
        let energy = mean_energy(&response);
        if energy > 0.0 {
            let scale = 1.0 / energy.sqrt();
            for h in &mut response {
                *h *= scale;
            }
        }
    }
    response
}

/// Mean squared magnitude over the band.
pub fn mean_energy(response: &[Complex64]) -> f64 {
    if response.is_empty() {
        return 0.0;
    }
    response.iter().map(|h| h.norm_sqr()).sum::<f64>() / response.len() as f64
}

/// Wideband loss in dB of an unnormalized frequency response (Parseval).
pub fn wideband_loss_db(response: &[Complex64]) -> f64 {
    -ratio_to_db(mean_energy(response))
}

/// Propagation delay in nanoseconds: the earliest non-negative path delay.
pub fn propagation_delay_ns(delays: &[f64]) -> Option<SimTime> {
    delays
        .iter()
        .copied()
        .filter(|tau| *tau >= 0.0)
        .min_by(|a, b| a.total_cmp(b))
        .map(|tau| (tau * NANOS_PER_SECOND).round() as SimTime)
}

/// Carrier wavelength in metres.
pub fn wavelength(fc: f64) -> f64 {
    SPEED_OF_LIGHT / fc
}

/// Convert a linear power ratio to dB.
///
/// For `ratio <= 0` the result is `-inf` or NaN; callers guard against it.
pub fn ratio_to_db(ratio: f64) -> f64 {
    10.0 * ratio.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coherence_time_reference_value() {
        // 0.423 · c · 1e9 / 5.21e9 = 24340155.42 ns
        assert_eq!(coherence_time(1.0, 5210e6), Ok(24_340_156));
    }

    #[test]
    fn coherence_time_domain_errors() {
        assert_eq!(coherence_time(150.0, 5210e6), Err(CoherenceTimeError::SpeedOutOfRange(150.0)));
        assert_eq!(coherence_time(-1.0, 5210e6), Err(CoherenceTimeError::SpeedOutOfRange(-1.0)));
        assert_eq!(coherence_time(1.0, 500.0), Err(CoherenceTimeError::FrequencyTooLow(500.0)));
    }

    #[test]
    fn coherence_time_for_static_channel_saturates() {
        assert_eq!(coherence_time(0.0, 5210e6), Ok(SimTime::MAX));
    }

    #[test]
    fn link_coherence_time_shrinks_with_speed() {
        let slow = link_coherence_time(1.0, 5210e6);
        let fast = link_coherence_time(10.0, 5210e6);
        assert!(fast < slow);
        // 9c / (16π · 5.21e9) ≈ 10.303 ms
        assert!((slow - 10_303_000).abs() < 1_000);
    }

    #[test]
    fn subcarrier_grid_even_and_odd() {
        assert_eq!(subcarrier_grid(4, 100.0), vec![-200, -100, 0, 100]);
        assert_eq!(subcarrier_grid(3, 100.0), vec![-100, 0, 100]);
        assert_eq!(subcarrier_frequencies(2, 78125.0), vec![-78125.0, 0.0]);
    }

    #[test]
    fn single_path_loss_matches_amplitude() {
        let freqs = subcarrier_frequencies(64, 312_500.0);
        let a = Complex64::from_polar(1e-3, 0.4);
        let h = to_frequency_response(&freqs, &[a], &[5e-8], false);
        // |H|² = 1e-6 everywhere, so the loss is 60 dB
        assert!((wideband_loss_db(&h) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn normalized_response_has_unit_energy() {
        let freqs = subcarrier_frequencies(128, 78_125.0);
        let amplitudes = [Complex64::new(1e-4, 0.0), Complex64::new(0.0, 3e-5)];
        let h = to_frequency_response(&freqs, &amplitudes, &[2e-8, 7e-8], true);
        assert!((mean_energy(&h) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn padded_paths_are_ignored() {
        let freqs = subcarrier_frequencies(8, 1e6);
        let a = [Complex64::new(0.5, 0.0), Complex64::new(0.5, 0.0)];
        let with_padding = to_frequency_response(&freqs, &a, &[1e-8, -1.0], false);
        let single = to_frequency_response(&freqs, &a[..1], &[1e-8], false);
        assert_eq!(with_padding, single);
        assert_eq!(propagation_delay_ns(&[-1.0, 3.3e-8, 1.04e-8]), Some(10));
        assert_eq!(propagation_delay_ns(&[-1.0]), None);
    }
}
