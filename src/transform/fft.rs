//! Windowed FFT of time-domain blocks for frequency-domain plugin input.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::WindowShape;
use crate::error::{EngineError, EngineResult};

pub(crate) fn window_coefficients(shape: WindowShape, size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / (n - 1.0);
            match shape {
                WindowShape::Rectangular => 1.0,
                WindowShape::Hann => 0.5 * (1.0 - x.cos()),
                WindowShape::Hamming => 0.54 - 0.46 * x.cos(),
                WindowShape::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
            }
        })
        .collect()
}

/// Transforms fixed-size time blocks into interleaved re/im spectra.
///
/// The output layout is `{r0, i0, r1, i1, ..., r_{N/2}, i_{N/2}}`, so a
/// caller's buffer must hold `block + 2` floats for a block of `N`.
pub(crate) struct FftExtractor {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    block: usize,
    scratch: Vec<Complex<f32>>,
}

impl FftExtractor {
    pub fn new(shape: WindowShape, block: usize) -> EngineResult<Self> {
        if block == 0 || block % 2 != 0 {
            return Err(EngineError::AllocationFailed(format!(
                "cannot plan FFT for block size {block}"
            )));
        }
        let fft = FftPlanner::new().plan_fft_forward(block);
        Ok(Self {
            fft,
            window: window_coefficients(shape, block),
            block,
            scratch: vec![Complex { re: 0.0, im: 0.0 }; block],
        })
    }

    /// Transform one time block into `out`, which must hold `block + 2`
    /// floats.
    pub fn transform(&mut self, time_block: &[f32], out: &mut [f32]) {
        debug_assert_eq!(time_block.len(), self.block);
        debug_assert!(out.len() >= self.block + 2);

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            slot.re = time_block[i] * self.window[i];
            slot.im = 0.0;
        }
        self.fft.process(&mut self.scratch);

        for (bin, value) in self.scratch.iter().take(self.block / 2 + 1).enumerate() {
            out[bin * 2] = value.re;
            out[bin * 2 + 1] = value.im;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx_eq::assert_approx_eq;

    #[test]
    fn test_window_endpoints() {
        let hann = window_coefficients(WindowShape::Hann, 16);
        assert!(hann[0].abs() < 1e-6);
        assert!(hann[15].abs() < 1e-6);
        let rect = window_coefficients(WindowShape::Rectangular, 16);
        assert!(rect.iter().all(|&w| w == 1.0));
    }

    #[test]
    fn test_dc_signal_lands_in_bin_zero() {
        let block = 64;
        let mut fft = FftExtractor::new(WindowShape::Rectangular, block).unwrap();
        let time = vec![1.0f32; block];
        let mut out = vec![0.0f32; block + 2];
        fft.transform(&time, &mut out);

        assert_approx_eq!(f64::from(out[0]), block as f64, 1e-3);
        assert_approx_eq!(f64::from(out[1]), 0.0, 1e-3);
        // all other bins empty
        for bin in 1..=block / 2 {
            assert!(out[bin * 2].abs() < 1e-3, "bin {bin} re {}", out[bin * 2]);
            assert!(out[bin * 2 + 1].abs() < 1e-3);
        }
    }

    #[test]
    fn test_single_tone_peaks_in_expected_bin() {
        let block = 256;
        let mut fft = FftExtractor::new(WindowShape::Hann, block).unwrap();
        // 8 cycles per block -> bin 8
        let time: Vec<f32> = (0..block)
            .map(|i| (2.0 * std::f32::consts::PI * 8.0 * i as f32 / block as f32).sin())
            .collect();
        let mut out = vec![0.0f32; block + 2];
        fft.transform(&time, &mut out);

        let peak = (0..=block / 2)
            .max_by(|&a, &b| {
                let ma = out[a * 2].hypot(out[a * 2 + 1]);
                let mb = out[b * 2].hypot(out[b * 2 + 1]);
                ma.total_cmp(&mb)
            })
            .unwrap();
        assert_eq!(peak, 8);
    }

    #[test]
    fn test_odd_block_size_rejected() {
        assert!(FftExtractor::new(WindowShape::Hann, 0).is_err());
        assert!(FftExtractor::new(WindowShape::Hann, 33).is_err());
    }
}
