//! Streaming sample-rate conversion over interleaved buffers.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{EngineError, EngineResult};

/// A streaming resampler fed fixed-size interleaved chunks.
///
/// Wraps a sinc resampler configured for a constant input chunk size (the
/// decode cache's write buffer). The final call sets `last`, which accepts
/// a short chunk and drains the resampler's internal delay line.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    ratio: f64,
    chunk_frames: usize,
    split: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> EngineResult<Self> {
        assert!(channels > 0, "resampler needs at least one channel");
        let ratio = f64::from(target_rate) / f64::from(source_rate);
        let inner = SincFixedIn::<f32>::new(
            ratio,
            2.0,
            SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            chunk_frames,
            channels,
        )
        .map_err(|e| {
            EngineError::AllocationFailed(format!(
                "failed to create resampler for {source_rate} -> {target_rate}: {e}"
            ))
        })?;
        Ok(Self {
            inner,
            channels,
            ratio,
            chunk_frames,
            split: vec![Vec::new(); channels],
        })
    }

    /// Output frames per input frame.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Resample `frames` interleaved frames from `input`.
    ///
    /// `frames` must equal the configured chunk size except on the final
    /// call, where `last` must be set; the final call also drains the
    /// resampler. Returns the produced interleaved samples.
    pub fn process_interleaved(
        &mut self,
        input: &[f32],
        frames: usize,
        last: bool,
    ) -> EngineResult<Vec<f32>> {
        debug_assert!(input.len() >= frames * self.channels);
        for (ch, buf) in self.split.iter_mut().enumerate() {
            buf.clear();
            buf.extend(
                input[..frames * self.channels]
                    .iter()
                    .skip(ch)
                    .step_by(self.channels),
            );
        }

        let map_err =
            |e: rubato::ResampleError| EngineError::decode(format!("resampling failed: {e}"));

        let mut produced = if frames == self.chunk_frames && !last {
            self.inner.process(&self.split, None).map_err(map_err)?
        } else {
            self.inner
                .process_partial(Some(&self.split), None)
                .map_err(map_err)?
        };

        if last {
            let tail = self
                .inner
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(map_err)?;
            for (ch, buf) in tail.into_iter().enumerate() {
                produced[ch].extend(buf);
            }
        }

        Ok(interleave(&produced))
    }
}

fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    let frames = channels.first().map(Vec::len).unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels.len());
    for frame in 0..frames {
        for channel in channels {
            out.push(channel.get(frame).copied().unwrap_or(0.0));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_length_is_bounded() {
        let chunk = 1_024;
        let mut resampler = StreamResampler::new(44_100, 22_050, 1, chunk).unwrap();
        let input: Vec<f32> = (0..chunk * 8)
            .map(|i| (i as f32 * 0.01).sin() * 0.5)
            .collect();

        let mut produced = 0usize;
        for block in input.chunks(chunk) {
            let out = resampler
                .process_interleaved(block, block.len(), false)
                .unwrap();
            produced += out.len();
        }
        let tail = resampler.process_interleaved(&[], 0, true).unwrap();
        produced += tail.len();

        let expected = (input.len() as f64 * 0.5).round() as usize;
        let delta = produced.abs_diff(expected);
        assert!(
            delta <= chunk,
            "expected about {expected} frames, produced {produced}"
        );
    }

    #[test]
    fn test_stereo_chunks_stay_interleaved() {
        let chunk = 256;
        let mut resampler = StreamResampler::new(48_000, 24_000, 2, chunk).unwrap();
        // left channel constant 1.0, right channel constant -1.0
        let mut input = Vec::with_capacity(chunk * 2);
        for _ in 0..chunk {
            input.push(1.0);
            input.push(-1.0);
        }
        let mut out = Vec::new();
        for _ in 0..8 {
            out.extend(resampler.process_interleaved(&input, chunk, false).unwrap());
        }
        out.extend(resampler.process_interleaved(&[], 0, true).unwrap());

        // skip the filter's warm-up region, then check channel identity
        let settled = &out[out.len() / 2..out.len() - 16];
        for pair in settled.chunks_exact(2) {
            assert!(pair[0] > 0.9, "left drifted: {}", pair[0]);
            assert!(pair[1] < -0.9, "right drifted: {}", pair[1]);
        }
    }
}
