//! The decode cache: pushed PCM in, a randomly readable audio model out.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::resample::StreamResampler;
use super::wav::{WavCacheReader, WavCacheWriter};
use crate::env::RuntimeEnv;
use crate::error::EngineResult;
use crate::model::dense::AudioSource;
use crate::model::{Model, ModelBase, ModelEvent, ModelId, ModelObserver};

/// Where decoded samples are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    InMemory,
    InTemporaryFile,
}

/// Decode cache configuration.
#[derive(Debug, Clone)]
pub struct DecodeCacheConfig {
    pub mode: CacheMode,
    /// Output sample rate; 0 means "use the source rate".
    pub target_rate: u32,
    /// Peak-normalise at read time instead of hard-clipping on write.
    pub normalise: bool,
}

impl Default for DecodeCacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::InMemory,
            target_rate: 0,
            normalise: false,
        }
    }
}

/// Writer-side state, guarded by the cache mutex.
struct WriterState {
    write_buffer: Vec<f32>,
    buffered: usize,
    resampler: Option<StreamResampler>,
    wav: Option<WavCacheWriter>,
    cache_path: Option<std::path::PathBuf>,
}

/// A streaming decode cache.
///
/// The decoder thread calls [`set_stream_format`](Self::set_stream_format)
/// once it knows the source rate and channel count, pushes sample blocks
/// with the `add_samples_*` methods, and calls [`finish`](Self::finish)
/// at end of stream. Readers may call
/// [`interleaved_frames`](AudioSource::interleaved_frames) concurrently
/// throughout; before the first block arrives they see no data, and during
/// decoding they see whatever has been stored so far.
///
/// With `normalise` set, samples are stored unscaled and the running peak
/// gain is applied at read time, so earlier reads stay consistent with the
/// final peak. Without it, samples are hard-clipped to [-1, 1] on write.
pub struct DecodeCache {
    base: ModelBase,
    env: Arc<RuntimeEnv>,
    config: DecodeCacheConfig,

    initialised: AtomicBool,
    finished: AtomicBool,
    // 0 = in memory, 1 = temporary file; may degrade at initialisation
    effective_mode: AtomicU8,

    file_rate: AtomicU32,
    channels: AtomicUsize,
    sample_rate: AtomicU32,

    frame_count: AtomicI64,
    file_frame_count: AtomicI64,

    max_abs: AtomicU32,
    gain: AtomicU32,

    writer: Mutex<WriterState>,
    data: Mutex<Vec<f32>>,
    reader: Mutex<Option<Arc<WavCacheReader>>>,
}

impl DecodeCache {
    pub fn new(env: Arc<RuntimeEnv>, config: DecodeCacheConfig) -> Self {
        debug!(
            mode = ?config.mode,
            target_rate = config.target_rate,
            normalise = config.normalise,
            "decode cache created"
        );
        Self {
            base: ModelBase::new(),
            env,
            config,
            initialised: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            effective_mode: AtomicU8::new(0),
            file_rate: AtomicU32::new(0),
            channels: AtomicUsize::new(0),
            sample_rate: AtomicU32::new(0),
            frame_count: AtomicI64::new(0),
            file_frame_count: AtomicI64::new(0),
            max_abs: AtomicU32::new(0f32.to_bits()),
            gain: AtomicU32::new(1f32.to_bits()),
            writer: Mutex::new(WriterState {
                write_buffer: Vec::new(),
                buffered: 0,
                resampler: None,
                wav: None,
                cache_path: None,
            }),
            data: Mutex::new(Vec::new()),
            reader: Mutex::new(None),
        }
    }

    /// Declare the source stream's rate and channel count. Must be called
    /// before the first `add_samples` push; later calls are ignored.
    pub fn set_stream_format(&self, source_rate: u32, channels: usize) {
        if self.initialised.load(Ordering::Acquire) {
            return;
        }
        self.file_rate.store(source_rate, Ordering::Release);
        self.channels.store(channels, Ordering::Release);
    }

    /// The output sample rate (the target rate, or the source rate when no
    /// target was set). Zero until the stream format is known.
    pub fn output_sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.file_rate.load(Ordering::Acquire)
    }

    /// The effective cache mode, after any fallback to memory.
    pub fn cache_mode(&self) -> CacheMode {
        if self.effective_mode.load(Ordering::Acquire) == 1 {
            CacheMode::InTemporaryFile
        } else {
            CacheMode::InMemory
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Report decode progress, 0..=100. `finish` forces 100.
    pub fn set_completion(&self, completion: u8) {
        self.base.set_completion(completion.min(99));
    }

    /// Attach an alignment to a reference timeline. The cache takes
    /// exclusive ownership of it.
    pub fn set_alignment(&self, alignment: Arc<crate::align::AlignmentModel>) {
        self.base.set_alignment(alignment);
    }

    /// Push interleaved samples.
    pub fn add_samples_interleaved(&self, samples: &[f32]) -> EngineResult<()> {
        self.ensure_initialised()?;
        let mut writer = self.writer.lock();
        let channels = self.channels.load(Ordering::Acquire);
        let capacity = self.env.write_buffer_frames() * channels;
        for &sample in samples {
            let at = writer.buffered;
            writer.write_buffer[at] = sample;
            writer.buffered += 1;
            if writer.buffered == capacity {
                let frames = self.env.write_buffer_frames();
                self.push_buffer(&mut writer, frames, false)?;
                writer.buffered = 0;
            }
            if writer.buffered % 10_240 == 0 {
                if let Some(reader) = self.reader.lock().as_ref() {
                    reader.update_frame_count();
                }
            }
        }
        drop(writer);
        self.base.emit(&ModelEvent::Changed);
        Ok(())
    }

    /// Push one slice per channel; the slices must be equally long.
    pub fn add_samples_channels(&self, channels: &[&[f32]]) -> EngineResult<()> {
        assert!(!channels.is_empty(), "no channel data supplied");
        let frames = channels[0].len();
        debug_assert!(channels.iter().all(|c| c.len() == frames));
        let mut interleaved = Vec::with_capacity(frames * channels.len());
        for frame in 0..frames {
            for channel in channels {
                interleaved.push(channel[frame]);
            }
        }
        self.add_samples_interleaved(&interleaved)
    }

    /// Drain pending samples, flush the resampler delay, and mark the
    /// model complete. Idempotent.
    pub fn finish(&self) -> EngineResult<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if !self.initialised.load(Ordering::Acquire) {
            warn!("decode cache finished without ever being initialised");
            self.base.set_completion(100);
            return Ok(());
        }

        let result = (|| -> EngineResult<()> {
            let mut writer = self.writer.lock();
            let channels = self.channels.load(Ordering::Acquire).max(1);
            let frames = writer.buffered / channels;
            let flushed = self.push_buffer(&mut writer, frames, true);
            writer.buffered = 0;
            writer.write_buffer = Vec::new();
            writer.resampler = None;
            flushed?;
            if let Some(wav) = writer.wav.as_mut() {
                wav.finish()?;
            }
            if let Some(reader) = self.reader.lock().as_ref() {
                reader.update_frame_count();
            }
            Ok(())
        })();

        // completion reaches 100 even on failure so observers unblock
        self.base.set_completion(100);
        self.base.emit(&ModelEvent::Changed);
        result
    }

    fn ensure_initialised(&self) -> EngineResult<()> {
        if self.initialised.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut writer = self.writer.lock();
        if self.initialised.load(Ordering::Acquire) {
            return Ok(());
        }

        let file_rate = self.file_rate.load(Ordering::Acquire);
        let channels = self.channels.load(Ordering::Acquire);
        assert!(
            file_rate != 0 && channels != 0,
            "decode cache initialised before the stream format was set"
        );

        let sample_rate = if self.config.target_rate == 0 {
            file_rate
        } else {
            self.config.target_rate
        };
        self.sample_rate.store(sample_rate, Ordering::Release);

        if file_rate != sample_rate {
            debug!(from = file_rate, to = sample_rate, "decode cache resampling");
            writer.resampler = Some(StreamResampler::new(
                file_rate,
                sample_rate,
                channels,
                self.env.write_buffer_frames(),
            )?);
        }

        writer.write_buffer = vec![0.0; self.env.write_buffer_frames() * channels];
        writer.buffered = 0;

        let mut effective = self.config.mode;
        if effective == CacheMode::InTemporaryFile {
            match self.create_file_backing(&mut writer, sample_rate, channels) {
                Ok(()) => {}
                Err(e) => {
                    warn!("cache file unavailable ({e}), falling back to in-memory cache");
                    writer.wav = None;
                    writer.cache_path = None;
                    effective = CacheMode::InMemory;
                }
            }
        }
        if effective == CacheMode::InMemory {
            self.data.lock().clear();
        }
        self.effective_mode.store(
            match effective {
                CacheMode::InMemory => 0,
                CacheMode::InTemporaryFile => 1,
            },
            Ordering::Release,
        );

        self.initialised.store(true, Ordering::Release);
        Ok(())
    }

    fn create_file_backing(
        &self,
        writer: &mut WriterState,
        sample_rate: u32,
        channels: usize,
    ) -> EngineResult<()> {
        let dir = self.env.cache_dir()?;
        let path = dir.join(format!("decoded_{}.wav", self.base.id()));
        let wav = WavCacheWriter::create(&path, sample_rate, channels)?;
        let reader = WavCacheReader::open(&path, sample_rate, channels)?;
        writer.wav = Some(wav);
        writer.cache_path = Some(path);
        *self.reader.lock() = Some(Arc::new(reader));
        Ok(())
    }

    /// Route `frames` frames from the write buffer through the resampler
    /// (if any) into the backing store.
    fn push_buffer(
        &self,
        writer: &mut WriterState,
        frames: usize,
        last: bool,
    ) -> EngineResult<()> {
        self.file_frame_count
            .fetch_add(frames as i64, Ordering::AcqRel);

        match writer.resampler.take() {
            Some(mut resampler) => {
                let ratio = resampler.ratio();
                let channels = self.channels.load(Ordering::Acquire);

                if frames > 0 {
                    let input: Vec<f32> = writer.write_buffer[..frames * channels].to_vec();
                    let mut out = resampler.process_interleaved(&input, frames, false)?;
                    self.store(writer, &mut out)?;
                }

                if last {
                    // pad with silence to push the resampler's delay line
                    // out, then clip so the total output length matches
                    // the source length scaled by the ratio
                    let file_frames = self.file_frame_count.load(Ordering::Acquire);
                    let out_frames = self.frame_count.load(Ordering::Acquire);
                    let mut pad_frames = 1i64;
                    if (out_frames as f64 / ratio) < file_frames as f64 {
                        pad_frames = file_frames - (out_frames as f64 / ratio) as i64 + 1;
                    }
                    debug!(
                        out_frames,
                        file_frames, pad_frames, "flushing resampler delay"
                    );

                    let chunk = self.env.write_buffer_frames();
                    let mut remaining = pad_frames as usize;
                    let mut out = Vec::new();
                    while remaining > 0 {
                        let this = remaining.min(chunk);
                        let padding = vec![0.0f32; this * channels];
                        out.extend(resampler.process_interleaved(
                            &padding,
                            this,
                            remaining == this,
                        )?);
                        remaining -= this;
                    }

                    let limit = (file_frames as f64 * ratio).round() as i64;
                    let produced = (out.len() / channels) as i64;
                    if out_frames + produced > limit {
                        let keep = ((limit - out_frames).max(0) as usize) * channels;
                        out.truncate(keep);
                    }
                    self.store(writer, &mut out)?;
                } else {
                    writer.resampler = Some(resampler);
                }
                Ok(())
            }
            None => {
                let channels = self.channels.load(Ordering::Acquire);
                let mut samples: Vec<f32> = writer.write_buffer[..frames * channels].to_vec();
                self.store(writer, &mut samples)
            }
        }
    }

    /// Normalise or clip, then append to the backing store.
    fn store(&self, writer: &mut WriterState, samples: &mut [f32]) -> EngineResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let channels = self.channels.load(Ordering::Acquire).max(1);

        if self.config.normalise {
            let mut max = f32::from_bits(self.max_abs.load(Ordering::Acquire));
            let mut changed = false;
            for &sample in samples.iter() {
                let magnitude = sample.abs();
                if magnitude > max {
                    max = magnitude;
                    changed = true;
                }
            }
            if changed {
                self.max_abs.store(max.to_bits(), Ordering::Release);
                self.gain.store((1.0 / max).to_bits(), Ordering::Release);
            }
        } else {
            for sample in samples.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }

        match writer.wav.as_mut() {
            Some(wav) => {
                wav.write_frames(samples)?;
            }
            None => {
                self.data.lock().extend_from_slice(samples);
            }
        }
        self.frame_count
            .fetch_add((samples.len() / channels) as i64, Ordering::AcqRel);
        Ok(())
    }
}

impl Model for DecodeCache {
    fn id(&self) -> ModelId {
        self.base.id()
    }
    fn start_frame(&self) -> i64 {
        0
    }
    fn end_frame(&self) -> i64 {
        self.frame_count.load(Ordering::Acquire)
    }
    fn sample_rate(&self) -> u32 {
        self.output_sample_rate()
    }
    fn completion(&self) -> u8 {
        self.base.completion()
    }
    fn type_name(&self) -> &'static str {
        "decoded-audio"
    }
    fn source_model(&self) -> Option<ModelId> {
        self.base.source()
    }
    fn alignment(&self) -> Option<Arc<crate::align::AlignmentModel>> {
        self.base.alignment()
    }
    fn subscribe(&self, observer: ModelObserver) {
        self.base.subscribe(observer);
    }
    fn abandon(&self) {
        self.base.abandon();
    }
    fn is_abandoning(&self) -> bool {
        self.base.is_abandoning()
    }
    fn notify_about_to_be_deleted(&self) {
        self.base.notify_about_to_be_deleted();
    }
}

impl AudioSource for DecodeCache {
    fn channel_count(&self) -> usize {
        self.channels.load(Ordering::Acquire)
    }

    fn frame_count(&self) -> i64 {
        self.frame_count.load(Ordering::Acquire)
    }

    fn interleaved_frames(&self, start: i64, count: i64) -> Vec<f32> {
        if !self.initialised.load(Ordering::Acquire) {
            return Vec::new();
        }
        if start < 0 || count <= 0 {
            return Vec::new();
        }

        let mut frames = match self.cache_mode() {
            CacheMode::InTemporaryFile => {
                let reader = self.reader.lock().clone();
                match reader {
                    Some(reader) => reader.interleaved_frames(start, count),
                    None => Vec::new(),
                }
            }
            CacheMode::InMemory => {
                let channels = self.channels.load(Ordering::Acquire) as i64;
                let data = self.data.lock();
                let begin = (start * channels).min(data.len() as i64) as usize;
                let end = ((start + count) * channels).min(data.len() as i64) as usize;
                data[begin..end].to_vec()
            }
        };

        if self.config.normalise {
            let gain = f32::from_bits(self.gain.load(Ordering::Acquire));
            for sample in frames.iter_mut() {
                *sample *= gain;
            }
        }
        frames
    }
}

impl Drop for DecodeCache {
    fn drop(&mut self) {
        self.base.notify_about_to_be_deleted();
        let mut writer = self.writer.lock();
        writer.wav = None;
        *self.reader.lock() = None;
        if let Some(path) = writer.cache_path.take() {
            debug!(path = %path.display(), "removing cache file");
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), "failed to remove cache file: {e}");
            }
        }
    }
}
