//! 32-bit float WAV cache files.
//!
//! The writer streams interleaved frames to disk behind a small header
//! whose length fields are patched when the file is finished. The reader
//! holds its own handle on the same path and derives the available frame
//! count from the file length, so it can watch the file grow while the
//! writer still has it open. Consumers never trust the header's length
//! fields for that reason.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Bytes before the first sample: RIFF header + "fmt " chunk + data header.
const DATA_OFFSET: u64 = 44;
const BYTES_PER_SAMPLE: u64 = 4;

const FORMAT_IEEE_FLOAT: u16 = 3;

/// Streams interleaved f32 frames into a WAV file.
pub struct WavCacheWriter {
    file: BufWriter<File>,
    path: PathBuf,
    channels: usize,
    frames_written: i64,
}

impl WavCacheWriter {
    pub fn create(path: &Path, sample_rate: u32, channels: usize) -> EngineResult<Self> {
        assert!(channels > 0, "cache file needs at least one channel");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| EngineError::file_operation(path, format!("open for writing: {e}")))?;
        let mut writer = Self {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            channels,
            frames_written: 0,
        };
        writer
            .write_header(sample_rate)
            .map_err(|e| EngineError::file_operation(path, format!("write header: {e}")))?;
        writer
            .file
            .flush()
            .map_err(|e| EngineError::file_operation(path, format!("flush header: {e}")))?;
        Ok(writer)
    }

    fn write_header(&mut self, sample_rate: u32) -> std::io::Result<()> {
        let channels = self.channels as u16;
        let block_align = channels * BYTES_PER_SAMPLE as u16;
        let byte_rate = sample_rate * u32::from(block_align);

        let w = &mut self.file;
        w.write_all(b"RIFF")?;
        w.write_all(&0u32.to_le_bytes())?; // patched on finish
        w.write_all(b"WAVE")?;
        w.write_all(b"fmt ")?;
        w.write_all(&16u32.to_le_bytes())?;
        w.write_all(&FORMAT_IEEE_FLOAT.to_le_bytes())?;
        w.write_all(&channels.to_le_bytes())?;
        w.write_all(&sample_rate.to_le_bytes())?;
        w.write_all(&byte_rate.to_le_bytes())?;
        w.write_all(&block_align.to_le_bytes())?;
        w.write_all(&32u16.to_le_bytes())?;
        w.write_all(b"data")?;
        w.write_all(&0u32.to_le_bytes())?; // patched on finish
        Ok(())
    }

    /// Append interleaved frames, flushing so a concurrent reader can see
    /// them. A short or failed write reports insufficient disc space.
    pub fn write_frames(&mut self, interleaved: &[f32]) -> EngineResult<i64> {
        debug_assert_eq!(interleaved.len() % self.channels, 0);
        let mut bytes = Vec::with_capacity(interleaved.len() * BYTES_PER_SAMPLE as usize);
        for &sample in interleaved {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self.file
            .write_all(&bytes)
            .and_then(|_| self.file.flush())
            .map_err(|_| EngineError::InsufficientDiscSpace(self.path.clone()))?;
        let frames = (interleaved.len() / self.channels) as i64;
        self.frames_written += frames;
        Ok(frames)
    }

    pub fn frames_written(&self) -> i64 {
        self.frames_written
    }

    /// Patch the header length fields and flush. The file stays open (and
    /// the path stays valid for the reader) until the writer is dropped.
    pub fn finish(&mut self) -> EngineResult<()> {
        let data_bytes =
            (self.frames_written * self.channels as i64 * BYTES_PER_SAMPLE as i64) as u32;
        let riff_bytes = data_bytes + (DATA_OFFSET as u32 - 8);
        let patch = |file: &mut BufWriter<File>| -> std::io::Result<()> {
            file.flush()?;
            file.get_mut().seek(SeekFrom::Start(4))?;
            file.get_mut().write_all(&riff_bytes.to_le_bytes())?;
            file.get_mut().seek(SeekFrom::Start(DATA_OFFSET - 4))?;
            file.get_mut().write_all(&data_bytes.to_le_bytes())?;
            file.get_mut().flush()?;
            file.get_mut().seek(SeekFrom::End(0))?;
            Ok(())
        };
        patch(&mut self.file)
            .map_err(|e| EngineError::file_operation(&self.path, format!("finish: {e}")))
    }
}

/// Thread-safe reader over a WAV cache file that may still be growing.
pub struct WavCacheReader {
    file: Mutex<File>,
    path: PathBuf,
    channels: usize,
    sample_rate: u32,
    frame_count: AtomicI64,
}

impl WavCacheReader {
    pub fn open(path: &Path, sample_rate: u32, channels: usize) -> EngineResult<Self> {
        assert!(channels > 0, "cache file needs at least one channel");
        let file = File::open(path)
            .map_err(|e| EngineError::file_operation(path, format!("open for reading: {e}")))?;
        let reader = Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            channels,
            sample_rate,
            frame_count: AtomicI64::new(0),
        };
        reader.update_frame_count();
        Ok(reader)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame_count(&self) -> i64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Re-derive the frame count from the current file length.
    pub fn update_frame_count(&self) {
        let len = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %self.path.display(), "cache file stat failed: {e}");
                return;
            }
        };
        let frames = len.saturating_sub(DATA_OFFSET)
            / (BYTES_PER_SAMPLE * self.channels as u64);
        self.frame_count.store(frames as i64, Ordering::Release);
    }

    /// Up to `count * channels` interleaved samples from `start`, clamped
    /// to the frames known to be on disk.
    pub fn interleaved_frames(&self, start: i64, count: i64) -> Vec<f32> {
        if start < 0 || count <= 0 {
            return Vec::new();
        }
        let available = self.frame_count();
        if start >= available {
            return Vec::new();
        }
        let frames = count.min(available - start);
        let samples = (frames as usize) * self.channels;
        let offset = DATA_OFFSET
            + (start as u64) * BYTES_PER_SAMPLE * self.channels as u64;

        let mut bytes = vec![0u8; samples * BYTES_PER_SAMPLE as usize];
        {
            let mut file = self.file.lock();
            if let Err(e) = file.seek(SeekFrom::Start(offset)) {
                warn!(path = %self.path.display(), "cache file seek failed: {e}");
                return Vec::new();
            }
            if let Err(e) = file.read_exact(&mut bytes) {
                warn!(path = %self.path.display(), "cache file read failed: {e}");
                return Vec::new();
            }
        }

        bytes
            .chunks_exact(BYTES_PER_SAMPLE as usize)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}
