//! Explicit runtime dependencies shared by the engine's threads.
//!
//! Everything here would traditionally hide behind process-wide singletons
//! (a preferences object, a temp-directory manager). Instead the host
//! builds one [`RuntimeEnv`], wraps it in an `Arc`, and hands it to the
//! components that need it; `RuntimeEnv::default()` exists for tests.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Default size of the decode cache write buffer, in frames.
pub const DEFAULT_WRITE_BUFFER_FRAMES: usize = 16_384;

/// Shared runtime configuration: the cache directory root and decode
/// buffer sizing.
///
/// The cache directory is created lazily on first use and removed, with
/// everything in it, when the last reference to the environment is
/// dropped.
#[derive(Debug)]
pub struct RuntimeEnv {
    cache_root: Mutex<Option<Arc<TempDir>>>,
    write_buffer_frames: usize,
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeEnv {
    pub fn new() -> Self {
        Self {
            cache_root: Mutex::new(None),
            write_buffer_frames: DEFAULT_WRITE_BUFFER_FRAMES,
        }
    }

    /// Override the decode cache write buffer size.
    ///
    /// Small values are useful in tests to force frequent flushes.
    pub fn with_write_buffer_frames(frames: usize) -> Self {
        assert!(frames > 0, "write buffer must hold at least one frame");
        Self {
            cache_root: Mutex::new(None),
            write_buffer_frames: frames,
        }
    }

    pub fn write_buffer_frames(&self) -> usize {
        self.write_buffer_frames
    }

    /// Path of the per-process cache directory, creating it on first use.
    pub fn cache_dir(&self) -> EngineResult<PathBuf> {
        let mut root = self.cache_root.lock();
        if root.is_none() {
            let dir = TempDir::with_prefix("audio-features-cache-").map_err(|e| {
                EngineError::file_operation(
                    std::env::temp_dir(),
                    format!("failed to create cache directory: {e}"),
                )
            })?;
            debug!(path = %dir.path().display(), "created cache directory");
            *root = Some(Arc::new(dir));
        }
        Ok(root.as_ref().map(|dir| dir.path().to_path_buf()).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_dir_is_created_once() {
        let env = RuntimeEnv::new();
        let a = env.cache_dir().unwrap();
        let b = env.cache_dir().unwrap();
        assert_eq!(a, b);
        assert!(a.is_dir());
    }

    #[test]
    fn test_cache_dir_removed_on_drop() {
        let env = RuntimeEnv::new();
        let path = env.cache_dir().unwrap();
        assert!(path.is_dir());
        drop(env);
        assert!(!path.exists());
    }

    #[test]
    fn test_write_buffer_override() {
        let env = RuntimeEnv::with_write_buffer_frames(64);
        assert_eq!(env.write_buffer_frames(), 64);
        assert_eq!(
            RuntimeEnv::new().write_buffer_frames(),
            DEFAULT_WRITE_BUFFER_FRAMES
        );
    }
}
