//! The streaming decode cache and its backing stores.
//!
//! A decoder pushes PCM blocks into a [`DecodeCache`]; the cache
//! normalises and resamples them as configured and lands the result either
//! in memory or in a temporary WAV file that stays readable while the
//! decode thread is still writing.

pub mod decode;
pub mod resample;
pub mod wav;

pub use decode::{CacheMode, DecodeCache, DecodeCacheConfig};
pub use resample::StreamResampler;
pub use wav::{WavCacheReader, WavCacheWriter};
