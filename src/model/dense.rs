//! Dense models: randomly addressable audio sample sources and the
//! column-addressed feature matrix.

use std::sync::Arc;

use ndarray::{Array2, ShapeBuilder};
use parking_lot::Mutex;

use super::{Model, ModelBase, ModelEvent, ModelId, ModelObserver};

/// A dense audio model: interleaved float samples at a known rate and
/// channel count, possibly still growing while a decoder fills it in.
pub trait AudioSource: Model {
    fn channel_count(&self) -> usize;

    /// Frames currently available. Grows while decoding is in progress.
    fn frame_count(&self) -> i64;

    /// Up to `count * channel_count` interleaved samples starting at
    /// `start`. Shorter (or empty) when the requested range runs past the
    /// available data.
    fn interleaved_frames(&self, start: i64, count: i64) -> Vec<f32>;

    /// Read one channel into `out`, returning the number of frames
    /// obtained. A channel of -1 yields the mean across channels. Frames
    /// beyond the available data are left untouched.
    fn channel_frames(&self, channel: i32, start: i64, out: &mut [f32]) -> i64 {
        let channels = self.channel_count();
        let interleaved = self.interleaved_frames(start, out.len() as i64);
        let got = (interleaved.len() / channels.max(1)) as i64;
        for (i, slot) in out.iter_mut().enumerate().take(got as usize) {
            let frame = &interleaved[i * channels..(i + 1) * channels];
            *slot = if channel < 0 {
                frame.iter().sum::<f32>() / channels as f32
            } else {
                frame.get(channel as usize).copied().unwrap_or(0.0)
            };
        }
        got
    }
}

/// A dense three-dimensional model: a matrix of float bins addressed by
/// column, each column covering `resolution` frames.
pub struct GridModel {
    base: ModelBase,
    sample_rate: u32,
    resolution: i32,
    bin_count: usize,
    // column-major so that columns can be appended in place
    data: Mutex<Array2<f32>>,
    bin_names: Mutex<Vec<String>>,
    extents: Mutex<(f32, f32, bool)>,
}

impl GridModel {
    pub const TYPE_NAME: &'static str = "grid";

    pub fn new(sample_rate: u32, resolution: i32, bin_count: usize) -> Self {
        Self {
            base: ModelBase::new(),
            sample_rate,
            resolution,
            bin_count,
            data: Mutex::new(Array2::zeros((bin_count, 0).f())),
            bin_names: Mutex::new(Vec::new()),
            extents: Mutex::new((0.0, 0.0, false)),
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn resolution(&self) -> i32 {
        self.resolution
    }

    pub fn column_count(&self) -> usize {
        self.data.lock().ncols()
    }

    /// Write one column, zero-filling any columns skipped before it.
    /// Values beyond `bin_count` are ignored; missing bins stay zero.
    pub fn set_column(&self, column: usize, values: &[f32]) {
        {
            let mut data = self.data.lock();
            let zero = ndarray::Array1::zeros(self.bin_count);
            while data.ncols() <= column {
                data.push_column(zero.view())
                    .expect("column push onto column-major grid");
            }
            for (bin, &v) in values.iter().enumerate().take(self.bin_count) {
                data[[bin, column]] = v;
            }
        }
        {
            let mut extents = self.extents.lock();
            for &v in values.iter().take(self.bin_count) {
                if !extents.2 {
                    *extents = (v, v, true);
                } else {
                    if v < extents.0 {
                        extents.0 = v;
                    }
                    if v > extents.1 {
                        extents.1 = v;
                    }
                }
            }
        }
        let start = column as i64 * i64::from(self.resolution);
        self.base.emit(&ModelEvent::ChangedWithin {
            start,
            end: start + i64::from(self.resolution),
        });
    }

    /// The bins of one column, or None past the last written column.
    pub fn column(&self, column: usize) -> Option<Vec<f32>> {
        let data = self.data.lock();
        if column >= data.ncols() {
            return None;
        }
        Some(data.column(column).to_vec())
    }

    pub fn value_minimum(&self) -> f32 {
        self.extents.lock().0
    }

    pub fn value_maximum(&self) -> f32 {
        self.extents.lock().1
    }

    pub fn set_bin_names(&self, names: Vec<String>) {
        *self.bin_names.lock() = names;
    }

    pub fn bin_name(&self, bin: usize) -> Option<String> {
        self.bin_names.lock().get(bin).cloned()
    }

    pub fn set_completion(&self, completion: u8) {
        self.base.set_completion(completion);
    }

    pub fn set_source(&self, source: Option<ModelId>) {
        self.base.set_source(source);
    }
}

impl Model for GridModel {
    fn id(&self) -> ModelId {
        self.base.id()
    }
    fn start_frame(&self) -> i64 {
        0
    }
    fn end_frame(&self) -> i64 {
        self.column_count() as i64 * i64::from(self.resolution)
    }
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn completion(&self) -> u8 {
        self.base.completion()
    }
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
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
