//! A monotone piecewise-linear mapping between two audio timelines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::model::path::{PathModel, PathPoint};
use crate::model::sparse::SparseTimeValueModel;
use crate::model::{Model, ModelBase, ModelEvent, ModelId, ModelObserver};

/// Maps frames between an "aligned" model's timeline and a reference
/// timeline.
///
/// The mapping derives from a raw path: a [`SparseTimeValueModel`] whose
/// events pair a source frame with a value that, multiplied by the aligned
/// model's sample rate, gives the corresponding target frame. The raw path
/// may still be growing when the alignment model is constructed; the
/// forward and reverse paths are rebuilt from the full point set when it
/// completes, after which the raw path and any transient input model are
/// released and the derived paths remain authoritative.
///
/// Mapping a frame beyond either end of the path returns the nearest
/// vertex's mapped value; extrapolation never overshoots the final
/// segment.
pub struct AlignmentModel {
    base: ModelBase,
    reference: ModelId,
    aligned: ModelId,
    aligned_rate: u32,
    raw_path: Mutex<Option<Arc<SparseTimeValueModel>>>,
    input_model: Mutex<Option<Arc<dyn Model>>>,
    path: Mutex<Option<PathModel>>,
    reverse_path: Mutex<Option<PathModel>>,
    path_begun: AtomicBool,
    path_complete: AtomicBool,
}

impl AlignmentModel {
    /// Construct an alignment from `aligned`'s timeline to `reference`'s.
    ///
    /// `input_model` is a transient intermediate (typically the mixed-down
    /// audio the aligner consumed) released once the path completes.
    /// `raw_path` may be absent when the alignment is an identity mapping.
    pub fn new(
        reference: ModelId,
        aligned: ModelId,
        aligned_rate: u32,
        input_model: Option<Arc<dyn Model>>,
        raw_path: Option<Arc<SparseTimeValueModel>>,
    ) -> Arc<Self> {
        let model = Arc::new(Self {
            base: ModelBase::new(),
            reference,
            aligned,
            aligned_rate,
            raw_path: Mutex::new(raw_path.clone()),
            input_model: Mutex::new(input_model),
            path: Mutex::new(None),
            reverse_path: Mutex::new(None),
            path_begun: AtomicBool::new(false),
            path_complete: AtomicBool::new(false),
        });

        match raw_path {
            Some(raw) => {
                let weak = Arc::downgrade(&model);
                raw.subscribe(Arc::new(move |_, event| {
                    let Some(alignment) = weak.upgrade() else {
                        return;
                    };
                    match event {
                        ModelEvent::Changed | ModelEvent::ChangedWithin { .. } => {
                            alignment.raw_path_changed();
                        }
                        ModelEvent::CompletionChanged(_) | ModelEvent::Ready => {
                            alignment.raw_path_completion_changed();
                        }
                        ModelEvent::AboutToBeDeleted => {}
                    }
                }));
                model.rebuild_paths();
            }
            None => {
                // identity alignment, complete from the start
                model.path_begun.store(true, Ordering::Release);
                model.path_complete.store(true, Ordering::Release);
                model.base.set_completion(100);
            }
        }

        model
    }

    pub fn reference(&self) -> ModelId {
        self.reference
    }

    pub fn aligned(&self) -> ModelId {
        self.aligned
    }

    /// Map a frame on the aligned timeline to the reference timeline.
    pub fn to_reference(&self, frame: i64) -> i64 {
        let path = self.path.lock();
        match path.as_ref() {
            Some(p) => Self::align(&p.points(), frame),
            None => frame,
        }
    }

    /// Map a frame on the reference timeline back to the aligned timeline.
    pub fn from_reference(&self, frame: i64) -> i64 {
        let path = self.reverse_path.lock();
        match path.as_ref() {
            Some(p) => Self::align(&p.points(), frame),
            None => frame,
        }
    }

    /// True once the raw path has completed, or if there never was one.
    pub fn is_ready(&self) -> bool {
        if self.path_complete.load(Ordering::Acquire) {
            return true;
        }
        self.raw_path.lock().is_none()
    }

    fn raw_path_changed(&self) {
        if !self.path_complete.load(Ordering::Acquire) {
            return;
        }
        self.rebuild_paths();
        if self.raw_path.lock().take().is_some() {
            debug!("alignment complete, releasing raw path model");
        }
    }

    fn raw_path_completion_changed(&self) {
        let raw = self.raw_path.lock().clone();
        let Some(raw) = raw else {
            return;
        };
        self.path_begun.store(true, Ordering::Release);

        if !self.path_complete.load(Ordering::Acquire) {
            let completion = raw.completion();
            if completion == 100 {
                self.path_complete.store(true, Ordering::Release);
                self.rebuild_paths();
                if self.input_model.lock().take().is_some() {
                    debug!("alignment complete, releasing transient input model");
                }
            }
            self.base.set_completion(completion);
        }
    }

    /// Rebuild the forward and reverse paths from the raw path's full
    /// point set.
    fn rebuild_paths(&self) {
        let raw = self.raw_path.lock().clone();
        let Some(raw) = raw else {
            if self.path.lock().is_none() {
                error!("alignment path requested but no raw path available");
            }
            return;
        };

        let forward = PathModel::new(raw.sample_rate(), raw.resolution());
        let reverse = PathModel::new(raw.sample_rate(), raw.resolution());

        for e in raw.all_events() {
            let map_frame =
                (f64::from(e.value()) * f64::from(self.aligned_rate)).round() as i64;
            forward.add_point(PathPoint::new(e.frame(), map_frame));
            reverse.add_point(PathPoint::new(map_frame, e.frame()));
        }

        *self.path.lock() = Some(forward);
        *self.reverse_path.lock() = Some(reverse);
    }

    /// Map `frame` through a path: find the greatest vertex at or below
    /// it, then interpolate linearly towards the next vertex.
    fn align(points: &[PathPoint], frame: i64) -> i64 {
        if points.is_empty() {
            return frame;
        }

        let after = points.partition_point(|p| p.frame <= frame);
        let at = after.saturating_sub(1);
        let found = points[at];
        let following = points.get(at + 1).copied().unwrap_or(found);

        if found.map_frame < 0 {
            return 0;
        }

        let mut result = found.map_frame;
        if following.frame != found.frame && frame > found.frame {
            let interp =
                (frame - found.frame) as f64 / (following.frame - found.frame) as f64;
            result += ((following.map_frame - found.map_frame) as f64 * interp).round() as i64;
        }
        result.max(0)
    }
}

impl Model for AlignmentModel {
    fn id(&self) -> ModelId {
        self.base.id()
    }
    fn start_frame(&self) -> i64 {
        self.path
            .lock()
            .as_ref()
            .map(|p| p.start_frame())
            .unwrap_or(0)
    }
    fn end_frame(&self) -> i64 {
        self.path
            .lock()
            .as_ref()
            .map(|p| p.end_frame())
            .unwrap_or(0)
    }
    fn sample_rate(&self) -> u32 {
        self.aligned_rate
    }
    fn completion(&self) -> u8 {
        if self.path_complete.load(Ordering::Acquire) || self.raw_path.lock().is_none() {
            return 100;
        }
        if !self.path_begun.load(Ordering::Acquire) {
            return 0;
        }
        self.raw_path
            .lock()
            .as_ref()
            .map(|raw| raw.completion())
            .unwrap_or(100)
    }
    fn type_name(&self) -> &'static str {
        "alignment"
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
