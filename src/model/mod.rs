//! Model identity, lifecycle notifications, and shared model capabilities.
//!
//! Every data model in the engine shares a small contract: a process-unique
//! id, frame extents at a sample rate, a completion percentage that rises
//! monotonically to 100, and lifecycle notifications delivered to
//! subscribed observers. Concrete models embed a [`ModelBase`] and delegate
//! to it rather than inheriting behaviour.
//!
//! Observers are plain callbacks invoked synchronously on whichever thread
//! mutated the model; bridging to another executor is the observer's
//! responsibility.

pub mod dense;
pub mod path;
pub mod registry;
pub mod sparse;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::align::AlignmentModel;
use crate::event::Event;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier unique to one model within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

impl ModelId {
    fn next() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle notification delivered to model observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// Content changed somewhere.
    Changed,
    /// Content changed within `[start, end)`.
    ChangedWithin { start: i64, end: i64 },
    /// Background completion moved to the given percentage.
    CompletionChanged(u8),
    /// Completion first reached 100. Fired exactly once per model.
    Ready,
    /// The model is about to be destroyed; observers should detach.
    AboutToBeDeleted,
}

/// Observer callback. Receives the id of the model that fired and the
/// event, on the mutating thread.
pub type ModelObserver = Arc<dyn Fn(ModelId, &ModelEvent) + Send + Sync>;

/// Shared identity, completion, and notification state embedded in every
/// concrete model.
pub struct ModelBase {
    id: ModelId,
    completion: AtomicU8,
    ready_fired: AtomicBool,
    abandoning: AtomicBool,
    source: Mutex<Option<ModelId>>,
    alignment: Mutex<Option<Arc<AlignmentModel>>>,
    observers: Mutex<Vec<ModelObserver>>,
}

impl std::fmt::Debug for ModelBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBase")
            .field("id", &self.id)
            .field("completion", &self.completion())
            .finish()
    }
}

impl Default for ModelBase {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBase {
    /// A fresh base in the incomplete state (completion 0).
    pub fn new() -> Self {
        Self {
            id: ModelId::next(),
            completion: AtomicU8::new(0),
            ready_fired: AtomicBool::new(false),
            abandoning: AtomicBool::new(false),
            source: Mutex::new(None),
            alignment: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn subscribe(&self, observer: ModelObserver) {
        self.observers.lock().push(observer);
    }

    /// Deliver an event to every observer, on the calling thread.
    pub fn emit(&self, event: &ModelEvent) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer(self.id, event);
        }
    }

    pub fn completion(&self) -> u8 {
        self.completion.load(Ordering::Acquire)
    }

    /// Raise the completion percentage.
    ///
    /// Completion is monotone: attempts to lower it are ignored. Reaching
    /// 100 for the first time fires `Ready` exactly once, after the
    /// `CompletionChanged` notification.
    pub fn set_completion(&self, completion: u8) {
        let completion = completion.min(100);
        let previous = self.completion.fetch_max(completion, Ordering::AcqRel);
        if completion <= previous {
            return;
        }
        self.emit(&ModelEvent::CompletionChanged(completion));
        if completion == 100 && !self.ready_fired.swap(true, Ordering::AcqRel) {
            self.emit(&ModelEvent::Ready);
        }
    }

    pub fn abandon(&self) {
        self.abandoning.store(true, Ordering::Release);
    }

    pub fn is_abandoning(&self) -> bool {
        self.abandoning.load(Ordering::Acquire)
    }

    pub fn set_source(&self, source: Option<ModelId>) {
        *self.source.lock() = source;
    }

    pub fn source(&self) -> Option<ModelId> {
        *self.source.lock()
    }

    /// Attach an alignment model. The base takes exclusive ownership of it.
    pub fn set_alignment(&self, alignment: Arc<AlignmentModel>) {
        *self.alignment.lock() = Some(alignment);
    }

    pub fn alignment(&self) -> Option<Arc<AlignmentModel>> {
        self.alignment.lock().clone()
    }

    /// Announce impending destruction so observers can detach, then drop
    /// the observer list.
    pub fn notify_about_to_be_deleted(&self) {
        self.emit(&ModelEvent::AboutToBeDeleted);
        self.observers.lock().clear();
    }
}

/// The contract shared by every data model.
pub trait Model: Send + Sync {
    fn id(&self) -> ModelId;

    /// First audio frame spanned by the model.
    fn start_frame(&self) -> i64;

    /// One past the final frame contained in the model.
    fn end_frame(&self) -> i64;

    fn sample_rate(&self) -> u32;

    /// Background-progress percentage, 0..=100, monotone non-decreasing.
    fn completion(&self) -> u8;

    fn is_ready(&self) -> bool {
        self.completion() == 100
    }

    /// Short type label for diagnostics.
    fn type_name(&self) -> &'static str;

    fn is_sparse(&self) -> bool {
        false
    }

    /// The model this one was derived from, if any.
    fn source_model(&self) -> Option<ModelId> {
        None
    }

    /// The alignment mapping this model's timeline to a reference, if one
    /// has been attached.
    fn alignment(&self) -> Option<Arc<AlignmentModel>> {
        None
    }

    fn subscribe(&self, observer: ModelObserver);

    /// Ask any background work feeding this model to stop.
    fn abandon(&self);

    fn is_abandoning(&self) -> bool;

    /// Fire `AboutToBeDeleted` and detach observers. The registry calls
    /// this just before dropping the owning handle.
    fn notify_about_to_be_deleted(&self);
}

/// Time column format for delimited export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeExportFormat {
    /// Integer frame numbers.
    #[default]
    Frames,
    /// Seconds, via [`crate::time::RealTime`].
    RealTime,
}

/// Row-oriented access to an event-backed model.
pub trait TabularModel {
    fn row_count(&self) -> i32;

    /// The event behind the given row, in frame order.
    fn event_for_row(&self, row: i32) -> Option<Event>;

    /// The row at which the given event appears (or would appear).
    fn row_for_event(&self, event: &Event) -> i32;
}

/// Delimited data export: one row per point, ordered by frame.
pub trait DelimitedExportable {
    fn to_delimited_rows(&self, delimiter: &str, time_format: TimeExportFormat) -> Vec<String>;
}
