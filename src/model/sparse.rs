//! Sparse event-backed models.
//!
//! Each model here is a single concrete type containing an [`EventSeries`]
//! behind a mutex, composed with the shared [`ModelBase`] and the tabular /
//! export capability traits. There is no inheritance tree: a note model is
//! not a kind of value model, it just carries the same capabilities.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    DelimitedExportable, Model, ModelBase, ModelEvent, ModelId, ModelObserver, TabularModel,
    TimeExportFormat,
};
use crate::event::Event;
use crate::series::{Direction, EventSeries};
use crate::time::RealTime;

/// Observed minimum/maximum of the values added to a model.
#[derive(Debug, Clone, Copy, Default)]
struct ValueExtents {
    min: f32,
    max: f32,
    have: bool,
}

impl ValueExtents {
    fn update(&mut self, value: f32) {
        if value.is_nan() {
            return;
        }
        if !self.have {
            self.min = value;
            self.max = value;
            self.have = true;
        } else {
            if value < self.min {
                self.min = value;
            }
            if value > self.max {
                self.max = value;
            }
        }
    }
}

fn export_time(frame: i64, sample_rate: u32, format: TimeExportFormat) -> String {
    match format {
        TimeExportFormat::Frames => frame.to_string(),
        TimeExportFormat::RealTime => RealTime::from_frame(frame, sample_rate).to_string(),
    }
}

macro_rules! delegate_model_impl {
    ($ty:ty) => {
        impl Model for $ty {
            fn id(&self) -> ModelId {
                self.base.id()
            }
            fn start_frame(&self) -> i64 {
                self.events.lock().start_frame()
            }
            fn end_frame(&self) -> i64 {
                self.events.lock().end_frame()
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
            fn is_sparse(&self) -> bool {
                true
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

        impl TabularModel for $ty {
            fn row_count(&self) -> i32 {
                self.events.lock().count()
            }
            fn event_for_row(&self, row: i32) -> Option<Event> {
                let events = self.events.lock();
                if row < 0 || row >= events.count() {
                    None
                } else {
                    Some(events.event_by_index(row))
                }
            }
            fn row_for_event(&self, event: &Event) -> i32 {
                self.events.lock().index_for_event(event)
            }
        }

        impl $ty {
            pub fn event_count(&self) -> i32 {
                self.events.lock().count()
            }
            pub fn is_empty(&self) -> bool {
                self.events.lock().is_empty()
            }
            pub fn contains_event(&self, e: &Event) -> bool {
                self.events.lock().contains(e)
            }
            pub fn all_events(&self) -> Vec<Event> {
                self.events.lock().all_events()
            }
            pub fn events_spanning(&self, frame: i64, duration: i64) -> Vec<Event> {
                self.events.lock().events_spanning(frame, duration)
            }
            pub fn events_within(&self, frame: i64, duration: i64, overspill: usize) -> Vec<Event> {
                self.events.lock().events_within(frame, duration, overspill)
            }
            pub fn events_starting_within(&self, frame: i64, duration: i64) -> Vec<Event> {
                self.events.lock().events_starting_within(frame, duration)
            }
            pub fn events_covering(&self, frame: i64) -> Vec<Event> {
                self.events.lock().events_covering(frame)
            }
            pub fn nearest_event_matching(
                &self,
                start_frame: i64,
                predicate: impl Fn(&Event) -> bool,
                direction: Direction,
            ) -> Option<Event> {
                self.events
                    .lock()
                    .nearest_event_matching(start_frame, predicate, direction)
            }

            /// Frames per step of this model's data.
            pub fn resolution(&self) -> i32 {
                self.resolution
            }

            pub fn set_completion(&self, completion: u8) {
                self.base.set_completion(completion);
            }

            pub fn set_source(&self, source: Option<ModelId>) {
                self.base.set_source(source);
            }

            /// Attach an alignment to a reference timeline. The model
            /// takes exclusive ownership of it.
            pub fn set_alignment(&self, alignment: Arc<crate::align::AlignmentModel>) {
                self.base.set_alignment(alignment);
            }

            /// Remove one instance of the given event; no-op if absent.
            pub fn remove_event(&self, e: &Event) {
                {
                    let mut events = self.events.lock();
                    events.remove(e);
                }
                self.base.emit(&ModelEvent::ChangedWithin {
                    start: e.frame(),
                    end: e.end_frame().max(e.frame() + i64::from(self.resolution)),
                });
            }

            pub fn clear(&self) {
                self.events.lock().clear();
                self.base.emit(&ModelEvent::Changed);
            }

            fn emit_added(&self, e: &Event) {
                self.base.emit(&ModelEvent::ChangedWithin {
                    start: e.frame(),
                    end: e.end_frame().max(e.frame() + i64::from(self.resolution)),
                });
            }
        }
    };
}

/// A model of instants: durationless, valueless events with labels.
pub struct SparseOneDimensionalModel {
    base: ModelBase,
    sample_rate: u32,
    resolution: i32,
    events: Mutex<EventSeries>,
}

impl SparseOneDimensionalModel {
    pub const TYPE_NAME: &'static str = "instants";

    pub fn new(sample_rate: u32, resolution: i32) -> Self {
        Self {
            base: ModelBase::new(),
            sample_rate,
            resolution,
            events: Mutex::new(EventSeries::new()),
        }
    }

    pub fn add_event(&self, e: Event) {
        self.events.lock().add(e.clone());
        self.emit_added(&e);
    }
}

delegate_model_impl!(SparseOneDimensionalModel);

impl DelimitedExportable for SparseOneDimensionalModel {
    fn to_delimited_rows(&self, delimiter: &str, time_format: TimeExportFormat) -> Vec<String> {
        self.all_events()
            .iter()
            .map(|e| {
                let mut row = export_time(e.frame(), self.sample_rate, time_format);
                if !e.label().is_empty() {
                    row.push_str(delimiter);
                    row.push_str(e.label());
                }
                row
            })
            .collect()
    }
}

/// A model of time/value points.
pub struct SparseTimeValueModel {
    base: ModelBase,
    sample_rate: u32,
    resolution: i32,
    events: Mutex<EventSeries>,
    extents: Mutex<ValueExtents>,
    units: Mutex<String>,
}

impl SparseTimeValueModel {
    pub const TYPE_NAME: &'static str = "time-values";

    pub fn new(sample_rate: u32, resolution: i32) -> Self {
        Self {
            base: ModelBase::new(),
            sample_rate,
            resolution,
            events: Mutex::new(EventSeries::new()),
            extents: Mutex::new(ValueExtents::default()),
            units: Mutex::new(String::new()),
        }
    }

    /// Construct with known value extents, e.g. from a plugin's output
    /// descriptor.
    pub fn with_extents(sample_rate: u32, resolution: i32, min: f32, max: f32) -> Self {
        let model = Self::new(sample_rate, resolution);
        *model.extents.lock() = ValueExtents {
            min,
            max,
            have: true,
        };
        model
    }

    pub fn add_event(&self, e: Event) {
        {
            let mut events = self.events.lock();
            events.add(e.clone());
        }
        self.extents.lock().update(e.value());
        self.emit_added(&e);
    }

    pub fn value_minimum(&self) -> f32 {
        self.extents.lock().min
    }

    pub fn value_maximum(&self) -> f32 {
        self.extents.lock().max
    }

    pub fn scale_units(&self) -> String {
        self.units.lock().clone()
    }

    pub fn set_scale_units(&self, units: impl Into<String>) {
        *self.units.lock() = units.into();
    }
}

delegate_model_impl!(SparseTimeValueModel);

impl DelimitedExportable for SparseTimeValueModel {
    fn to_delimited_rows(&self, delimiter: &str, time_format: TimeExportFormat) -> Vec<String> {
        self.all_events()
            .iter()
            .map(|e| {
                let mut row = export_time(e.frame(), self.sample_rate, time_format);
                row.push_str(delimiter);
                row.push_str(&e.value().to_string());
                if !e.label().is_empty() {
                    row.push_str(delimiter);
                    row.push_str(e.label());
                }
                row
            })
            .collect()
    }
}

/// A model of valued intervals.
pub struct RegionModel {
    base: ModelBase,
    sample_rate: u32,
    resolution: i32,
    events: Mutex<EventSeries>,
    extents: Mutex<ValueExtents>,
}

impl RegionModel {
    pub const TYPE_NAME: &'static str = "regions";

    pub fn new(sample_rate: u32, resolution: i32) -> Self {
        Self {
            base: ModelBase::new(),
            sample_rate,
            resolution,
            events: Mutex::new(EventSeries::new()),
            extents: Mutex::new(ValueExtents::default()),
        }
    }

    pub fn with_extents(sample_rate: u32, resolution: i32, min: f32, max: f32) -> Self {
        let model = Self::new(sample_rate, resolution);
        *model.extents.lock() = ValueExtents {
            min,
            max,
            have: true,
        };
        model
    }

    pub fn add_event(&self, e: Event) {
        {
            let mut events = self.events.lock();
            events.add(e.clone());
        }
        self.extents.lock().update(e.value());
        self.emit_added(&e);
    }

    pub fn value_minimum(&self) -> f32 {
        self.extents.lock().min
    }

    pub fn value_maximum(&self) -> f32 {
        self.extents.lock().max
    }
}

delegate_model_impl!(RegionModel);

impl DelimitedExportable for RegionModel {
    fn to_delimited_rows(&self, delimiter: &str, time_format: TimeExportFormat) -> Vec<String> {
        self.all_events()
            .iter()
            .map(|e| {
                let mut row = export_time(e.frame(), self.sample_rate, time_format);
                row.push_str(delimiter);
                row.push_str(&e.value().to_string());
                row.push_str(delimiter);
                row.push_str(&export_time(e.duration(), self.sample_rate, time_format));
                if !e.label().is_empty() {
                    row.push_str(delimiter);
                    row.push_str(e.label());
                }
                row
            })
            .collect()
    }
}

/// A model of notes: pitched, velocity-bearing intervals.
pub struct NoteModel {
    base: ModelBase,
    sample_rate: u32,
    resolution: i32,
    events: Mutex<EventSeries>,
    extents: Mutex<ValueExtents>,
    units: Mutex<String>,
}

impl NoteModel {
    pub const TYPE_NAME: &'static str = "notes";

    pub fn new(sample_rate: u32, resolution: i32) -> Self {
        Self {
            base: ModelBase::new(),
            sample_rate,
            resolution,
            events: Mutex::new(EventSeries::new()),
            extents: Mutex::new(ValueExtents::default()),
            units: Mutex::new(String::new()),
        }
    }

    pub fn with_extents(sample_rate: u32, resolution: i32, min: f32, max: f32) -> Self {
        let model = Self::new(sample_rate, resolution);
        *model.extents.lock() = ValueExtents {
            min,
            max,
            have: true,
        };
        model
    }

    pub fn add_event(&self, e: Event) {
        {
            let mut events = self.events.lock();
            events.add(e.clone());
        }
        self.extents.lock().update(e.value());
        self.emit_added(&e);
    }

    /// Notes whose intervals intersect `[start, start + duration)`, in
    /// frame order.
    pub fn notes_spanning(&self, start: i64, duration: i64) -> Vec<Event> {
        self.events.lock().events_spanning(start, duration)
    }

    pub fn value_minimum(&self) -> f32 {
        self.extents.lock().min
    }

    pub fn value_maximum(&self) -> f32 {
        self.extents.lock().max
    }

    pub fn scale_units(&self) -> String {
        self.units.lock().clone()
    }

    pub fn set_scale_units(&self, units: impl Into<String>) {
        *self.units.lock() = units.into();
    }
}

delegate_model_impl!(NoteModel);

impl DelimitedExportable for NoteModel {
    fn to_delimited_rows(&self, delimiter: &str, time_format: TimeExportFormat) -> Vec<String> {
        self.all_events()
            .iter()
            .map(|e| {
                let mut row = export_time(e.frame(), self.sample_rate, time_format);
                row.push_str(delimiter);
                row.push_str(&e.value().to_string());
                row.push_str(delimiter);
                row.push_str(&export_time(e.duration(), self.sample_rate, time_format));
                row.push_str(delimiter);
                row.push_str(&e.level().to_string());
                if !e.label().is_empty() {
                    row.push_str(delimiter);
                    row.push_str(e.label());
                }
                row
            })
            .collect()
    }
}
