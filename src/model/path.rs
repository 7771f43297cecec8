//! A sparse mapping between two audio timelines.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    DelimitedExportable, Model, ModelBase, ModelEvent, ModelId, ModelObserver, TimeExportFormat,
};
use crate::time::RealTime;

/// One vertex of a timeline mapping: `frame` on the source timeline maps
/// to `map_frame` on the target timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathPoint {
    pub frame: i64,
    pub map_frame: i64,
}

impl PathPoint {
    pub fn new(frame: i64, map_frame: i64) -> Self {
        Self { frame, map_frame }
    }
}

/// A sorted set of [`PathPoint`]s, both coordinates monotone
/// non-decreasing in well-formed paths.
pub struct PathModel {
    base: ModelBase,
    sample_rate: u32,
    resolution: i32,
    points: Mutex<BTreeSet<PathPoint>>,
}

impl PathModel {
    pub const TYPE_NAME: &'static str = "path";

    pub fn new(sample_rate: u32, resolution: i32) -> Self {
        Self {
            base: ModelBase::new(),
            sample_rate,
            resolution,
            points: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn add_point(&self, point: PathPoint) {
        self.points.lock().insert(point);
        self.base.emit(&ModelEvent::ChangedWithin {
            start: point.frame,
            end: point.frame + i64::from(self.resolution),
        });
    }

    pub fn clear(&self) {
        self.points.lock().clear();
        self.base.emit(&ModelEvent::Changed);
    }

    /// A snapshot of the points in source-frame order.
    pub fn points(&self) -> Vec<PathPoint> {
        self.points.lock().iter().copied().collect()
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }

    pub fn resolution(&self) -> i32 {
        self.resolution
    }

    pub fn set_completion(&self, completion: u8) {
        self.base.set_completion(completion);
    }
}

impl Model for PathModel {
    fn id(&self) -> ModelId {
        self.base.id()
    }
    fn start_frame(&self) -> i64 {
        self.points.lock().iter().next().map(|p| p.frame).unwrap_or(0)
    }
    fn end_frame(&self) -> i64 {
        self.points
            .lock()
            .iter()
            .next_back()
            .map(|p| p.frame)
            .unwrap_or(0)
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

impl DelimitedExportable for PathModel {
    fn to_delimited_rows(&self, delimiter: &str, time_format: TimeExportFormat) -> Vec<String> {
        self.points()
            .iter()
            .map(|p| {
                let time = match time_format {
                    TimeExportFormat::Frames => p.frame.to_string(),
                    TimeExportFormat::RealTime => {
                        RealTime::from_frame(p.frame, self.sample_rate).to_string()
                    }
                };
                format!("{time}{delimiter}{}", p.map_frame)
            })
            .collect()
    }
}
