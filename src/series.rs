//! A sorted multiset of events with a seam index for fast stabbing queries.

use std::collections::{BTreeMap, BTreeSet};

use crate::event::Event;

/// Search direction for [`EventSeries::nearest_event_matching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A time-ordered container of [`Event`]s.
///
/// Alongside the sorted event list the series maintains a seam index: a
/// sorted map from boundary frames to the durationful events active
/// immediately after each boundary. Point ("which events cover frame f?")
/// and interval-overlap queries run against the seams in O(log n); queries
/// that only look forwards run directly against the sorted list.
///
/// The index is kept minimal: no two adjacent seams carry equal lists, and
/// empty seams are trimmed from the front of the map.
#[derive(Debug, Clone, Default)]
pub struct EventSeries {
    events: Vec<Event>,
    seams: BTreeMap<i64, Vec<Event>>,
    final_durationless_frame: i64,
}

impl EventSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The number of events in the series.
    ///
    /// # Panics
    /// Panics if the series holds more events than fit in an `i32`.
    pub fn count(&self) -> i32 {
        assert!(
            self.events.len() <= i32::MAX as usize,
            "too many events to count"
        );
        self.events.len() as i32
    }

    /// Insert one instance of the given event.
    pub fn add(&mut self, e: Event) {
        let idx = self.lower_bound(&e);
        let is_unique = !(idx < self.events.len() && self.events[idx] == e);
        self.events.insert(idx, e.clone());

        if !e.has_duration() && e.frame() > self.final_durationless_frame {
            self.final_durationless_frame = e.frame();
        }

        if e.has_duration() && is_unique {
            let frame = e.frame();
            let end_frame = e.end_frame();

            self.create_seam(frame);
            self.create_seam(end_frame);

            for (_, active) in self.seams.range_mut(frame..end_frame) {
                active.push(e.clone());
            }
        }
    }

    /// Remove one instance of the given event; a no-op if it is absent.
    ///
    /// The seam index is only touched when the last instance of a
    /// durationful event goes.
    pub fn remove(&mut self, e: &Event) {
        let idx = self.lower_bound(e);
        if idx >= self.events.len() || self.events[idx] != *e {
            // we don't know this event
            return;
        }
        let is_unique = !(idx + 1 < self.events.len() && self.events[idx + 1] == *e);
        self.events.remove(idx);

        if !e.has_duration() && is_unique && e.frame() == self.final_durationless_frame {
            self.final_durationless_frame = self
                .events
                .iter()
                .rev()
                .find(|other| !other.has_duration())
                .map(Event::frame)
                .unwrap_or(0);
        }

        if e.has_duration() && is_unique {
            let frame = e.frame();
            let end_frame = e.end_frame();

            for (_, active) in self.seams.range_mut(frame..end_frame) {
                active.retain(|other| other != e);
            }

            // Tidy up by removing any seams now identical to their
            // predecessors, then drop empty seams from the front.

            let mut redundant = Vec::new();
            let mut previous = self
                .seams
                .range(..frame)
                .next_back()
                .map(|(_, active)| active.clone());
            for (&at, active) in self.seams.range(frame..=end_frame) {
                if previous.as_ref() == Some(active) {
                    redundant.push(at);
                }
                previous = Some(active.clone());
            }
            for at in redundant {
                self.seams.remove(&at);
            }

            while self
                .seams
                .first_key_value()
                .is_some_and(|(_, active)| active.is_empty())
            {
                self.seams.pop_first();
            }
        }
    }

    pub fn contains(&self, e: &Event) -> bool {
        self.events.binary_search(e).is_ok()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.seams.clear();
        self.final_durationless_frame = 0;
    }

    pub fn start_frame(&self) -> i64 {
        self.events.first().map(Event::frame).unwrap_or(0)
    }

    /// The frame just past the latest material in the series: the larger of
    /// the final durationless event frame and the last seam boundary.
    pub fn end_frame(&self) -> i64 {
        if self.events.is_empty() {
            return 0;
        }
        let mut latest = self.final_durationless_frame;
        if let Some((&last_seam, _)) = self.seams.iter().next_back() {
            if last_seam > latest {
                latest = last_seam;
            }
        }
        latest
    }

    /// All events whose extents intersect `[frame, frame + duration)`,
    /// including durationless events starting within it.
    pub fn events_spanning(&self, frame: i64, duration: i64) -> Vec<Event> {
        let mut span = Vec::new();
        let start = frame;
        let end = frame + duration;

        // durationless events from the sorted list
        let mut idx = self.lower_bound_frame(start);
        while idx < self.events.len() && self.events[idx].frame() < end {
            if !self.events[idx].has_duration() {
                span.push(self.events[idx].clone());
            }
            idx += 1;
        }

        // durationful events from the seam index
        let mut found = BTreeSet::new();
        for (_, active) in self.seams.range(self.seam_origin(start)..end) {
            for e in active {
                found.insert(e.clone());
            }
        }
        for e in found {
            self.push_instances(&e, &mut span);
        }

        span
    }

    /// Events fully contained in `[frame, frame + duration)`, with up to
    /// `overspill` neighbouring events prepended and appended in frame
    /// order.
    pub fn events_within(&self, frame: i64, duration: i64, overspill: usize) -> Vec<Event> {
        let mut span = Vec::new();
        let start = frame;
        let end = frame + duration;

        // Containment never needs to look back past the range start, so
        // this works entirely from the sorted list.

        let reference = self.lower_bound_frame(start);
        let first = reference.saturating_sub(overspill);
        for e in &self.events[first..reference] {
            span.push(e.clone());
        }

        let mut idx = reference;
        let mut last = reference;
        while idx < self.events.len() && self.events[idx].frame() < end {
            let e = &self.events[idx];
            if !e.has_duration() || e.end_frame() <= end {
                span.push(e.clone());
                last = idx + 1;
            }
            idx += 1;
        }

        for e in self.events.iter().skip(last).take(overspill) {
            span.push(e.clone());
        }

        span
    }

    /// Events starting within `[frame, frame + duration)`.
    pub fn events_starting_within(&self, frame: i64, duration: i64) -> Vec<Event> {
        let end = frame + duration;
        let mut idx = self.lower_bound_frame(frame);
        let mut span = Vec::new();
        while idx < self.events.len() && self.events[idx].frame() < end {
            span.push(self.events[idx].clone());
            idx += 1;
        }
        span
    }

    /// Durationless events at `frame` plus durationful events covering it.
    pub fn events_covering(&self, frame: i64) -> Vec<Event> {
        let mut cover = Vec::new();

        let mut idx = self.lower_bound_frame(frame);
        while idx < self.events.len() && self.events[idx].frame() == frame {
            if !self.events[idx].has_duration() {
                cover.push(self.events[idx].clone());
            }
            idx += 1;
        }

        let mut found = BTreeSet::new();
        if let Some((&at, active)) = self.seams.range(..=frame).next_back() {
            debug_assert!(at <= frame);
            for e in active {
                found.insert(e.clone());
            }
        }
        for e in found {
            self.push_instances(&e, &mut cover);
        }

        cover
    }

    /// A snapshot of every event in sort order.
    pub fn all_events(&self) -> Vec<Event> {
        self.events.clone()
    }

    /// The event strictly before `e` in sort order, if `e` is present.
    pub fn event_preceding(&self, e: &Event) -> Option<Event> {
        let idx = self.lower_bound(e);
        if idx >= self.events.len() || self.events[idx] != *e || idx == 0 {
            return None;
        }
        Some(self.events[idx - 1].clone())
    }

    /// The event strictly after `e` (past any identical copies), if `e` is
    /// present.
    pub fn event_following(&self, e: &Event) -> Option<Event> {
        let mut idx = self.lower_bound(e);
        if idx >= self.events.len() || self.events[idx] != *e {
            return None;
        }
        while idx < self.events.len() && self.events[idx] == *e {
            idx += 1;
        }
        self.events.get(idx).cloned()
    }

    /// Walk from `start_frame` in the given direction and return the first
    /// event satisfying the predicate.
    pub fn nearest_event_matching(
        &self,
        start_frame: i64,
        predicate: impl Fn(&Event) -> bool,
        direction: Direction,
    ) -> Option<Event> {
        let mut idx = self.lower_bound_frame(start_frame);
        loop {
            match direction {
                Direction::Backward => {
                    if idx == 0 {
                        return None;
                    }
                    idx -= 1;
                    if predicate(&self.events[idx]) {
                        return Some(self.events[idx].clone());
                    }
                }
                Direction::Forward => {
                    if idx >= self.events.len() {
                        return None;
                    }
                    if predicate(&self.events[idx]) {
                        return Some(self.events[idx].clone());
                    }
                    idx += 1;
                }
            }
        }
    }

    /// The event at the given index in sort order.
    ///
    /// # Panics
    /// Panics if the index is out of range.
    pub fn event_by_index(&self, index: i32) -> Event {
        assert!(
            index >= 0 && (index as usize) < self.events.len(),
            "event index out of range"
        );
        self.events[index as usize].clone()
    }

    /// The sort-order index at which `e` appears (or would appear).
    pub fn index_for_event(&self, e: &Event) -> i32 {
        let idx = self.lower_bound(e);
        if idx > i32::MAX as usize {
            return 0;
        }
        idx as i32
    }

    fn lower_bound(&self, e: &Event) -> usize {
        self.events.partition_point(|other| other < e)
    }

    fn lower_bound_frame(&self, frame: i64) -> usize {
        self.events.partition_point(|other| other.frame() < frame)
    }

    /// The key of the last seam at or below `frame`, or `frame` itself if
    /// there is none, so range scans start from the covering seam.
    fn seam_origin(&self, frame: i64) -> i64 {
        self.seams
            .range(..=frame)
            .next_back()
            .map(|(&at, _)| at)
            .unwrap_or(frame)
    }

    /// Ensure a seam exists at `frame`, seeding it with the active list of
    /// the nearest seam below.
    fn create_seam(&mut self, frame: i64) {
        if self.seams.contains_key(&frame) {
            return;
        }
        let below = self
            .seams
            .range(..frame)
            .next_back()
            .map(|(_, active)| active.clone())
            .unwrap_or_default();
        self.seams.insert(frame, below);
    }

    /// Push one copy of `e` per instance stored in the event list.
    fn push_instances(&self, e: &Event, out: &mut Vec<Event>) {
        let mut idx = self.lower_bound(e);
        while idx < self.events.len() && self.events[idx] == *e {
            out.push(e.clone());
            idx += 1;
        }
    }
}
