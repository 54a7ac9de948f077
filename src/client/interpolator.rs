use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::models::GeoPoint;

/// Bounds on a single animation segment, protecting against clock skew and
/// large inter-sample gaps.
pub const MIN_SEGMENT: Duration = Duration::from_millis(200);
pub const MAX_SEGMENT: Duration = Duration::from_millis(6000);
/// Duration of the very first segment after seeding.
pub const FIRST_SEGMENT: Duration = Duration::from_millis(500);

/// A point with its source timestamp (epoch milliseconds) when known.
#[derive(Debug, Clone, Copy)]
pub struct TimedPoint {
    pub point: GeoPoint,
    pub timestamp_ms: Option<i64>,
}

impl TimedPoint {
    pub fn new(point: GeoPoint, timestamp_ms: Option<i64>) -> Self {
        Self {
            point,
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: GeoPoint,
    target: GeoPoint,
    target_ts: Option<i64>,
    started_at: Instant,
    duration: Duration,
}

/// Turns the sparse, possibly bursty sample stream for one trip into smooth
/// marker motion.
///
/// Points queue in arrival order and play back sequentially; a burst
/// produces temporarily faster-than-realtime playback rather than dropped
/// frames. The host calls [`MarkerInterpolator::tick`] once per render
/// frame. Relay-sourced live points and poll-sourced catch-up points go
/// through the same enqueue path, so the two sources blend without
/// special-casing.
pub struct MarkerInterpolator {
    /// Points already animated through, in order.
    path: Vec<GeoPoint>,
    queue: VecDeque<TimedPoint>,
    segment: Option<Segment>,
    /// The currently rendered (possibly mid-segment) point.
    rendered: Option<GeoPoint>,
    /// Source timestamp of the last finished segment's target.
    prev_ts: Option<i64>,
    /// Newest source timestamp seen, the reconciliation watermark.
    last_known_ts: Option<i64>,
    default_duration: Duration,
    animated_any: bool,
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

impl MarkerInterpolator {
    /// `default_duration` is the per-viewer segment length used when source
    /// timestamps are unknown (1 s for the admin map, up to 5 s for the
    /// passenger map).
    pub fn new(default_duration: Duration) -> Self {
        Self {
            path: Vec::new(),
            queue: VecDeque::new(),
            segment: None,
            rendered: None,
            prev_ts: None,
            last_known_ts: None,
            default_duration,
            animated_any: false,
        }
    }

    /// Seed from the trip's recorded start coordinate and its history.
    /// The path becomes all-but-the-last historical point (start coordinate
    /// prepended when present and distinct) and the marker jumps straight to
    /// the last historical point.
    pub fn seed(&mut self, start: Option<GeoPoint>, history: &[TimedPoint]) {
        self.reset();

        match history.split_last() {
            Some((last, earlier)) => {
                if let Some(start) = start {
                    let distinct = earlier
                        .first()
                        .map(|p| p.point)
                        .or(Some(last.point))
                        .map_or(true, |first| first != start);
                    if distinct {
                        self.path.push(start);
                    }
                }
                self.path.extend(earlier.iter().map(|p| p.point));
                self.rendered = Some(last.point);
                self.prev_ts = last.timestamp_ms;
                self.last_known_ts = last.timestamp_ms;
            }
            None => {
                self.rendered = start;
            }
        }
    }

    /// Queue a point for animation. Exact duplicates of the most recent
    /// known point are silently dropped. Returns whether the point was
    /// queued.
    pub fn enqueue(&mut self, point: GeoPoint, timestamp_ms: Option<i64>, now: Instant) -> bool {
        let last_any = self
            .queue
            .back()
            .map(|p| p.point)
            .or_else(|| self.segment.as_ref().map(|s| s.target))
            .or_else(|| self.path.last().copied())
            .or(self.rendered);
        if last_any == Some(point) {
            return false;
        }

        if let Some(ts) = timestamp_ms {
            if self.last_known_ts.map_or(true, |w| ts > w) {
                self.last_known_ts = Some(ts);
            }
        }

        self.queue.push_back(TimedPoint::new(point, timestamp_ms));
        if self.segment.is_none() {
            self.begin_next(now);
        }
        true
    }

    /// Merge points returned by the reconciliation poll. Only points newer
    /// than the watermark enter the queue; everything else was already seen
    /// via the relay. Returns how many points were queued.
    pub fn merge_history(&mut self, points: &[TimedPoint], now: Instant) -> usize {
        let watermark = self.last_known_ts;
        let mut queued = 0;
        for p in points {
            let newer = match (p.timestamp_ms, watermark) {
                (Some(ts), Some(w)) => ts > w,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if newer && self.enqueue(p.point, p.timestamp_ms, now) {
                queued += 1;
            }
        }
        queued
    }

    fn begin_next(&mut self, now: Instant) {
        let Some(next) = self.queue.pop_front() else {
            return;
        };
        let start = self.rendered.unwrap_or(next.point);
        let duration = match (self.prev_ts, next.timestamp_ms) {
            (Some(prev), Some(ts)) => {
                Duration::from_millis((ts - prev).clamp(
                    MIN_SEGMENT.as_millis() as i64,
                    MAX_SEGMENT.as_millis() as i64,
                ) as u64)
            }
            _ if !self.animated_any => FIRST_SEGMENT,
            _ => self.default_duration,
        };
        self.animated_any = true;
        self.segment = Some(Segment {
            start,
            target: next.point,
            target_ts: next.timestamp_ms,
            started_at: now,
            duration,
        });
    }

    /// Advance the animation to `now`. On segment completion the target is
    /// finalized and the next queued segment starts immediately. Returns the
    /// marker position after the step.
    pub fn tick(&mut self, now: Instant) -> Option<GeoPoint> {
        if let Some(segment) = self.segment {
            let elapsed = now.saturating_duration_since(segment.started_at);
            let pct = (elapsed.as_secs_f64() / segment.duration.as_secs_f64()).min(1.0);
            if pct >= 1.0 {
                let target = segment.target;
                let target_ts = segment.target_ts;
                self.rendered = Some(target);
                self.path.push(target);
                self.prev_ts = target_ts.or(self.prev_ts);
                self.segment = None;
                self.begin_next(now);
            } else {
                self.rendered = Some(GeoPoint::new(
                    lerp(segment.start.latitude, segment.target.latitude, pct),
                    lerp(segment.start.longitude, segment.target.longitude, pct),
                ));
            }
        }
        self.marker_position()
    }

    /// The marker's position: the in-flight point when animating, otherwise
    /// the last finalized point.
    pub fn marker_position(&self) -> Option<GeoPoint> {
        self.rendered.or_else(|| self.path.last().copied())
    }

    /// The trace drawn behind the marker: finalized path plus the in-flight
    /// point.
    pub fn trail(&self) -> Vec<GeoPoint> {
        let mut trail = self.path.clone();
        if let Some(rendered) = self.rendered {
            trail.push(rendered);
        }
        trail
    }

    pub fn is_animating(&self) -> bool {
        self.segment.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn segment_duration(&self) -> Option<Duration> {
        self.segment.as_ref().map(|s| s.duration)
    }

    pub fn last_known_timestamp(&self) -> Option<i64> {
        self.last_known_ts
    }

    /// Drop all state. Switching the tracked bus resets before re-seeding,
    /// so no stale segment or queue entry can leak into the new trip.
    pub fn reset(&mut self) {
        self.path.clear();
        self.queue.clear();
        self.segment = None;
        self.rendered = None;
        self.prev_ts = None;
        self.last_known_ts = None;
        self.animated_any = false;
    }
}
