//! Synchronized subtitle playback.
//!
//! The playback clock is owned by the caller; it ticks `update_time` with a
//! monotonically advancing (but externally driven) cursor, and the
//! synchronizer maps that cursor onto the ordered segment list. Nothing here
//! holds a thread or a timer.

pub mod ab_loop;

use serde::Serialize;
use std::time::Duration;

use crate::database::Segment;

/// Tolerance extending each segment's highlight interval before its nominal
/// start, so scroll and word highlighting anticipate the segment instead of
/// flickering in exactly at the boundary.
pub const DEFAULT_PRELOAD_SECONDS: f64 = 1.0;
/// Tolerance past the nominal end, letting the highlight linger briefly.
pub const DEFAULT_POSTLOAD_SECONDS: f64 = 0.5;

/// Auto-scroll is deferred so layout settles before scroll positions are
/// measured; while playing the deferral is longer to coalesce bursts of
/// cursor updates.
const SCROLL_DELAY_PAUSED: Duration = Duration::from_millis(100);
const SCROLL_DELAY_PLAYING: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub preload_seconds: f64,
    pub postload_seconds: f64,
    /// Bounded lookahead for the upcoming list.
    pub lookahead: usize,
    /// Bounded lookback for the previous list.
    pub lookback: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            preload_seconds: DEFAULT_PRELOAD_SECONDS,
            postload_seconds: DEFAULT_POSTLOAD_SECONDS,
            lookahead: 3,
            lookback: 2,
        }
    }
}

/// Snapshot of what should be on screen for the current cursor position.
///
/// `current` uses strict `[start, end]` containment ("what is playing now");
/// `active_index` uses the preload/postload-extended interval and is what
/// scroll logic and change notification key on.
#[derive(Debug, Clone, Serialize)]
pub struct SubtitleWindow {
    pub current: Option<Segment>,
    pub active_index: Option<usize>,
    pub upcoming: Vec<Segment>,
    pub previous: Vec<Segment>,
    /// Index into the current segment's word timestamps, when word-level
    /// timing is available and the cursor is inside a word.
    pub active_word_index: Option<usize>,
}

type UpdateCallback = Box<dyn Fn(&SubtitleWindow) + Send>;

/// Maps a time cursor to the active/upcoming/previous subtitle window.
///
/// Stateless with respect to the cursor: every tick recomputes from the full
/// segment list. The only memory between ticks is the previously active
/// index, kept to suppress redundant observer notifications.
pub struct SubtitleSynchronizer {
    segments: Vec<Segment>,
    config: SyncConfig,
    cursor: f64,
    last_active: Option<usize>,
    observers: Vec<UpdateCallback>,
}

impl SubtitleSynchronizer {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self::with_config(segments, SyncConfig::default())
    }

    pub fn with_config(mut segments: Vec<Segment>, config: SyncConfig) -> Self {
        sort_by_start(&mut segments);
        Self {
            segments,
            config,
            cursor: 0.0,
            last_active: None,
            observers: Vec::new(),
        }
    }

    /// Replace the segment list (e.g. after re-transcription) and drop the
    /// change-detection state.
    pub fn set_segments(&mut self, mut segments: Vec<Segment>) {
        sort_by_start(&mut segments);
        self.segments = segments;
        self.last_active = None;
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Register an observer fired when the active segment changes.
    pub fn on_update(&mut self, callback: UpdateCallback) {
        self.observers.push(callback);
    }

    /// Advance the cursor. Observers fire only when the active (tolerant)
    /// index differs from the previous tick, bounding UI churn. Returns
    /// whether the active segment changed.
    pub fn update_time(&mut self, t: f64) -> bool {
        self.cursor = t;
        let active = self.active_index(t);
        if active == self.last_active {
            return false;
        }
        self.last_active = active;

        let window = self.current_state();
        for observer in &self.observers {
            observer(&window);
        }
        true
    }

    /// Recompute the subtitle window for the latest cursor.
    pub fn current_state(&self) -> SubtitleWindow {
        let t = self.cursor;
        let active_index = self.active_index(t);
        let current = self.strict_index(t).map(|i| self.segments[i].clone());

        // Anchor the upcoming/previous lists on the active segment, or on
        // the insertion point when the cursor sits between segments.
        let next_start = match active_index {
            Some(i) => i + 1,
            None => self
                .segments
                .iter()
                .position(|s| s.start_time > t)
                .unwrap_or(self.segments.len()),
        };
        let upcoming: Vec<Segment> = self
            .segments
            .iter()
            .skip(next_start)
            .take(self.config.lookahead)
            .cloned()
            .collect();

        let prev_end = match active_index {
            Some(i) => i,
            None => next_start,
        };
        let prev_from = prev_end.saturating_sub(self.config.lookback);
        let previous: Vec<Segment> = self.segments[prev_from..prev_end].to_vec();

        let active_word_index = current.as_ref().and_then(|segment| {
            segment.word_timestamps.as_ref().and_then(|words| {
                words.iter().position(|w| t >= w.start && t <= w.end)
            })
        });

        SubtitleWindow {
            current,
            active_index,
            upcoming,
            previous,
            active_word_index,
        }
    }

    /// Segment whose midpoint is closest to `t`, used for click-to-seek and
    /// resume. On an exact midpoint-distance tie the earliest segment wins.
    pub fn find_nearest_segment(&self, t: f64) -> Option<&Segment> {
        let mut best: Option<(&Segment, f64)> = None;
        for segment in &self.segments {
            let midpoint = (segment.start_time + segment.end_time) / 2.0;
            let distance = (midpoint - t).abs();
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((segment, distance)),
            }
        }
        best.map(|(segment, _)| segment)
    }

    /// Segments overlapping the interval `[a, b]`.
    pub fn segments_in_range(&self, a: f64, b: f64) -> Vec<&Segment> {
        self.segments
            .iter()
            .filter(|s| s.start_time <= b && s.end_time >= a)
            .collect()
    }

    /// How long auto-scroll should wait before measuring positions.
    pub fn scroll_delay(playing: bool) -> Duration {
        if playing {
            SCROLL_DELAY_PLAYING
        } else {
            SCROLL_DELAY_PAUSED
        }
    }

    /// First segment (ascending start) whose tolerant window contains `t`.
    fn active_index(&self, t: f64) -> Option<usize> {
        self.segments.iter().position(|s| {
            t >= s.start_time - self.config.preload_seconds
                && t <= s.end_time + self.config.postload_seconds
        })
    }

    /// First segment strictly containing `t`. Non-overlap makes this unique
    /// for well-formed data; first match keeps it deterministic otherwise.
    fn strict_index(&self, t: f64) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| t >= s.start_time && t <= s.end_time)
    }
}

fn sort_by_start(segments: &mut [Segment]) {
    segments.sort_by(|a, b| {
        a.start_time
            .partial_cmp(&b.start_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::WordTimestamp;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn segment(id: i64, start: f64, end: f64) -> Segment {
        Segment {
            id,
            transcript_id: 1,
            start_time: start,
            end_time: end,
            text: format!("segment {}", id),
            normalized_text: None,
            translation: None,
            annotations: None,
            phonetic_reading: None,
            word_timestamps: None,
        }
    }

    fn two_adjacent() -> Vec<Segment> {
        vec![segment(1, 0.0, 3.0), segment(2, 3.0, 6.0)]
    }

    #[test]
    fn test_strict_current_at_boundaries() {
        let mut sync = SubtitleSynchronizer::new(two_adjacent());

        sync.update_time(2.99);
        assert_eq!(sync.current_state().current.as_ref().unwrap().id, 1);

        sync.update_time(3.01);
        assert_eq!(sync.current_state().current.as_ref().unwrap().id, 2);
    }

    #[test]
    fn test_no_current_outside_all_segments() {
        let mut sync = SubtitleSynchronizer::new(two_adjacent());

        sync.update_time(-1.0);
        assert!(sync.current_state().current.is_none());

        sync.update_time(100.0);
        assert!(sync.current_state().current.is_none());
    }

    #[test]
    fn test_tolerant_window_extends_past_strict_bounds() {
        let mut sync = SubtitleSynchronizer::new(vec![segment(1, 10.0, 12.0)]);

        // Inside preload, before the strict start
        sync.update_time(9.2);
        let window = sync.current_state();
        assert_eq!(window.active_index, Some(0));
        assert!(window.current.is_none());

        // Inside postload, past the strict end
        sync.update_time(12.4);
        let window = sync.current_state();
        assert_eq!(window.active_index, Some(0));
        assert!(window.current.is_none());

        // Beyond postload
        sync.update_time(12.6);
        assert_eq!(sync.current_state().active_index, None);
    }

    #[test]
    fn test_upcoming_and_previous_are_bounded() {
        let segments: Vec<Segment> = (0..10)
            .map(|i| segment(i + 1, i as f64 * 5.0, i as f64 * 5.0 + 4.0))
            .collect();
        let mut sync = SubtitleSynchronizer::with_config(
            segments,
            SyncConfig {
                lookahead: 3,
                lookback: 2,
                ..SyncConfig::default()
            },
        );

        sync.update_time(26.0); // inside segment 6 (25.0..29.0)
        let window = sync.current_state();
        assert_eq!(window.current.as_ref().unwrap().id, 6);
        assert_eq!(
            window.upcoming.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![7, 8, 9]
        );
        assert_eq!(
            window.previous.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[test]
    fn test_window_between_segments_anchors_on_next() {
        let segments = vec![segment(1, 0.0, 2.0), segment(2, 10.0, 12.0)];
        let mut sync = SubtitleSynchronizer::new(segments);

        sync.update_time(5.0);
        let window = sync.current_state();
        assert!(window.current.is_none());
        assert_eq!(window.upcoming.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(window.previous.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_notification_fires_only_on_active_change() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut sync = SubtitleSynchronizer::new(two_adjacent());
        let counter = fired.clone();
        sync.on_update(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(sync.update_time(1.0)); // enters segment 1
        assert!(!sync.update_time(1.5)); // still segment 1
        assert!(!sync.update_time(2.0));
        assert!(sync.update_time(4.0)); // enters segment 2

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_overlapping_segments_pick_first_by_start() {
        // Malformed input; the synchronizer must stay deterministic
        let segments = vec![segment(1, 0.0, 5.0), segment(2, 3.0, 8.0)];
        let mut sync = SubtitleSynchronizer::new(segments);

        sync.update_time(4.0);
        assert_eq!(sync.current_state().current.as_ref().unwrap().id, 1);
    }

    #[test]
    fn test_nearest_segment_by_midpoint() {
        let sync = SubtitleSynchronizer::new(two_adjacent()); // midpoints 1.5, 4.5

        assert_eq!(sync.find_nearest_segment(0.0).unwrap().id, 1);
        assert_eq!(sync.find_nearest_segment(4.0).unwrap().id, 2);
        assert_eq!(sync.find_nearest_segment(100.0).unwrap().id, 2);
    }

    #[test]
    fn test_nearest_segment_tie_picks_earliest() {
        // Midpoints 1.5 and 4.5; t = 3.0 is equidistant from both
        let sync = SubtitleSynchronizer::new(two_adjacent());
        assert_eq!(sync.find_nearest_segment(3.0).unwrap().id, 1);
    }

    #[test]
    fn test_nearest_segment_empty_list() {
        let sync = SubtitleSynchronizer::new(Vec::new());
        assert!(sync.find_nearest_segment(1.0).is_none());
    }

    #[test]
    fn test_segments_in_range() {
        let segments: Vec<Segment> = (0..5)
            .map(|i| segment(i + 1, i as f64 * 10.0, i as f64 * 10.0 + 5.0))
            .collect();
        let sync = SubtitleSynchronizer::new(segments);

        let hits = sync.segments_in_range(12.0, 31.0);
        assert_eq!(hits.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(sync.segments_in_range(200.0, 300.0).is_empty());
    }

    #[test]
    fn test_active_word_highlight() {
        let mut seg = segment(1, 0.0, 3.0);
        seg.word_timestamps = Some(vec![
            WordTimestamp {
                word: "hello".to_string(),
                start: 0.0,
                end: 1.0,
            },
            WordTimestamp {
                word: "there".to_string(),
                start: 1.2,
                end: 2.0,
            },
        ]);
        let mut sync = SubtitleSynchronizer::new(vec![seg]);

        sync.update_time(1.5);
        assert_eq!(sync.current_state().active_word_index, Some(1));

        // Between words
        sync.update_time(1.1);
        assert_eq!(sync.current_state().active_word_index, None);
    }

    #[test]
    fn test_set_segments_resets_change_detection() {
        let mut sync = SubtitleSynchronizer::new(two_adjacent());
        sync.update_time(1.0);

        sync.set_segments(vec![segment(7, 0.0, 3.0)]);
        // Same cursor, new list: the change must be observable again
        assert!(sync.update_time(1.0));
        assert_eq!(sync.current_state().current.as_ref().unwrap().id, 7);
    }

    #[test]
    fn test_scroll_delay_shorter_when_paused() {
        assert!(
            SubtitleSynchronizer::scroll_delay(false)
                < SubtitleSynchronizer::scroll_delay(true)
        );
    }
}
