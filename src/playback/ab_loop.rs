//! A/B loop playback control.

use serde::Serialize;

/// The clock can report the same boundary crossing several times per
/// rendering frame; re-triggers inside this window of the last trigger are
/// ignored.
const RETRIGGER_EPSILON_SECONDS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoopRange {
    pub start: f64,
    pub end: f64,
}

type LoopCallback = Box<dyn Fn(f64) + Send>;

/// Detects loop-boundary crossings and requests a seek back to the loop
/// start. Active only while a range with `start < end` is explicitly set.
pub struct LoopController {
    range: Option<LoopRange>,
    last_trigger: Option<f64>,
    epsilon: f64,
    callbacks: Vec<LoopCallback>,
}

impl LoopController {
    pub fn new() -> Self {
        Self {
            range: None,
            last_trigger: None,
            epsilon: RETRIGGER_EPSILON_SECONDS,
            callbacks: Vec::new(),
        }
    }

    /// Arm the loop. Returns false (and stays inactive) unless start < end.
    pub fn set_loop(&mut self, start: f64, end: f64) -> bool {
        if start >= end {
            log::warn!("Rejected loop range [{:.3}, {:.3}]", start, end);
            self.range = None;
            return false;
        }
        self.range = Some(LoopRange { start, end });
        self.last_trigger = None;
        true
    }

    pub fn clear_loop(&mut self) {
        self.range = None;
        self.last_trigger = None;
    }

    pub fn is_active(&self) -> bool {
        self.range.is_some()
    }

    pub fn loop_range(&self) -> Option<LoopRange> {
        self.range
    }

    /// Register a seek-back callback; it receives the loop start time.
    pub fn on_loop(&mut self, callback: LoopCallback) {
        self.callbacks.push(callback);
    }

    /// Feed one clock tick. When the cursor reaches the loop end, the
    /// seek-back callbacks fire with the loop start and this returns true;
    /// near-duplicate ticks at the same boundary are swallowed until the
    /// cursor drops back below the end (the seek landing).
    pub fn check_loop(&mut self, current_time: f64) -> bool {
        let range = match self.range {
            Some(range) => range,
            None => return false,
        };

        if current_time < range.end {
            self.last_trigger = None;
            return false;
        }

        if let Some(last) = self.last_trigger {
            if (current_time - last).abs() <= self.epsilon {
                return false;
            }
        }

        self.last_trigger = Some(current_time);
        for callback in &self.callbacks {
            callback(range.start);
        }
        true
    }
}

impl Default for LoopController {
    fn default() -> Self {
        Self::new()
    }
}
