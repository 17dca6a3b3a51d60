//! Gain node with sample-accurate automation.
//!
//! Automation follows the familiar set-value / linear-ramp model: a
//! `SetValue` event steps to its value at its time, a `LinearRamp` event
//! interpolates from the preceding event to its own value and time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationEvent {
    SetValue { time: f64, value: f32 },
    LinearRamp { time: f64, value: f32 },
}

impl AutomationEvent {
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. } | AutomationEvent::LinearRamp { time, .. } => {
                time
            }
        }
    }

    pub fn value(&self) -> f32 {
        match *self {
            AutomationEvent::SetValue { value, .. } | AutomationEvent::LinearRamp { value, .. } => {
                value
            }
        }
    }
}

/// Time-ordered automation curve.
#[derive(Debug, Clone, PartialEq)]
pub struct Automation {
    default_value: f32,
    events: Vec<AutomationEvent>,
}

impl Automation {
    pub fn new(default_value: f32) -> Self {
        Self {
            default_value,
            events: Vec::new(),
        }
    }

    /// Insert keeping time order; events at equal times keep insertion order.
    fn insert(&mut self, event: AutomationEvent) {
        let at = self
            .events
            .partition_point(|existing| existing.time() <= event.time());
        self.events.insert(at, event);
    }

    /// Drop every event at or after `time`.
    fn cancel_from(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    pub fn value_at(&self, time: f64) -> f32 {
        let next = self.events.partition_point(|e| e.time() <= time);

        let (prev_time, prev_value) = match next.checked_sub(1).map(|i| self.events[i]) {
            Some(event) => (event.time(), event.value()),
            None => (0.0, self.default_value),
        };

        match self.events.get(next) {
            Some(AutomationEvent::LinearRamp { time: end, value: target }) => {
                let span = end - prev_time;
                if span <= 0.0 {
                    return *target;
                }
                let progress = ((time - prev_time) / span).clamp(0.0, 1.0) as f32;
                prev_value + (target - prev_value) * progress
            }
            _ => prev_value,
        }
    }
}

/// A gain stage between scheduled sources and the destination.
///
/// Sources routed through a node that is not connected still consume
/// timeline time but contribute silence.
#[derive(Debug)]
pub struct GainNode {
    pub id: Uuid,
    connected: AtomicBool,
    automation: Mutex<Automation>,
}

impl GainNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            connected: AtomicBool::new(false),
            automation: Mutex::new(Automation::new(1.0)),
        })
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_value_at_time(&self, value: f32, time: f64) {
        self.lock().insert(AutomationEvent::SetValue { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&self, value: f32, time: f64) {
        self.lock().insert(AutomationEvent::LinearRamp { time, value });
    }

    pub fn value_at(&self, time: f64) -> f32 {
        self.lock().value_at(time)
    }

    /// Ramp from whatever the node outputs at `now` to `target` over `duration`.
    ///
    /// Automation scheduled after `now` is replaced.
    pub fn fade_to(&self, target: f32, now: f64, duration: f64) {
        let mut automation = self.lock();
        let current = automation.value_at(now);
        automation.cancel_from(now);
        automation.insert(AutomationEvent::SetValue { time: now, value: current });
        automation.insert(AutomationEvent::LinearRamp {
            time: now + duration.max(0.0),
            value: target,
        });
    }

    /// Read the curve in place for the duration of `f`.
    pub fn with_automation<R>(&self, f: impl FnOnce(&Automation) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Automation> {
        self.automation.lock().expect("gain automation mutex poisoned")
    }
}
