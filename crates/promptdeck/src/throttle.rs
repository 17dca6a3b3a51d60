//! Leading-edge rate limiter.
//!
//! A [`Throttle`] invokes its operation at most once per interval. Calls that
//! land inside the interval are dropped (never queued, no trailing call) and
//! receive the result of the last invocation that completed. Before any
//! invocation has completed, dropped calls receive `None`.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct ThrottleState<T> {
    last_invocation: Option<Instant>,
    last_result: Option<T>,
}

pub struct Throttle<T> {
    interval: Duration,
    state: Mutex<ThrottleState<T>>,
}

impl<T: Clone> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState {
                last_invocation: None,
                last_result: None,
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Invoke `op` unless the previous invocation started less than one
    /// interval ago.
    ///
    /// The invocation time is recorded before `op` is awaited, so concurrent
    /// callers racing the first invocation are dropped too.
    pub async fn call<F, Fut>(&self, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut state = self.state.lock().expect("throttle mutex poisoned");
            let now = Instant::now();
            if let Some(last) = state.last_invocation {
                if now.duration_since(last) < self.interval {
                    return state.last_result.clone();
                }
            }
            state.last_invocation = Some(now);
        }

        let result = op().await;

        self.state
            .lock()
            .expect("throttle mutex poisoned")
            .last_result = Some(result.clone());

        Some(result)
    }

    /// Forget the previous invocation so the next call goes through.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("throttle mutex poisoned");
        state.last_invocation = None;
        state.last_result = None;
    }

    /// Result of the most recently completed invocation.
    pub fn last_result(&self) -> Option<T> {
        self.state
            .lock()
            .expect("throttle mutex poisoned")
            .last_result
            .clone()
    }
}
