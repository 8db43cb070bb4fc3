//! Per-operation cooldown ("lazy" gate).
//!
//! Rapid repeated triggers of the same operation collapse into one run: a
//! call arriving inside the cooldown window of the previous accepted call
//! is turned away without error.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Keyed cooldown windows, one per operation name.
#[derive(Debug)]
pub struct LazyGate {
    cooldown: Duration,
    last_pass: Mutex<HashMap<String, Instant>>,
}

impl LazyGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_pass: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Try to start `operation`.
    ///
    /// # Returns
    /// `false` when the previous accepted call of `operation` is less than
    /// the cooldown ago. A rejected call does not extend the window.
    pub async fn try_pass(&self, operation: &str) -> bool {
        if self.cooldown.is_zero() {
            return true;
        }
        let now = Instant::now();
        let mut last_pass = self.last_pass.lock().await;
        if let Some(previous) = last_pass.get(operation) {
            let elapsed = now.duration_since(*previous);
            if elapsed < self.cooldown {
                tracing::debug!(
                    operation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "Operation throttled"
                );
                return false;
            }
        }
        last_pass.insert(operation.to_string(), now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_second_call_inside_window_is_rejected() {
        let gate = LazyGate::from_millis(1000);
        assert!(gate.try_pass("rebuild").await);
        assert!(!gate.try_pass("rebuild").await);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!gate.try_pass("rebuild").await);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(gate.try_pass("rebuild").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_have_separate_windows() {
        let gate = LazyGate::from_millis(1000);
        assert!(gate.try_pass("rebuild").await);
        assert!(gate.try_pass("refresh").await);
        assert!(!gate.try_pass("refresh").await);
    }

    #[tokio::test]
    async fn test_zero_cooldown_never_throttles() {
        let gate = LazyGate::from_millis(0);
        for _ in 0..3 {
            assert!(gate.try_pass("rebuild").await);
        }
    }
}
