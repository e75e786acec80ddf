//! Shared state for the controllers.
use std::{collections::HashMap, sync::Arc, sync::Mutex, time::Duration};

use k8s_openapi::chrono::{DateTime, Utc};
use kube::client::Client;

use crate::settings::Settings;

/// Provides the current time.
pub trait Clock {
    /// Report the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Provides the current time using real time.
pub struct UtcClock;
impl Clock for UtcClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Operator Context
pub struct Context<C> {
    /// Kube client
    pub k_client: Client,
    /// Process-wide settings
    pub settings: Arc<Settings>,
    /// Clock that provides the current time
    pub clock: C,
    /// Serialises priority class allocation so two benchmarks never share a value
    pub priority_lock: tokio::sync::Mutex<()>,
    /// Tracks consecutive reconcile failures per object for requeue backoff
    pub backoff: Backoff,
}

impl Context<UtcClock> {
    /// Create new context
    pub fn new(k_client: Client, settings: Arc<Settings>) -> Self {
        Context {
            k_client,
            settings,
            clock: UtcClock,
            priority_lock: tokio::sync::Mutex::new(()),
            backoff: Backoff::default(),
        }
    }
}

const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Exponential requeue backoff keyed by object.
///
/// Transient errors double the delay for an object up to the cap, a successful
/// reconcile resets it.
#[derive(Default)]
pub struct Backoff {
    failures: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    /// Record a failure for the object and return the delay before the next attempt.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().expect("should acquire backoff lock");
        let count = failures.entry(key.to_owned()).or_insert(0);
        let delay = BACKOFF_BASE
            .checked_mul(1u32 << (*count).min(16))
            .unwrap_or(BACKOFF_CAP)
            .min(BACKOFF_CAP);
        *count += 1;
        delay
    }

    /// Clear the failure count for the object.
    pub fn reset(&self, key: &str) {
        let mut failures = self.failures.lock().expect("should acquire backoff lock");
        failures.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next_delay("a"), Duration::from_secs(5));
        assert_eq!(backoff.next_delay("a"), Duration::from_secs(10));
        assert_eq!(backoff.next_delay("a"), Duration::from_secs(20));
        for _ in 0..10 {
            backoff.next_delay("a");
        }
        assert_eq!(backoff.next_delay("a"), Duration::from_secs(300));
        // Distinct objects do not interfere
        assert_eq!(backoff.next_delay("b"), Duration::from_secs(5));
    }

    #[test]
    fn backoff_resets_on_success() {
        let backoff = Backoff::default();
        backoff.next_delay("a");
        backoff.next_delay("a");
        backoff.reset("a");
        assert_eq!(backoff.next_delay("a"), Duration::from_secs(5));
    }
}
