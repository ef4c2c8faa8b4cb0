//! No-op halt backend for development and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use super::{HaltError, PrivilegedHalt};

/// Logs instead of halting. Clones share the invocation counter.
#[derive(Debug, Clone, Default)]
pub struct NoopHalt {
    invocations: Arc<AtomicUsize>,
    failure: Option<String>,
}

impl NoopHalt {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose halt always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            invocations: Arc::default(),
            failure: Some(message.into()),
        }
    }

    /// Number of halt requests received so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl PrivilegedHalt for NoopHalt {
    fn name(&self) -> &str {
        "noop"
    }

    fn acquire_privilege(&self) -> Result<(), HaltError> {
        Ok(())
    }

    fn halt(&self) -> Result<(), HaltError> {
        let count = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(invocations = count, "noop halt backend: host will NOT power off");
        match &self.failure {
            Some(message) => Err(HaltError::Request(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counter() {
        let noop = NoopHalt::new();
        let clone = noop.clone();
        clone.invoke().unwrap();
        clone.invoke().unwrap();
        assert_eq!(noop.invocations(), 2);
    }

    #[test]
    fn test_failing_still_counts() {
        let noop = NoopHalt::failing("boom");
        assert!(matches!(noop.invoke(), Err(HaltError::Request(m)) if m == "boom"));
        assert_eq!(noop.invocations(), 1);
    }
}
