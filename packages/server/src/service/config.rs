use std::num::NonZeroUsize;

use switchyard_core::ServiceId;

/// Router and worker pool configuration.
///
/// Controls the size of the worker pool and how hard id allocation tries
/// before reporting exhaustion.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Number of workers to spawn. Capped at `ServiceId::MAX_WORKERS`.
    pub worker_count: usize,
    /// Candidate ids tried per creation before failing with `IdExhausted`.
    pub max_id_attempts: u32,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name_prefix: String,
}

impl RouterConfig {
    /// Worker count clamped to the range a router can address.
    #[must_use]
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.clamp(1, ServiceId::MAX_WORKERS)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            max_id_attempts: 1024,
            thread_name_prefix: "switchyard-worker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_config_defaults() {
        let config = RouterConfig::default();
        assert!(config.worker_count >= 1);
        assert_eq!(config.max_id_attempts, 1024);
        assert_eq!(config.thread_name_prefix, "switchyard-worker");
    }

    #[test]
    fn effective_worker_count_is_clamped() {
        let config = RouterConfig {
            worker_count: 0,
            ..RouterConfig::default()
        };
        assert_eq!(config.effective_worker_count(), 1);

        let config = RouterConfig {
            worker_count: 1000,
            ..RouterConfig::default()
        };
        assert_eq!(config.effective_worker_count(), ServiceId::MAX_WORKERS);
    }
}
