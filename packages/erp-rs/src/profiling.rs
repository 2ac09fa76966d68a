use std::time::{Duration, Instant};

/// Drop guard that logs how long a scope took
pub struct ProfileScope {
    label: String,
    start: Instant,
}

impl ProfileScope {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "[PROFILE] {} - {:.3}ms",
                self.label,
                self.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
}

/// Macro for easy profiling
#[macro_export]
macro_rules! profile_scope {
    ($label:expr) => {
        let _profile_scope = $crate::profiling::ProfileScope::new($label);
    };
}
