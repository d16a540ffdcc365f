use std::collections::HashMap;

/// Consecutive probe failures after which a URI is no longer probed.
pub const MAX_PROBE_FAILURES: u32 = 3;

/// Per-URI count of consecutive duration probe failures.
#[derive(Clone, Debug, Default)]
pub struct DurationBlacklist {
    failures: HashMap<String, u32>,
}

impl DurationBlacklist {
    pub fn record_failure(&mut self, uri: &str) -> u32 {
        let count = self.failures.entry(uri.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(&mut self, uri: &str) {
        self.failures.remove(uri);
    }

    pub fn failures(&self, uri: &str) -> u32 {
        self.failures.get(uri).copied().unwrap_or(0)
    }

    pub fn is_blocked(&self, uri: &str) -> bool {
        self.failures(uri) >= MAX_PROBE_FAILURES
    }
}
