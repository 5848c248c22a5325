//! Controller configuration.

use std::time::Duration;

/// Default period between resubscriptions.
pub const DEFAULT_SUBSCRIBE_INTERVAL: Duration = Duration::from_secs(300);

/// Default poll time budget.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Default poll record budget.
pub const DEFAULT_POLL_MAX_RECORDS: usize = 8;

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Node identity; also names the default provisioners file.
    pub node_id: String,

    /// Resubscribe when at least this long has passed since the last
    /// subscribe, to pick up new matching topics.
    pub subscribe_interval: Duration,

    /// Longest a single poll may wait.
    pub poll_timeout: Duration,

    /// Most records a single poll may return.
    pub poll_max_records: usize,
}

impl ControllerConfig {
    /// Defaults for `node_id`.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self { node_id: node_id.into(), ..Self::default() }
    }

    /// Provisioners file used when none is supplied: `<node_id>.provisioners`.
    pub fn default_provisioners_path(&self) -> String {
        format!("{}.provisioners", self.node_id)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_id: "controller".to_string(),
            subscribe_interval: DEFAULT_SUBSCRIBE_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            poll_max_records: DEFAULT_POLL_MAX_RECORDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_provisioners_path_uses_node_id() {
        let config = ControllerConfig::new("node-7");
        assert_eq!(config.default_provisioners_path(), "node-7.provisioners");
        assert_eq!(config.poll_max_records, DEFAULT_POLL_MAX_RECORDS);
    }
}
