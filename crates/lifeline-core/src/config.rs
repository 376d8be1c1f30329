use serde::{Deserialize, Serialize};

use lifeline_path::DEFAULT_MAX_LEN;

/// When a "by policy" operation touches storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SavePolicy {
    /// Drain pending jobs, then write on the calling thread.
    #[default]
    Sync,
    /// Queue a job and let the driver run it.
    Async,
}

/// Configuration for a [`Serializer`](crate::Serializer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Capacity of every path buffer, in bytes.
    pub max_path_len: usize,
    /// Policy used by the `*_by_policy` entry points.
    pub default_policy: SavePolicy,
    /// Path buffers retained by the pool; `0` means one per processor.
    pub pool_capacity: usize,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            max_path_len: DEFAULT_MAX_LEN,
            default_policy: SavePolicy::Sync,
            pool_capacity: 0,
        }
    }
}

impl SerializerConfig {
    /// A configuration whose by-policy operations queue jobs.
    pub fn asynchronous() -> Self {
        Self {
            default_policy: SavePolicy::Async,
            ..Default::default()
        }
    }

    /// Pool capacity with `0` resolved to the processor count.
    pub fn effective_pool_capacity(&self) -> usize {
        match self.pool_capacity {
            0 => std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            n => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SerializerConfig::default();
        assert_eq!(config.max_path_len, 1024);
        assert_eq!(config.default_policy, SavePolicy::Sync);
        assert!(config.effective_pool_capacity() >= 1);
        assert_eq!(SerializerConfig::asynchronous().default_policy, SavePolicy::Async);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: SerializerConfig =
            serde_json::from_str(r#"{"default_policy":"async","pool_capacity":4}"#).unwrap();
        assert_eq!(config.default_policy, SavePolicy::Async);
        assert_eq!(config.effective_pool_capacity(), 4);
        assert_eq!(config.max_path_len, 1024);
    }
}
