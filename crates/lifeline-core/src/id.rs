//! Id generation for newly created data.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Produces ids for new root or standalone nodes.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Eight hex digits from a multiplicative sequence seeded by the clock.
///
/// Ids are unique within one process run for 2^32 calls.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    state: AtomicU32,
}

const SEQUENCE_MULTIPLIER: u32 = 16_777_259;

impl SequenceIdGenerator {
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.subsec_nanos() ^ elapsed.as_secs() as u32)
            .unwrap_or_default();
        Self::with_seed(nanos)
    }

    /// Start the sequence from `seed`.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            state: AtomicU32::new(seed),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> String {
        let step = self.state.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        format!("{:08x}", step.wrapping_mul(SEQUENCE_MULTIPLIER))
    }
}

/// Time-ordered UUID v7 ids.
#[derive(Debug, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}
