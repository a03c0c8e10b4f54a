//! Provider quota usage

use serde::{Deserialize, Serialize};

/// Character quota reported by a remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub characters_used: u64,
    pub characters_limit: u64,
}

impl QuotaUsage {
    pub fn characters_remaining(&self) -> u64 {
        self.characters_limit.saturating_sub(self.characters_used)
    }
}
