use sha2::{Digest, Sha256};

use crate::types::RootHash;

/// Cumulative hash over the sequence of keys in assignment order.
///
/// Each appended key folds into the state as `sha256(state ‖ key_bytes)`,
/// so the state after `n` keys commits to the entire prefix.
#[derive(Debug, Clone)]
pub struct RollingHash {
    state: RootHash,
}

impl RollingHash {
    pub fn new() -> Self {
        RollingHash { state: [0u8; 32] }
    }

    /// Resume from a previously persisted state.
    pub fn from_state(state: RootHash) -> Self {
        RollingHash { state }
    }

    pub fn state(&self) -> RootHash {
        self.state
    }

    pub fn push(&mut self, key_bytes: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.state);
        hasher.update(key_bytes);
        self.state = hasher.finalize().into();
    }
}

impl Default for RollingHash {
    fn default() -> Self {
        RollingHash::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_hash_is_order_sensitive() {
        let mut a = RollingHash::new();
        a.push(b"one");
        a.push(b"two");

        let mut b = RollingHash::new();
        b.push(b"two");
        b.push(b"one");

        assert_ne!(a.state(), b.state());
    }

    #[test]
    fn test_rolling_hash_resumes_from_state() {
        let mut full = RollingHash::new();
        full.push(b"one");
        full.push(b"two");

        let mut prefix = RollingHash::new();
        prefix.push(b"one");
        let mut resumed = RollingHash::from_state(prefix.state());
        resumed.push(b"two");

        assert_eq!(full.state(), resumed.state());
    }
}
