use std::sync::Arc;
use std::sync::Once;

use tempfile::TempDir;

use keydex::codec::{KeyCodec, U32Codec};
use keydex::types::Address;
use keydex::{Index, IndexConfig};

static INIT: Once = Once::new();

/// Route engine logs to the test output when RUST_LOG is set.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Isolated on-disk index for one test, removed on drop.
pub struct TestIndex {
    pub dir: TempDir,
    pub config: IndexConfig,
}

impl TestIndex {
    pub fn new(config: IndexConfig) -> Self {
        init_tracing();
        TestIndex {
            dir: TempDir::new().expect("failed to create temp dir"),
            config,
        }
    }

    /// Open (or reopen) the index over this test's directory.
    pub fn open(&self) -> Index<Address, u32> {
        Index::open(
            self.dir.path(),
            self.config.clone(),
            KeyCodec::address(),
            Arc::new(U32Codec),
        )
        .expect("failed to open index")
    }
}

/// Deterministic address with the given tag bytes.
pub fn addr(tag: u64) -> Address {
    let mut raw = [0u8; 20];
    raw[..8].copy_from_slice(&tag.to_be_bytes());
    Address::new(raw)
}
