/// Tuning knobs for an [`Index`](crate::index::Index) instance.
///
/// All sizes are in effect from `open` onward; changing `page_size` or
/// `initial_buckets` for an existing directory is not supported.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Size of a single disk page in bytes.
    pub page_size: usize,
    /// Maximum number of pages held in the page pool.
    pub pool_capacity: usize,
    /// Bucket count of a freshly created index. Must be a power of two.
    pub initial_buckets: u32,
    /// Number of identifiers covered by one snapshot part.
    pub keys_per_part: u32,
    /// Batch length for bulk inserts during snapshot restore.
    pub restore_batch: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            page_size: 4096,
            pool_capacity: 1024,
            initial_buckets: 16,
            keys_per_part: 1024,
            restore_batch: 2048,
        }
    }
}

impl IndexConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    pub fn with_initial_buckets(mut self, initial_buckets: u32) -> Self {
        self.initial_buckets = initial_buckets;
        self
    }

    pub fn with_keys_per_part(mut self, keys_per_part: u32) -> Self {
        self.keys_per_part = keys_per_part;
        self
    }

    pub fn with_restore_batch(mut self, restore_batch: usize) -> Self {
        self.restore_batch = restore_batch;
        self
    }
}
