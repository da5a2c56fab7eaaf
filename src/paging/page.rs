/// Fixed-size byte buffer, the unit of disk I/O and cache residency.
///
/// A page is always allocated at its full size. The dirty flag tracks
/// divergence from the last successfully loaded or stored image; mutating
/// accessors do not flip it automatically, the owning structure marks the
/// page dirty when it performs a logical modification.
#[derive(Debug)]
pub struct Page {
    data: Box<[u8]>,
    dirty: bool,
}

impl Page {
    pub fn new(size: usize) -> Self {
        Page {
            data: vec![0u8; size].into_boxed_slice(),
            dirty: false,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Zero the content and mark the page dirty.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.dirty = true;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replace the content with a freshly loaded image; leaves the page clean.
    pub fn from_bytes(&mut self, src: &[u8]) {
        self.data.copy_from_slice(src);
        self.dirty = false;
    }

    /// Copy the full page image into `dst`.
    pub fn to_bytes(&self, dst: &mut [u8]) {
        dst.copy_from_slice(&self.data);
    }
}
