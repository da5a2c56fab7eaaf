use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::paging::Page;

/// Address of a page inside the linear-hash index.
///
/// `overflow == 0` denotes the primary page of a bucket; `overflow >= 1`
/// denotes the n-th page of the bucket's overflow chain. Primary and
/// overflow pages live in separate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    bucket: u32,
    overflow: u32,
}

impl PageId {
    pub fn primary(bucket: u32) -> Self {
        PageId {
            bucket,
            overflow: 0,
        }
    }

    pub fn overflow(bucket: u32, overflow: u32) -> Self {
        debug_assert!(overflow >= 1);
        PageId { bucket, overflow }
    }

    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    pub fn overflow_id(&self) -> u32 {
        self.overflow
    }

    pub fn is_overflow(&self) -> bool {
        self.overflow != 0
    }
}

/// Persistent backing for pages keyed by an id type.
pub trait PageStorage<Id> {
    /// Read the page image for `id`. Ids that were removed, never stored,
    /// or lie past the end of the file yield a cleared page.
    fn load(&mut self, id: Id, page: &mut Page) -> Result<()>;

    /// Write the full page image for `id` and mark the page clean.
    fn store(&mut self, id: Id, page: &mut Page) -> Result<()>;

    /// Mark `id` as free so its slot can be recycled.
    fn remove(&mut self, id: Id) -> Result<()>;

    /// Persist the free-id metadata and sync the backing file(s).
    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Streaming little-endian u32 reader.
///
/// Sources may hand out arbitrarily short reads (network streams, chunked
/// test readers); each word is assembled across as many reads as needed.
pub struct U32Reader<R> {
    inner: R,
}

impl<R: Read> U32Reader<R> {
    pub fn new(inner: R) -> Self {
        U32Reader { inner }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::CorruptedMetadata(
                    "unexpected end of metadata stream".to_string(),
                ));
            }
            filled += n;
        }
        Ok(u32::from_le_bytes(buf))
    }
}

/// Single-file page store with free-id recycling.
///
/// Pages live at offset `id * page_size`. Past the last used page the file
/// carries a metadata trailer of little-endian u32 words:
/// `[free_id...][next_id]`. The trailer is rewritten on every flush.
pub struct FilePageStore {
    file: File,
    path: PathBuf,
    page_size: usize,
    next_id: u32,
    free_ids: Vec<u32>,
    /// Ids whose on-disk content is stale or absent; loads yield a cleared
    /// page instead of touching the file.
    removed: HashSet<u32>,
}

impl FilePageStore {
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        let (next_id, free_ids) = if len == 0 {
            (0, Vec::new())
        } else {
            Self::parse_trailer(&file, len, page_size)?
        };

        debug!(
            path = %path.display(),
            next_id,
            free = free_ids.len(),
            "opened page store"
        );

        let removed = free_ids.iter().copied().collect();
        Ok(FilePageStore {
            file,
            path,
            page_size,
            next_id,
            free_ids,
            removed,
        })
    }

    /// Parse the `[free_id...][next_id]` trailer at the end of the file.
    fn parse_trailer(file: &File, len: u64, page_size: usize) -> Result<(u32, Vec<u32>)> {
        if len < 4 {
            return Err(Error::CorruptedMetadata(format!(
                "file of {} bytes cannot hold a metadata trailer",
                len
            )));
        }

        let mut f = file;
        f.seek(SeekFrom::Start(len - 4))?;
        let mut word = [0u8; 4];
        f.read_exact(&mut word)?;
        let next_id = u32::from_le_bytes(word);

        let data_end = next_id as u64 * page_size as u64;
        if data_end + 4 > len {
            return Err(Error::CorruptedMetadata(format!(
                "declared page count {} exceeds file length {}",
                next_id, len
            )));
        }
        let trailer_len = len - data_end;
        if trailer_len % 4 != 0 {
            return Err(Error::CorruptedMetadata(format!(
                "trailer of {} bytes is not u32-aligned",
                trailer_len
            )));
        }

        let free_count = (trailer_len / 4 - 1) as usize;
        f.seek(SeekFrom::Start(data_end))?;
        let mut reader = U32Reader::new(f);
        let mut free_ids = Vec::with_capacity(free_count);
        for _ in 0..free_count {
            free_ids.push(reader.read_u32()?);
        }
        Ok((next_id, free_ids))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Hand out a fresh or recycled page id.
    ///
    /// The id is provisionally marked removed: until the caller stores it,
    /// loads of the id yield a cleared page rather than stale file content.
    pub fn generate_next_id(&mut self) -> u32 {
        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        self.removed.insert(id);
        id
    }

    fn page_offset(&self, id: u32) -> u64 {
        id as u64 * self.page_size as u64
    }
}

impl PageStorage<u32> for FilePageStore {
    fn load(&mut self, id: u32, page: &mut Page) -> Result<()> {
        debug_assert_eq!(page.size(), self.page_size);
        if self.removed.contains(&id) || id >= self.next_id {
            page.clear();
            page.set_dirty(false);
            return Ok(());
        }

        let mut f = &self.file;
        f.seek(SeekFrom::Start(self.page_offset(id)))?;
        let buf = page.bytes_mut();
        let mut read = 0;
        while read < buf.len() {
            match f.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if read < page.size() {
            // The page slot was never written out; treat it as empty.
            page.clear();
        }
        page.set_dirty(false);
        Ok(())
    }

    fn store(&mut self, id: u32, page: &mut Page) -> Result<()> {
        debug_assert_eq!(page.size(), self.page_size);
        let mut f = &self.file;
        f.seek(SeekFrom::Start(self.page_offset(id)))?;
        f.write_all(page.bytes())?;

        self.removed.remove(&id);
        if id >= self.next_id {
            self.next_id = id + 1;
        }
        page.set_dirty(false);
        Ok(())
    }

    fn remove(&mut self, id: u32) -> Result<()> {
        self.removed.insert(id);
        if !self.free_ids.contains(&id) {
            self.free_ids.push(id);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let data_end = self.next_id as u64 * self.page_size as u64;
        self.file.set_len(data_end)?;

        let mut trailer = Vec::with_capacity((self.free_ids.len() + 1) * 4);
        for id in &self.free_ids {
            trailer.extend_from_slice(&id.to_le_bytes());
        }
        trailer.extend_from_slice(&self.next_id.to_le_bytes());

        let mut f = &self.file;
        f.seek(SeekFrom::Start(data_end))?;
        f.write_all(&trailer)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Page storage for the linear-hash index: primary pages in one file
/// (indexed by bucket), overflow pages in another (indexed by
/// `overflow - 1`). Operations dispatch on [`PageId::is_overflow`].
pub struct TwoFileStore {
    primary: FilePageStore,
    overflow: FilePageStore,
}

impl TwoFileStore {
    pub fn open(dir: &Path, page_size: usize) -> Result<Self> {
        Ok(TwoFileStore {
            primary: FilePageStore::open(dir.join("primaryPages.dat"), page_size)?,
            overflow: FilePageStore::open(dir.join("overflowPages.dat"), page_size)?,
        })
    }

    /// Allocate an overflow id for a new chain page (1-based; 0 means none).
    pub fn generate_overflow_id(&mut self) -> u32 {
        self.overflow.generate_next_id() + 1
    }
}

impl PageStorage<PageId> for TwoFileStore {
    fn load(&mut self, id: PageId, page: &mut Page) -> Result<()> {
        if id.is_overflow() {
            self.overflow.load(id.overflow_id() - 1, page)
        } else {
            self.primary.load(id.bucket(), page)
        }
    }

    fn store(&mut self, id: PageId, page: &mut Page) -> Result<()> {
        if id.is_overflow() {
            self.overflow.store(id.overflow_id() - 1, page)
        } else {
            self.primary.store(id.bucket(), page)
        }
    }

    fn remove(&mut self, id: PageId) -> Result<()> {
        if id.is_overflow() {
            self.overflow.remove(id.overflow_id() - 1)
        } else {
            self.primary.remove(id.bucket())
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.primary.flush()?;
        self.overflow.flush()
    }

    fn close(&mut self) -> Result<()> {
        let primary = self.primary.close();
        let overflow = self.overflow.close();
        primary.and(overflow)
    }
}
