use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::codec::{Identifier, Serializer};
use crate::error::{Error, Result};
use crate::types::RootHash;

/// Reverse mapping identifier → key, dense from zero.
pub trait KeyArray<I, K>: Send {
    fn set(&mut self, id: I, key: &K) -> Result<()>;

    /// Fetch the key for `id`; [`Error::NotFound`] if it was never written.
    fn get(&self, id: I) -> Result<K>;

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Root hashes recorded at snapshot part boundaries, keyed by part number.
pub trait HashArray: Send {
    fn set(&mut self, part: u32, hash: RootHash) -> Result<()>;

    fn get(&self, part: u32) -> Result<RootHash>;

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

fn read_record(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut f = file;
    f.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match f.read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::NotFound),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn write_record(file: &File, offset: u64, buf: &[u8]) -> Result<()> {
    let mut f = file;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(buf)?;
    Ok(())
}

/// File of fixed-size key records addressed at `id * record_size`.
pub struct FileKeyArray<K> {
    file: File,
    serializer: Arc<dyn Serializer<K>>,
}

impl<K> FileKeyArray<K> {
    pub fn open<P: AsRef<Path>>(path: P, serializer: Arc<dyn Serializer<K>>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(FileKeyArray { file, serializer })
    }
}

impl<I: Identifier, K> KeyArray<I, K> for FileKeyArray<K> {
    fn set(&mut self, id: I, key: &K) -> Result<()> {
        let record = self.serializer.to_bytes(key);
        let offset = id.as_u32() as u64 * self.serializer.size() as u64;
        write_record(&self.file, offset, &record)
    }

    fn get(&self, id: I) -> Result<K> {
        let mut record = vec![0u8; self.serializer.size()];
        let offset = id.as_u32() as u64 * self.serializer.size() as u64;
        read_record(&self.file, offset, &mut record)?;
        Ok(self.serializer.from_bytes(&record))
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        <Self as KeyArray<I, K>>::flush(self)
    }
}

/// File of 32-byte root hashes addressed at `part * 32`.
pub struct FileHashArray {
    file: File,
}

impl FileHashArray {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(FileHashArray { file })
    }
}

impl HashArray for FileHashArray {
    fn set(&mut self, part: u32, hash: RootHash) -> Result<()> {
        write_record(&self.file, part as u64 * 32, &hash)
    }

    fn get(&self, part: u32) -> Result<RootHash> {
        let mut hash = [0u8; 32];
        read_record(&self.file, part as u64 * 32, &mut hash)?;
        Ok(hash)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}
