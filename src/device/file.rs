//! File-backed block device
//!
//! A fixed-extent image file. The file is created (sparse) on first open
//! and extended if it is shorter than the requested extent.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{check_request, BlockDevice};

/// Block device stored in a regular file
pub struct FileDevice {
    /// Path of the image file
    path: PathBuf,
    /// File handle (seek + read/write must happen together)
    file: Mutex<File>,
    block_size: u32,
    size: u64,
}

impl FileDevice {
    /// Open or create an image file with `block_count` blocks of `block_size` bytes
    pub fn open(path: impl AsRef<Path>, block_size: u32, block_count: u64) -> io::Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block size must be a power of two, got {}", block_size),
            ));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let requested = block_size as u64 * block_count;
        let existing = file.metadata()?.len();
        if existing < requested {
            file.set_len(requested)?;
        }

        // An existing image keeps its (block aligned) extent if it is larger
        let size = requested.max(existing - existing % block_size as u64);

        tracing::debug!(
            "Opened file device {} ({} blocks of {} bytes)",
            path.display(),
            size / block_size as u64,
            block_size
        );

        Ok(Self {
            path,
            file: Mutex::new(file),
            block_size,
            size,
        })
    }

    /// Path of the image file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockDevice for FileDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_request(self.block_size, self.size, offset, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        check_request(self.block_size, self.size, offset, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn sync(&self) -> io::Result<()> {
        self.file.lock().sync_data()
    }
}
