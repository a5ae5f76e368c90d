//! Block-source adapters: seek+read with sector alignment, and
//! zero-copy mmap with automatic fallback.

use salvor_core::{BlockSource, CoreError, Result};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

const SECTOR: u64 = 512;

fn open_readonly(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(false)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::SourceOpen {
                path: path.display().to_string(),
                reason: "not found".to_string(),
            },
            std::io::ErrorKind::PermissionDenied => {
                CoreError::PermissionDenied(path.display().to_string())
            }
            _ => CoreError::SourceOpen {
                path: path.display().to_string(),
                reason: e.to_string(),
            },
        })
}

fn is_device(file: &File, path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if let Ok(meta) = file.metadata() {
            let ft = meta.file_type();
            if ft.is_block_device() || ft.is_char_device() {
                return true;
            }
        }
    }
    path.starts_with("/dev/") || path.to_string_lossy().starts_with("\\\\.\\")
}

/// Seek+read source with interior mutability so carvers can share it.
///
/// Reads against character/block devices are aligned down to 512-byte
/// sector boundaries before being issued.
#[derive(Debug)]
pub struct DiskReader {
    file: Mutex<File>,
    path: String,
    size: u64,
    device: bool,
}

impl DiskReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let mut file = open_readonly(path_ref)?;

        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{Advice, fadvise};
            let _ = fadvise(&file, 0, None, Advice::Sequential);
            let _ = fadvise(&file, 0, None, Advice::NoReuse);
        }

        let device = is_device(&file, path_ref);
        let size = match file.metadata() {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                let end = file.seek(SeekFrom::End(0))?;
                file.seek(SeekFrom::Start(0))?;
                end
            }
        };
        if size == 0 {
            return Err(CoreError::SourceOpen {
                path: path_ref.display().to_string(),
                reason: "zero-length source".to_string(),
            });
        }

        Ok(Self {
            file: Mutex::new(file),
            path: path_ref.display().to_string(),
            size,
            device,
        })
    }
}

impl BlockSource for DiskReader {
    fn read_into(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        if offset >= self.size || buffer.is_empty() {
            return Ok(0);
        }
        let want = buffer.len().min((self.size - offset) as usize);

        // Sector-align device reads; regular files seek directly.
        let (read_from, lead) = if self.device {
            let aligned = offset / SECTOR * SECTOR;
            (aligned, (offset - aligned) as usize)
        } else {
            (offset, 0)
        };

        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        file.seek(SeekFrom::Start(read_from)).map_err(|e| {
            CoreError::Read {
                offset: read_from,
                reason: format!("seek failed: {e}"),
            }
        })?;

        let mut scratch = vec![0u8; lead + want];
        let mut filled = 0usize;
        while filled < scratch.len() {
            match file.read(&mut scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Mid-chunk read error: deliver what arrived.
                    tracing::debug!(offset, error = %e, "read error, truncating chunk");
                    break;
                }
            }
        }
        let available = filled.saturating_sub(lead);
        let n = available.min(want);
        buffer[..n].copy_from_slice(&scratch[lead..lead + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn path(&self) -> &str {
        &self.path
    }
}

/// Zero-copy source over a memory mapping.
///
/// Block devices frequently refuse mmap or return an empty mapping;
/// callers fall back to [`DiskReader`] via [`Reader::open`].
pub struct MmapReader {
    mmap: Mmap,
    path: String,
    size: u64,
}

impl MmapReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let mut file = open_readonly(path_ref)?;
        let size = file.seek(SeekFrom::End(0))?;
        if size == 0 {
            return Err(CoreError::InvalidFormat("cannot mmap empty file".into()));
        }

        // SAFETY: read-only mapping of a source the scan never writes.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        if mmap.is_empty() {
            return Err(CoreError::InvalidFormat(
                "mmap returned empty mapping (block device not supported)".into(),
            ));
        }

        #[cfg(target_os = "linux")]
        {
            use memmap2::Advice;
            let _ = mmap.advise(Advice::Sequential);
            let _ = mmap.advise(Advice::WillNeed);
        }

        Ok(Self {
            mmap,
            path: path_ref.display().to_string(),
            size,
        })
    }

    /// Zero-copy slice; `None` past end-of-source.
    #[inline]
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let start = offset as usize;
        if start >= self.mmap.len() {
            return None;
        }
        let end = start.saturating_add(len).min(self.mmap.len());
        Some(&self.mmap[start..end])
    }
}

impl BlockSource for MmapReader {
    fn read_into(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        match self.slice(offset, buffer.len()) {
            Some(slice) => {
                buffer[..slice.len()].copy_from_slice(slice);
                Ok(slice.len())
            }
            None => Ok(0),
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn path(&self) -> &str {
        &self.path
    }
}

/// Source with mmap preferred and seek+read fallback.
pub enum Reader {
    Mmap(MmapReader),
    Disk(DiskReader),
}

impl Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        match MmapReader::new(path_ref) {
            Ok(r) => Ok(Reader::Mmap(r)),
            Err(CoreError::PermissionDenied(p)) => Err(CoreError::PermissionDenied(p)),
            Err(_) => Ok(Reader::Disk(DiskReader::new(path_ref)?)),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_mmap(&self) -> bool {
        matches!(self, Reader::Mmap(_))
    }
}

impl BlockSource for Reader {
    fn read_into(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        match self {
            Reader::Mmap(r) => r.read_into(offset, buffer),
            Reader::Disk(r) => r.read_into(offset, buffer),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Reader::Mmap(r) => r.size(),
            Reader::Disk(r) => r.size(),
        }
    }

    fn path(&self) -> &str {
        match self {
            Reader::Mmap(r) => r.path(),
            Reader::Disk(r) => r.path(),
        }
    }
}
