//! File-backed flash image.
//!
//! The whole region is held in memory and every program or erase is
//! written through to the file, so an interrupted command leaves the image
//! exactly as far along as the simulated flash got.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flashlog::codec::ERASED_BYTE;
use flashlog::{FlashDriver, FlashError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image {path} holds {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
}

/// NOR flash region persisted in a file
#[derive(Debug)]
pub struct FileFlash {
    file: File,
    cells: Vec<u8>,
    granularity: usize,
}

impl FileFlash {
    /// Open `path`, creating an erased image of `capacity` bytes if missing.
    pub fn open(path: &Path, capacity: usize, granularity: usize) -> Result<Self, ImageError> {
        let io_err = |source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        };

        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        let cells = if existed {
            let mut cells = Vec::with_capacity(capacity);
            file.read_to_end(&mut cells).map_err(io_err)?;
            if cells.len() != capacity {
                return Err(ImageError::SizeMismatch {
                    path: path.to_path_buf(),
                    expected: capacity,
                    actual: cells.len(),
                });
            }
            debug!(path = %path.display(), capacity, "Opened flash image");
            cells
        } else {
            let cells = vec![ERASED_BYTE; capacity];
            file.write_all(&cells).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
            info!(path = %path.display(), capacity, "Created erased flash image");
            cells
        };

        Ok(Self {
            file,
            cells,
            granularity: granularity.max(1),
        })
    }

    fn persist(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&self.cells[offset..offset + len])?;
        self.file.sync_data()?;
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), FlashError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.cells.len() => Ok(()),
            _ => Err(FlashError::OutOfBounds {
                offset,
                len,
                capacity: self.cells.len(),
            }),
        }
    }
}

impl FlashDriver for FileFlash {
    fn capacity(&self) -> usize {
        self.cells.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_range(offset, buf.len())?;
        buf.copy_from_slice(&self.cells[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        self.check_range(offset, data.len())?;
        if offset % self.granularity != 0 || data.len() % self.granularity != 0 {
            return Err(FlashError::Misaligned {
                offset,
                len: data.len(),
                granularity: self.granularity,
            });
        }
        for (cell, byte) in self.cells[offset..offset + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.persist(offset, data.len())
    }

    fn erase(&mut self) -> Result<(), FlashError> {
        self.cells.fill(ERASED_BYTE);
        let len = self.cells.len();
        self.persist(0, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_image_is_created_erased() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        let flash = FileFlash::open(&path, 256, 4).unwrap();
        assert_eq!(flash.capacity(), 256);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 256);
        assert!(bytes.iter().all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn test_writes_follow_nor_rules_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        {
            let mut flash = FileFlash::open(&path, 64, 4).unwrap();
            flash.write(8, &[0x0f, 0xf0, 0x12, 0xff]).unwrap();
            flash.write(8, &[0xff, 0x3c, 0xff, 0x00]).unwrap();
        }

        let flash = FileFlash::open(&path, 64, 4).unwrap();
        let mut buf = [0u8; 4];
        flash.read(8, &mut buf).unwrap();
        assert_eq!(buf, [0x0f, 0x30, 0x12, 0x00]);
    }

    #[test]
    fn test_misaligned_write_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = FileFlash::open(&dir.path().join("flash.bin"), 64, 4).unwrap();
        assert!(matches!(
            flash.write(2, &[0; 4]),
            Err(FlashError::Misaligned { .. })
        ));
        assert!(matches!(
            flash.write(62, &[0; 4]),
            Err(FlashError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_erase_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        let mut flash = FileFlash::open(&path, 32, 4).unwrap();
        flash.write(0, &[0; 8]).unwrap();
        flash.erase().unwrap();

        assert!(std::fs::read(&path).unwrap().iter().all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        std::fs::write(&path, [0xffu8; 100]).unwrap();

        assert!(matches!(
            FileFlash::open(&path, 128, 4),
            Err(ImageError::SizeMismatch {
                expected: 128,
                actual: 100,
                ..
            })
        ));
    }
}
