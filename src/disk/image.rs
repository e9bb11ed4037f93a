use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap::{Mmap, MmapMut, MmapOptions};

use crate::disk::error::DiskError;

/// Provide backing storage (file or memory) for disk images.
pub enum Image {
    ReadOnlyMap(Mmap),
    ReadWriteMap(MmapMut),
    Memory(Box<[u8]>),
}

impl Image {
    pub fn open_memory(length: usize) -> io::Result<Image> {
        Ok(Image::Memory(vec![0; length].into_boxed_slice()))
    }

    /// Wrap an existing byte buffer, such as an image read from standard
    /// input.
    pub fn from_bytes(bytes: Vec<u8>) -> Image {
        Image::Memory(bytes.into_boxed_slice())
    }

    pub fn open_read_only<P: AsRef<Path>>(path: P) -> io::Result<Image> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Image::ReadOnlyMap(mmap))
    }

    pub fn open_read_write<P: AsRef<Path>>(path: P) -> io::Result<Image> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Image::ReadWriteMap(mmap))
    }

    pub fn create<P: AsRef<Path>>(path: P, length: usize, create_new: bool) -> io::Result<Image> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if create_new {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let file = options.open(path)?;
        file.set_len(length as u64)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Image::ReadWriteMap(mmap))
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_bounds(&self, end: usize) -> io::Result<()> {
        if end > self.len() {
            Err(DiskError::OutOfRange.into())
        } else {
            Ok(())
        }
    }

    pub fn check_writability(&self) -> io::Result<()> {
        match self {
            Image::ReadOnlyMap(_) => Err(DiskError::ReadOnly.into()),
            Image::ReadWriteMap(_) => Ok(()),
            Image::Memory(_) => Ok(()),
        }
    }

    /// The entire image as one byte slice.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Image::ReadOnlyMap(mmap) => &mmap[..],
            Image::ReadWriteMap(mmap) => &mmap[..],
            Image::Memory(array) => &array[..],
        }
    }

    pub fn slice(&self, offset: usize, length: usize) -> io::Result<&[u8]> {
        self.check_bounds(offset + length)?;
        Ok(&self.as_slice()[offset..offset + length])
    }

    pub fn slice_mut(&mut self, offset: usize, length: usize) -> io::Result<&mut [u8]> {
        self.check_bounds(offset + length)?;
        match self {
            Image::ReadOnlyMap(_) => Err(DiskError::ReadOnly.into()),
            Image::ReadWriteMap(mmap) => Ok(&mut mmap[offset..offset + length]),
            Image::Memory(array) => Ok(&mut array[offset..offset + length]),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Image::ReadOnlyMap(_) => Err(DiskError::ReadOnly.into()),
            Image::ReadWriteMap(mmap) => mmap.flush(),
            Image::Memory(_) => Ok(()),
        }
    }
}
