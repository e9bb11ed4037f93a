use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use log::trace;

use crate::disk::error::DiskError;
use crate::disk::image::Image;
use crate::util;

pub const BLOCK_SIZE: usize = 512;

/// The largest device a 16-bit block number can address.
pub const MAX_BLOCKS: usize = 0xFFFF;

/// A single addressable unit of a ProDOS device.
pub type Block = [u8; BLOCK_SIZE];

pub type BlockDeviceRef = Rc<RefCell<dyn BlockDevice>>;

/// Fixed-size block storage.  Every structure on a ProDOS volume is read and
/// written through this trait by block number.
pub trait BlockDevice {
    fn check_writability(&self) -> io::Result<()>;
    fn block_count(&self) -> usize;
    fn block(&self, index: u16) -> io::Result<&[u8]>;
    fn block_mut(&mut self, index: u16) -> io::Result<&mut [u8]>;
    fn flush(&mut self) -> io::Result<()>;

    fn check_index(&self, index: u16) -> io::Result<()> {
        if (index as usize) < self.block_count() {
            Ok(())
        } else {
            Err(DiskError::OutOfRange.into())
        }
    }

    fn read_block(&self, index: u16) -> io::Result<Block> {
        trace!("read block {}", index);
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(self.block(index)?);
        Ok(block)
    }

    fn write_block(&mut self, index: u16, block: &Block) -> io::Result<()> {
        trace!("write block {}", index);
        self.block_mut(index)?.copy_from_slice(block);
        Ok(())
    }

    /// Serialize every block, in order, to the provided writer.
    fn write_to(&self, writer: &mut dyn Write) -> io::Result<usize> {
        let mut written = 0;
        for index in 0..self.block_count() {
            writer.write_all(self.block(index as u16)?)?;
            written += BLOCK_SIZE;
        }
        Ok(written)
    }

    fn dump(&self, writer: &mut dyn Write) -> io::Result<()> {
        for index in 0..self.block_count() {
            let block = self.block(index as u16)?;
            writeln!(writer)?;
            writeln!(writer, "block {:04x} ({})", index, index)?;
            writeln!(writer, "{}", util::hex(block))?;
        }
        Ok(())
    }
}

/// A block device backed by an `Image`.  Blocks are stored contiguously in
/// ProDOS order: block n occupies bytes n*512..(n+1)*512.
pub struct ImageBlockDevice {
    image: Image,
    blocks: usize,
}

impl ImageBlockDevice {
    pub fn new(image: Image) -> io::Result<ImageBlockDevice> {
        let length = image.len();
        if length == 0 || length % BLOCK_SIZE != 0 || length / BLOCK_SIZE > MAX_BLOCKS {
            return Err(DiskError::InvalidLayout.into());
        }
        Ok(ImageBlockDevice {
            image,
            blocks: length / BLOCK_SIZE,
        })
    }

    /// Create a zero-filled in-memory device.
    pub fn open_memory(blocks: usize) -> io::Result<ImageBlockDevice> {
        Self::new(Image::open_memory(blocks * BLOCK_SIZE)?)
    }

    fn get_offset(&self, index: u16) -> io::Result<usize> {
        self.check_index(index)?;
        Ok(index as usize * BLOCK_SIZE)
    }
}

impl BlockDevice for ImageBlockDevice {
    #[inline]
    fn check_writability(&self) -> io::Result<()> {
        self.image.check_writability()
    }

    #[inline]
    fn block_count(&self) -> usize {
        self.blocks
    }

    fn block(&self, index: u16) -> io::Result<&[u8]> {
        let offset = self.get_offset(index)?;
        self.image.slice(offset, BLOCK_SIZE)
    }

    fn block_mut(&mut self, index: u16) -> io::Result<&mut [u8]> {
        self.image.check_writability()?;
        let offset = self.get_offset(index)?;
        self.image.slice_mut(offset, BLOCK_SIZE)
    }

    fn write_to(&self, writer: &mut dyn Write) -> io::Result<usize> {
        let bytes = self.image.as_slice();
        writer.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.image {
            // Nothing to persist for a read-only mapping.
            Image::ReadOnlyMap(_) => Ok(()),
            _ => self.image.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_bounds() {
        let mut device = ImageBlockDevice::open_memory(4).unwrap();
        assert_eq!(device.block_count(), 4);

        let mut block = [0u8; BLOCK_SIZE];
        block[0] = 0x12;
        block[511] = 0x34;
        device.write_block(3, &block).unwrap();
        assert_eq!(device.read_block(3).unwrap()[..], block[..]);

        assert!(device.read_block(4).unwrap_err() == DiskError::OutOfRange);
        assert!(device.write_block(4, &block).unwrap_err() == DiskError::OutOfRange);
        assert!(device.read_block(0xFFFF).unwrap_err() == DiskError::OutOfRange);
    }

    #[test]
    fn test_write_to() {
        let mut device = ImageBlockDevice::open_memory(3).unwrap();
        device.block_mut(1).unwrap()[7] = 0x99;
        let mut output = vec![];
        assert_eq!(device.write_to(&mut output).unwrap(), 3 * BLOCK_SIZE);
        assert_eq!(output.len(), 3 * BLOCK_SIZE);
        assert_eq!(output[BLOCK_SIZE + 7], 0x99);
    }

    #[test]
    fn test_invalid_layout() {
        let short = Image::from_bytes(vec![0u8; BLOCK_SIZE + 1]);
        assert!(ImageBlockDevice::new(short).err().unwrap() == DiskError::InvalidLayout);
        let empty = Image::from_bytes(vec![]);
        assert!(ImageBlockDevice::new(empty).err().unwrap() == DiskError::InvalidLayout);
    }
}
