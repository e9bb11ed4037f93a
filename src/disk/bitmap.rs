use std::fmt;
use std::fmt::Write;
use std::io;

use log::debug;

use crate::disk::block::{Block, BlockDevice, BLOCK_SIZE};
use crate::disk::error::DiskError;
use crate::disk::format::{bitmap_blocks_for, BLOCKS_PER_BITMAP_BLOCK};

/// The volume bitmap tracks one bit per device block.  A set bit means the
/// block is free.  Bits are stored most-significant first, so block `b` is
/// bit `7 - (b & 7)` of byte `b >> 3`, counting bytes across consecutive
/// bitmap blocks.
#[derive(Clone, PartialEq, Eq)]
pub struct VolumeBitMap {
    blocks: Vec<Block>,
    total_blocks: usize,
}

impl VolumeBitMap {
    /// Create a bitmap for a device of `total_blocks` blocks, with every
    /// block marked free.  Bits past the end of the device stay clear.
    pub fn create(total_blocks: usize) -> VolumeBitMap {
        let mut bitmap = VolumeBitMap {
            blocks: vec![[0u8; BLOCK_SIZE]; bitmap_blocks_for(total_blocks)],
            total_blocks,
        };
        for b in 0..total_blocks {
            let (block, byte, mask) = Self::address(b);
            bitmap.blocks[block][byte] |= mask;
        }
        bitmap
    }

    /// Read `ceil(total_blocks / 4096)` bitmap blocks starting at `start`.
    pub fn read(device: &dyn BlockDevice, start: u16, total_blocks: usize) -> io::Result<VolumeBitMap> {
        let count = bitmap_blocks_for(total_blocks);
        let mut blocks = Vec::with_capacity(count);
        for i in 0..count {
            blocks.push(device.read_block(Self::bitmap_block_number(start, i)?)?);
        }
        Ok(VolumeBitMap {
            blocks,
            total_blocks,
        })
    }

    /// Write the bitmap back to the device, starting at block `start`.
    pub fn write(&self, device: &mut dyn BlockDevice, start: u16) -> io::Result<()> {
        debug!(
            "writing {} bitmap block(s) at {} ({} free)",
            self.blocks.len(),
            start,
            self.free_count()
        );
        for (i, block) in self.blocks.iter().enumerate() {
            device.write_block(Self::bitmap_block_number(start, i)?, block)?;
        }
        Ok(())
    }

    fn bitmap_block_number(start: u16, i: usize) -> io::Result<u16> {
        let number = start as usize + i;
        if number > u16::MAX as usize {
            return Err(DiskError::OutOfRange.into());
        }
        Ok(number as u16)
    }

    #[inline]
    fn address(b: usize) -> (usize, usize, u8) {
        let byte = b >> 3;
        (byte / BLOCK_SIZE, byte % BLOCK_SIZE, 0x80 >> (b & 7))
    }

    fn check_range(&self, b: u16) -> io::Result<()> {
        if (b as usize) < self.total_blocks {
            Ok(())
        } else {
            Err(DiskError::OutOfRange.into())
        }
    }

    #[inline]
    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// The number of blocks the bitmap occupies on disk.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn mark_used(&mut self, b: u16) -> io::Result<()> {
        self.check_range(b)?;
        let (block, byte, mask) = Self::address(b as usize);
        self.blocks[block][byte] &= !mask;
        Ok(())
    }

    pub fn mark_free(&mut self, b: u16) -> io::Result<()> {
        self.check_range(b)?;
        let (block, byte, mask) = Self::address(b as usize);
        self.blocks[block][byte] |= mask;
        Ok(())
    }

    /// Blocks outside the volume are never free.
    pub fn is_free(&self, b: u16) -> bool {
        if (b as usize) >= self.total_blocks {
            return false;
        }
        let (block, byte, mask) = Self::address(b as usize);
        self.blocks[block][byte] & mask != 0
    }

    pub fn free_count(&self) -> usize {
        (0..self.total_blocks)
            .filter(|&b| self.is_free(b as u16))
            .count()
    }

    pub fn first_free(&self) -> Option<u16> {
        (0..self.total_blocks)
            .map(|b| b as u16)
            .find(|&b| self.is_free(b))
    }

    /// Allocate `count` blocks, lowest numbered first, and mark them used.
    /// If fewer than `count` blocks are free, nothing is changed.
    pub fn allocate(&mut self, count: usize) -> io::Result<Vec<u16>> {
        let found: Vec<u16> = (0..self.total_blocks)
            .map(|b| b as u16)
            .filter(|&b| self.is_free(b))
            .take(count)
            .collect();
        if found.len() < count {
            return Err(DiskError::DiskFull.into());
        }
        for &b in &found {
            self.mark_used(b)?;
        }
        Ok(found)
    }

    /// Blocks currently marked used.
    pub fn used_blocks(&self) -> Vec<u16> {
        (0..self.total_blocks)
            .map(|b| b as u16)
            .filter(|&b| !self.is_free(b))
            .collect()
    }
}

impl fmt::Debug for VolumeBitMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const ROW: usize = 64;
        for row_start in (0..self.total_blocks).step_by(ROW) {
            write!(f, "{:04x}: ", row_start)?;
            let row_end = (row_start + ROW).min(self.total_blocks);
            for b in row_start..row_end {
                let c: char = if self.is_free(b as u16) { '.' } else { 'x' };
                f.write_char(c)?;
            }
            f.write_char('\n')?;
        }
        writeln!(
            f,
            "{} of {} blocks free ({} bitmap block(s), {} blocks per bitmap block).",
            self.free_count(),
            self.total_blocks,
            self.blocks.len(),
            BLOCKS_PER_BITMAP_BLOCK
        )
    }
}
