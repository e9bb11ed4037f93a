//! Volume layout parameters.
//!
//! A freshly formatted ProDOS volume is laid out as follows:
//!
//! | Block(s)        | Contents                         |
//! |-----------------|----------------------------------|
//! | 0 - 1           | Boot loader                      |
//! | 2               | Volume directory key block       |
//! | 3 - 5           | Volume directory blocks          |
//! | 6 - ...         | Volume bitmap                    |
//! | remainder       | Data, index, and subdirectory blocks |

use std::io;

use crate::disk::block::MAX_BLOCKS;
use crate::disk::error::DiskError;

/// Blocks tracked by one bitmap block (512 bytes of 8 bits).
pub const BLOCKS_PER_BITMAP_BLOCK: usize = 4096;
pub const BOOT_BLOCKS: u16 = 2;
pub const MAX_NAME_LENGTH: usize = 15;

/// A `VolumeFormat` describes where the system structures live on a volume
/// of a particular size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeFormat {
    pub total_blocks: u16,
    pub key_block: u16,
    pub directory_blocks: u16,
    pub bitmap_start: u16,
}

/// A 5.25" floppy: 35 tracks of 16 sectors.
pub static FLOPPY_140K: VolumeFormat = VolumeFormat::standard(280);
/// A 3.5" floppy.
pub static FLOPPY_800K: VolumeFormat = VolumeFormat::standard(1600);
/// The largest volume ProDOS can address.
pub static HARD_DISK_32M: VolumeFormat = VolumeFormat::standard(MAX_BLOCKS as u16);

impl VolumeFormat {
    /// The layout ProDOS itself uses when formatting a volume.
    pub const fn standard(total_blocks: u16) -> VolumeFormat {
        VolumeFormat {
            total_blocks,
            key_block: 2,
            directory_blocks: 4,
            bitmap_start: 6,
        }
    }

    /// Return the standard layout for a volume of `total_blocks` blocks,
    /// provided the system structures fit with room to spare.
    pub fn for_blocks(total_blocks: usize) -> io::Result<VolumeFormat> {
        if total_blocks > MAX_BLOCKS {
            return Err(DiskError::InvalidLayout.into());
        }
        let format = VolumeFormat::standard(total_blocks as u16);
        if (format.system_end() as usize) >= total_blocks {
            return Err(DiskError::InvalidLayout.into());
        }
        Ok(format)
    }

    /// The number of blocks occupied by the volume bitmap.
    pub fn bitmap_blocks(&self) -> u16 {
        bitmap_blocks_for(self.total_blocks as usize) as u16
    }

    /// The volume directory chain, in link order.
    pub fn directory_chain(&self) -> Vec<u16> {
        (self.key_block..self.key_block + self.directory_blocks).collect()
    }

    /// The first block past the boot blocks, directory, and bitmap.
    fn system_end(&self) -> u16 {
        self.bitmap_start + self.bitmap_blocks()
    }

    /// Blocks which must always be marked in use: boot blocks, the volume
    /// directory, and the bitmap itself.
    pub fn system_blocks(&self) -> Vec<u16> {
        let mut blocks: Vec<u16> = (0..BOOT_BLOCKS).collect();
        blocks.extend(self.directory_chain());
        blocks.extend(self.bitmap_start..self.system_end());
        blocks
    }

    /// The number of blocks available for files on a freshly formatted
    /// volume.
    pub fn data_blocks(&self) -> usize {
        self.total_blocks as usize - self.system_blocks().len()
    }
}

/// The number of bitmap blocks needed to track `total_blocks` blocks.
pub fn bitmap_blocks_for(total_blocks: usize) -> usize {
    (total_blocks + BLOCKS_PER_BITMAP_BLOCK - 1) / BLOCKS_PER_BITMAP_BLOCK
}

/// Check a volume or file name against the ProDOS rules (a letter followed
/// by up to fourteen letters, digits, or periods) and return it in the
/// uppercase form stored on disk.
pub fn normalize_name(name: &str) -> io::Result<String> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.');
    if !valid {
        return Err(DiskError::FilenameInvalid.into());
    }
    Ok(name.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floppy_layout() {
        assert_eq!(FLOPPY_140K.bitmap_blocks(), 1);
        assert_eq!(FLOPPY_140K.system_blocks(), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(FLOPPY_140K.data_blocks(), 273);
        assert_eq!(FLOPPY_140K.directory_chain(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_large_layout() {
        assert_eq!(HARD_DISK_32M.bitmap_blocks(), 16);
        assert_eq!(bitmap_blocks_for(4096), 1);
        assert_eq!(bitmap_blocks_for(4097), 2);
        assert_eq!(FLOPPY_800K.system_blocks().len(), 2 + 4 + 1);
    }

    #[test]
    fn test_for_blocks() {
        assert_eq!(VolumeFormat::for_blocks(280).unwrap(), FLOPPY_140K);
        assert!(VolumeFormat::for_blocks(7).unwrap_err() == DiskError::InvalidLayout);
        assert!(VolumeFormat::for_blocks(70000).unwrap_err() == DiskError::InvalidLayout);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("hello").unwrap(), "HELLO");
        assert_eq!(normalize_name("A.B2").unwrap(), "A.B2");
        assert_eq!(normalize_name("ABCDEFGHIJKLMNO").unwrap(), "ABCDEFGHIJKLMNO");
        for bad in &["", "1ABC", "A B", "ABCDEFGHIJKLMNOP", "A/B", "É"] {
            assert!(normalize_name(bad).unwrap_err() == DiskError::FilenameInvalid);
        }
    }
}
