//! File storage trees
//!
//! A file's key pointer leads to its data through zero, one, or two levels of
//! index blocks:
//!
//! * seedling: the key block is the only data block.
//! * sapling: the key block is an index of up to 256 data blocks.
//! * tree: the key block is a master index of up to 128 index blocks.
//!
//! A zero pointer is a sparse block and reads as zeros.  An extended file's
//! key block instead describes two forks, each a tree of its own; their
//! blocks are tracked, but their contents cannot be read.

use std::io;

use log::{debug, warn};

use crate::disk::block::{Block, BlockDevice, BLOCK_SIZE};
use crate::disk::error::DiskError;
use crate::disk::record::{
    read_record, write_record, ExtendedKeyBlock, FileDescriptor, IndexBlock, StorageType,
    INDEX_ENTRIES, MAX_EOF,
};

/// Index blocks a tree file's master index may reference.
pub const MAX_MASTER_ENTRIES: usize = 128;
pub const MAX_DATA_BLOCKS: usize = MAX_MASTER_ENTRIES * INDEX_ENTRIES;

/// The number and kind of blocks needed to store a file of a given length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoragePlan {
    pub storage_type: StorageType,
    pub data_blocks: usize,
    pub index_blocks: usize,
}

impl StoragePlan {
    /// Plan storage for `length` bytes.  Empty files still receive one data
    /// block.
    pub fn for_length(length: usize) -> io::Result<StoragePlan> {
        if length > MAX_EOF as usize {
            return Err(DiskError::FileTooLarge.into());
        }
        let data_blocks = ((length + BLOCK_SIZE - 1) / BLOCK_SIZE).max(1);
        if data_blocks > MAX_DATA_BLOCKS {
            return Err(DiskError::FileTooLarge.into());
        }
        let (storage_type, index_blocks) = match data_blocks {
            1 => (StorageType::Seedling, 0),
            n if n <= INDEX_ENTRIES => (StorageType::Sapling, 1),
            n => (StorageType::Tree, 1 + (n + INDEX_ENTRIES - 1) / INDEX_ENTRIES),
        };
        Ok(StoragePlan {
            storage_type,
            data_blocks,
            index_blocks,
        })
    }

    #[inline]
    pub fn total_blocks(&self) -> usize {
        self.data_blocks + self.index_blocks
    }
}

/// Write `data` into the freshly allocated `blocks` according to `plan`, and
/// return the key pointer.  Data blocks are written before the index blocks
/// that refer to them.
pub fn write_tree(
    device: &mut dyn BlockDevice,
    plan: &StoragePlan,
    blocks: &[u16],
    data: &[u8],
) -> io::Result<u16> {
    if blocks.len() != plan.total_blocks() {
        return Err(DiskError::Unknown.into());
    }
    let (index_blocks, data_blocks) = blocks.split_at(plan.index_blocks);
    for (n, &block) in data_blocks.iter().enumerate() {
        let mut buffer: Block = [0u8; BLOCK_SIZE];
        let start = (n * BLOCK_SIZE).min(data.len());
        let end = ((n + 1) * BLOCK_SIZE).min(data.len());
        buffer[..end - start].copy_from_slice(&data[start..end]);
        device.write_block(block, &buffer)?;
    }

    match plan.storage_type {
        StorageType::Seedling => Ok(data_blocks[0]),
        StorageType::Sapling => {
            let mut index = IndexBlock::new();
            for (n, &block) in data_blocks.iter().enumerate() {
                index.set(n, block);
            }
            write_record(device, index_blocks[0], &index)?;
            Ok(index_blocks[0])
        }
        _ => {
            let (master_block, subindex_blocks) = (index_blocks[0], &index_blocks[1..]);
            let mut master = IndexBlock::new();
            for (i, (&index_block, chunk)) in subindex_blocks
                .iter()
                .zip(data_blocks.chunks(INDEX_ENTRIES))
                .enumerate()
            {
                let mut index = IndexBlock::new();
                for (n, &block) in chunk.iter().enumerate() {
                    index.set(n, block);
                }
                write_record(device, index_block, &index)?;
                master.set(i, index_block);
            }
            write_record(device, master_block, &master)?;
            debug!(
                "wrote tree file: master {} with {} index blocks",
                master_block,
                subindex_blocks.len()
            );
            Ok(master_block)
        }
    }
}

fn check_pointer(device: &dyn BlockDevice, pointer: u16) -> io::Result<()> {
    if pointer != 0 {
        device.check_index(pointer)?;
    }
    Ok(())
}

/// Resolves data block numbers for a file, caching the most recent index
/// block of a tree.
struct DataBlockMap<'a> {
    device: &'a dyn BlockDevice,
    storage_type: StorageType,
    key_pointer: u16,
    top: Option<IndexBlock>,
    cached: Option<(usize, IndexBlock)>,
}

impl<'a> DataBlockMap<'a> {
    fn new(device: &'a dyn BlockDevice, descriptor: &FileDescriptor) -> io::Result<Self> {
        let top = match descriptor.storage_type {
            StorageType::Seedling => None,
            StorageType::Sapling | StorageType::Tree => {
                Some(read_record(device, descriptor.key_pointer)?)
            }
            StorageType::Extended => return Err(DiskError::Unsupported.into()),
            _ => return Err(DiskError::InvalidStorageType.into()),
        };
        Ok(DataBlockMap {
            device,
            storage_type: descriptor.storage_type,
            key_pointer: descriptor.key_pointer,
            top,
            cached: None,
        })
    }

    /// The number of data blocks this storage type can address.
    fn capacity(&self) -> usize {
        match self.storage_type {
            StorageType::Seedling => 1,
            StorageType::Sapling => INDEX_ENTRIES,
            _ => MAX_DATA_BLOCKS,
        }
    }

    fn pointer(&mut self, n: usize) -> io::Result<u16> {
        if n >= self.capacity() {
            return Ok(0);
        }
        let top = match self.top {
            None => return Ok(self.key_pointer),
            Some(ref top) => top,
        };
        if self.storage_type == StorageType::Sapling {
            return Ok(top.get(n));
        }
        let (i, j) = (n / INDEX_ENTRIES, n % INDEX_ENTRIES);
        if let Some((cached_i, ref index)) = self.cached {
            if cached_i == i {
                return Ok(index.get(j));
            }
        }
        let index_block = top.get(i);
        if index_block == 0 {
            return Ok(0);
        }
        let index: IndexBlock = read_record(self.device, index_block)?;
        let pointer = index.get(j);
        self.cached = Some((i, index));
        Ok(pointer)
    }
}

/// Read a file's contents, truncated to its EOF.
pub fn read_tree(device: &dyn BlockDevice, descriptor: &FileDescriptor) -> io::Result<Vec<u8>> {
    let eof = descriptor.eof as usize;
    let mut map = DataBlockMap::new(device, descriptor)?;
    let needed = (eof + BLOCK_SIZE - 1) / BLOCK_SIZE;
    if needed > map.capacity() {
        warn!(
            "{}: EOF {} exceeds what a {:?} file can address",
            descriptor.name(),
            eof,
            descriptor.storage_type
        );
    }
    let mut data = Vec::with_capacity(needed * BLOCK_SIZE);
    for n in 0..needed {
        match map.pointer(n)? {
            0 => data.extend_from_slice(&[0u8; BLOCK_SIZE]),
            block => data.extend_from_slice(device.block(block)?),
        }
    }
    data.truncate(eof);
    Ok(data)
}

/// Append the blocks of one seedling, sapling, or tree rooted at `key`.
fn tree_blocks(
    device: &dyn BlockDevice,
    storage_type: StorageType,
    key: u16,
    blocks: &mut Vec<u16>,
) -> io::Result<()> {
    device.check_index(key)?;
    blocks.push(key);
    match storage_type {
        StorageType::Seedling => {}
        StorageType::Sapling => {
            let index: IndexBlock = read_record(device, key)?;
            for &pointer in index.pointers.iter().filter(|&&p| p != 0) {
                check_pointer(device, pointer)?;
                blocks.push(pointer);
            }
        }
        StorageType::Tree => {
            let master: IndexBlock = read_record(device, key)?;
            for &index_block in master.pointers[..MAX_MASTER_ENTRIES]
                .iter()
                .filter(|&&p| p != 0)
            {
                check_pointer(device, index_block)?;
                blocks.push(index_block);
                let index: IndexBlock = read_record(device, index_block)?;
                for &pointer in index.pointers.iter().filter(|&&p| p != 0) {
                    check_pointer(device, pointer)?;
                    blocks.push(pointer);
                }
            }
        }
        _ => return Err(DiskError::InvalidStorageType.into()),
    }
    Ok(())
}

/// Every block owned by a file: data blocks and index blocks, including
/// blocks past EOF that are still referenced.  For an extended file this
/// is the key block plus both forks.
pub fn occupied_blocks(device: &dyn BlockDevice, descriptor: &FileDescriptor) -> io::Result<Vec<u16>> {
    let key = descriptor.key_pointer;
    let mut blocks = vec![];
    if descriptor.storage_type != StorageType::Extended {
        tree_blocks(device, descriptor.storage_type, key, &mut blocks)?;
        return Ok(blocks);
    }

    device.check_index(key)?;
    blocks.push(key);
    let forks: ExtendedKeyBlock = read_record(device, key)?;
    for fork in forks.forks().iter() {
        // An absent fork has no blocks.
        if fork.storage_type == StorageType::Deleted && fork.key_pointer == 0 {
            continue;
        }
        tree_blocks(device, fork.storage_type, fork.key_pointer, &mut blocks)?;
    }
    Ok(blocks)
}
