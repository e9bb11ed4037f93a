//! ProDOS directories
//!
//! A directory is a chain of blocks: a key block carrying the directory
//! header and twelve entries, followed by continuation blocks of thirteen
//! entries each.  Blocks are doubly linked by block number, and the chain
//! ends at a `next` link of zero.

use std::collections::HashSet;
use std::fmt;
use std::io;

use log::{debug, trace};

use crate::disk::bitmap::VolumeBitMap;
use crate::disk::block::{BlockDevice, BlockDeviceRef};
use crate::disk::error::DiskError;
use crate::disk::record::{
    read_record, write_record, DirectoryBlock, DirectoryHeader, FileDescriptor, Record,
    StorageType, SubdirectoryKeyBlock, VolumeDirectoryKeyBlock,
};
use crate::disk::validation::ValidationError;

const HEADER_TYPE_OFFSET: usize = 0x04;

/// One decoded block of a directory chain.
#[derive(Clone, Debug, PartialEq)]
pub enum DirectorySegment {
    VolumeKey(VolumeDirectoryKeyBlock),
    SubdirectoryKey(SubdirectoryKeyBlock),
    Continuation(DirectoryBlock),
}

impl DirectorySegment {
    /// Read a directory block.  Key blocks are told apart by the storage
    /// type of their header.
    pub fn read(device: &dyn BlockDevice, block: u16, is_key: bool) -> io::Result<Self> {
        trace!("read directory block {} (key: {})", block, is_key);
        if !is_key {
            return Ok(DirectorySegment::Continuation(read_record(device, block)?));
        }
        let bytes = device.block(block)?;
        match StorageType::from_nibble(bytes[HEADER_TYPE_OFFSET] >> 4) {
            StorageType::VolumeDirectoryHeader => {
                Ok(DirectorySegment::VolumeKey(VolumeDirectoryKeyBlock::decode(bytes)?))
            }
            StorageType::SubdirectoryHeader => {
                Ok(DirectorySegment::SubdirectoryKey(SubdirectoryKeyBlock::decode(bytes)?))
            }
            _ => Err(DiskError::InvalidStorageType.into()),
        }
    }

    pub fn write(&self, device: &mut dyn BlockDevice, block: u16) -> io::Result<()> {
        match self {
            DirectorySegment::VolumeKey(key) => write_record(device, block, key),
            DirectorySegment::SubdirectoryKey(key) => write_record(device, block, key),
            DirectorySegment::Continuation(continuation) => write_record(device, block, continuation),
        }
    }

    pub fn is_key(&self) -> bool {
        !matches!(self, DirectorySegment::Continuation(_))
    }

    pub fn prev(&self) -> u16 {
        match self {
            DirectorySegment::VolumeKey(key) => key.prev,
            DirectorySegment::SubdirectoryKey(key) => key.prev,
            DirectorySegment::Continuation(continuation) => continuation.prev,
        }
    }

    pub fn next(&self) -> u16 {
        match self {
            DirectorySegment::VolumeKey(key) => key.next,
            DirectorySegment::SubdirectoryKey(key) => key.next,
            DirectorySegment::Continuation(continuation) => continuation.next,
        }
    }

    pub fn set_next(&mut self, next: u16) {
        match self {
            DirectorySegment::VolumeKey(key) => key.next = next,
            DirectorySegment::SubdirectoryKey(key) => key.next = next,
            DirectorySegment::Continuation(continuation) => continuation.next = next,
        }
    }

    pub fn entries(&self) -> &[FileDescriptor] {
        match self {
            DirectorySegment::VolumeKey(key) => &key.entries,
            DirectorySegment::SubdirectoryKey(key) => &key.entries,
            DirectorySegment::Continuation(continuation) => &continuation.entries,
        }
    }

    pub fn entries_mut(&mut self) -> &mut [FileDescriptor] {
        match self {
            DirectorySegment::VolumeKey(key) => &mut key.entries,
            DirectorySegment::SubdirectoryKey(key) => &mut key.entries,
            DirectorySegment::Continuation(continuation) => &mut continuation.entries,
        }
    }

    /// The 1-based entry number of slot 0.  In a key block the header
    /// counts as entry 1.
    #[inline]
    pub fn first_entry_number(&self) -> u8 {
        if self.is_key() {
            2
        } else {
            1
        }
    }

    pub fn header(&self) -> Option<&dyn HeaderInfo> {
        match self {
            DirectorySegment::VolumeKey(key) => Some(&key.header),
            DirectorySegment::SubdirectoryKey(key) => Some(&key.header),
            DirectorySegment::Continuation(_) => None,
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        match self {
            DirectorySegment::VolumeKey(key) => key.validate(),
            DirectorySegment::SubdirectoryKey(key) => key.validate(),
            DirectorySegment::Continuation(continuation) => continuation.validate(),
        }
    }

    fn adjust_file_count(&mut self, delta: i32) {
        fn adjust<H: DirectoryHeader>(header: &mut H, delta: i32) {
            let count = (DirectoryHeader::file_count(header) as i32 + delta).max(0);
            header.set_file_count(count as u16);
        }
        match self {
            DirectorySegment::VolumeKey(key) => adjust(&mut key.header, delta),
            DirectorySegment::SubdirectoryKey(key) => adjust(&mut key.header, delta),
            DirectorySegment::Continuation(_) => {}
        }
    }
}

/// Object-safe view of a directory header.
pub trait HeaderInfo {
    fn name(&self) -> String;
    fn file_count(&self) -> u16;
}

impl<H: DirectoryHeader> HeaderInfo for H {
    fn name(&self) -> String {
        DirectoryHeader::name(self)
    }

    fn file_count(&self) -> u16 {
        DirectoryHeader::file_count(self)
    }
}

/// Iterate over the blocks of a directory chain, checking each link.
pub struct SegmentIterator {
    device: BlockDeviceRef,
    next: Option<(u16, u16)>,
    visited: HashSet<u16>,
}

impl SegmentIterator {
    pub fn new(device: BlockDeviceRef, key_block: u16) -> SegmentIterator {
        SegmentIterator {
            device,
            next: Some((key_block, 0)),
            visited: HashSet::new(),
        }
    }
}

impl Iterator for SegmentIterator {
    type Item = io::Result<(u16, DirectorySegment)>;

    fn next(&mut self) -> Option<io::Result<(u16, DirectorySegment)>> {
        let (block, expected_prev) = self.next.take()?;
        let is_key = self.visited.is_empty();

        // Loop detection.
        if !self.visited.insert(block) {
            return Some(Err(DiskError::ChainLoop.into()));
        }

        let segment = match DirectorySegment::read(&*self.device.borrow(), block, is_key) {
            Ok(segment) => segment,
            Err(e) => return Some(Err(e)),
        };
        if !is_key && segment.prev() != expected_prev {
            return Some(Err(DiskError::InvalidChainLink.into()));
        }
        if segment.next() != 0 {
            self.next = Some((segment.next(), block));
        }
        Some(Ok((block, segment)))
    }
}

/// Where a descriptor lives: its block, its slot within the block, and its
/// 1-based entry number as recorded in subdirectory back-references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryPosition {
    pub block: u16,
    pub slot: usize,
    pub entry_number: u8,
}

impl fmt::Display for EntryPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "block {} entry {}", self.block, self.entry_number)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryEntry {
    pub descriptor: FileDescriptor,
    pub position: EntryPosition,
}

impl DirectoryEntry {
    pub fn name(&self) -> String {
        self.descriptor.name()
    }
}

/// Iterate over the entries of a directory in on-disk order.
pub struct DirectoryWalker {
    segments: SegmentIterator,
    current: Option<(u16, DirectorySegment)>,
    slot: usize,
    include_deleted: bool,
    failed: bool,
}

/// Walk the directory whose key block is `key_block`.  Deleted slots are
/// skipped unless `include_deleted()` is requested.
pub fn walk(device: BlockDeviceRef, key_block: u16) -> DirectoryWalker {
    DirectoryWalker {
        segments: SegmentIterator::new(device, key_block),
        current: None,
        slot: 0,
        include_deleted: false,
        failed: false,
    }
}

impl DirectoryWalker {
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

impl Iterator for DirectoryWalker {
    type Item = io::Result<DirectoryEntry>;

    fn next(&mut self) -> Option<io::Result<DirectoryEntry>> {
        if self.failed {
            return None;
        }
        loop {
            if let Some((block, ref segment)) = self.current {
                while self.slot < segment.entries().len() {
                    let slot = self.slot;
                    self.slot += 1;
                    let descriptor = &segment.entries()[slot];
                    if descriptor.is_active() || self.include_deleted {
                        return Some(Ok(DirectoryEntry {
                            descriptor: descriptor.clone(),
                            position: EntryPosition {
                                block,
                                slot,
                                entry_number: segment.first_entry_number() + slot as u8,
                            },
                        }));
                    }
                }
            }
            match self.segments.next()? {
                Ok(segment) => {
                    self.current = Some(segment);
                    self.slot = 0;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// A handle on one directory of the volume, identified by its key block.
#[derive(Clone)]
pub struct Directory {
    device: BlockDeviceRef,
    key_block: u16,
}

impl Directory {
    pub fn new(device: BlockDeviceRef, key_block: u16) -> Directory {
        Directory { device, key_block }
    }

    #[inline]
    pub fn key_block(&self) -> u16 {
        self.key_block
    }

    pub fn walk(&self) -> DirectoryWalker {
        walk(self.device.clone(), self.key_block)
    }

    pub fn segments(&self) -> SegmentIterator {
        SegmentIterator::new(self.device.clone(), self.key_block)
    }

    /// The block numbers of the whole chain, key block first.
    pub fn blocks(&self) -> io::Result<Vec<u16>> {
        self.segments().map(|r| r.map(|(block, _)| block)).collect()
    }

    pub fn key_segment(&self) -> io::Result<DirectorySegment> {
        DirectorySegment::read(&*self.device.borrow(), self.key_block, true)
    }

    pub fn name(&self) -> io::Result<String> {
        let segment = self.key_segment()?;
        Ok(segment.header().map(|h| h.name()).unwrap_or_default())
    }

    pub fn file_count(&self) -> io::Result<u16> {
        let segment = self.key_segment()?;
        Ok(segment.header().map(|h| h.file_count()).unwrap_or(0))
    }

    pub fn is_volume_directory(&self) -> io::Result<bool> {
        Ok(matches!(self.key_segment()?, DirectorySegment::VolumeKey(_)))
    }

    /// Find an active entry by name, ignoring case.
    pub fn find(&self, name: &str) -> io::Result<Option<DirectoryEntry>> {
        for entry in self.walk() {
            let entry = entry?;
            if entry.name().eq_ignore_ascii_case(name) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        match self.walk().next() {
            None => Ok(true),
            Some(Ok(_)) => Ok(false),
            Some(Err(e)) => Err(e),
        }
    }

    /// Find the first deleted slot, if any.
    pub fn free_slot(&self) -> io::Result<Option<EntryPosition>> {
        for entry in self.walk().include_deleted() {
            let entry = entry?;
            if !entry.descriptor.is_active() {
                return Ok(Some(entry.position));
            }
        }
        Ok(None)
    }

    /// Append a continuation block to a full subdirectory and return the
    /// position of its first slot.  The volume directory cannot grow.
    pub fn extend(&self, bitmap: &mut VolumeBitMap) -> io::Result<EntryPosition> {
        if self.is_volume_directory()? {
            return Err(DiskError::DirectoryFull.into());
        }
        let last = match self.blocks()?.last() {
            Some(&block) => block,
            None => return Err(DiskError::Unknown.into()),
        };
        let new_block = bitmap.allocate(1)?[0];
        debug!(
            "extending directory at {} with block {} after {}",
            self.key_block, new_block, last
        );

        let mut device = self.device.borrow_mut();
        DirectorySegment::Continuation(DirectoryBlock::new(last, 0)).write(&mut *device, new_block)?;
        let mut tail = DirectorySegment::read(&*device, last, last == self.key_block)?;
        tail.set_next(new_block);
        tail.write(&mut *device, last)?;
        Ok(EntryPosition {
            block: new_block,
            slot: 0,
            entry_number: 1,
        })
    }

    fn segment_at(&self, block: u16) -> io::Result<DirectorySegment> {
        DirectorySegment::read(&*self.device.borrow(), block, block == self.key_block)
    }

    pub fn read_entry(&self, position: &EntryPosition) -> io::Result<FileDescriptor> {
        let segment = self.segment_at(position.block)?;
        segment
            .entries()
            .get(position.slot)
            .cloned()
            .ok_or_else(|| DiskError::OutOfRange.into())
    }

    pub fn write_entry(&self, position: &EntryPosition, descriptor: &FileDescriptor) -> io::Result<()> {
        let mut segment = self.segment_at(position.block)?;
        match segment.entries_mut().get_mut(position.slot) {
            Some(slot) => *slot = descriptor.clone(),
            None => return Err(DiskError::OutOfRange.into()),
        }
        segment.write(&mut *self.device.borrow_mut(), position.block)
    }

    /// Add `delta` to the header's active file count.
    pub fn adjust_file_count(&self, delta: i32) -> io::Result<()> {
        let mut segment = self.key_segment()?;
        segment.adjust_file_count(delta);
        segment.write(&mut *self.device.borrow_mut(), self.key_block)
    }

    /// Open the subdirectory described by `entry`, checking that its header
    /// points back at that entry.
    pub fn subdirectory(&self, entry: &DirectoryEntry) -> io::Result<Directory> {
        if !entry.descriptor.is_directory() {
            return Err(DiskError::NotADirectory.into());
        }
        let key_block = entry.descriptor.key_pointer;
        let key: SubdirectoryKeyBlock = read_record(&*self.device.borrow(), key_block)?;
        if key.header.storage_type != StorageType::SubdirectoryHeader
            || key.header.parent_pointer != entry.position.block
            || key.header.parent_entry != entry.position.entry_number
        {
            debug!(
                "subdirectory {} at {} refers to block {} entry {}, expected {}",
                entry.name(),
                key_block,
                key.header.parent_pointer,
                key.header.parent_entry,
                entry.position
            );
            return Err(DiskError::BackReferenceMismatch.into());
        }
        Ok(Directory::new(self.device.clone(), key_block))
    }

    /// Resolve a `/`-separated path of subdirectory names relative to this
    /// directory.  Empty components are ignored.
    pub fn resolve_path(&self, path: &str) -> io::Result<Directory> {
        let mut directory = self.clone();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let entry = directory
                .find(component)?
                .ok_or_else(|| DiskError::NotFound.to_io_error())?;
            directory = directory.subdirectory(&entry)?;
        }
        Ok(directory)
    }
}

/// Split a path into its parent directory path and final name.
pub fn split_path(path: &str) -> (&str, &str) {
    let path = path.trim_matches('/');
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::disk::block::ImageBlockDevice;
    use crate::disk::record::{DateTime, SubdirectoryHeader, VolumeDirectoryHeader};

    fn device(blocks: usize) -> BlockDeviceRef {
        Rc::new(RefCell::new(ImageBlockDevice::open_memory(blocks).unwrap()))
    }

    fn descriptor(name: &str) -> FileDescriptor {
        let mut descriptor = FileDescriptor {
            storage_type: StorageType::Seedling,
            header_pointer: 2,
            ..Default::default()
        };
        descriptor.set_name(name);
        descriptor
    }

    fn write_volume_chain(device: &BlockDeviceRef, next: u16) {
        let header = VolumeDirectoryHeader::new("TEST", 32, 6, DateTime::default());
        let mut key = VolumeDirectoryKeyBlock::new(header, next);
        for i in 0..12 {
            key.entries[i] = descriptor(&format!("K{}", i));
        }
        write_record(&mut *device.borrow_mut(), 2, &key).unwrap();
    }

    #[test]
    fn test_walk_two_blocks() {
        let device = device(32);
        write_volume_chain(&device, 3);
        let mut continuation = DirectoryBlock::new(2, 0);
        for i in 0..13 {
            continuation.entries[i] = descriptor(&format!("C{}", i));
        }
        write_record(&mut *device.borrow_mut(), 3, &continuation).unwrap();

        let entries = walk(device.clone(), 2).collect::<io::Result<Vec<_>>>().unwrap();
        assert_eq!(entries.len(), 25);
        assert_eq!(entries[0].name(), "K0");
        assert_eq!(entries[0].position.entry_number, 2);
        assert_eq!(entries[11].name(), "K11");
        assert_eq!(entries[12].name(), "C0");
        assert_eq!(
            entries[12].position,
            EntryPosition {
                block: 3,
                slot: 0,
                entry_number: 1
            }
        );
        assert_eq!(entries[24].name(), "C12");

        // Restartable
        assert_eq!(walk(device, 2).count(), 25);
    }

    #[test]
    fn test_deleted_entries() {
        let device = device(32);
        write_volume_chain(&device, 0);
        let directory = Directory::new(device.clone(), 2);
        let mut position = directory.find("k5").unwrap().unwrap().position;
        let mut deleted = directory.read_entry(&position).unwrap();
        deleted.storage_type = StorageType::Deleted;
        directory.write_entry(&position, &deleted).unwrap();

        assert_eq!(directory.walk().count(), 11);
        assert_eq!(directory.walk().include_deleted().count(), 12);
        assert!(directory.find("K5").unwrap().is_none());
        assert_eq!(directory.free_slot().unwrap(), Some(position));

        position.slot = 12;
        assert!(directory.read_entry(&position).unwrap_err() == DiskError::OutOfRange);
    }

    #[test]
    fn test_chain_loop() {
        let device = device(32);
        write_volume_chain(&device, 3);
        write_record(&mut *device.borrow_mut(), 3, &DirectoryBlock::new(2, 2)).unwrap();

        let results: Vec<_> = walk(device, 2).collect();
        assert_eq!(results.len(), 13);
        assert!(results[12].as_ref().unwrap_err() == &DiskError::ChainLoop);
    }

    #[test]
    fn test_invalid_chain_link() {
        let device = device(32);
        write_volume_chain(&device, 3);
        write_record(&mut *device.borrow_mut(), 3, &DirectoryBlock::new(9, 0)).unwrap();
        let error = walk(device, 2).find_map(|r| r.err()).unwrap();
        assert!(error == DiskError::InvalidChainLink);
    }

    #[test]
    fn test_unformatted_key_block() {
        let device = device(32);
        let error = walk(device, 2).next().unwrap().unwrap_err();
        assert!(error == DiskError::InvalidStorageType);
    }

    fn write_subdirectory(device: &BlockDeviceRef, parent_entry: u8) -> Directory {
        write_volume_chain(device, 0);
        let root = Directory::new(device.clone(), 2);
        let position = root.find("K0").unwrap().unwrap().position;
        let mut entry = descriptor("NOTES");
        entry.storage_type = StorageType::Subdirectory;
        entry.key_pointer = 10;
        root.write_entry(&position, &entry).unwrap();

        let header = SubdirectoryHeader::new("NOTES", 2, parent_entry, DateTime::default());
        let key = SubdirectoryKeyBlock::new(header, 0);
        write_record(&mut *device.borrow_mut(), 10, &key).unwrap();
        root
    }

    #[test]
    fn test_resolve_path() {
        let device = device(32);
        let root = write_subdirectory(&device, 2);
        let notes = root.resolve_path("/notes").unwrap();
        assert_eq!(notes.key_block(), 10);
        assert_eq!(notes.name().unwrap(), "NOTES");
        assert!(notes.is_empty().unwrap());
        assert_eq!(root.resolve_path("").unwrap().key_block(), 2);

        assert!(root.resolve_path("MISSING").err().unwrap() == DiskError::NotFound);
        assert!(root.resolve_path("K1").err().unwrap() == DiskError::NotADirectory);
        assert!(root.resolve_path("NOTES/X").err().unwrap() == DiskError::NotFound);
    }

    #[test]
    fn test_back_reference_mismatch() {
        let device = device(32);
        let root = write_subdirectory(&device, 3);
        let error = root.resolve_path("NOTES").err().unwrap();
        assert!(error == DiskError::BackReferenceMismatch);
        assert!(DiskError::from_io_error(&error).unwrap().is_corruption());
    }

    #[test]
    fn test_extend_and_count() {
        let device = device(32);
        let root = write_subdirectory(&device, 2);
        let notes = root.resolve_path("NOTES").unwrap();
        let mut bitmap = VolumeBitMap::create(32);
        for b in 0..=10 {
            bitmap.mark_used(b).unwrap();
        }
        let position = notes.extend(&mut bitmap).unwrap();
        assert_eq!(position.block, 11);
        assert_eq!(notes.blocks().unwrap(), vec![10, 11]);
        assert!(!bitmap.is_free(11));

        notes.adjust_file_count(1).unwrap();
        assert_eq!(notes.file_count().unwrap(), 1);
        notes.adjust_file_count(-2).unwrap();
        assert_eq!(notes.file_count().unwrap(), 0);

        assert!(root.extend(&mut bitmap).err().unwrap() == DiskError::DirectoryFull);
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("HELLO"), ("", "HELLO"));
        assert_eq!(split_path("/A/B/HELLO"), ("A/B", "HELLO"));
        assert_eq!(split_path("A/"), ("", "A"));
    }
}
