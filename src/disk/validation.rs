use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::io;

use log::debug;
use thiserror::Error;

use crate::disk::directory::{DirectoryEntry, EntryPosition};
use crate::disk::error::DiskError;
use crate::disk::format::BOOT_BLOCKS;
use crate::disk::index::occupied_blocks;
use crate::disk::prodos::ProDOS;

/// A validation error represents an inconsistency found in a record or in
/// the volume as a whole.  Findings are collected rather than raised.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid hour: {0}")]
    InvalidHour(u8),
    #[error("invalid minute: {0}")]
    InvalidMinute(u8),
    #[error("key block has non-zero previous link: {0}")]
    NonZeroPrevious(u16),
    #[error("non-zero trailing byte: ${0:02x}")]
    NonZeroTrailingByte(u8),
    #[error("invalid subdirectory marker: ${0:02x}")]
    InvalidMarker(u8),
    #[error("system block not allocated: {0}")]
    SystemBlockNotAllocated(u16),
    #[error("block misallocated: {0}")]
    BlockMisallocated(u16),
    #[error("block {0} misoccupied by: {1}")]
    BlockMisoccupied(u16, String),
    #[error("block {0} occupied by multiple owners, including at least: {1} {2}")]
    BlockOveroccupied(u16, String, String),
    #[error("directory {0} records {1} files but holds {2}")]
    FileCountMismatch(String, u16, u16),
    #[error("error scanning {1}: {0}")]
    FileScanError(DiskError, String),
}

static SYSTEM_OWNER: &str = "ProDOS";

struct Occupancy {
    owners: HashMap<u16, String>,
    errors: Vec<ValidationError>,
}

impl Occupancy {
    fn occupy(&mut self, block: u16, owner: &str) {
        match self.owners.entry(block) {
            Entry::Occupied(existing) => {
                self.errors.push(ValidationError::BlockOveroccupied(
                    block,
                    existing.get().clone(),
                    owner.to_string(),
                ));
            }
            Entry::Vacant(v) => {
                v.insert(owner.to_string());
            }
        }
    }

    /// Record a scan failure if it is a disk error; anything else aborts
    /// validation.
    fn scan_error(&mut self, error: io::Error, owner: &str) -> io::Result<()> {
        match DiskError::from_io_error(&error) {
            Some(e) => {
                self.errors.push(ValidationError::FileScanError(e, owner.to_string()));
                Ok(())
            }
            None => Err(error),
        }
    }
}

fn display_path(path: &str) -> String {
    format!("/{}", path)
}

fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path, name)
    }
}

/// Check the consistency of the volume.  This is a read-only operation and
/// does not attempt any repairs.  Every directory block is decoded and its
/// record findings collected, then block ownership is reconciled against
/// the bitmap.
pub fn validate(volume: &ProDOS) -> io::Result<Vec<ValidationError>> {
    let format = *volume.volume_format()?;
    let bitmap = volume.bitmap()?;
    let device = volume.device();
    let system_blocks: HashSet<u16> = format.system_blocks().into_iter().collect();

    let mut occupancy = Occupancy {
        owners: HashMap::new(),
        errors: vec![],
    };

    // 1. Boot and bitmap blocks
    for block in 0..BOOT_BLOCKS {
        occupancy.occupy(block, SYSTEM_OWNER);
    }
    for block in format.bitmap_start..format.bitmap_start + format.bitmap_blocks() {
        occupancy.occupy(block, SYSTEM_OWNER);
    }

    // 2. Directories and the files they hold
    let mut visited = HashSet::new();
    let mut pending = vec![(volume.root()?, String::new())];
    while let Some((directory, path)) = pending.pop() {
        let owner = display_path(&path);
        if !visited.insert(directory.key_block()) {
            occupancy.scan_error(DiskError::ChainLoop.into(), &owner)?;
            continue;
        }
        let segments = match directory.segments().collect::<io::Result<Vec<_>>>() {
            Ok(segments) => segments,
            Err(e) => {
                occupancy.scan_error(e, &owner)?;
                continue;
            }
        };

        let mut recorded = 0;
        let mut active = 0u16;
        for (block, segment) in &segments {
            occupancy.occupy(*block, &owner);
            let findings = segment.validate();
            if !findings.is_empty() {
                debug!("{} findings in directory block {}", findings.len(), block);
            }
            occupancy.errors.extend(findings);
            if let Some(header) = segment.header() {
                recorded = header.file_count();
            }

            for (slot, descriptor) in segment.entries().iter().enumerate() {
                if !descriptor.is_active() {
                    continue;
                }
                active += 1;
                let entry = DirectoryEntry {
                    descriptor: descriptor.clone(),
                    position: EntryPosition {
                        block: *block,
                        slot,
                        entry_number: segment.first_entry_number() + slot as u8,
                    },
                };
                let entry_path = child_path(&path, &entry.name());
                if descriptor.is_directory() {
                    match directory.subdirectory(&entry) {
                        Ok(subdirectory) => pending.push((subdirectory, entry_path)),
                        Err(e) => occupancy.scan_error(e, &display_path(&entry_path))?,
                    }
                    continue;
                }
                match occupied_blocks(&*device.borrow(), descriptor) {
                    Ok(blocks) => {
                        for block in blocks {
                            occupancy.occupy(block, &display_path(&entry_path));
                        }
                    }
                    Err(e) => occupancy.scan_error(e, &display_path(&entry_path))?,
                }
            }
        }
        if recorded != active {
            occupancy
                .errors
                .push(ValidationError::FileCountMismatch(owner, recorded, active));
        }
    }

    // 3. Reconcile ownership against the bitmap
    let Occupancy { owners, mut errors } = occupancy;
    let mut system: Vec<u16> = system_blocks.iter().copied().collect();
    system.sort_unstable();
    for block in system {
        if bitmap.is_free(block) {
            errors.push(ValidationError::SystemBlockNotAllocated(block));
        }
    }
    for b in 0..format.total_blocks as usize {
        let block = b as u16;
        match owners.get(&block) {
            None if !bitmap.is_free(block) => {
                errors.push(ValidationError::BlockMisallocated(block));
            }
            Some(owner) if bitmap.is_free(block) && !system_blocks.contains(&block) => {
                errors.push(ValidationError::BlockMisoccupied(block, owner.clone()));
            }
            _ => {}
        }
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::block::{BlockDevice, BLOCK_SIZE};
    use crate::disk::record::{
        read_record, write_record, StorageType, SubdirectoryKeyBlock, VolumeDirectoryKeyBlock,
    };
    use crate::disk::{FileInfo, Operator};

    fn volume() -> ProDOS {
        let mut prodos = ProDOS::open_memory(280).unwrap();
        prodos.format("CHECK").unwrap();
        prodos
            .put_file(&FileInfo::new("DATA", vec![0x55; 3 * BLOCK_SIZE]), false)
            .unwrap();
        prodos.create_directory("SUB").unwrap();
        prodos
    }

    /// Modify the image underneath the operator and reopen it so the bitmap
    /// is re-read.
    fn tamper<F: FnOnce(&mut dyn BlockDevice)>(prodos: ProDOS, f: F) -> ProDOS {
        let device = prodos.device();
        f(&mut *device.borrow_mut());
        ProDOS::from_device(device)
    }

    #[test]
    fn test_clean_volume() {
        assert_eq!(volume().validate().unwrap(), vec![]);
    }

    #[test]
    fn test_bitmap_mismatches() {
        let prodos = volume();
        let data = prodos.root().unwrap().find("DATA").unwrap().unwrap();
        let key = data.descriptor.key_pointer;
        let mut bitmap = prodos.bitmap().unwrap().clone();
        bitmap.mark_free(key).unwrap();
        bitmap.mark_free(0).unwrap();
        bitmap.mark_used(200).unwrap();
        let prodos = tamper(prodos, |device| bitmap.write(device, 6).unwrap());

        let errors = prodos.validate().unwrap();
        assert_eq!(
            errors,
            vec![
                ValidationError::SystemBlockNotAllocated(0),
                ValidationError::BlockMisoccupied(key, "/DATA".to_string()),
                ValidationError::BlockMisallocated(200),
            ]
        );
    }

    #[test]
    fn test_overoccupied_and_count() {
        let mut prodos = volume();
        prodos.put_file(&FileInfo::new("COPY", vec![1]), false).unwrap();
        let root = prodos.root().unwrap();
        let data = root.find("DATA").unwrap().unwrap();
        let mut copy = root.find("COPY").unwrap().unwrap();
        let orphan = copy.descriptor.key_pointer;
        copy.descriptor.key_pointer = data.descriptor.key_pointer;
        copy.descriptor.storage_type = StorageType::Sapling;
        root.write_entry(&copy.position, &copy.descriptor).unwrap();
        root.adjust_file_count(1).unwrap();

        let errors = prodos.validate().unwrap();
        assert!(errors.contains(&ValidationError::FileCountMismatch("/".to_string(), 4, 3)));
        assert!(errors.contains(&ValidationError::BlockMisallocated(orphan)));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::BlockOveroccupied(b, _, _) if *b == data.descriptor.key_pointer)));
    }

    #[test]
    fn test_record_findings() {
        let prodos = tamper(volume(), |device| {
            let mut key: VolumeDirectoryKeyBlock = read_record(device, 2).unwrap();
            key.pad = 1;
            key.entries[0].last_mod.minute = 75;
            write_record(device, 2, &key).unwrap();
        });
        assert_eq!(
            prodos.validate().unwrap(),
            vec![
                ValidationError::NonZeroTrailingByte(1),
                ValidationError::InvalidMinute(75),
            ]
        );
    }

    #[test]
    fn test_scan_errors() {
        let prodos = volume();
        let sub = prodos.root().unwrap().find("SUB").unwrap().unwrap();
        let key_block = sub.descriptor.key_pointer;
        let prodos = tamper(prodos, |device| {
            let mut key: SubdirectoryKeyBlock = read_record(device, key_block).unwrap();
            key.header.parent_entry = 9;
            write_record(device, key_block, &key).unwrap();
        });

        let errors = prodos.validate().unwrap();
        assert_eq!(
            errors,
            vec![
                ValidationError::FileScanError(DiskError::BackReferenceMismatch, "/SUB".to_string()),
                // The unreachable subdirectory's key block is now unowned.
                ValidationError::BlockMisallocated(key_block),
            ]
        );
    }

    #[test]
    fn test_display() {
        let error = ValidationError::BlockMisoccupied(9, "/A".to_string());
        assert_eq!(error.to_string(), "block 9 misoccupied by: /A");
        let error = ValidationError::FileScanError(DiskError::ChainLoop, "/B".to_string());
        assert_eq!(error.to_string(), "error scanning /B: directory chain loop detected");
    }
}
