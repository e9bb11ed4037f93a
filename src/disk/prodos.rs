use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use log::debug;

use crate::disk::bitmap::VolumeBitMap;
use crate::disk::block::{BlockDevice, BlockDeviceRef, ImageBlockDevice, BLOCK_SIZE};
use crate::disk::directory::{split_path, Directory, DirectoryEntry, EntryPosition};
use crate::disk::error::DiskError;
use crate::disk::format::{normalize_name, VolumeFormat};
use crate::disk::image::Image;
use crate::disk::index::{occupied_blocks, read_tree, write_tree, StoragePlan};
use crate::disk::record::{
    read_record, write_record, Access, DateTime, DirectoryBlock, FileDescriptor, FileType,
    StorageType, SubdirectoryHeader, SubdirectoryKeyBlock, VolumeDirectoryHeader,
    VolumeDirectoryKeyBlock,
};
use crate::disk::validation::{self, ValidationError};
use crate::disk::{Descriptor, FileInfo, Operator};

/// The volume directory key block is always block 2.
pub const VOLUME_KEY_BLOCK: u16 = 2;

/// A ProDOS volume on a block device.  The volume layout and bitmap are
/// read when the volume is opened and are absent for unformatted media.
pub struct ProDOS {
    device: BlockDeviceRef,
    format: Option<VolumeFormat>,
    bitmap: Option<VolumeBitMap>,
}

impl ProDOS {
    pub fn new(image: Image) -> io::Result<ProDOS> {
        let device = ImageBlockDevice::new(image)?;
        Ok(Self::from_device(Rc::new(RefCell::new(device))))
    }

    pub fn from_device(device: BlockDeviceRef) -> ProDOS {
        let mut prodos = ProDOS {
            device,
            format: None,
            bitmap: None,
        };
        prodos.initialize();
        prodos
    }

    /// Open an existing image as read-only (if `writable` is false) or
    /// read-write (if `writable` is true).
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> io::Result<ProDOS> {
        let image = if writable {
            Image::open_read_write(path)?
        } else {
            Image::open_read_only(path)?
        };
        Self::new(image)
    }

    /// Create a zero-filled image of `total_blocks` blocks.  If `create_new`
    /// is true, no file is allowed to exist at the target location.
    pub fn create<P: AsRef<Path>>(path: P, total_blocks: usize, create_new: bool) -> io::Result<ProDOS> {
        Self::new(Image::create(path, total_blocks * BLOCK_SIZE, create_new)?)
    }

    /// Create a new in-memory image.
    pub fn open_memory(total_blocks: usize) -> io::Result<ProDOS> {
        Self::new(Image::open_memory(total_blocks * BLOCK_SIZE)?)
    }

    /// Read the volume layout and bitmap, if any.  This is called again
    /// after formatting.
    fn initialize(&mut self) {
        match self.read_volume() {
            Ok((format, bitmap)) => {
                self.format = Some(format);
                self.bitmap = Some(bitmap);
            }
            Err(e) => {
                debug!("treating volume as unformatted: {}", e);
                self.format = None;
                self.bitmap = None;
            }
        }
    }

    fn read_volume(&self) -> io::Result<(VolumeFormat, VolumeBitMap)> {
        let header = {
            let device = self.device.borrow();
            let key: VolumeDirectoryKeyBlock = read_record(&*device, VOLUME_KEY_BLOCK)?;
            if key.header.storage_type != StorageType::VolumeDirectoryHeader {
                return Err(DiskError::Unformatted.into());
            }
            let total = key.header.total_blocks as usize;
            if total == 0 || total > device.block_count() {
                return Err(DiskError::InvalidLayout.into());
            }
            key.header
        };
        let directory_blocks = Directory::new(self.device.clone(), VOLUME_KEY_BLOCK)
            .blocks()?
            .len() as u16;
        let format = VolumeFormat {
            total_blocks: header.total_blocks,
            key_block: VOLUME_KEY_BLOCK,
            directory_blocks,
            bitmap_start: header.bitmap_pointer,
        };
        let bitmap = VolumeBitMap::read(
            &*self.device.borrow(),
            format.bitmap_start,
            format.total_blocks as usize,
        )?;
        Ok((format, bitmap))
    }

    /// Format the volume: zero every block, then write the volume directory
    /// chain and a bitmap with the system blocks marked in use.
    pub fn format(&mut self, volume_name: &str) -> io::Result<()> {
        self.device.borrow().check_writability()?;
        let name = normalize_name(volume_name)?;
        let format = VolumeFormat::for_blocks(self.device.borrow().block_count())?;
        debug!("formatting {} with {:?}", name, format);

        {
            let mut device = self.device.borrow_mut();
            let zero = [0u8; BLOCK_SIZE];
            for block in 0..device.block_count() {
                device.write_block(block as u16, &zero)?;
            }

            let chain = format.directory_chain();
            for (i, &block) in chain.iter().enumerate() {
                let prev = if i == 0 { 0 } else { chain[i - 1] };
                let next = chain.get(i + 1).copied().unwrap_or(0);
                if i == 0 {
                    let header = VolumeDirectoryHeader::new(
                        &name,
                        format.total_blocks,
                        format.bitmap_start,
                        DateTime::now(),
                    );
                    write_record(&mut *device, block, &VolumeDirectoryKeyBlock::new(header, next))?;
                } else {
                    write_record(&mut *device, block, &DirectoryBlock::new(prev, next))?;
                }
            }

            let mut bitmap = VolumeBitMap::create(format.total_blocks as usize);
            for block in format.system_blocks() {
                bitmap.mark_used(block)?;
            }
            bitmap.write(&mut *device, format.bitmap_start)?;
            device.flush()?;
        }

        self.initialize();
        match self.format {
            Some(_) => Ok(()),
            None => Err(DiskError::Unformatted.into()),
        }
    }

    pub fn volume_format(&self) -> io::Result<&VolumeFormat> {
        self.format
            .as_ref()
            .ok_or_else(|| DiskError::Unformatted.into())
    }

    pub fn bitmap(&self) -> io::Result<&VolumeBitMap> {
        self.bitmap
            .as_ref()
            .ok_or_else(|| DiskError::Unformatted.into())
    }

    pub fn free_blocks(&self) -> io::Result<usize> {
        Ok(self.bitmap()?.free_count())
    }

    pub fn volume_name(&self) -> io::Result<String> {
        self.root()?.name()
    }

    pub fn device(&self) -> BlockDeviceRef {
        self.device.clone()
    }

    pub fn device_ref(&self) -> Ref<'_, dyn BlockDevice> {
        self.device.borrow()
    }

    fn device_mut(&self) -> RefMut<'_, dyn BlockDevice> {
        self.device.borrow_mut()
    }

    /// The volume directory.
    pub fn root(&self) -> io::Result<Directory> {
        self.volume_format()?;
        Ok(Directory::new(self.device.clone(), VOLUME_KEY_BLOCK))
    }

    /// Write a hex dump of every block.
    pub fn dump(&self, writer: &mut dyn Write) -> io::Result<()> {
        self.device_ref().dump(writer)
    }

    /// Install an updated bitmap and persist it.
    fn commit_bitmap(&mut self, bitmap: VolumeBitMap) -> io::Result<()> {
        let start = self.volume_format()?.bitmap_start;
        bitmap.write(&mut *self.device_mut(), start)?;
        self.bitmap = Some(bitmap);
        Ok(())
    }

    /// Resolve the directory holding `path` and return it along with the
    /// directory's own path and the final name component.
    fn locate<'a>(&self, path: &'a str) -> io::Result<(Directory, &'a str, &'a str)> {
        let (parent, name) = split_path(path);
        if name.is_empty() {
            return Err(DiskError::FilenameInvalid.into());
        }
        Ok((self.root()?.resolve_path(parent)?, parent, name))
    }

    /// Find a slot for a new entry, growing a subdirectory if needed.
    /// Returns the slot and whether the directory grew.
    fn claim_slot(&self, directory: &Directory, bitmap: &mut VolumeBitMap) -> io::Result<(EntryPosition, bool)> {
        match directory.free_slot()? {
            Some(position) => Ok((position, false)),
            None => Ok((directory.extend(bitmap)?, true)),
        }
    }

    /// Account for a continuation block added to the subdirectory at
    /// `path` in the entry describing it.
    fn grow_directory_entry(&self, path: &str) -> io::Result<()> {
        let (parent, name) = split_path(path);
        let directory = self.root()?.resolve_path(parent)?;
        let mut entry = directory
            .find(name)?
            .ok_or_else(|| DiskError::NotFound.to_io_error())?;
        entry.descriptor.blocks_used += 1;
        entry.descriptor.eof += BLOCK_SIZE as u32;
        directory.write_entry(&entry.position, &entry.descriptor)
    }

    fn describe(entry: &DirectoryEntry, directory_path: &str) -> Descriptor {
        let d = &entry.descriptor;
        let name = d.name();
        let directory_path = directory_path.trim_matches('/');
        let full_name = if directory_path.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", directory_path, name)
        };
        Descriptor {
            name,
            full_name,
            blocks: d.blocks_used as usize,
            length: d.eof as usize,
            file_type: d.file_type,
            aux_type: d.aux_type,
            locked: d.access.is_locked(),
            is_directory: d.is_directory(),
            created: d.creation.to_naive(),
            modified: d.last_mod.to_naive(),
        }
    }

    fn check_writable(&self) -> io::Result<()> {
        self.device_ref().check_writability()?;
        self.volume_format()?;
        Ok(())
    }
}

impl Operator for ProDOS {
    fn name(&self) -> &'static str {
        "prodos"
    }

    fn has_subdirectories(&self) -> bool {
        true
    }

    fn catalog(&self, subdirectory: &str) -> io::Result<Vec<Descriptor>> {
        let directory = self.root()?.resolve_path(subdirectory)?;
        directory
            .walk()
            .map(|entry| entry.map(|e| Self::describe(&e, subdirectory)))
            .collect()
    }

    fn get_file(&self, name: &str) -> io::Result<FileInfo> {
        let (directory, parent, filename) = self.locate(name)?;
        let entry = directory
            .find(filename)?
            .ok_or_else(|| DiskError::NotFound.to_io_error())?;
        if entry.descriptor.is_directory() {
            return Err(DiskError::IsDirectory.into());
        }
        let data = read_tree(&*self.device_ref(), &entry.descriptor)?;
        Ok(FileInfo {
            descriptor: Self::describe(&entry, parent),
            data,
        })
    }

    fn put_file(&mut self, file: &FileInfo, overwrite: bool) -> io::Result<bool> {
        self.check_writable()?;
        let (directory, parent, filename) = self.locate(file.path())?;
        let name = normalize_name(filename)?;
        let existing = directory.find(&name)?;
        if let Some(ref entry) = existing {
            if entry.descriptor.is_directory() {
                return Err(DiskError::IsDirectory.into());
            }
            if !overwrite {
                return Err(DiskError::FileExists.into());
            }
        }
        let plan = StoragePlan::for_length(file.data.len())?;

        // Every allocation happens on a copy of the bitmap, so running out
        // of space leaves the volume untouched.
        let mut bitmap = self.bitmap()?.clone();
        if let Some(ref entry) = existing {
            for block in occupied_blocks(&*self.device_ref(), &entry.descriptor)? {
                bitmap.mark_free(block)?;
            }
        }
        let blocks = bitmap.allocate(plan.total_blocks())?;
        let (position, grew) = match existing {
            Some(ref entry) => (entry.position, false),
            None => self.claim_slot(&directory, &mut bitmap)?,
        };

        let key_pointer = write_tree(&mut *self.device_mut(), &plan, &blocks, &file.data)?;
        let now = DateTime::now();
        let mut descriptor = FileDescriptor {
            storage_type: plan.storage_type,
            file_type: file.descriptor.file_type,
            key_pointer,
            blocks_used: plan.total_blocks() as u16,
            eof: file.data.len() as u32,
            creation: match (&existing, file.descriptor.created) {
                (_, Some(created)) => created.into(),
                (Some(entry), None) => entry.descriptor.creation,
                (None, None) => now,
            },
            version: 0,
            min_version: 0,
            access: if file.descriptor.locked {
                Access::LOCKED
            } else {
                Access::UNLOCKED
            },
            aux_type: file.descriptor.aux_type,
            last_mod: file.descriptor.modified.map(DateTime::from).unwrap_or(now),
            header_pointer: directory.key_block(),
            ..Default::default()
        };
        descriptor.set_name(&name);
        directory.write_entry(&position, &descriptor)?;
        if existing.is_none() {
            directory.adjust_file_count(1)?;
        }
        if grew {
            self.grow_directory_entry(parent)?;
        }
        debug!(
            "put {} ({} bytes, {:?}, {} blocks, key {})",
            file.path(),
            file.data.len(),
            plan.storage_type,
            plan.total_blocks(),
            key_pointer
        );
        self.commit_bitmap(bitmap)?;
        Ok(existing.is_some())
    }

    fn delete(&mut self, name: &str) -> io::Result<bool> {
        self.check_writable()?;
        let (directory, _, filename) = self.locate(name)?;
        let mut entry = match directory.find(filename)? {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let blocks = if entry.descriptor.is_directory() {
            let subdirectory = directory.subdirectory(&entry)?;
            if !subdirectory.is_empty()? {
                return Err(DiskError::DirectoryNotEmpty.into());
            }
            subdirectory.blocks()?
        } else {
            occupied_blocks(&*self.device_ref(), &entry.descriptor)?
        };

        entry.descriptor.storage_type = StorageType::Deleted;
        directory.write_entry(&entry.position, &entry.descriptor)?;
        directory.adjust_file_count(-1)?;

        let mut bitmap = self.bitmap()?.clone();
        for &block in &blocks {
            bitmap.mark_free(block)?;
        }
        debug!("deleted {} ({} blocks freed)", name, blocks.len());
        self.commit_bitmap(bitmap)?;
        Ok(true)
    }

    fn write(&self, writer: &mut dyn Write) -> io::Result<usize> {
        self.device_ref().write_to(writer)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.device_mut().flush()
    }

    fn create_directory(&mut self, path: &str) -> io::Result<()> {
        self.check_writable()?;
        let (directory, parent, filename) = self.locate(path)?;
        let name = normalize_name(filename)?;
        if directory.find(&name)?.is_some() {
            return Err(DiskError::FileExists.into());
        }

        let mut bitmap = self.bitmap()?.clone();
        let key_block = bitmap.allocate(1)?[0];
        let (position, grew) = self.claim_slot(&directory, &mut bitmap)?;

        let now = DateTime::now();
        let header = SubdirectoryHeader::new(&name, position.block, position.entry_number, now);
        write_record(&mut *self.device_mut(), key_block, &SubdirectoryKeyBlock::new(header, 0))?;

        let mut descriptor = FileDescriptor {
            storage_type: StorageType::Subdirectory,
            file_type: FileType::DIR,
            key_pointer: key_block,
            blocks_used: 1,
            eof: BLOCK_SIZE as u32,
            creation: now,
            access: Access::UNLOCKED,
            last_mod: now,
            header_pointer: directory.key_block(),
            ..Default::default()
        };
        descriptor.set_name(&name);
        directory.write_entry(&position, &descriptor)?;
        directory.adjust_file_count(1)?;
        if grew {
            self.grow_directory_entry(parent)?;
        }
        debug!("created directory {} at block {}", path, key_block);
        self.commit_bitmap(bitmap)
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        self.check_writable()?;
        let (directory, parent, filename) = self.locate(from)?;
        let mut entry = directory
            .find(filename)?
            .ok_or_else(|| DiskError::NotFound.to_io_error())?;

        // Renaming never moves an entry between directories.
        let (to_parent, to_name) = split_path(to);
        let to_parent = to_parent.trim_matches('/');
        if !to_parent.is_empty() && !to_parent.eq_ignore_ascii_case(parent.trim_matches('/')) {
            return Err(DiskError::Unsupported.into());
        }
        let name = normalize_name(to_name)?;
        if let Some(other) = directory.find(&name)? {
            if other.position != entry.position {
                return Err(DiskError::FileExists.into());
            }
        }

        if entry.descriptor.is_directory() {
            let subdirectory = directory.subdirectory(&entry)?;
            let mut key: SubdirectoryKeyBlock =
                read_record(&*self.device_ref(), subdirectory.key_block())?;
            key.header.set_name(&name);
            write_record(&mut *self.device_mut(), subdirectory.key_block(), &key)?;
        }
        entry.descriptor.set_name(&name);
        directory.write_entry(&entry.position, &entry.descriptor)
    }

    fn validate(&self) -> io::Result<Vec<ValidationError>> {
        validation::validate(self)
    }
}

impl fmt::Debug for ProDOS {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.volume_name() {
            Ok(name) => writeln!(f, "/{}", name)?,
            Err(e) => writeln!(f, "Cannot read volume directory: {}", e)?,
        }
        writeln!(f, "format: {:?}", self.format)?;
        match self.bitmap {
            Some(ref bitmap) => write!(f, "{:?}", bitmap),
            None => writeln!(f, "no bitmap"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::format::FLOPPY_140K;
    use crate::disk::record::{ExtendedKeyBlock, ForkEntry, IndexBlock};

    fn volume() -> ProDOS {
        let mut prodos = ProDOS::open_memory(280).unwrap();
        prodos.format("test.disk").unwrap();
        prodos
    }

    fn pattern(length: usize, seed: usize) -> Vec<u8> {
        (0..length).map(|i| ((i + seed) * 13 % 256) as u8).collect()
    }

    #[test]
    fn test_format() {
        let prodos = volume();
        assert_eq!(prodos.volume_name().unwrap(), "TEST.DISK");
        assert_eq!(*prodos.volume_format().unwrap(), FLOPPY_140K);
        assert_eq!(prodos.free_blocks().unwrap(), FLOPPY_140K.data_blocks());
        assert!(prodos.catalog("").unwrap().is_empty());
        assert!(prodos.validate().unwrap().is_empty());

        let reopened = ProDOS::from_device(prodos.device());
        assert_eq!(reopened.volume_name().unwrap(), "TEST.DISK");
        assert_eq!(reopened.bitmap().unwrap(), prodos.bitmap().unwrap());
    }

    #[test]
    fn test_unformatted() {
        let mut prodos = ProDOS::open_memory(280).unwrap();
        assert!(prodos.catalog("").unwrap_err() == DiskError::Unformatted);
        let file = FileInfo::new("HELLO", vec![1]);
        assert!(prodos.put_file(&file, false).unwrap_err() == DiskError::Unformatted);
        assert!(prodos.format("1BAD").unwrap_err() == DiskError::FilenameInvalid);
        assert!(ProDOS::open_memory(6).unwrap().format("TINY").unwrap_err() == DiskError::InvalidLayout);
    }

    #[test]
    fn test_put_twice() {
        let mut prodos = volume();
        let first = FileInfo::new("HELLO", b"HELLO, WORLD".to_vec());
        assert_eq!(prodos.put_file(&first, false).unwrap(), false);
        let second = FileInfo::new("HELLO", pattern(1000, 1));
        assert!(prodos.put_file(&second, false).unwrap_err() == DiskError::FileExists);
        assert_eq!(prodos.put_file(&second, true).unwrap(), true);

        let catalog = prodos.catalog("").unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "HELLO");
        assert_eq!(catalog[0].length, 1000);
        assert_eq!(catalog[0].blocks, 3);
        assert_eq!(prodos.get_file("hello").unwrap().data, second.data);
        assert_eq!(prodos.root().unwrap().file_count().unwrap(), 1);
        assert!(prodos.validate().unwrap().is_empty());
    }

    #[test]
    fn test_file_metadata() {
        let mut prodos = volume();
        let mut file = FileInfo::new("startup", vec![0xA9, 0x00, 0x60]).with_type(FileType::BIN, 0x0300);
        file.descriptor.locked = true;
        let created = chrono::NaiveDate::from_ymd_opt(1987, 6, 5)
            .unwrap()
            .and_hms_opt(4, 3, 0)
            .unwrap();
        file.descriptor.created = Some(created);
        prodos.put_file(&file, false).unwrap();

        let read = prodos.get_file("STARTUP").unwrap();
        assert_eq!(read.descriptor.name, "STARTUP");
        assert_eq!(read.descriptor.file_type, FileType::BIN);
        assert_eq!(read.descriptor.aux_type, 0x0300);
        assert!(read.descriptor.locked);
        assert_eq!(read.descriptor.created, Some(created));
        assert_eq!(read.data, vec![0xA9, 0x00, 0x60]);
    }

    #[test]
    fn test_storage_types() {
        let mut prodos = ProDOS::open_memory(1600).unwrap();
        prodos.format("BIG").unwrap();
        for (name, length) in &[("EMPTY", 0), ("SEED", 512), ("SAP", 40_000), ("TREE", 300_000)] {
            let file = FileInfo::new(name, pattern(*length, length % 7));
            prodos.put_file(&file, false).unwrap();
            assert_eq!(prodos.get_file(name).unwrap().data, file.data, "{}", name);
        }
        let catalog = prodos.catalog("").unwrap();
        let blocks: Vec<usize> = catalog.iter().map(|d| d.blocks).collect();
        assert_eq!(blocks, vec![1, 1, 80, 586 + 1 + 3]);
        assert!(prodos.validate().unwrap().is_empty());
    }

    #[test]
    fn test_delete_frees_blocks() {
        let mut prodos = volume();
        let free = prodos.free_blocks().unwrap();
        prodos.put_file(&FileInfo::new("A", pattern(5000, 0)), false).unwrap();
        assert_eq!(prodos.free_blocks().unwrap(), free - 11);
        assert_eq!(prodos.delete("A").unwrap(), true);
        assert_eq!(prodos.free_blocks().unwrap(), free);
        assert_eq!(prodos.delete("A").unwrap(), false);
        assert!(prodos.catalog("").unwrap().is_empty());
        assert_eq!(prodos.root().unwrap().file_count().unwrap(), 0);

        // The deleted slot keeps its name and is reused.
        let deleted = prodos.root().unwrap().walk().include_deleted().next().unwrap().unwrap();
        assert_eq!(deleted.name(), "A");
        prodos.put_file(&FileInfo::new("B", vec![1]), false).unwrap();
        let reused = prodos.root().unwrap().find("B").unwrap().unwrap();
        assert_eq!(reused.position, deleted.position);
        assert!(prodos.validate().unwrap().is_empty());
    }

    #[test]
    fn test_disk_full() {
        let mut prodos = volume();
        let before = prodos.bitmap().unwrap().clone();
        let file = FileInfo::new("HUGE", vec![0u8; 274 * 512]);
        assert!(prodos.put_file(&file, false).unwrap_err() == DiskError::DiskFull);
        assert_eq!(prodos.bitmap().unwrap(), &before);
        assert!(prodos.catalog("").unwrap().is_empty());
        assert!(prodos.validate().unwrap().is_empty());
    }

    #[test]
    fn test_volume_directory_full() {
        let mut prodos = volume();
        for i in 0..51 {
            let file = FileInfo::new(&format!("F{}", i), vec![]);
            prodos.put_file(&file, false).unwrap();
        }
        let file = FileInfo::new("ONE.MORE", vec![]);
        assert!(prodos.put_file(&file, false).unwrap_err() == DiskError::DirectoryFull);
        assert_eq!(prodos.catalog("").unwrap().len(), 51);
        assert!(prodos.validate().unwrap().is_empty());
    }

    #[test]
    fn test_subdirectories() {
        let mut prodos = volume();
        prodos.create_directory("DOCS").unwrap();
        prodos.create_directory("DOCS/NOTES").unwrap();
        assert!(prodos.create_directory("docs").unwrap_err() == DiskError::FileExists);
        prodos
            .put_file(&FileInfo::new("DOCS/NOTES/TODO", b"write tests".to_vec()), false)
            .unwrap();

        let root = prodos.catalog("").unwrap();
        assert_eq!(root.len(), 1);
        assert!(root[0].is_directory);
        assert_eq!(root[0].file_type, FileType::DIR);

        let notes = prodos.catalog("DOCS/NOTES").unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].full_name, "DOCS/NOTES/TODO");
        assert_eq!(prodos.catalog("/").unwrap()[0].full_name, "DOCS");
        assert_eq!(prodos.catalog("/DOCS/NOTES/").unwrap(), notes);
        assert_eq!(prodos.get_file("docs/notes/todo").unwrap().data, b"write tests");

        assert!(prodos.catalog("DOCS/MISSING").unwrap_err() == DiskError::NotFound);
        assert!(prodos.catalog("DOCS/NOTES/TODO").unwrap_err() == DiskError::NotADirectory);
        assert!(prodos.get_file("DOCS").unwrap_err() == DiskError::IsDirectory);
        let replace = FileInfo::new("DOCS", vec![]);
        assert!(prodos.put_file(&replace, true).unwrap_err() == DiskError::IsDirectory);

        assert!(prodos.delete("DOCS").unwrap_err() == DiskError::DirectoryNotEmpty);
        assert!(prodos.validate().unwrap().is_empty());
        assert!(prodos.delete("DOCS/NOTES/TODO").unwrap());
        assert!(prodos.delete("DOCS/NOTES").unwrap());
        assert!(prodos.delete("DOCS").unwrap());
        assert_eq!(prodos.free_blocks().unwrap(), FLOPPY_140K.data_blocks());
        assert!(prodos.validate().unwrap().is_empty());
    }

    #[test]
    fn test_subdirectory_grows() {
        let mut prodos = volume();
        prodos.create_directory("MANY").unwrap();
        for i in 0..20 {
            prodos
                .put_file(&FileInfo::new(&format!("MANY/F{}", i), vec![i as u8]), false)
                .unwrap();
        }
        let entry = prodos.root().unwrap().find("MANY").unwrap().unwrap();
        assert_eq!(entry.descriptor.blocks_used, 2);
        assert_eq!(entry.descriptor.eof, 1024);
        assert_eq!(prodos.catalog("MANY").unwrap().len(), 20);
        assert_eq!(prodos.get_file("MANY/F19").unwrap().data, vec![19]);
        assert!(prodos.validate().unwrap().is_empty());
    }

    #[test]
    fn test_rename() {
        let mut prodos = volume();
        prodos.put_file(&FileInfo::new("OLD", vec![1, 2]), false).unwrap();
        prodos.put_file(&FileInfo::new("OTHER", vec![3]), false).unwrap();
        prodos.create_directory("DIR").unwrap();

        prodos.rename("OLD", "new").unwrap();
        assert_eq!(prodos.get_file("NEW").unwrap().data, vec![1, 2]);
        assert!(prodos.get_file("OLD").unwrap_err() == DiskError::NotFound);
        assert!(prodos.rename("NEW", "OTHER").unwrap_err() == DiskError::FileExists);
        assert!(prodos.rename("NEW", "9LIVES").unwrap_err() == DiskError::FilenameInvalid);
        assert!(prodos.rename("NEW", "DIR/NEW").unwrap_err() == DiskError::Unsupported);

        prodos.put_file(&FileInfo::new("DIR/A", vec![4]), false).unwrap();
        prodos.rename("DIR/A", "dir/B").unwrap();
        prodos.rename("/DIR/B", "/Dir/C").unwrap();
        assert_eq!(prodos.get_file("DIR/C").unwrap().data, vec![4]);

        prodos.rename("DIR", "FOLDER").unwrap();
        assert_eq!(prodos.root().unwrap().resolve_path("FOLDER").unwrap().name().unwrap(), "FOLDER");
        assert!(prodos.validate().unwrap().is_empty());
    }

    /// Turn HELLO into an extended file with a sapling data fork of two
    /// blocks and a seedling resource fork.
    fn make_extended(prodos: &mut ProDOS) {
        let root = prodos.root().unwrap();
        let mut entry = root.find("HELLO").unwrap().unwrap();
        let mut bitmap = prodos.bitmap().unwrap().clone();
        for block in occupied_blocks(&*prodos.device_ref(), &entry.descriptor).unwrap() {
            bitmap.mark_free(block).unwrap();
        }
        let blocks = bitmap.allocate(5).unwrap();
        {
            let mut device = prodos.device_mut();
            device.write_block(blocks[1], &[0x11; BLOCK_SIZE]).unwrap();
            device.write_block(blocks[2], &[0x22; BLOCK_SIZE]).unwrap();
            device.write_block(blocks[4], &[0x33; BLOCK_SIZE]).unwrap();
            let mut index = IndexBlock::new();
            index.set(0, blocks[1]);
            index.set(1, blocks[2]);
            write_record(&mut *device, blocks[3], &index).unwrap();
            let key = ExtendedKeyBlock {
                data: ForkEntry {
                    storage_type: StorageType::Sapling,
                    key_pointer: blocks[3],
                    blocks_used: 3,
                    eof: 1000,
                },
                resource: ForkEntry {
                    storage_type: StorageType::Seedling,
                    key_pointer: blocks[4],
                    blocks_used: 1,
                    eof: 12,
                },
            };
            write_record(&mut *device, blocks[0], &key).unwrap();
        }
        entry.descriptor.storage_type = StorageType::Extended;
        entry.descriptor.key_pointer = blocks[0];
        entry.descriptor.blocks_used = 5;
        entry.descriptor.eof = BLOCK_SIZE as u32;
        root.write_entry(&entry.position, &entry.descriptor).unwrap();
        prodos.commit_bitmap(bitmap).unwrap();
    }

    #[test]
    fn test_extended_file() {
        let mut prodos = volume();
        let free = prodos.free_blocks().unwrap();
        prodos.put_file(&FileInfo::new("HELLO", vec![1; 10]), false).unwrap();
        make_extended(&mut prodos);
        assert_eq!(prodos.free_blocks().unwrap(), free - 5);
        assert!(prodos.validate().unwrap().is_empty());
        assert!(prodos.get_file("HELLO").unwrap_err() == DiskError::Unsupported);

        assert!(prodos.delete("HELLO").unwrap());
        assert_eq!(prodos.free_blocks().unwrap(), free);
        assert!(prodos.validate().unwrap().is_empty());

        // Overwriting replaces both forks with an ordinary file.
        prodos.put_file(&FileInfo::new("HELLO", vec![1; 10]), false).unwrap();
        make_extended(&mut prodos);
        let file = FileInfo::new("HELLO", b"PLAIN".to_vec());
        assert!(prodos.put_file(&file, true).unwrap());
        assert_eq!(prodos.get_file("HELLO").unwrap().data, b"PLAIN");
        assert_eq!(prodos.free_blocks().unwrap(), free - 1);
        assert!(prodos.validate().unwrap().is_empty());
    }

    #[test]
    fn test_read_only() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut prodos = ProDOS::create(file.path(), 280, false).unwrap();
            prodos.format("RO").unwrap();
            prodos.put_file(&FileInfo::new("KEEP", vec![7; 10]), false).unwrap();
            prodos.flush().unwrap();
        }
        let mut prodos = ProDOS::open(file.path(), false).unwrap();
        assert_eq!(prodos.get_file("KEEP").unwrap().data, vec![7; 10]);
        let write = FileInfo::new("MORE", vec![]);
        assert!(prodos.put_file(&write, false).unwrap_err() == DiskError::ReadOnly);
        assert!(prodos.delete("KEEP").unwrap_err() == DiskError::ReadOnly);

        let mut image = vec![];
        assert_eq!(prodos.write(&mut image).unwrap(), 280 * BLOCK_SIZE);
    }

    #[test]
    fn test_image_from_bytes() {
        let mut original = volume();
        original.put_file(&FileInfo::new("PIPED", pattern(700, 3)), false).unwrap();
        let mut bytes = vec![];
        original.write(&mut bytes).unwrap();

        let copy = ProDOS::new(Image::from_bytes(bytes)).unwrap();
        assert_eq!(copy.volume_name().unwrap(), "TEST.DISK");
        assert_eq!(copy.get_file("PIPED").unwrap().data, pattern(700, 3));
        assert_eq!(copy.bitmap().unwrap(), original.bitmap().unwrap());
        assert!(copy.validate().unwrap().is_empty());
    }
}
