//! Fixed-layout ProDOS records
//!
//! Every on-disk structure is a fixed number of bytes at fixed offsets.
//! Each record type can be parsed from and rendered to its exact byte
//! layout, and can report every rule violation it contains without failing.

use std::fmt;
use std::io;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use log::warn;

use crate::disk::block::{BlockDevice, BLOCK_SIZE};
use crate::disk::error::DiskError;
use crate::disk::validation::ValidationError;

/// A fixed-size binary record.
pub trait Record: Sized {
    /// The exact encoded length of this record in bytes.
    const SIZE: usize;

    /// Parse the record from a buffer of exactly `SIZE` bytes.
    fn parse(bytes: &[u8]) -> Self;

    /// Render the record into a buffer of exactly `SIZE` bytes.
    fn to_bytes(&self, bytes: &mut [u8]);

    /// Return every rule violation found in this record.
    fn validate(&self) -> Vec<ValidationError> {
        vec![]
    }

    fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::SIZE];
        self.to_bytes(&mut bytes);
        bytes
    }

    fn decode(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(DiskError::LengthMismatch.into());
        }
        Ok(Self::parse(bytes))
    }
}

/// Decode a block-sized record from the device.
pub fn read_record<R: Record>(device: &dyn BlockDevice, block: u16) -> io::Result<R> {
    R::decode(device.block(block)?)
}

/// Encode a block-sized record onto the device.
pub fn write_record<R: Record>(device: &mut dyn BlockDevice, block: u16, record: &R) -> io::Result<()> {
    let mut buffer = [0u8; BLOCK_SIZE];
    record.to_bytes(&mut buffer[..R::SIZE]);
    device.write_block(block, &buffer)
}

#[inline]
pub(crate) fn get_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
pub(crate) fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

// DateTime

/// A packed ProDOS timestamp: a little-endian date word holding
/// `year << 9 | month << 5 | day`, followed by the minute and hour bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateTime {
    pub date: u16,
    pub minute: u8,
    pub hour: u8,
}

impl DateTime {
    pub fn new(year: u8, month: u8, day: u8, hour: u8, minute: u8) -> DateTime {
        DateTime {
            date: ((year as u16 & 0x7F) << 9) | ((month as u16 & 0x0F) << 5) | (day as u16 & 0x1F),
            minute,
            hour,
        }
    }

    pub fn now() -> DateTime {
        chrono::Local::now().naive_local().into()
    }

    #[inline]
    pub fn year(&self) -> u8 {
        (self.date >> 9) as u8
    }

    #[inline]
    pub fn month(&self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    #[inline]
    pub fn day(&self) -> u8 {
        (self.date & 0x1F) as u8
    }

    /// An all-zero timestamp means no date was recorded.
    pub fn is_empty(&self) -> bool {
        self.date == 0 && self.minute == 0 && self.hour == 0
    }

    /// Interpret the two-digit year as 1940-2039.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        if self.is_empty() {
            return None;
        }
        let year = match self.year() {
            y @ 0..=39 => 2000 + y as i32,
            y => 1900 + y as i32,
        };
        NaiveDate::from_ymd_opt(year, self.month() as u32, self.day() as u32)?
            .and_hms_opt(self.hour as u32, self.minute as u32, 0)
    }
}

impl From<NaiveDateTime> for DateTime {
    fn from(time: NaiveDateTime) -> DateTime {
        DateTime::new(
            (time.year().rem_euclid(100)) as u8,
            time.month() as u8,
            time.day() as u8,
            time.hour() as u8,
            time.minute() as u8,
        )
    }
}

impl Record for DateTime {
    const SIZE: usize = 4;

    fn parse(bytes: &[u8]) -> DateTime {
        DateTime {
            date: get_u16(bytes, 0),
            minute: bytes[2],
            hour: bytes[3],
        }
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        put_u16(bytes, 0, self.date);
        bytes[2] = self.minute;
        bytes[3] = self.hour;
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = vec![];
        if self.hour >= 24 {
            errors.push(ValidationError::InvalidHour(self.hour));
        }
        if self.minute >= 60 {
            errors.push(ValidationError::InvalidMinute(self.minute));
        }
        errors
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_naive() {
            Some(time) => write!(f, "{}", time.format("%d-%b-%y %H:%M")),
            None if self.is_empty() => f.write_str("<NO DATE>"),
            None => write!(f, "<BAD DATE {:04x}>", self.date),
        }
    }
}

// Access

/// The access permission bitmask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Access(pub u8);

impl Access {
    pub const READ: u8 = 0x01;
    pub const WRITE: u8 = 0x02;
    pub const INVISIBLE: u8 = 0x04;
    pub const BACKUP: u8 = 0x20;
    pub const RENAME: u8 = 0x40;
    pub const DESTROY: u8 = 0x80;

    pub const LOCKED: Access = Access(Self::READ | Self::BACKUP);
    pub const UNLOCKED: Access =
        Access(Self::READ | Self::WRITE | Self::BACKUP | Self::RENAME | Self::DESTROY);

    #[inline]
    pub fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// A file is locked when it can be neither written, renamed, nor
    /// destroyed.
    pub fn is_locked(&self) -> bool {
        !self.has(Self::WRITE) && !self.has(Self::RENAME) && !self.has(Self::DESTROY)
    }
}

impl Default for Access {
    fn default() -> Access {
        Access::UNLOCKED
    }
}

// StorageType

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StorageType {
    #[default]
    Deleted,
    Seedling,
    Sapling,
    Tree,
    Pascal,
    Extended,
    Subdirectory,
    SubdirectoryHeader,
    VolumeDirectoryHeader,
    Unknown(u8),
}

impl StorageType {
    pub fn from_nibble(nibble: u8) -> StorageType {
        match nibble & 0x0F {
            0x0 => StorageType::Deleted,
            0x1 => StorageType::Seedling,
            0x2 => StorageType::Sapling,
            0x3 => StorageType::Tree,
            0x4 => StorageType::Pascal,
            0x5 => StorageType::Extended,
            0xD => StorageType::Subdirectory,
            0xE => StorageType::SubdirectoryHeader,
            0xF => StorageType::VolumeDirectoryHeader,
            n => StorageType::Unknown(n),
        }
    }

    pub fn to_nibble(&self) -> u8 {
        match *self {
            StorageType::Deleted => 0x0,
            StorageType::Seedling => 0x1,
            StorageType::Sapling => 0x2,
            StorageType::Tree => 0x3,
            StorageType::Pascal => 0x4,
            StorageType::Extended => 0x5,
            StorageType::Subdirectory => 0xD,
            StorageType::SubdirectoryHeader => 0xE,
            StorageType::VolumeDirectoryHeader => 0xF,
            StorageType::Unknown(n) => n & 0x0F,
        }
    }

    /// Storage types whose key pointer leads to file data.
    pub fn is_file(&self) -> bool {
        matches!(
            self,
            StorageType::Seedling | StorageType::Sapling | StorageType::Tree
        )
    }
}

/// Split the leading storage-type/name-length byte.
fn parse_type_and_length(byte: u8) -> (StorageType, u8) {
    (StorageType::from_nibble(byte >> 4), byte & 0x0F)
}

fn type_and_length(storage_type: StorageType, name_length: u8) -> u8 {
    (storage_type.to_nibble() << 4) | (name_length & 0x0F)
}

// FileType

/// The ProDOS file type byte.  Only the common types are named.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FileType {
    TXT,
    #[default]
    BIN,
    DIR,
    INT,
    BAS,
    VAR,
    REL,
    SYS,
    Unknown(u8),
}

impl FileType {
    pub fn from_byte(byte: u8) -> FileType {
        match byte {
            0x04 => FileType::TXT,
            0x06 => FileType::BIN,
            0x0F => FileType::DIR,
            0xFA => FileType::INT,
            0xFC => FileType::BAS,
            0xFD => FileType::VAR,
            0xFE => FileType::REL,
            0xFF => FileType::SYS,
            b => FileType::Unknown(b),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match *self {
            FileType::TXT => 0x04,
            FileType::BIN => 0x06,
            FileType::DIR => 0x0F,
            FileType::INT => 0xFA,
            FileType::BAS => 0xFC,
            FileType::VAR => 0xFD,
            FileType::REL => 0xFE,
            FileType::SYS => 0xFF,
            FileType::Unknown(b) => b,
        }
    }

    /// Parse a type mnemonic such as "BIN", or a hex byte such as "$C1".
    pub fn from_string(string: &str) -> Option<FileType> {
        let string = string.to_uppercase();
        match string.as_str() {
            "TXT" => Some(FileType::TXT),
            "BIN" => Some(FileType::BIN),
            "DIR" => Some(FileType::DIR),
            "INT" => Some(FileType::INT),
            "BAS" => Some(FileType::BAS),
            "VAR" => Some(FileType::VAR),
            "REL" => Some(FileType::REL),
            "SYS" => Some(FileType::SYS),
            s => {
                let hex = s.strip_prefix('$').or_else(|| s.strip_prefix("0X"))?;
                u8::from_str_radix(hex, 16).ok().map(FileType::from_byte)
            }
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileType::TXT => f.write_str("TXT"),
            FileType::BIN => f.write_str("BIN"),
            FileType::DIR => f.write_str("DIR"),
            FileType::INT => f.write_str("INT"),
            FileType::BAS => f.write_str("BAS"),
            FileType::VAR => f.write_str("VAR"),
            FileType::REL => f.write_str("REL"),
            FileType::SYS => f.write_str("SYS"),
            FileType::Unknown(b) => write!(f, "${:02X}", b),
        }
    }
}

// Names

pub const NAME_SIZE: usize = 15;

fn name_bytes(name: &str) -> (u8, [u8; NAME_SIZE]) {
    let mut buffer = [0u8; NAME_SIZE];
    let length = name.len().min(NAME_SIZE);
    buffer[..length].copy_from_slice(&name.as_bytes()[..length]);
    (length as u8, buffer)
}

fn name_string(name: &[u8; NAME_SIZE], length: u8) -> String {
    let bytes = &name[..(length as usize).min(NAME_SIZE)];
    if !bytes.is_ascii() {
        warn!("non-ASCII name bytes: {:02x?}", bytes);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_name(bytes: &[u8]) -> [u8; NAME_SIZE] {
    let mut name = [0u8; NAME_SIZE];
    name.copy_from_slice(&bytes[..NAME_SIZE]);
    name
}

// FileDescriptor

const ENTRY_NAME_OFFSET: usize = 0x01;
const ENTRY_FILE_TYPE_OFFSET: usize = 0x10;
const ENTRY_KEY_POINTER_OFFSET: usize = 0x11;
const ENTRY_BLOCKS_USED_OFFSET: usize = 0x13;
const ENTRY_EOF_OFFSET: usize = 0x15;
const ENTRY_CREATION_OFFSET: usize = 0x18;
const ENTRY_VERSION_OFFSET: usize = 0x1C;
const ENTRY_MIN_VERSION_OFFSET: usize = 0x1D;
const ENTRY_ACCESS_OFFSET: usize = 0x1E;
const ENTRY_AUX_TYPE_OFFSET: usize = 0x1F;
const ENTRY_LAST_MOD_OFFSET: usize = 0x21;
const ENTRY_HEADER_POINTER_OFFSET: usize = 0x25;

/// The largest end-of-file position a three-byte EOF can hold.
pub const MAX_EOF: u32 = 0x00FF_FFFF;

/// One 39-byte directory entry describing a file or subdirectory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileDescriptor {
    pub storage_type: StorageType,
    pub name_length: u8,
    pub name: [u8; NAME_SIZE],
    pub file_type: FileType,
    pub key_pointer: u16,
    pub blocks_used: u16,
    /// Stored in three bytes.
    pub eof: u32,
    pub creation: DateTime,
    pub version: u8,
    pub min_version: u8,
    pub access: Access,
    pub aux_type: u16,
    pub last_mod: DateTime,
    pub header_pointer: u16,
}

impl FileDescriptor {
    pub fn name(&self) -> String {
        name_string(&self.name, self.name_length)
    }

    /// Store an already-validated name.
    pub fn set_name(&mut self, name: &str) {
        let (length, buffer) = name_bytes(name);
        self.name_length = length;
        self.name = buffer;
    }

    /// True for any slot holding a live file or subdirectory.
    pub fn is_active(&self) -> bool {
        self.storage_type != StorageType::Deleted
    }

    pub fn is_directory(&self) -> bool {
        self.storage_type == StorageType::Subdirectory
    }
}

impl Record for FileDescriptor {
    const SIZE: usize = 39;

    fn parse(bytes: &[u8]) -> FileDescriptor {
        let (storage_type, name_length) = parse_type_and_length(bytes[0]);
        FileDescriptor {
            storage_type,
            name_length,
            name: parse_name(&bytes[ENTRY_NAME_OFFSET..]),
            file_type: FileType::from_byte(bytes[ENTRY_FILE_TYPE_OFFSET]),
            key_pointer: get_u16(bytes, ENTRY_KEY_POINTER_OFFSET),
            blocks_used: get_u16(bytes, ENTRY_BLOCKS_USED_OFFSET),
            eof: u32::from_le_bytes([
                bytes[ENTRY_EOF_OFFSET],
                bytes[ENTRY_EOF_OFFSET + 1],
                bytes[ENTRY_EOF_OFFSET + 2],
                0,
            ]),
            creation: DateTime::parse(&bytes[ENTRY_CREATION_OFFSET..ENTRY_CREATION_OFFSET + 4]),
            version: bytes[ENTRY_VERSION_OFFSET],
            min_version: bytes[ENTRY_MIN_VERSION_OFFSET],
            access: Access(bytes[ENTRY_ACCESS_OFFSET]),
            aux_type: get_u16(bytes, ENTRY_AUX_TYPE_OFFSET),
            last_mod: DateTime::parse(&bytes[ENTRY_LAST_MOD_OFFSET..ENTRY_LAST_MOD_OFFSET + 4]),
            header_pointer: get_u16(bytes, ENTRY_HEADER_POINTER_OFFSET),
        }
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = type_and_length(self.storage_type, self.name_length);
        bytes[ENTRY_NAME_OFFSET..ENTRY_NAME_OFFSET + NAME_SIZE].copy_from_slice(&self.name);
        bytes[ENTRY_FILE_TYPE_OFFSET] = self.file_type.to_byte();
        put_u16(bytes, ENTRY_KEY_POINTER_OFFSET, self.key_pointer);
        put_u16(bytes, ENTRY_BLOCKS_USED_OFFSET, self.blocks_used);
        bytes[ENTRY_EOF_OFFSET..ENTRY_EOF_OFFSET + 3]
            .copy_from_slice(&(self.eof & MAX_EOF).to_le_bytes()[..3]);
        self.creation
            .to_bytes(&mut bytes[ENTRY_CREATION_OFFSET..ENTRY_CREATION_OFFSET + 4]);
        bytes[ENTRY_VERSION_OFFSET] = self.version;
        bytes[ENTRY_MIN_VERSION_OFFSET] = self.min_version;
        bytes[ENTRY_ACCESS_OFFSET] = self.access.0;
        put_u16(bytes, ENTRY_AUX_TYPE_OFFSET, self.aux_type);
        self.last_mod
            .to_bytes(&mut bytes[ENTRY_LAST_MOD_OFFSET..ENTRY_LAST_MOD_OFFSET + 4]);
        put_u16(bytes, ENTRY_HEADER_POINTER_OFFSET, self.header_pointer);
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = self.creation.validate();
        errors.extend(self.last_mod.validate());
        errors
    }
}

// Directory headers

const HEADER_CREATION_OFFSET: usize = 0x18;
const HEADER_VERSION_OFFSET: usize = 0x1C;
const HEADER_MIN_VERSION_OFFSET: usize = 0x1D;
const HEADER_ACCESS_OFFSET: usize = 0x1E;
const HEADER_ENTRY_LENGTH_OFFSET: usize = 0x1F;
const HEADER_ENTRIES_PER_BLOCK_OFFSET: usize = 0x20;
const HEADER_FILE_COUNT_OFFSET: usize = 0x21;

pub const ENTRY_LENGTH: u8 = FileDescriptor::SIZE as u8;
pub const ENTRIES_PER_BLOCK: u8 = 13;

/// Behavior shared by the volume and subdirectory headers, which allows one
/// key block type to carry either.
pub trait DirectoryHeader: Record + Clone + fmt::Debug + PartialEq {
    fn storage_type(&self) -> StorageType;
    fn name(&self) -> String;
    fn file_count(&self) -> u16;
    fn set_file_count(&mut self, count: u16);
}

const VOLUME_RESERVED_OFFSET: usize = 0x10;
const VOLUME_BITMAP_POINTER_OFFSET: usize = 0x23;
const VOLUME_TOTAL_BLOCKS_OFFSET: usize = 0x25;

/// The header in the volume directory's key block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeDirectoryHeader {
    pub storage_type: StorageType,
    pub name_length: u8,
    pub name: [u8; NAME_SIZE],
    pub reserved: [u8; 8],
    pub creation: DateTime,
    pub version: u8,
    pub min_version: u8,
    pub access: Access,
    pub entry_length: u8,
    pub entries_per_block: u8,
    pub file_count: u16,
    pub bitmap_pointer: u16,
    pub total_blocks: u16,
}

impl VolumeDirectoryHeader {
    pub fn new(name: &str, total_blocks: u16, bitmap_pointer: u16, creation: DateTime) -> Self {
        let (name_length, name) = name_bytes(name);
        VolumeDirectoryHeader {
            storage_type: StorageType::VolumeDirectoryHeader,
            name_length,
            name,
            reserved: [0u8; 8],
            creation,
            version: 0,
            min_version: 0,
            access: Access::UNLOCKED,
            entry_length: ENTRY_LENGTH,
            entries_per_block: ENTRIES_PER_BLOCK,
            file_count: 0,
            bitmap_pointer,
            total_blocks,
        }
    }

    /// Store an already-validated name.
    pub fn set_name(&mut self, name: &str) {
        let (length, buffer) = name_bytes(name);
        self.name_length = length;
        self.name = buffer;
    }
}

impl Record for VolumeDirectoryHeader {
    const SIZE: usize = 39;

    fn parse(bytes: &[u8]) -> Self {
        let (storage_type, name_length) = parse_type_and_length(bytes[0]);
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&bytes[VOLUME_RESERVED_OFFSET..VOLUME_RESERVED_OFFSET + 8]);
        VolumeDirectoryHeader {
            storage_type,
            name_length,
            name: parse_name(&bytes[1..]),
            reserved,
            creation: DateTime::parse(&bytes[HEADER_CREATION_OFFSET..HEADER_CREATION_OFFSET + 4]),
            version: bytes[HEADER_VERSION_OFFSET],
            min_version: bytes[HEADER_MIN_VERSION_OFFSET],
            access: Access(bytes[HEADER_ACCESS_OFFSET]),
            entry_length: bytes[HEADER_ENTRY_LENGTH_OFFSET],
            entries_per_block: bytes[HEADER_ENTRIES_PER_BLOCK_OFFSET],
            file_count: get_u16(bytes, HEADER_FILE_COUNT_OFFSET),
            bitmap_pointer: get_u16(bytes, VOLUME_BITMAP_POINTER_OFFSET),
            total_blocks: get_u16(bytes, VOLUME_TOTAL_BLOCKS_OFFSET),
        }
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = type_and_length(self.storage_type, self.name_length);
        bytes[1..1 + NAME_SIZE].copy_from_slice(&self.name);
        bytes[VOLUME_RESERVED_OFFSET..VOLUME_RESERVED_OFFSET + 8].copy_from_slice(&self.reserved);
        self.creation
            .to_bytes(&mut bytes[HEADER_CREATION_OFFSET..HEADER_CREATION_OFFSET + 4]);
        bytes[HEADER_VERSION_OFFSET] = self.version;
        bytes[HEADER_MIN_VERSION_OFFSET] = self.min_version;
        bytes[HEADER_ACCESS_OFFSET] = self.access.0;
        bytes[HEADER_ENTRY_LENGTH_OFFSET] = self.entry_length;
        bytes[HEADER_ENTRIES_PER_BLOCK_OFFSET] = self.entries_per_block;
        put_u16(bytes, HEADER_FILE_COUNT_OFFSET, self.file_count);
        put_u16(bytes, VOLUME_BITMAP_POINTER_OFFSET, self.bitmap_pointer);
        put_u16(bytes, VOLUME_TOTAL_BLOCKS_OFFSET, self.total_blocks);
    }

    fn validate(&self) -> Vec<ValidationError> {
        self.creation.validate()
    }
}

impl DirectoryHeader for VolumeDirectoryHeader {
    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    fn name(&self) -> String {
        name_string(&self.name, self.name_length)
    }

    fn file_count(&self) -> u16 {
        self.file_count
    }

    fn set_file_count(&mut self, count: u16) {
        self.file_count = count;
    }
}

/// The sentinel every subdirectory header carries at offset 0x10.
pub const SUBDIRECTORY_MARKER: u8 = 0x75;

const SUBDIRECTORY_MARKER_OFFSET: usize = 0x10;
const SUBDIRECTORY_RESERVED_OFFSET: usize = 0x11;
const SUBDIRECTORY_PARENT_POINTER_OFFSET: usize = 0x23;
const SUBDIRECTORY_PARENT_ENTRY_OFFSET: usize = 0x25;
const SUBDIRECTORY_PARENT_ENTRY_LENGTH_OFFSET: usize = 0x26;

/// The header in a subdirectory's key block.  `parent_pointer` and
/// `parent_entry` locate the entry in the parent directory which describes
/// this subdirectory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubdirectoryHeader {
    pub storage_type: StorageType,
    pub name_length: u8,
    pub name: [u8; NAME_SIZE],
    pub marker: u8,
    pub reserved: [u8; 7],
    pub creation: DateTime,
    pub version: u8,
    pub min_version: u8,
    pub access: Access,
    pub entry_length: u8,
    pub entries_per_block: u8,
    pub file_count: u16,
    pub parent_pointer: u16,
    pub parent_entry: u8,
    pub parent_entry_length: u8,
}

impl SubdirectoryHeader {
    pub fn new(name: &str, parent_pointer: u16, parent_entry: u8, creation: DateTime) -> Self {
        let (name_length, name) = name_bytes(name);
        SubdirectoryHeader {
            storage_type: StorageType::SubdirectoryHeader,
            name_length,
            name,
            marker: SUBDIRECTORY_MARKER,
            reserved: [0u8; 7],
            creation,
            version: 0,
            min_version: 0,
            access: Access::UNLOCKED,
            entry_length: ENTRY_LENGTH,
            entries_per_block: ENTRIES_PER_BLOCK,
            file_count: 0,
            parent_pointer,
            parent_entry,
            parent_entry_length: ENTRY_LENGTH,
        }
    }

    /// Store an already-validated name.
    pub fn set_name(&mut self, name: &str) {
        let (length, buffer) = name_bytes(name);
        self.name_length = length;
        self.name = buffer;
    }
}

impl Record for SubdirectoryHeader {
    const SIZE: usize = 39;

    fn parse(bytes: &[u8]) -> Self {
        let (storage_type, name_length) = parse_type_and_length(bytes[0]);
        let mut reserved = [0u8; 7];
        reserved.copy_from_slice(
            &bytes[SUBDIRECTORY_RESERVED_OFFSET..SUBDIRECTORY_RESERVED_OFFSET + 7],
        );
        SubdirectoryHeader {
            storage_type,
            name_length,
            name: parse_name(&bytes[1..]),
            marker: bytes[SUBDIRECTORY_MARKER_OFFSET],
            reserved,
            creation: DateTime::parse(&bytes[HEADER_CREATION_OFFSET..HEADER_CREATION_OFFSET + 4]),
            version: bytes[HEADER_VERSION_OFFSET],
            min_version: bytes[HEADER_MIN_VERSION_OFFSET],
            access: Access(bytes[HEADER_ACCESS_OFFSET]),
            entry_length: bytes[HEADER_ENTRY_LENGTH_OFFSET],
            entries_per_block: bytes[HEADER_ENTRIES_PER_BLOCK_OFFSET],
            file_count: get_u16(bytes, HEADER_FILE_COUNT_OFFSET),
            parent_pointer: get_u16(bytes, SUBDIRECTORY_PARENT_POINTER_OFFSET),
            parent_entry: bytes[SUBDIRECTORY_PARENT_ENTRY_OFFSET],
            parent_entry_length: bytes[SUBDIRECTORY_PARENT_ENTRY_LENGTH_OFFSET],
        }
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = type_and_length(self.storage_type, self.name_length);
        bytes[1..1 + NAME_SIZE].copy_from_slice(&self.name);
        bytes[SUBDIRECTORY_MARKER_OFFSET] = self.marker;
        bytes[SUBDIRECTORY_RESERVED_OFFSET..SUBDIRECTORY_RESERVED_OFFSET + 7]
            .copy_from_slice(&self.reserved);
        self.creation
            .to_bytes(&mut bytes[HEADER_CREATION_OFFSET..HEADER_CREATION_OFFSET + 4]);
        bytes[HEADER_VERSION_OFFSET] = self.version;
        bytes[HEADER_MIN_VERSION_OFFSET] = self.min_version;
        bytes[HEADER_ACCESS_OFFSET] = self.access.0;
        bytes[HEADER_ENTRY_LENGTH_OFFSET] = self.entry_length;
        bytes[HEADER_ENTRIES_PER_BLOCK_OFFSET] = self.entries_per_block;
        put_u16(bytes, HEADER_FILE_COUNT_OFFSET, self.file_count);
        put_u16(bytes, SUBDIRECTORY_PARENT_POINTER_OFFSET, self.parent_pointer);
        bytes[SUBDIRECTORY_PARENT_ENTRY_OFFSET] = self.parent_entry;
        bytes[SUBDIRECTORY_PARENT_ENTRY_LENGTH_OFFSET] = self.parent_entry_length;
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = vec![];
        if self.marker != SUBDIRECTORY_MARKER {
            errors.push(ValidationError::InvalidMarker(self.marker));
        }
        errors.extend(self.creation.validate());
        errors
    }
}

impl DirectoryHeader for SubdirectoryHeader {
    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    fn name(&self) -> String {
        name_string(&self.name, self.name_length)
    }

    fn file_count(&self) -> u16 {
        self.file_count
    }

    fn set_file_count(&mut self, count: u16) {
        self.file_count = count;
    }
}

// Directory blocks

const PREV_OFFSET: usize = 0x00;
const NEXT_OFFSET: usize = 0x02;
const HEADER_OFFSET: usize = 0x04;
const PAD_OFFSET: usize = BLOCK_SIZE - 1;

pub const KEY_BLOCK_ENTRIES: usize = 12;
pub const CONTINUATION_BLOCK_ENTRIES: usize = 13;

fn parse_entries(bytes: &[u8], offset: usize, count: usize) -> Vec<FileDescriptor> {
    (0..count)
        .map(|i| {
            let start = offset + i * FileDescriptor::SIZE;
            FileDescriptor::parse(&bytes[start..start + FileDescriptor::SIZE])
        })
        .collect()
}

fn entries_to_bytes(entries: &[FileDescriptor], bytes: &mut [u8], offset: usize) {
    for (i, entry) in entries.iter().enumerate() {
        let start = offset + i * FileDescriptor::SIZE;
        entry.to_bytes(&mut bytes[start..start + FileDescriptor::SIZE]);
    }
}

/// The first block of a directory chain: links, a header, and twelve
/// entries.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryKeyBlock<H: DirectoryHeader> {
    pub prev: u16,
    pub next: u16,
    pub header: H,
    pub entries: Vec<FileDescriptor>,
    pub pad: u8,
}

pub type VolumeDirectoryKeyBlock = DirectoryKeyBlock<VolumeDirectoryHeader>;
pub type SubdirectoryKeyBlock = DirectoryKeyBlock<SubdirectoryHeader>;

const KEY_ENTRIES_OFFSET: usize = HEADER_OFFSET + 39;

impl<H: DirectoryHeader> DirectoryKeyBlock<H> {
    pub fn new(header: H, next: u16) -> Self {
        DirectoryKeyBlock {
            prev: 0,
            next,
            header,
            entries: vec![FileDescriptor::default(); KEY_BLOCK_ENTRIES],
            pad: 0,
        }
    }
}

impl<H: DirectoryHeader> Record for DirectoryKeyBlock<H> {
    const SIZE: usize = BLOCK_SIZE;

    fn parse(bytes: &[u8]) -> Self {
        DirectoryKeyBlock {
            prev: get_u16(bytes, PREV_OFFSET),
            next: get_u16(bytes, NEXT_OFFSET),
            header: H::parse(&bytes[HEADER_OFFSET..HEADER_OFFSET + H::SIZE]),
            entries: parse_entries(bytes, KEY_ENTRIES_OFFSET, KEY_BLOCK_ENTRIES),
            pad: bytes[PAD_OFFSET],
        }
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        put_u16(bytes, PREV_OFFSET, self.prev);
        put_u16(bytes, NEXT_OFFSET, self.next);
        self.header
            .to_bytes(&mut bytes[HEADER_OFFSET..HEADER_OFFSET + H::SIZE]);
        entries_to_bytes(&self.entries, bytes, KEY_ENTRIES_OFFSET);
        bytes[PAD_OFFSET] = self.pad;
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = vec![];
        if self.prev != 0 {
            errors.push(ValidationError::NonZeroPrevious(self.prev));
        }
        if self.pad != 0 {
            errors.push(ValidationError::NonZeroTrailingByte(self.pad));
        }
        errors.extend(self.header.validate());
        for entry in &self.entries {
            errors.extend(entry.validate());
        }
        errors
    }
}

/// A continuation block of a directory chain: links and thirteen entries.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryBlock {
    pub prev: u16,
    pub next: u16,
    pub entries: Vec<FileDescriptor>,
    pub pad: u8,
}

impl DirectoryBlock {
    pub fn new(prev: u16, next: u16) -> DirectoryBlock {
        DirectoryBlock {
            prev,
            next,
            entries: vec![FileDescriptor::default(); CONTINUATION_BLOCK_ENTRIES],
            pad: 0,
        }
    }
}

impl Record for DirectoryBlock {
    const SIZE: usize = BLOCK_SIZE;

    fn parse(bytes: &[u8]) -> Self {
        DirectoryBlock {
            prev: get_u16(bytes, PREV_OFFSET),
            next: get_u16(bytes, NEXT_OFFSET),
            entries: parse_entries(bytes, HEADER_OFFSET, CONTINUATION_BLOCK_ENTRIES),
            pad: bytes[PAD_OFFSET],
        }
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        put_u16(bytes, PREV_OFFSET, self.prev);
        put_u16(bytes, NEXT_OFFSET, self.next);
        entries_to_bytes(&self.entries, bytes, HEADER_OFFSET);
        bytes[PAD_OFFSET] = self.pad;
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = vec![];
        if self.pad != 0 {
            errors.push(ValidationError::NonZeroTrailingByte(self.pad));
        }
        for entry in &self.entries {
            errors.extend(entry.validate());
        }
        errors
    }
}

// Index blocks

pub const INDEX_ENTRIES: usize = 256;

/// A block of 256 block pointers.  The low byte of pointer n is at offset n
/// and the high byte is at offset 256 + n.
#[derive(Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub pointers: [u16; INDEX_ENTRIES],
}

impl IndexBlock {
    pub fn new() -> IndexBlock {
        IndexBlock {
            pointers: [0u16; INDEX_ENTRIES],
        }
    }

    #[inline]
    pub fn get(&self, n: usize) -> u16 {
        self.pointers[n]
    }

    #[inline]
    pub fn set(&mut self, n: usize, pointer: u16) {
        self.pointers[n] = pointer;
    }
}

impl Default for IndexBlock {
    fn default() -> IndexBlock {
        IndexBlock::new()
    }
}

impl fmt::Debug for IndexBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.pointers.iter().filter(|&&p| p != 0))
            .finish()
    }
}

impl Record for IndexBlock {
    const SIZE: usize = BLOCK_SIZE;

    fn parse(bytes: &[u8]) -> IndexBlock {
        let mut index = IndexBlock::new();
        for n in 0..INDEX_ENTRIES {
            index.pointers[n] = u16::from_le_bytes([bytes[n], bytes[INDEX_ENTRIES + n]]);
        }
        index
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        for (n, pointer) in self.pointers.iter().enumerate() {
            let [low, high] = pointer.to_le_bytes();
            bytes[n] = low;
            bytes[INDEX_ENTRIES + n] = high;
        }
    }
}

// Extended key blocks

const FORK_KEY_POINTER_OFFSET: usize = 0x01;
const FORK_BLOCKS_USED_OFFSET: usize = 0x03;
const FORK_EOF_OFFSET: usize = 0x05;
const DATA_FORK_OFFSET: usize = 0x000;
const RESOURCE_FORK_OFFSET: usize = 0x100;

/// The description of one fork of an extended file.  Unlike a directory
/// entry, the storage type occupies the whole first byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForkEntry {
    pub storage_type: StorageType,
    pub key_pointer: u16,
    pub blocks_used: u16,
    /// Stored in three bytes.
    pub eof: u32,
}

impl Record for ForkEntry {
    const SIZE: usize = 8;

    fn parse(bytes: &[u8]) -> ForkEntry {
        ForkEntry {
            storage_type: match bytes[0] {
                b if b > 0x0F => StorageType::Unknown(b),
                b => StorageType::from_nibble(b),
            },
            key_pointer: get_u16(bytes, FORK_KEY_POINTER_OFFSET),
            blocks_used: get_u16(bytes, FORK_BLOCKS_USED_OFFSET),
            eof: u32::from_le_bytes([
                bytes[FORK_EOF_OFFSET],
                bytes[FORK_EOF_OFFSET + 1],
                bytes[FORK_EOF_OFFSET + 2],
                0,
            ]),
        }
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = self.storage_type.to_nibble();
        put_u16(bytes, FORK_KEY_POINTER_OFFSET, self.key_pointer);
        put_u16(bytes, FORK_BLOCKS_USED_OFFSET, self.blocks_used);
        bytes[FORK_EOF_OFFSET..FORK_EOF_OFFSET + 3]
            .copy_from_slice(&(self.eof & MAX_EOF).to_le_bytes()[..3]);
    }
}

/// The key block of an extended (forked) file: the data fork entry at the
/// start of the block and the resource fork entry at offset 256.  Finder
/// information following each entry is not preserved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtendedKeyBlock {
    pub data: ForkEntry,
    pub resource: ForkEntry,
}

impl ExtendedKeyBlock {
    pub fn forks(&self) -> [&ForkEntry; 2] {
        [&self.data, &self.resource]
    }
}

impl Record for ExtendedKeyBlock {
    const SIZE: usize = BLOCK_SIZE;

    fn parse(bytes: &[u8]) -> ExtendedKeyBlock {
        ExtendedKeyBlock {
            data: ForkEntry::parse(&bytes[DATA_FORK_OFFSET..DATA_FORK_OFFSET + ForkEntry::SIZE]),
            resource: ForkEntry::parse(
                &bytes[RESOURCE_FORK_OFFSET..RESOURCE_FORK_OFFSET + ForkEntry::SIZE],
            ),
        }
    }

    fn to_bytes(&self, bytes: &mut [u8]) {
        self.data
            .to_bytes(&mut bytes[DATA_FORK_OFFSET..DATA_FORK_OFFSET + ForkEntry::SIZE]);
        self.resource
            .to_bytes(&mut bytes[RESOURCE_FORK_OFFSET..RESOURCE_FORK_OFFSET + ForkEntry::SIZE]);
    }
}
