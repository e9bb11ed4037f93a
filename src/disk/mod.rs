//! Traits, structs, and functions relating to disk images.

mod bitmap;
mod block;
mod error;
mod image;
mod prodos;
mod validation;

pub mod directory;
pub mod format;
pub mod index;
pub mod record;

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use chrono::NaiveDateTime;

pub use self::bitmap::VolumeBitMap;
pub use self::block::{Block, BlockDevice, BlockDeviceRef, ImageBlockDevice, BLOCK_SIZE};
pub use self::error::DiskError;
pub use self::format::VolumeFormat;
pub use self::image::Image;
pub use self::prodos::ProDOS;
pub use self::record::FileType;
pub use self::validation::ValidationError;

/// Disk image types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskType {
    /// A ProDOS-order block image ("PO" or "HDV").
    ProDOS,
}

impl DiskType {
    pub fn from_extension<P: AsRef<Path>>(path: P) -> Option<DiskType> {
        const PO_EXTENSION: &str = "po";
        const HDV_EXTENSION: &str = "hdv";

        let extension = path
            .as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())?;
        match extension.as_str() {
            PO_EXTENSION | HDV_EXTENSION => Some(DiskType::ProDOS),
            _ => None,
        }
    }
}

/// Open a disk image and return an operator for the filesystem it holds.
/// Images with an unrecognized extension are probed as ProDOS volumes.
pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> io::Result<Box<dyn Operator>> {
    match DiskType::from_extension(&path) {
        Some(DiskType::ProDOS) | None => Ok(Box::new(ProDOS::open(path, writable)?)),
    }
}

/// Create a disk image of `total_blocks` blocks and format it with the
/// provided volume name.  Any existing file is replaced.
pub fn create<P: AsRef<Path>>(path: P, total_blocks: usize, volume_name: &str) -> io::Result<ProDOS> {
    let mut prodos = ProDOS::create(path, total_blocks, false)?;
    prodos.format(volume_name)?;
    Ok(prodos)
}

/// A format-neutral description of a file or directory.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    pub name: String,
    /// The name qualified by its directory path.
    pub full_name: String,
    pub blocks: usize,
    pub length: usize,
    pub file_type: FileType,
    pub aux_type: u16,
    pub locked: bool,
    pub is_directory: bool,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
}

impl Descriptor {
    /// Describe a new file at `path`, which may include subdirectories.
    pub fn new(path: &str) -> Descriptor {
        let (_, name) = directory::split_path(path);
        Descriptor {
            name: name.to_string(),
            full_name: path.trim_matches('/').to_string(),
            blocks: 0,
            length: 0,
            file_type: FileType::BIN,
            aux_type: 0,
            locked: false,
            is_directory: false,
            created: None,
            modified: None,
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn date(time: &Option<NaiveDateTime>) -> String {
            match time {
                Some(time) => time.format("%d-%b-%y %H:%M").to_string(),
                None => "<NO DATE>".to_string(),
            }
        }
        write!(
            f,
            "{}{:<15} {:3} {:>6}  {:<15}  {:<15} {:>8} A=${:04X}",
            if self.locked { '*' } else { ' ' },
            self.name,
            self.file_type,
            self.blocks,
            date(&self.modified),
            date(&self.created),
            self.length,
            self.aux_type,
        )
    }
}

/// A file's contents along with its description.
#[derive(Clone, Debug, PartialEq)]
pub struct FileInfo {
    pub descriptor: Descriptor,
    pub data: Vec<u8>,
}

impl FileInfo {
    pub fn new(path: &str, data: Vec<u8>) -> FileInfo {
        let mut descriptor = Descriptor::new(path);
        descriptor.length = data.len();
        FileInfo { descriptor, data }
    }

    pub fn with_type(mut self, file_type: FileType, aux_type: u16) -> FileInfo {
        self.descriptor.file_type = file_type;
        self.descriptor.aux_type = aux_type;
        self
    }

    /// The path the file is stored under.
    pub fn path(&self) -> &str {
        if self.descriptor.full_name.is_empty() {
            &self.descriptor.name
        } else {
            &self.descriptor.full_name
        }
    }
}

/// Every supported filesystem implements the `Operator` trait, so callers
/// can catalog, read, write, and delete files without knowing the format.
/// File names may be `/`-separated paths on formats with subdirectories.
pub trait Operator {
    /// A short name identifying the filesystem format.
    fn name(&self) -> &'static str;

    fn has_subdirectories(&self) -> bool;

    /// List the live entries of a directory.  An empty path is the root.
    fn catalog(&self, subdirectory: &str) -> io::Result<Vec<Descriptor>>;

    fn get_file(&self, name: &str) -> io::Result<FileInfo>;

    /// Store a file, returning true if it replaced an existing one.
    fn put_file(&mut self, file: &FileInfo, overwrite: bool) -> io::Result<bool>;

    /// Delete a file, returning false if it did not exist.
    fn delete(&mut self, name: &str) -> io::Result<bool>;

    /// Serialize the whole image, returning the number of bytes written.
    fn write(&self, writer: &mut dyn Write) -> io::Result<usize>;

    /// Persist any buffered changes to the backing store.
    fn flush(&mut self) -> io::Result<()>;

    fn create_directory(&mut self, _path: &str) -> io::Result<()> {
        Err(DiskError::Unsupported.into())
    }

    fn rename(&mut self, _from: &str, _to: &str) -> io::Result<()> {
        Err(DiskError::Unsupported.into())
    }

    /// Check the consistency of the image without modifying it.
    fn validate(&self) -> io::Result<Vec<ValidationError>> {
        Err(DiskError::Unsupported.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullOperator;

    impl Operator for NullOperator {
        fn name(&self) -> &'static str {
            "null"
        }

        fn has_subdirectories(&self) -> bool {
            false
        }

        fn catalog(&self, _subdirectory: &str) -> io::Result<Vec<Descriptor>> {
            Ok(vec![])
        }

        fn get_file(&self, _name: &str) -> io::Result<FileInfo> {
            Err(DiskError::NotFound.into())
        }

        fn put_file(&mut self, _file: &FileInfo, _overwrite: bool) -> io::Result<bool> {
            Err(DiskError::Unsupported.into())
        }

        fn delete(&mut self, _name: &str) -> io::Result<bool> {
            Ok(false)
        }

        fn write(&self, _writer: &mut dyn Write) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_operations() {
        let mut operator = NullOperator;
        assert!(operator.create_directory("A").unwrap_err() == DiskError::Unsupported);
        assert!(operator.rename("A", "B").unwrap_err() == DiskError::Unsupported);
        assert!(operator.validate().unwrap_err() == DiskError::Unsupported);
        assert_eq!(
            operator.validate().unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_disk_type() {
        assert_eq!(DiskType::from_extension("games.PO"), Some(DiskType::ProDOS));
        assert_eq!(DiskType::from_extension("hard.hdv"), Some(DiskType::ProDOS));
        assert_eq!(DiskType::from_extension("dos33.dsk"), None);
        assert_eq!(DiskType::from_extension("noextension"), None);
    }

    #[test]
    fn test_file_info_paths() {
        let file = FileInfo::new("/DOCS/README", b"hi".to_vec()).with_type(FileType::TXT, 0);
        assert_eq!(file.descriptor.name, "README");
        assert_eq!(file.path(), "DOCS/README");
        assert_eq!(file.descriptor.length, 2);
        assert_eq!(file.descriptor.file_type, FileType::TXT);
    }
}
