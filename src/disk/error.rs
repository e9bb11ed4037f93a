use std::io;

use thiserror::Error;

/// Errors that can be returned from disk image operations.  These are
/// generally converted into `io::Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DiskError {
    /// Unknown error
    #[error("unknown error")]
    Unknown,
    /// Write access attempted to read-only media
    #[error("write access attempted to read-only media")]
    ReadOnly,
    /// Block number beyond the end of the device or volume
    #[error("block number out of range")]
    OutOfRange,
    /// A record was decoded from a buffer of the wrong size
    #[error("record buffer length mismatch")]
    LengthMismatch,
    /// The image size cannot hold a ProDOS volume
    #[error("invalid layout")]
    InvalidLayout,
    /// No ProDOS volume directory was found
    #[error("attempt to use unformatted media")]
    Unformatted,
    /// A directory chain links back to a block already visited
    #[error("directory chain loop detected")]
    ChainLoop,
    /// A directory block's previous-block link disagrees with the chain
    #[error("invalid directory chain link")]
    InvalidChainLink,
    /// A subdirectory header does not point back at the entry describing it
    #[error("subdirectory back-reference mismatch")]
    BackReferenceMismatch,
    /// A storage type that is not valid in this position
    #[error("invalid storage type")]
    InvalidStorageType,
    /// File not found
    #[error("file not found")]
    NotFound,
    /// A path component is not a directory
    #[error("not a directory")]
    NotADirectory,
    /// A file operation was attempted on a directory
    #[error("is a directory")]
    IsDirectory,
    /// Attempt to delete a directory that still has entries
    #[error("directory not empty")]
    DirectoryNotEmpty,
    /// A file with the specified filename already exists
    #[error("a file with the specified filename already exists")]
    FileExists,
    /// Filename is not a valid ProDOS name
    #[error("invalid filename")]
    FilenameInvalid,
    /// File contents exceed what a ProDOS tree file can address
    #[error("file too large")]
    FileTooLarge,
    /// Disk is full
    #[error("disk is full")]
    DiskFull,
    /// The volume directory has no free entries
    #[error("directory is full")]
    DirectoryFull,
    /// The operation is not available for this disk format
    #[error("operation not supported by this disk format")]
    Unsupported,
}

impl From<DiskError> for io::Error {
    fn from(error: DiskError) -> io::Error {
        use std::io::ErrorKind as Kind;
        let kind = match error {
            DiskError::Unknown => Kind::Other,
            DiskError::ReadOnly => Kind::PermissionDenied,
            DiskError::OutOfRange => Kind::InvalidInput,
            DiskError::LengthMismatch => Kind::InvalidInput,
            DiskError::InvalidLayout => Kind::InvalidData,
            DiskError::Unformatted => Kind::InvalidData,
            DiskError::ChainLoop => Kind::InvalidData,
            DiskError::InvalidChainLink => Kind::InvalidData,
            DiskError::BackReferenceMismatch => Kind::InvalidData,
            DiskError::InvalidStorageType => Kind::InvalidData,
            DiskError::NotFound => Kind::NotFound,
            DiskError::NotADirectory => Kind::InvalidInput,
            DiskError::IsDirectory => Kind::InvalidInput,
            DiskError::DirectoryNotEmpty => Kind::InvalidInput,
            DiskError::FileExists => Kind::AlreadyExists,
            DiskError::FilenameInvalid => Kind::InvalidInput,
            DiskError::FileTooLarge => Kind::InvalidInput,
            DiskError::DiskFull => Kind::Other,
            DiskError::DirectoryFull => Kind::Other,
            DiskError::Unsupported => Kind::Unsupported,
        };
        io::Error::new(kind, error)
    }
}

impl From<io::Error> for DiskError {
    fn from(error: io::Error) -> DiskError {
        DiskError::from_io_error(&error).unwrap_or(DiskError::Unknown)
    }
}

impl DiskError {
    /// If the provided `io::Error` contains a `DiskError`, return the
    /// underlying `DiskError`.  If not, return None.
    pub fn from_io_error(error: &io::Error) -> Option<DiskError> {
        error
            .get_ref()
            .and_then(|e| e.downcast_ref::<DiskError>())
            .copied()
    }

    /// This is sometimes useful instead of .into() when the compiler doesn't
    /// have enough information to perform type inference.
    pub fn to_io_error(&self) -> io::Error {
        (*self).into()
    }

    /// Return true for errors that indicate a structurally corrupt image
    /// rather than a caller mistake.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DiskError::ChainLoop
                | DiskError::InvalidChainLink
                | DiskError::BackReferenceMismatch
                | DiskError::InvalidStorageType
        )
    }
}

impl PartialEq<io::Error> for DiskError {
    fn eq(&self, other: &io::Error) -> bool {
        matches!(DiskError::from_io_error(other), Some(ref e) if e == self)
    }
}

impl PartialEq<DiskError> for io::Error {
    fn eq(&self, other: &DiskError) -> bool {
        matches!(DiskError::from_io_error(self), Some(ref e) if e == other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_round_trip() {
        let error: io::Error = DiskError::FileExists.into();
        assert_eq!(error.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(DiskError::from_io_error(&error), Some(DiskError::FileExists));
        assert!(error == DiskError::FileExists);
        assert!(DiskError::NotFound != error);

        let foreign = io::Error::new(io::ErrorKind::Other, "elsewhere");
        assert_eq!(DiskError::from_io_error(&foreign), None);
        assert_eq!(DiskError::from(foreign), DiskError::Unknown);
    }

    #[test]
    fn test_corruption_grouping() {
        assert!(DiskError::ChainLoop.is_corruption());
        assert!(DiskError::BackReferenceMismatch.is_corruption());
        assert!(!DiskError::OutOfRange.is_corruption());
        assert!(!DiskError::LengthMismatch.is_corruption());
    }
}
