//! This is a Rust library for working with Apple ProDOS volumes stored in
//! ProDOS-order disk images (".po" and ".hdv" files), as used by the Apple
//! II family of computers.
//!
//! Features:
//!
//! * Format volumes of any size from a 140K floppy to a 32M hard disk.
//! * Iterate directory entries, including those in subdirectories.
//! * Read, write, delete, and rename files of all three storage types
//!   (seedling, sapling, and tree).
//! * Create subdirectories, which grow as entries are added.
//! * Validate the consistency of volumes: record fields, directory chains,
//!   and block ownership against the volume bitmap.
//! * A sample `pdisk` program for operating on ProDOS disk images.
//!
//! Current shortcomings:
//!
//! * Extended (forked) files are listed, validated, deleted, and replaced,
//!   but their forks cannot be read or created.
//! * DOS 3.3-order (".dsk") images are not supported.
//! * Sparse files are read, but files are always written densely.
//!
//! # Example
//!
//! The following example opens a disk image and prints the files in its
//! volume directory that are larger than one block:
//!
//! ```
//! use std::io;
//! use prodisk::disk;
//! # fn list_large_files(disk_image_filename: &str) -> io::Result<()> {
//! # let disk_image_filename = "/tmp/disk.po";
//!
//! // Open the disk image read-only
//! let disk = disk::open(disk_image_filename, false)?;
//!
//! for descriptor in disk.catalog("")? {
//!     if !descriptor.is_directory && descriptor.blocks > 1 {
//!         println!("{}", descriptor);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design of disk image access
//!
//! Support for disk images was built using a layered scheme:
//!
//! 1. `Image` provides access to the underlying storage containing the disk
//!    image -- either a memory-mapped disk image file or an in-memory array.
//! 2. `BlockDevice` divides the image into 512-byte blocks.
//! 3. The `record` module decodes and encodes the fixed-layout structures
//!    found in those blocks: directory key blocks, file descriptors, index
//!    blocks, and so on.
//! 4. `VolumeBitMap`, `Directory`, and the `index` module build the
//!    allocation map, directory chains, and file block trees on top of the
//!    records.
//! 5. `ProDOS` implements the `Operator` trait, which exposes high-level
//!    functionality such as cataloging, reading and writing whole files,
//!    formatting, and validating.
//!
//! Components hold their own `Rc<RefCell<BlockDevice>>` reference to the
//! volume's block storage, so a `Directory` may be used while its `ProDOS`
//! is borrowed elsewhere.  Writes go straight to the image; the bitmap is
//! the last structure persisted by any operation.
//!
//! # License
//!
//! Prodisk is distributed under the terms of both the MIT license and the
//! Apache License (Version 2.0).

pub mod disk;

mod util;
