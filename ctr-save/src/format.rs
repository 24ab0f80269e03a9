// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Save container file format primitives.
//!
//! Nothing here is officially documented. The layouts below come from
//! observing real NAND dumps, so the meaning of several fields is unknown.
//!
//! # File Format
//!
//! A save image starts with a 0x100 byte header which we don't interpret
//! (it holds a signature over the rest of the file). It is followed by the
//! [ContainerDescriptor], whose first 4 bytes are magic `DISA`.
//!
//! The container descriptor points at two copies of a *partition table*:
//! a primary and a secondary one. Which copy is current is decided by
//! [ContainerDescriptor::active_table]. A partition table is a
//! [PartitionDescriptor] (`DIFI`) immediately followed by an
//! [IntegrityDescriptor] (`IVFC`) and a [DedupDescriptor] (`DPFS`).
//!
//! The save partition itself starts at
//! [ContainerDescriptor::save_partition_offset]. It begins with the two
//! `DPFS` redundancy tables, then the data region at
//! [DedupDescriptor::data_offset]. Inside the data region, at
//! [IntegrityDescriptor::filesystem_offset], lives the inner filesystem.
//!
//! # Inner Filesystem
//!
//! The inner filesystem begins with a [FilesystemHeader] (magic `SAVE`).
//! Offsets in the header are relative to the start of the header, except
//! for the folder table and file table offsets, which are expressed in
//! *block units* (usually 0x1000 bytes) relative to the file store.
//!
//! Both tables are flat arrays of fixed-size records ([FolderEntry],
//! [FileEntry]). The first record of each table is a header record whose
//! `parent_index` field holds the number of real records that follow plus
//! one. Every real record refers to its containing folder by a 1-based
//! index into the folder table, with `0` meaning the root.

use {
    crate::Error,
    scroll::{ctx, Endian, Pread, Pwrite, SizeWith},
};

/// Magic of [ContainerDescriptor].
pub const DISA_MAGIC: [u8; 4] = *b"DISA";

/// Magic of [PartitionDescriptor].
pub const DIFI_MAGIC: [u8; 4] = *b"DIFI";

/// Magic of [IntegrityDescriptor].
pub const IVFC_MAGIC: [u8; 4] = *b"IVFC";

/// Magic of [DedupDescriptor].
pub const DPFS_MAGIC: [u8; 4] = *b"DPFS";

/// Magic of [FilesystemHeader].
pub const SAVE_MAGIC: [u8; 4] = *b"SAVE";

/// Size of the fixed header preceding [ContainerDescriptor].
pub const IMAGE_HEADER_SIZE: u64 = 0x100;

/// Default size of a block unit in the inner filesystem.
pub const DEFAULT_BLOCK_SIZE: u64 = 0x1000;

/// Size of the name buffers in folder and file entries.
pub const NAME_SIZE: usize = 0x10;

/// A fixed-size on-disk record.
pub trait Record:
    for<'a> ctx::TryFromCtx<'a, Endian, Error = scroll::Error> + ctx::SizeWith<Endian>
{
    /// Human readable name used in diagnostics.
    const NAME: &'static str;
}

impl Record for u32 {
    const NAME: &'static str = "u32 word";
}

/// Decode a NUL terminated name buffer.
///
/// Bytes after the first NUL are ignored.
pub fn name_from_bytes(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());

    String::from_utf8_lossy(&data[..end]).to_string()
}

/// Encode a name into a fixed-size NUL padded buffer.
///
/// Names longer than the buffer are truncated.
pub fn name_to_bytes(name: &str) -> [u8; NAME_SIZE] {
    let mut buf = [0u8; NAME_SIZE];
    let len = name.len().min(NAME_SIZE);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);

    buf
}

/// The outer container descriptor.
///
/// Located right after the image header.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pread, Pwrite, SizeWith)]
pub struct ContainerDescriptor {
    /// Format magic. Always `DISA`.
    pub magic: [u8; 4],

    /// Format version.
    pub version: u32,

    /// Size of the partition table in table units.
    ///
    /// Only a value of `1` is supported.
    pub table_size: u64,

    /// Absolute offset of the primary partition table.
    pub primary_table_offset: u64,

    /// Absolute offset of the secondary partition table.
    pub secondary_table_offset: u64,

    /// Length in bytes of each partition table copy.
    pub table_length: u64,

    /// Offset of the save partition descriptor within a partition table.
    pub save_entry_offset: u64,

    /// Length of the save partition descriptor.
    pub save_entry_length: u64,

    /// Offset of the data partition descriptor within a partition table.
    pub data_entry_offset: u64,

    /// Length of the data partition descriptor.
    pub data_entry_length: u64,

    /// Absolute offset of the save partition.
    pub save_partition_offset: u64,

    /// Length of the save partition.
    pub save_partition_length: u64,

    /// Absolute offset of the data partition.
    pub data_partition_offset: u64,

    /// Length of the data partition.
    pub data_partition_length: u64,

    /// Active partition table selector.
    ///
    /// Only the low bit is meaningful. See [Self::selected_table_offset].
    pub active_table: u32,

    /// Hash over the active partition table.
    pub table_hash: [u8; 32],

    /// Unknown.
    pub reserved0: [u8; 32],

    /// Unknown.
    pub reserved1: [u8; 32],

    /// Unknown.
    pub reserved2: [u8; 32],

    /// Unknown.
    pub reserved3: [u8; 20],
}

impl Record for ContainerDescriptor {
    const NAME: &'static str = "DISA descriptor";
}

impl ContainerDescriptor {
    pub fn has_valid_magic(&self) -> bool {
        self.magic == DISA_MAGIC
    }

    /// Whether the low bit of [Self::active_table] is set.
    pub fn active_flag(&self) -> bool {
        self.active_table & 1 == 1
    }

    /// The absolute offset of the partition table to read.
    ///
    /// A set flag selects the *primary* table and a clear flag the
    /// *secondary* one.
    pub fn selected_table_offset(&self) -> u64 {
        if self.active_flag() {
            self.primary_table_offset
        } else {
            self.secondary_table_offset
        }
    }
}

/// Partition descriptor at the start of a partition table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pread, Pwrite, SizeWith)]
pub struct PartitionDescriptor {
    /// Always `DIFI`.
    pub magic: [u8; 4],

    /// Format version.
    pub version: u32,

    /// Offset of the [IntegrityDescriptor] relative to this record.
    pub integrity_offset: u64,

    /// Size of the [IntegrityDescriptor].
    pub integrity_size: u64,

    /// Offset of the [DedupDescriptor] relative to this record.
    pub dedup_offset: u64,

    /// Size of the [DedupDescriptor].
    pub dedup_size: u64,

    /// Offset of the partition hash relative to this record.
    pub hash_offset: u64,

    /// Size of the partition hash.
    pub hash_size: u64,

    /// Partition flags.
    pub flags: u32,

    /// Base of externally stored file data.
    pub file_base: u64,
}

impl Record for PartitionDescriptor {
    const NAME: &'static str = "DIFI descriptor";
}

/// Layout of the integrity verification (hash tree) levels.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pread, Pwrite, SizeWith)]
pub struct IntegrityDescriptor {
    /// Always `IVFC`.
    pub magic: [u8; 4],

    /// Format version.
    pub version: u32,

    /// Size of the master hash.
    pub master_hash_size: u64,

    pub first_hash_offset: u64,
    pub first_hash_length: u64,
    pub first_hash_block: u64,

    pub second_hash_offset: u64,
    pub second_hash_length: u64,
    pub second_hash_block: u64,

    pub hash_table_offset: u64,
    pub hash_table_length: u64,
    pub hash_table_block: u64,

    /// Offset of the inner filesystem relative to the partition data region.
    pub filesystem_offset: u64,

    /// Length of the inner filesystem.
    pub filesystem_length: u64,

    /// Log2 block size of the filesystem level.
    pub filesystem_block: u64,

    /// Size of this descriptor.
    pub descriptor_size: u64,
}

impl Record for IntegrityDescriptor {
    const NAME: &'static str = "IVFC descriptor";
}

/// Layout of the duplicated (redundant) partition tables.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pread, Pwrite, SizeWith)]
pub struct DedupDescriptor {
    /// Always `DPFS`.
    pub magic: [u8; 4],

    /// Format version.
    pub version: u32,

    /// Offset of the first table relative to the partition base.
    pub first_table_offset: u64,
    pub first_table_length: u64,
    pub first_table_block: u64,

    /// Offset of the second table relative to the partition base.
    pub second_table_offset: u64,
    pub second_table_length: u64,
    pub second_table_block: u64,

    /// Offset of the data region relative to the partition base.
    pub data_offset: u64,
    pub data_length: u64,
    pub data_block: u64,
}

impl Record for DedupDescriptor {
    const NAME: &'static str = "DPFS descriptor";
}

/// Header of the inner save filesystem.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pread, Pwrite, SizeWith)]
pub struct FilesystemHeader {
    /// Always `SAVE`.
    pub magic: [u8; 4],

    /// Format version.
    pub version: u32,

    /// Unknown.
    pub a: u64,

    /// Size of the filesystem partition.
    pub partition_size: u64,

    /// Media unit size of the partition.
    pub partition_media_size: u32,

    /// Unknown.
    pub b: u64,

    /// Unknown.
    pub c: u32,

    /// Offset of the folder index map relative to this header.
    pub folder_map_offset: u64,

    /// Number of `u32` entries in the folder index map.
    pub folder_map_count: u32,
    pub folder_map_media_size: u32,

    /// Offset of the file index map relative to this header.
    pub file_map_offset: u64,

    /// Number of `u32` entries in the file index map.
    pub file_map_count: u32,
    pub file_map_media_size: u32,

    /// Offset of the block map relative to this header.
    pub block_map_offset: u64,

    /// Declared block map size. The real entry count is derived from the
    /// first entry, see [BlockMapEntry].
    pub block_map_count: u32,
    pub block_map_media_size: u32,

    /// Offset of the file store relative to this header.
    pub file_store_offset: u64,
    pub file_store_length: u32,
    pub file_store_media_size: u32,

    /// Folder table offset in block units relative to the file store.
    pub folder_table_offset: u32,
    pub folder_table_length: u32,
    pub folder_table_unknown: u32,
    pub folder_table_media_size: u32,

    /// File table offset in block units relative to the file store.
    pub fst_offset: u32,
    pub fst_length: u32,
    pub fst_unknown: u32,
    pub fst_media_size: u32,
}

impl Record for FilesystemHeader {
    const NAME: &'static str = "SAVE header";
}

impl FilesystemHeader {
    pub fn has_valid_magic(&self) -> bool {
        self.magic == SAVE_MAGIC
    }
}

/// An entry in the block map.
///
/// The block map has no explicit length. Its first entry's `end_block`
/// plus two is the total number of entries, the first one included.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pread, Pwrite, SizeWith)]
pub struct BlockMapEntry {
    pub start_block: u32,
    pub end_block: u32,
}

impl Record for BlockMapEntry {
    const NAME: &'static str = "block map entry";
}

impl BlockMapEntry {
    /// Total block map entry count implied by this entry when it is first.
    pub fn implied_count(&self) -> u64 {
        self.end_block as u64 + 2
    }
}

/// A record in the folder table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pread, Pwrite, SizeWith)]
pub struct FolderEntry {
    /// 1-based index of the containing folder. `0` is the root.
    ///
    /// In the table header record this is the record count plus one.
    pub parent_index: u32,

    /// NUL terminated folder name.
    pub name: [u8; 16],

    /// 1-based index of this folder.
    pub index: u32,

    /// Unknown.
    pub a: u32,

    /// Index of the last file in this folder.
    pub last_file_index: u32,

    /// Unknown.
    pub b: u32,

    /// Unknown.
    pub c: u32,
}

impl Record for FolderEntry {
    const NAME: &'static str = "folder entry";
}

impl FolderEntry {
    /// Obtain the folder name as a [String].
    pub fn string_name(&self) -> String {
        name_from_bytes(&self.name)
    }

    /// Number of records following this one when it is a table header.
    pub fn following_count(&self) -> u32 {
        self.parent_index.saturating_sub(1)
    }
}

/// A record in the file table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pread, Pwrite, SizeWith)]
pub struct FileEntry {
    /// 1-based index of the containing folder. `0` is the root.
    ///
    /// In the table header record this is the record count plus one.
    pub parent_index: u32,

    /// NUL terminated file name.
    pub name: [u8; 16],

    /// 1-based index of this file.
    pub index: u32,

    /// Type word. In the table header record a nonzero value marks a
    /// layout variant we can't decode.
    pub magic: u32,

    /// Payload offset in block units relative to the file store.
    pub block_offset: u32,

    /// Payload size in bytes.
    pub size: u64,

    /// Unknown. Possibly flags or a timestamp.
    pub a: u32,

    /// Unknown.
    pub b: u32,
}

impl Record for FileEntry {
    const NAME: &'static str = "file entry";
}

impl FileEntry {
    /// Obtain the file name as a [String].
    pub fn string_name(&self) -> String {
        name_from_bytes(&self.name)
    }

    /// Number of records following this one when it is a table header.
    pub fn following_count(&self) -> u32 {
        self.parent_index.saturating_sub(1)
    }
}

/// Validate a folder or file name for use as a single path component.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name == "." || name == ".." {
        Err(Error::BadName(name.to_string(), "name cannot be . or .."))
    } else if name.contains('/') {
        Err(Error::BadName(name.to_string(), "name cannot contain /"))
    } else if name.contains('\\') {
        Err(Error::BadName(name.to_string(), "name cannot contain \\"))
    } else {
        Ok(())
    }
}
