// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Inner `SAVE` filesystem parsing and folder tree reconstruction.

use {
    crate::{
        container::PayloadRegion,
        format::{
            validate_name, BlockMapEntry, FileEntry, FilesystemHeader, FolderEntry,
            IntegrityDescriptor,
        },
        reader::{block_offset, offset_add, read_record, read_record_at, read_records},
        Error, ReadOptions, Result,
    },
    log::debug,
    scroll::{ctx::SizeWith, Endian},
    std::io::{Read, Seek, SeekFrom},
};

/// The parsed `SAVE` header and its index tables.
#[derive(Clone, Debug)]
pub struct SaveFilesystem {
    /// Absolute offset of the `SAVE` header.
    pub base: u64,

    /// The filesystem header.
    pub header: FilesystemHeader,

    /// File index map.
    pub file_map: Vec<u32>,

    /// Folder index map.
    pub folder_map: Vec<u32>,

    /// Block map.
    pub block_map: Vec<BlockMapEntry>,

    /// Absolute offset of the file store.
    ///
    /// Folder table, file table and file payload offsets are relative to this.
    pub file_store_base: u64,
}

impl SaveFilesystem {
    /// Parse the filesystem nested in a payload region.
    pub fn read<R: Read + Seek + ?Sized>(
        reader: &mut R,
        payload: &PayloadRegion,
        integrity: &IntegrityDescriptor,
        options: &ReadOptions,
    ) -> Result<Self> {
        let base = offset_add(payload.payload_start, integrity.filesystem_offset)?;
        let header: FilesystemHeader = read_record_at(reader, base, options.endian)?;

        if !header.has_valid_magic() {
            return Err(Error::FormatMismatch("SAVE"));
        }

        debug!("SAVE filesystem at {:#x}", base);

        reader.seek(SeekFrom::Start(offset_add(base, header.file_map_offset)?))?;
        let file_map = read_records(reader, header.file_map_count as u64, options.endian)?;

        reader.seek(SeekFrom::Start(offset_add(base, header.folder_map_offset)?))?;
        let folder_map = read_records(reader, header.folder_map_count as u64, options.endian)?;

        let block_map = read_block_map(
            reader,
            offset_add(base, header.block_map_offset)?,
            options.endian,
        )?;

        let file_store_base = offset_add(base, header.file_store_offset)?;
        debug!(
            "{} file map entries, {} folder map entries, {} block map entries; file store at {:#x}",
            file_map.len(),
            folder_map.len(),
            block_map.len(),
            file_store_base
        );

        Ok(Self {
            base,
            header,
            file_map,
            folder_map,
            block_map,
            file_store_base,
        })
    }

    /// Absolute offset of the folder table.
    pub fn folder_table_offset(&self, options: &ReadOptions) -> Result<u64> {
        block_offset(
            self.file_store_base,
            self.header.folder_table_offset as u64,
            options.block_size,
        )
    }

    /// Absolute offset of the file table.
    pub fn file_table_offset(&self, options: &ReadOptions) -> Result<u64> {
        block_offset(
            self.file_store_base,
            self.header.fst_offset as u64,
            options.block_size,
        )
    }

    /// Absolute offset of a file's payload.
    pub fn payload_offset(&self, entry: &FileEntry, options: &ReadOptions) -> Result<u64> {
        block_offset(
            self.file_store_base,
            entry.block_offset as u64,
            options.block_size,
        )
    }

    /// Read the folder table.
    pub fn read_folders<R: Read + Seek + ?Sized>(
        &self,
        reader: &mut R,
        options: &ReadOptions,
    ) -> Result<FolderTable> {
        reader.seek(SeekFrom::Start(self.folder_table_offset(options)?))?;

        FolderTable::read(reader, options.endian)
    }

    /// Read the file table header and obtain a cursor over its entries.
    pub fn file_entries<R: Read + Seek + ?Sized>(
        &self,
        reader: &mut R,
        options: &ReadOptions,
    ) -> Result<FileTableCursor> {
        reader.seek(SeekFrom::Start(self.file_table_offset(options)?))?;

        FileTableCursor::read(reader, options.endian)
    }
}

/// Read a block map whose length is implied by its first entry.
fn read_block_map<R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
    endian: Endian,
) -> Result<Vec<BlockMapEntry>> {
    let first: BlockMapEntry = read_record_at(reader, offset, endian)?;

    let mut block_map = vec![first];
    block_map.extend(read_records::<BlockMapEntry, _>(
        reader,
        first.implied_count() - 1,
        endian,
    )?);

    Ok(block_map)
}

/// The folder table.
///
/// Folders are addressed with 1-based indices: index `i` is stored at
/// position `i - 1`. Index `0` is the root and has no entry.
#[derive(Clone, Debug, Default)]
pub struct FolderTable {
    /// The header record. Only its count field is meaningful.
    pub header: FolderEntry,

    /// The real folder records.
    pub folders: Vec<FolderEntry>,
}

impl FolderTable {
    /// Read the header record and the records it announces.
    pub fn read<R: Read + ?Sized>(reader: &mut R, endian: Endian) -> Result<Self> {
        let header: FolderEntry = read_record(reader, endian)?;
        let folders = read_records(reader, header.following_count() as u64, endian)?;

        debug!("read {} folder entries", folders.len());

        Ok(Self { header, folders })
    }

    /// Resolve the path of a folder index.
    pub fn resolve_path(&self, folder_index: u32) -> Result<String> {
        resolve_path(folder_index, &self.folders)
    }

    /// Resolve the full path of every folder, in table order.
    pub fn paths(&self) -> impl Iterator<Item = Result<String>> + '_ {
        (1..=self.folders.len() as u32).map(move |index| self.resolve_path(index))
    }
}

/// Resolve the path of the folder at a 1-based index.
///
/// Returns folder names from the root down, each followed by `/`, e.g.
/// `"dir/sub/"`. Index `0` (the root) resolves to an empty string. Folders
/// with empty names contribute nothing.
///
/// A parent chain longer than the folder count can only be a cycle and is
/// reported as [Error::UnsupportedLayout].
pub fn resolve_path(folder_index: u32, folders: &[FolderEntry]) -> Result<String> {
    let mut names = vec![];
    let mut index = folder_index;
    let mut hops = 0;

    while index != 0 {
        let folder = folders
            .get(index as usize - 1)
            .ok_or(Error::BadFolderIndex(index))?;

        if hops == folders.len() {
            return Err(Error::UnsupportedLayout(format!(
                "parent chain of folder {folder_index} does not reach the root"
            )));
        }
        hops += 1;

        let name = folder.string_name();
        validate_name(&name)?;
        if !name.is_empty() {
            names.push(name);
        }

        index = folder.parent_index;
    }

    Ok(names.iter().rev().map(|name| format!("{name}/")).collect())
}

/// Streams entries of the file table.
///
/// Entries are read one at a time. The cursor seeks to the next record
/// before every read, so the reader may be moved elsewhere between calls.
#[derive(Clone, Copy, Debug)]
pub struct FileTableCursor {
    header: FileEntry,
    endian: Endian,
    next_offset: u64,
    remaining: u32,
}

impl FileTableCursor {
    /// Read the file table header record at the reader's position.
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R, endian: Endian) -> Result<Self> {
        let header: FileEntry = read_record(reader, endian)?;

        if header.parent_index == 0 {
            return Err(Error::UnsupportedLayout(
                "file table root has a parent index of 0".into(),
            ));
        }

        let count = header.following_count();
        if count >= 1 && header.magic != 0 {
            return Err(Error::UnsupportedLayout(format!(
                "file table variant {:#x} is not supported",
                header.magic
            )));
        }

        debug!("file table announces {} entries", count);

        Ok(Self {
            header,
            endian,
            next_offset: reader.stream_position()?,
            remaining: count,
        })
    }

    /// The header record.
    pub fn header(&self) -> &FileEntry {
        &self.header
    }

    /// Number of entries not yet read.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Read the next entry, or `None` once all entries were read.
    pub fn next_entry<R: Read + Seek + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Option<Result<FileEntry>> {
        if self.remaining == 0 {
            return None;
        }

        let res = reader
            .seek(SeekFrom::Start(self.next_offset))
            .map_err(Error::from)
            .and_then(|_| read_record::<FileEntry, _>(reader, self.endian));

        match res {
            Ok(entry) => {
                self.remaining -= 1;
                self.next_offset += FileEntry::size_with(&self.endian) as u64;
                Some(Ok(entry))
            }
            Err(err) => {
                // A broken table can't be resumed.
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }
}
