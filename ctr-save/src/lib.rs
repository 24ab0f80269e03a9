// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Decode save-data containers found in console NAND dumps.
//!
//! Save images wrap a small flat filesystem in several layers of
//! descriptors: an outer `DISA` container, a pair of redundant partition
//! tables, a deduplication layer and an integrity hash tree. This crate
//! walks those layers to find the inner `SAVE` filesystem and extracts the
//! files stored in it. Hashes are never verified; only the layout of the
//! hash and redundancy tables is used.
//!
//! The gateway to reading is [SaveReader]. For bulk extraction see
//! [extract_image] and [extract_batch].
//!
//! See the [format] module for what is known about the on-disk structures.

pub mod container;
mod error;
pub mod extract;
pub mod filesystem;
pub mod format;
mod options;
pub mod reader;
#[cfg(test)]
mod testutil;

pub use crate::{
    error::{Error, Result},
    extract::{extract_batch, extract_image, BatchReport, ExtractReport, SourceOutcome},
    options::ReadOptions,
};

use {
    crate::{
        container::{ContainerLayout, PayloadRegion},
        filesystem::{FileTableCursor, FolderTable, SaveFilesystem},
        format::FileEntry,
        reader::stream_len,
    },
    std::{
        fs::File,
        io::{BufReader, Read, Seek},
        path::Path,
    },
};

/// A reader for a single save image.
///
/// Constructing an instance parses everything up to and including the
/// folder table. File entries are streamed on demand.
pub struct SaveReader<R: Read + Seek> {
    reader: R,
    options: ReadOptions,
    len: u64,
    layout: ContainerLayout,
    payload: PayloadRegion,
    filesystem: SaveFilesystem,
    folders: FolderTable,
}

impl SaveReader<BufReader<File>> {
    pub fn open(path: &Path, options: ReadOptions) -> Result<Self> {
        let r = BufReader::new(File::open(path)?);
        Self::new(r, options)
    }
}

impl<R: Read + Seek> SaveReader<R> {
    pub fn new(mut reader: R, options: ReadOptions) -> Result<Self> {
        let len = stream_len(&mut reader)?;

        let layout = ContainerLayout::read(&mut reader, &options)?;
        let payload = layout.resolve_payload(&mut reader, &options)?;
        let filesystem =
            SaveFilesystem::read(&mut reader, &payload, &layout.integrity, &options)?;
        let folders = filesystem.read_folders(&mut reader, &options)?;

        Ok(Self {
            reader,
            options,
            len,
            layout,
            payload,
            filesystem,
            folders,
        })
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Total length of the underlying image.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn layout(&self) -> &ContainerLayout {
        &self.layout
    }

    pub fn payload(&self) -> &PayloadRegion {
        &self.payload
    }

    pub fn filesystem(&self) -> &SaveFilesystem {
        &self.filesystem
    }

    pub fn folders(&self) -> &FolderTable {
        &self.folders
    }

    /// Obtain a cursor over the file table.
    pub fn file_entries(&mut self) -> Result<FileTableCursor> {
        self.filesystem.file_entries(&mut self.reader, &self.options)
    }

    /// Read the next entry of a cursor obtained from [Self::file_entries].
    pub fn next_file_entry(&mut self, cursor: &mut FileTableCursor) -> Option<Result<FileEntry>> {
        cursor.next_entry(&mut self.reader)
    }

    /// Read every file entry.
    pub fn list_files(&mut self) -> Result<Vec<FileEntry>> {
        let mut cursor = self.file_entries()?;
        let mut files = Vec::with_capacity(cursor.remaining() as usize);

        while let Some(entry) = self.next_file_entry(&mut cursor) {
            files.push(entry?);
        }

        Ok(files)
    }

    /// Resolve the path of a file relative to the filesystem root.
    pub fn file_path(&self, entry: &FileEntry) -> Result<String> {
        let dir = self.folders.resolve_path(entry.parent_index)?;

        Ok(format!("{}{}", dir, entry.string_name()))
    }

    /// Resolve the full path of every folder.
    pub fn folder_paths(&self) -> Result<Vec<String>> {
        self.folders.paths().collect()
    }

    /// Obtain the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}
