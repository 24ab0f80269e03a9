// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synthetic save image construction for tests.

use {
    crate::{container::DedupProbe, format::*},
    scroll::{ctx::SizeWith, Endian, Pwrite},
    std::path::{Path, PathBuf},
};

pub(crate) const TABLE_PRIMARY_OFFSET: u64 = 0x200;
pub(crate) const TABLE_SECONDARY_OFFSET: u64 = 0x400;
const PARTITION_BASE: u64 = 0x1000;
const DATA_OFFSET: u64 = 0x100;
const FILESYSTEM_OFFSET: u64 = 0x100;
const FILE_STORE_OFFSET: u64 = 0x1000;

const FILE_MAP_OFFSET: u64 = 0x100;
const FOLDER_MAP_OFFSET: u64 = 0x140;
const BLOCK_MAP_OFFSET: u64 = 0x180;

struct TestFile {
    parent_index: u32,
    name: String,
    data: Vec<u8>,
    size: u64,
    block_offset: Option<u32>,
}

/// Serializes save images with a fixed, valid layout.
///
/// Folder table at block 0, file table after it, file data after that.
pub(crate) struct ImageBuilder {
    endian: Endian,
    header_size: u64,
    block_size: u64,
    active_table: u32,
    write_inactive_table: bool,
    container_magic: [u8; 4],
    save_magic: [u8; 4],
    table_size: u64,
    dedup_first_table_offset: u64,
    block_map_end: u32,
    folders: Vec<(u32, String)>,
    files: Vec<TestFile>,
    file_table_header_parent: Option<u32>,
    file_table_magic: u32,
}

impl ImageBuilder {
    pub const PROBE: DedupProbe = DedupProbe {
        first_flag: 0x1111_0001,
        first_flag_copy: 0x1111_0002,
        second_flag: 0x2222_0001,
        second_flag_copy: 0x2222_0002,
    };

    pub const FILE_MAP: [u32; 2] = [0xf00d_0001, 0xf00d_0002];
    pub const FOLDER_MAP: [u32; 2] = [0xd1d1_0001, 0xd1d1_0002];

    pub fn new() -> Self {
        Self {
            endian: scroll::LE,
            header_size: IMAGE_HEADER_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            active_table: 1,
            write_inactive_table: true,
            container_magic: DISA_MAGIC,
            save_magic: SAVE_MAGIC,
            table_size: 1,
            dedup_first_table_offset: 0,
            block_map_end: 0,
            folders: vec![],
            files: vec![],
            file_table_header_parent: None,
            file_table_magic: 0,
        }
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn header_size(mut self, size: u64) -> Self {
        self.header_size = size;
        self
    }

    pub fn block_size(mut self, size: u64) -> Self {
        self.block_size = size;
        self
    }

    pub fn active_table(mut self, value: u32) -> Self {
        self.active_table = value;
        self
    }

    /// Leave the table not selected by the active flag zero filled.
    pub fn zero_inactive_table(mut self) -> Self {
        self.write_inactive_table = false;
        self
    }

    pub fn container_magic(mut self, magic: [u8; 4]) -> Self {
        self.container_magic = magic;
        self
    }

    pub fn save_magic(mut self, magic: [u8; 4]) -> Self {
        self.save_magic = magic;
        self
    }

    pub fn table_size(mut self, size: u64) -> Self {
        self.table_size = size;
        self
    }

    /// Only changes the descriptor; probe words stay at the partition base.
    pub fn dedup_first_table_offset(mut self, offset: u64) -> Self {
        self.dedup_first_table_offset = offset;
        self
    }

    pub fn block_map_end(mut self, end_block: u32) -> Self {
        self.block_map_end = end_block;
        self
    }

    pub fn folder(mut self, parent_index: u32, name: &str) -> Self {
        self.folders.push((parent_index, name.to_string()));
        self
    }

    pub fn file(self, parent_index: u32, name: &str, data: &[u8]) -> Self {
        self.file_with_size(parent_index, name, data, data.len() as u64)
    }

    /// Add a file whose recorded size differs from its stored data.
    pub fn file_with_size(mut self, parent_index: u32, name: &str, data: &[u8], size: u64) -> Self {
        self.files.push(TestFile {
            parent_index,
            name: name.to_string(),
            data: data.to_vec(),
            size,
            block_offset: None,
        });
        self
    }

    /// Add a file with an explicit block offset. Its data isn't stored.
    pub fn file_at_block(
        mut self,
        parent_index: u32,
        name: &str,
        data: &[u8],
        block_offset: u32,
    ) -> Self {
        self.files.push(TestFile {
            parent_index,
            name: name.to_string(),
            data: data.to_vec(),
            size: data.len() as u64,
            block_offset: Some(block_offset),
        });
        self
    }

    pub fn file_table_header_parent(mut self, value: u32) -> Self {
        self.file_table_header_parent = Some(value);
        self
    }

    pub fn file_table_magic(mut self, value: u32) -> Self {
        self.file_table_magic = value;
        self
    }

    /// Flip the active table flag of a little-endian image with a default header.
    pub fn flip_active_flag(mut image: Vec<u8>) -> Vec<u8> {
        image[IMAGE_HEADER_SIZE as usize + 0x68] ^= 1;
        image
    }

    pub fn partition_base(&self) -> u64 {
        PARTITION_BASE
    }

    pub fn payload_start(&self) -> u64 {
        PARTITION_BASE + DATA_OFFSET
    }

    pub fn filesystem_base(&self) -> u64 {
        self.payload_start() + FILESYSTEM_OFFSET
    }

    pub fn file_store_base(&self) -> u64 {
        self.filesystem_base() + FILE_STORE_OFFSET
    }

    fn blocks_for(&self, len: u64) -> u64 {
        ((len + self.block_size - 1) / self.block_size).max(1)
    }

    fn folder_table_blocks(&self) -> u64 {
        let len = (self.folders.len() as u64 + 1) * FolderEntry::size_with(&self.endian) as u64;
        self.blocks_for(len)
    }

    fn file_table_blocks(&self) -> u64 {
        let len = (self.files.len() as u64 + 1) * FileEntry::size_with(&self.endian) as u64;
        self.blocks_for(len)
    }

    /// Absolute offset of the file table.
    pub fn file_table_offset(&self) -> u64 {
        self.file_store_base() + self.folder_table_blocks() * self.block_size
    }

    pub fn build(&self) -> Vec<u8> {
        let endian = self.endian;
        let block = self.block_size;
        let fsb = self.file_store_base();

        let folder_table_blocks = self.folder_table_blocks();
        let file_table_block = folder_table_blocks;
        let first_data_block = file_table_block + self.file_table_blocks();

        let mut next_block = first_data_block;
        let placements = self
            .files
            .iter()
            .map(|file| match file.block_offset {
                Some(block_offset) => (block_offset, false),
                None => {
                    let placed = next_block;
                    next_block += self.blocks_for(file.data.len() as u64);
                    (placed as u32, true)
                }
            })
            .collect::<Vec<_>>();

        let image_len = fsb + next_block * block;
        let mut image = vec![0u8; image_len as usize];
        let data = image.as_mut_slice();

        let disa = ContainerDescriptor {
            magic: self.container_magic,
            table_size: self.table_size,
            primary_table_offset: TABLE_PRIMARY_OFFSET,
            secondary_table_offset: TABLE_SECONDARY_OFFSET,
            table_length: 0x200,
            save_partition_offset: PARTITION_BASE,
            save_partition_length: image_len - PARTITION_BASE,
            active_table: self.active_table,
            ..Default::default()
        };
        data.pwrite_with(disa, self.header_size as usize, endian)
            .expect("write DISA");

        let selected = disa.selected_table_offset();
        for table_offset in [TABLE_PRIMARY_OFFSET, TABLE_SECONDARY_OFFSET] {
            if table_offset == selected || self.write_inactive_table {
                self.write_partition_table(data, table_offset as usize);
            }
        }

        let probe = Self::PROBE;
        let base = PARTITION_BASE as usize;
        for (offset, word) in [
            (0, probe.first_flag),
            (4, probe.first_flag_copy),
            (8, probe.second_flag),
            (0x18, probe.second_flag_copy),
        ] {
            data.pwrite_with(word, base + offset, endian)
                .expect("write probe word");
        }

        let fs_base = self.filesystem_base() as usize;
        let header = FilesystemHeader {
            magic: self.save_magic,
            folder_map_offset: FOLDER_MAP_OFFSET,
            folder_map_count: Self::FOLDER_MAP.len() as u32,
            file_map_offset: FILE_MAP_OFFSET,
            file_map_count: Self::FILE_MAP.len() as u32,
            block_map_offset: BLOCK_MAP_OFFSET,
            block_map_count: self.block_map_end + 2,
            file_store_offset: FILE_STORE_OFFSET,
            folder_table_offset: 0,
            fst_offset: file_table_block as u32,
            ..Default::default()
        };
        data.pwrite_with(header, fs_base, endian)
            .expect("write SAVE header");

        let offset = &mut (fs_base + FILE_MAP_OFFSET as usize);
        for word in Self::FILE_MAP {
            data.gwrite_with(word, offset, endian).expect("write file map");
        }
        let offset = &mut (fs_base + FOLDER_MAP_OFFSET as usize);
        for word in Self::FOLDER_MAP {
            data.gwrite_with(word, offset, endian).expect("write folder map");
        }
        let offset = &mut (fs_base + BLOCK_MAP_OFFSET as usize);
        for i in 0..self.block_map_end + 2 {
            let entry = if i == 0 {
                BlockMapEntry {
                    start_block: 0,
                    end_block: self.block_map_end,
                }
            } else {
                BlockMapEntry {
                    start_block: i,
                    end_block: i,
                }
            };
            data.gwrite_with(entry, offset, endian)
                .expect("write block map");
        }

        let offset = &mut (fsb as usize);
        let folder_header = FolderEntry {
            parent_index: self.folders.len() as u32 + 1,
            ..Default::default()
        };
        data.gwrite_with(folder_header, offset, endian)
            .expect("write folder header");
        for (i, (parent_index, name)) in self.folders.iter().enumerate() {
            let entry = FolderEntry {
                parent_index: *parent_index,
                name: name_to_bytes(name),
                index: i as u32 + 1,
                ..Default::default()
            };
            data.gwrite_with(entry, offset, endian)
                .expect("write folder entry");
        }

        let offset = &mut ((fsb + file_table_block * block) as usize);
        let file_header = FileEntry {
            parent_index: self
                .file_table_header_parent
                .unwrap_or(self.files.len() as u32 + 1),
            magic: self.file_table_magic,
            ..Default::default()
        };
        data.gwrite_with(file_header, offset, endian)
            .expect("write file header");
        for (i, (file, (block_offset, _))) in self.files.iter().zip(&placements).enumerate() {
            let entry = FileEntry {
                parent_index: file.parent_index,
                name: name_to_bytes(&file.name),
                index: i as u32 + 1,
                block_offset: *block_offset,
                size: file.size,
                ..Default::default()
            };
            data.gwrite_with(entry, offset, endian)
                .expect("write file entry");
        }

        for (file, (block_offset, stored)) in self.files.iter().zip(&placements) {
            if *stored {
                let start = (fsb + *block_offset as u64 * block) as usize;
                data[start..start + file.data.len()].copy_from_slice(&file.data);
            }
        }

        image
    }

    fn write_partition_table(&self, data: &mut [u8], mut table_offset: usize) {
        let endian = self.endian;

        let integrity_size = IntegrityDescriptor::size_with(&endian) as u64;
        let partition_size = PartitionDescriptor::size_with(&endian) as u64;
        let partition = PartitionDescriptor {
            magic: DIFI_MAGIC,
            version: 0x10000,
            integrity_offset: partition_size,
            integrity_size,
            dedup_offset: partition_size + integrity_size,
            dedup_size: DedupDescriptor::size_with(&endian) as u64,
            ..Default::default()
        };
        let integrity = IntegrityDescriptor {
            magic: IVFC_MAGIC,
            version: 0x20000,
            filesystem_offset: FILESYSTEM_OFFSET,
            filesystem_block: 12,
            descriptor_size: integrity_size,
            ..Default::default()
        };
        let dedup = DedupDescriptor {
            magic: DPFS_MAGIC,
            version: 0x10000,
            first_table_offset: self.dedup_first_table_offset,
            first_table_length: 0x10,
            second_table_offset: 0x10,
            second_table_length: 0x10,
            data_offset: DATA_OFFSET,
            ..Default::default()
        };

        let offset = &mut table_offset;
        data.gwrite_with(partition, offset, endian)
            .expect("write DIFI");
        data.gwrite_with(integrity, offset, endian)
            .expect("write IVFC");
        data.gwrite_with(dedup, offset, endian).expect("write DPFS");
    }
}

/// Recursively collect regular files under a directory.
pub(crate) fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = vec![];
    if !root.exists() {
        return Ok(files);
    }

    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            files.extend(collect_files(&path)?);
        } else {
            files.push(path);
        }
    }

    Ok(files)
}
