// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Outer container parsing.
//!
//! This covers everything between the image header and the start of the
//! save partition's data region: the `DISA` descriptor, the active
//! partition table and the `DPFS` redundancy tables.

use {
    crate::{
        format::{
            ContainerDescriptor, DedupDescriptor, IntegrityDescriptor, PartitionDescriptor,
            DIFI_MAGIC, DPFS_MAGIC, IVFC_MAGIC,
        },
        reader::{offset_add, read_record, read_record_at, read_u32},
        Error, ReadOptions, Result,
    },
    log::debug,
    scroll::Endian,
    std::io::{Read, Seek, SeekFrom},
};

/// The container descriptors of an image.
#[derive(Clone, Copy, Debug)]
pub struct ContainerLayout {
    /// The outer `DISA` descriptor.
    pub container: ContainerDescriptor,

    /// Absolute offset of the partition table that was read.
    pub table_offset: u64,

    /// The `DIFI` descriptor of the active partition table.
    pub partition: PartitionDescriptor,

    /// The `IVFC` descriptor of the active partition table.
    pub integrity: IntegrityDescriptor,

    /// The `DPFS` descriptor of the active partition table.
    pub dedup: DedupDescriptor,
}

impl ContainerLayout {
    /// Parse the container descriptors.
    ///
    /// The reader is positioned according to [ReadOptions::header_size]
    /// before the `DISA` record is read.
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R, options: &ReadOptions) -> Result<Self> {
        let container: ContainerDescriptor =
            read_record_at(reader, options.header_size, options.endian)?;

        if !container.has_valid_magic() {
            return Err(Error::FormatMismatch("DISA"));
        }

        let table_offset = container.selected_table_offset();
        debug!(
            "active table flag {:#x} selects partition table at {:#x}",
            container.active_table, table_offset
        );
        reader.seek(SeekFrom::Start(table_offset))?;

        if container.table_size != 1 {
            return Err(Error::UnsupportedLayout(format!(
                "partition table size is {}",
                container.table_size
            )));
        }

        let partition: PartitionDescriptor = read_record(reader, options.endian)?;
        let integrity: IntegrityDescriptor = read_record(reader, options.endian)?;
        let dedup: DedupDescriptor = read_record(reader, options.endian)?;

        for (name, magic, expected) in [
            ("DIFI", partition.magic, DIFI_MAGIC),
            ("IVFC", integrity.magic, IVFC_MAGIC),
            ("DPFS", dedup.magic, DPFS_MAGIC),
        ] {
            if magic != expected {
                debug!("{} descriptor has unexpected magic {:02x?}", name, magic);
            }
        }

        Ok(Self {
            container,
            table_offset,
            partition,
            integrity,
            dedup,
        })
    }

    /// Locate the data region of the save partition.
    ///
    /// The two `DPFS` tables are skipped using their layout alone; their
    /// content is only sampled for diagnostics.
    pub fn resolve_payload<R: Read + Seek + ?Sized>(
        &self,
        reader: &mut R,
        options: &ReadOptions,
    ) -> Result<PayloadRegion> {
        let partition_base = self.container.save_partition_offset;

        let probe = match DedupProbe::read(reader, partition_base, &self.dedup, options.endian) {
            Ok(probe) => {
                debug!("dedup probe words: {:x?}", probe);
                Some(probe)
            }
            Err(err) => {
                debug!("unable to sample dedup tables: {}", err);
                None
            }
        };

        let payload_start = offset_add(partition_base, self.dedup.data_offset)?;
        reader.seek(SeekFrom::Start(payload_start))?;
        debug!(
            "save partition at {:#x}; payload starts at {:#x}",
            partition_base, payload_start
        );

        Ok(PayloadRegion {
            partition_base,
            payload_start,
            probe,
        })
    }
}

/// Flag words sampled from the `DPFS` tables.
///
/// These don't influence decoding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DedupProbe {
    pub first_flag: u32,
    pub first_flag_copy: u32,
    pub second_flag: u32,
    pub second_flag_copy: u32,
}

impl DedupProbe {
    fn read<R: Read + Seek + ?Sized>(
        reader: &mut R,
        partition_base: u64,
        dedup: &DedupDescriptor,
        endian: Endian,
    ) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset_add(
            partition_base,
            dedup.first_table_offset,
        )?))?;

        let first_flag = read_u32(reader, endian)?;
        let first_flag_copy = read_u32(reader, endian)?;
        let second_flag = read_u32(reader, endian)?;

        let skip = i64::try_from(dedup.second_table_length)
            .ok()
            .and_then(|len| len.checked_sub(4))
            .ok_or_else(|| {
                Error::UnsupportedLayout(format!(
                    "second DPFS table length {:#x} out of range",
                    dedup.second_table_length
                ))
            })?;
        reader.seek(SeekFrom::Current(skip))?;

        let second_flag_copy = read_u32(reader, endian)?;

        Ok(Self {
            first_flag,
            first_flag_copy,
            second_flag,
            second_flag_copy,
        })
    }
}

/// Resolved location of the save partition's data.
#[derive(Clone, Copy, Debug)]
pub struct PayloadRegion {
    /// Absolute offset of the save partition.
    pub partition_base: u64,

    /// Absolute offset of the partition's data region.
    pub payload_start: u64,

    /// Diagnostic words from the dedup tables, if they could be read.
    pub probe: Option<DedupProbe>,
}
