// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reading fixed-layout records from a stream.

use {
    crate::{format::Record, Error, Result},
    scroll::{Endian, Pread},
    std::io::{ErrorKind, Read, Seek, SeekFrom},
};

/// Upper bound on speculative allocations driven by on-disk counts.
const MAX_PREALLOCATED_RECORDS: usize = 4096;

fn map_read_error(err: std::io::Error, what: &'static str) -> Error {
    if err.kind() == ErrorKind::UnexpectedEof {
        Error::Truncated(what)
    } else {
        Error::Io(err)
    }
}

/// Read a record at the reader's current position.
///
/// Consumes exactly the record's size. Field values are not validated.
pub fn read_record<T: Record, R: Read + ?Sized>(reader: &mut R, endian: Endian) -> Result<T> {
    let mut buf = vec![0u8; T::size_with(&endian)];
    reader
        .read_exact(&mut buf)
        .map_err(|e| map_read_error(e, T::NAME))?;

    Ok(buf.pread_with(0, endian)?)
}

/// Read a record at an absolute offset.
pub fn read_record_at<T: Record, R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
    endian: Endian,
) -> Result<T> {
    reader.seek(SeekFrom::Start(offset))?;
    read_record(reader, endian)
}

/// Read a single 32-bit word.
pub fn read_u32<R: Read + ?Sized>(reader: &mut R, endian: Endian) -> Result<u32> {
    read_record(reader, endian)
}

/// Read `count` consecutive records.
pub fn read_records<T: Record, R: Read + ?Sized>(
    reader: &mut R,
    count: u64,
    endian: Endian,
) -> Result<Vec<T>> {
    let mut records = Vec::with_capacity((count as usize).min(MAX_PREALLOCATED_RECORDS));

    for _ in 0..count {
        records.push(read_record(reader, endian)?);
    }

    Ok(records)
}

/// Add a relative offset to a base, failing on overflow.
pub fn offset_add(base: u64, delta: u64) -> Result<u64> {
    base.checked_add(delta)
        .ok_or_else(|| Error::UnsupportedLayout(format!("offset {base:#x} + {delta:#x} overflows")))
}

/// Compute `base + blocks * block_size`, failing on overflow.
pub fn block_offset(base: u64, blocks: u64, block_size: u64) -> Result<u64> {
    let delta = blocks.checked_mul(block_size).ok_or_else(|| {
        Error::UnsupportedLayout(format!("block offset {blocks:#x} overflows"))
    })?;

    offset_add(base, delta)
}

/// Obtain the total length of a seekable stream, preserving its position.
pub fn stream_len<R: Seek + ?Sized>(reader: &mut R) -> Result<u64> {
    let position = reader.stream_position()?;
    let len = reader.seek(SeekFrom::End(0))?;

    if position != len {
        reader.seek(SeekFrom::Start(position))?;
    }

    Ok(len)
}
