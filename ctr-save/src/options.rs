// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Settings controlling how save images are decoded.

use {
    crate::format::{DEFAULT_BLOCK_SIZE, IMAGE_HEADER_SIZE},
    scroll::Endian,
};

/// Decode settings for a save image.
///
/// The defaults match images found in NAND dumps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadOptions {
    /// Number of bytes before the container descriptor.
    pub header_size: u64,

    /// Size of a block unit in the inner filesystem.
    pub block_size: u64,

    /// Byte order of every on-disk record.
    pub endian: Endian,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            header_size: IMAGE_HEADER_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            endian: scroll::LE,
        }
    }
}

impl ReadOptions {
    pub fn with_header_size(mut self, header_size: u64) -> Self {
        self.header_size = header_size;
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Decode records as big-endian instead of little-endian.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }
}
