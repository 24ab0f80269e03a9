// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("(de)serialization error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("{0} magic not found")]
    FormatMismatch(&'static str),

    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),

    #[error("truncated data reading {0}")]
    Truncated(&'static str),

    #[error("folder index {0} out of range")]
    BadFolderIndex(u32),

    #[error("illegal entry name \"{0}\": {1}")]
    BadName(String, &'static str),

    #[error("error extracting \"{name}\": {source}")]
    EntryExtraction {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the input simply isn't a save filesystem.
    ///
    /// Plenty of files in a NAND data directory are not save images, so
    /// callers usually report this quietly.
    pub fn is_not_save_filesystem(&self) -> bool {
        matches!(self, Self::FormatMismatch(magic) if *magic == "SAVE")
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
