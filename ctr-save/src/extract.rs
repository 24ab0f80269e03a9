// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Extracting save filesystem content to the host filesystem.

use {
    crate::{
        format::{validate_name, FileEntry},
        reader::offset_add,
        Error, ReadOptions, Result, SaveReader,
    },
    log::{debug, error, info, warn},
    std::{
        io::{Read, Seek, SeekFrom},
        path::{Path, PathBuf},
    },
};

/// Outcome of extracting a single save image.
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Paths of files that were written.
    pub extracted: Vec<PathBuf>,

    /// Entries that could not be extracted.
    ///
    /// Each is an [Error::EntryExtraction], except a final error for a file
    /// table record that could not be read.
    pub failures: Vec<Error>,
}

impl<R: Read + Seek> SaveReader<R> {
    /// Extract every file into a directory tree rooted at `output_root`.
    ///
    /// Failures of individual entries are logged and recorded in the
    /// report; extraction continues with the next entry. `source` names the
    /// image in log messages.
    pub fn extract_to(&mut self, output_root: &Path, source: &str) -> Result<ExtractReport> {
        let mut cursor = self.file_entries()?;
        let mut report = ExtractReport::default();

        while let Some(entry) = self.next_file_entry(&mut cursor) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // Later records can't be located past a broken one.
                    error!("error in file {}: file table unreadable: {}", source, err);
                    report.failures.push(err);
                    break;
                }
            };

            match self.extract_entry(&entry, output_root) {
                Ok(path) => {
                    debug!("{}: wrote {} ({} bytes)", source, path.display(), entry.size);
                    report.extracted.push(path);
                }
                Err(err) => {
                    let err = Error::EntryExtraction {
                        name: entry.string_name(),
                        source: Box::new(err),
                    };
                    error!("error in file {}: {}", source, err);
                    report.failures.push(err);
                }
            }
        }

        info!(
            "{}: extracted {} files ({} failed)",
            source,
            report.extracted.len(),
            report.failures.len()
        );

        Ok(report)
    }

    /// Extract a single file entry, returning the path written.
    ///
    /// The payload range is checked against the image length before any
    /// directory or file is created.
    pub fn extract_entry(&mut self, entry: &FileEntry, output_root: &Path) -> Result<PathBuf> {
        let name = entry.string_name();
        if name.is_empty() {
            return Err(Error::BadName(name, "file name cannot be empty"));
        }
        validate_name(&name)?;

        let offset = self.filesystem.payload_offset(entry, &self.options)?;
        if offset_add(offset, entry.size)? > self.len {
            return Err(Error::Truncated("file data"));
        }

        let dir = output_root.join(self.folders.resolve_path(entry.parent_index)?);
        std::fs::create_dir_all(&dir)?;
        let dest = dir.join(&name);

        self.reader.seek(SeekFrom::Start(offset))?;
        let mut fh = std::fs::File::create(&dest)?;
        let copied = std::io::copy(&mut (&mut self.reader).take(entry.size), &mut fh)?;

        if copied != entry.size {
            drop(fh);
            std::fs::remove_file(&dest)?;
            return Err(Error::Truncated("file data"));
        }

        Ok(dest)
    }
}

/// Extract a save image at a filesystem path.
pub fn extract_image(
    path: &Path,
    output_root: &Path,
    options: &ReadOptions,
) -> Result<ExtractReport> {
    let mut reader = SaveReader::open(path, *options)?;

    reader.extract_to(output_root, &path.display().to_string())
}

/// Outcome of processing one input of a batch.
#[derive(Debug)]
pub struct SourceOutcome {
    pub path: PathBuf,
    pub result: Result<ExtractReport>,
}

/// Outcome of [extract_batch].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<SourceOutcome>,
}

impl BatchReport {
    /// Total number of files written.
    pub fn extracted_count(&self) -> usize {
        self.reports().map(|r| r.extracted.len()).sum()
    }

    /// Total number of entries that failed to extract.
    pub fn failed_entry_count(&self) -> usize {
        self.reports().map(|r| r.failures.len()).sum()
    }

    /// Inputs that were skipped entirely, with the reason.
    pub fn skipped(&self) -> impl Iterator<Item = (&Path, &Error)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(_) => None,
            Err(err) => Some((o.path.as_path(), err)),
        })
    }

    fn reports(&self) -> impl Iterator<Item = &ExtractReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }
}

/// Extract many save images into one output directory.
///
/// Each input is processed to completion before the next one is opened.
/// An input that can't be decoded is logged and skipped; it never stops
/// the batch.
pub fn extract_batch<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
    output_root: &Path,
    options: &ReadOptions,
) -> BatchReport {
    let mut report = BatchReport::default();

    for path in paths {
        let path = path.as_ref();
        let result = extract_image(path, output_root, options);

        match &result {
            Ok(_) => {}
            Err(err) if err.is_not_save_filesystem() => {
                info!("{}: not a legal SAVE filesystem", path.display());
            }
            Err(err) => {
                warn!("{}: {}; skipping", path.display(), err);
            }
        }

        report.outcomes.push(SourceOutcome {
            path: path.to_path_buf(),
            result,
        });
    }

    report
}
