// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use ctr_save::{extract_batch, BatchReport, ReadOptions, SaveReader};
use log::{info, LevelFilter};
use std::path::{Path, PathBuf};

/// Parse an integer given in decimal or `0x` prefixed hex.
fn parse_size(s: &str) -> Result<u64> {
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)?
    } else {
        s.parse::<u64>()?
    };

    if value == 0 {
        Err(anyhow!("value must be nonzero"))
    } else {
        Ok(value)
    }
}

fn parse_header_size(s: &str) -> Result<u64> {
    if s == "0" {
        Ok(0)
    } else {
        parse_size(s)
    }
}

fn print_summary(report: &BatchReport) {
    for (path, err) in report.skipped() {
        println!("skipped {}: {}", path.display(), err);
    }

    println!(
        "{} files extracted from {} images; {} images skipped; {} files failed",
        report.extracted_count(),
        report.outcomes.len() - report.skipped().count(),
        report.skipped().count(),
        report.failed_entry_count()
    );
}

/// Regular files directly inside a directory, sorted by name.
fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];

    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();

    Ok(files)
}

trait CliCommand {
    fn run(&self) -> Result<()>;
}

#[derive(Args)]
struct ReadArgs {
    /// Bytes preceding the DISA descriptor.
    #[arg(long, default_value = "0x100", value_parser = parse_header_size)]
    header_size: u64,

    /// Size of a block unit in the inner filesystem.
    #[arg(long, default_value = "0x1000", value_parser = parse_size)]
    block_size: u64,

    /// Decode records as big-endian.
    #[arg(long)]
    big_endian: bool,
}

impl ReadArgs {
    fn options(&self) -> ReadOptions {
        let endian = if self.big_endian {
            scroll::BE
        } else {
            scroll::LE
        };

        ReadOptions::default()
            .with_header_size(self.header_size)
            .with_block_size(self.block_size)
            .with_endian(endian)
    }

    fn open(&self, path: &Path) -> Result<SaveReader<std::io::BufReader<std::fs::File>>> {
        SaveReader::open(path, self.options())
            .with_context(|| format!("opening {}", path.display()))
    }
}

#[derive(Parser)]
struct Extract {
    #[command(flatten)]
    read: ReadArgs,

    /// Directory holding one subdirectory of save images per title.
    ///
    /// Typically `<nand>/data/<id>/sysdata`.
    input: PathBuf,

    /// Directory to extract into.
    output: PathBuf,
}

impl CliCommand for Extract {
    fn run(&self) -> Result<()> {
        let mut dirs = vec![];
        for entry in std::fs::read_dir(&self.input)
            .with_context(|| format!("reading {}", self.input.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let options = self.read.options();
        let mut total = BatchReport::default();

        for dir in dirs {
            let name = dir
                .file_name()
                .ok_or_else(|| anyhow!("{} has no file name", dir.display()))?
                .to_string_lossy();
            let target = self.output.join(format!("{name}00000000"));
            std::fs::create_dir_all(&target)?;

            info!("extracting {} to {}", dir.display(), target.display());
            let report = extract_batch(sorted_files(&dir)?, &target, &options);
            total.outcomes.extend(report.outcomes);
        }

        print_summary(&total);

        Ok(())
    }
}

#[derive(Parser)]
struct ExtractImage {
    #[command(flatten)]
    read: ReadArgs,

    /// Directory to extract into.
    #[arg(long)]
    output: PathBuf,

    /// Save images to extract.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

impl CliCommand for ExtractImage {
    fn run(&self) -> Result<()> {
        let report = extract_batch(&self.images, &self.output, &self.read.options());
        print_summary(&report);

        Ok(())
    }
}

#[derive(Parser)]
struct Inspect {
    #[command(flatten)]
    read: ReadArgs,

    /// Save image to inspect.
    image: PathBuf,
}

impl CliCommand for Inspect {
    fn run(&self) -> Result<()> {
        let reader = self.read.open(&self.image)?;

        let layout = reader.layout();
        println!("{:#?}", layout.container);
        println!("partition table at {:#x}", layout.table_offset);
        println!("{:#?}", layout.partition);
        println!("{:#?}", layout.integrity);
        println!("{:#?}", layout.dedup);

        let payload = reader.payload();
        println!("save partition base: {:#x}", payload.partition_base);
        println!("payload start: {:#x}", payload.payload_start);
        match &payload.probe {
            Some(probe) => println!("{:#x?}", probe),
            None => println!("dedup probe words unavailable"),
        }

        let fs = reader.filesystem();
        println!("SAVE filesystem at {:#x}", fs.base);
        println!("{:#?}", fs.header);
        println!("file store at {:#x}", fs.file_store_base);
        println!("file map entries: {}", fs.file_map.len());
        println!("folder map entries: {}", fs.folder_map.len());
        println!("block map entries: {}", fs.block_map.len());
        println!("folders: {}", reader.folders().folders.len());

        Ok(())
    }
}

#[derive(Parser)]
struct Ls {
    #[command(flatten)]
    read: ReadArgs,

    /// Save image to list.
    image: PathBuf,
}

impl CliCommand for Ls {
    fn run(&self) -> Result<()> {
        let mut reader = self.read.open(&self.image)?;

        for (i, path) in reader.folders().paths().enumerate() {
            match path {
                Ok(path) if path.is_empty() => {}
                Ok(path) => println!("{path}"),
                Err(err) => eprintln!("folder {}: {}", i + 1, err),
            }
        }

        for entry in reader.list_files()? {
            match reader.file_path(&entry) {
                Ok(path) => println!("{:>12} {:>8} {}", entry.size, entry.block_offset, path),
                Err(err) => eprintln!("file {}: {}", entry.string_name(), err),
            }
        }

        Ok(())
    }
}

#[derive(Subcommand)]
enum Subcommands {
    /// Extract every save image of a NAND sysdata directory.
    ///
    /// Each subdirectory of the input is extracted into
    /// `<output>/<subdirectory>00000000/`.
    Extract(Extract),
    /// Extract save images into a directory.
    ExtractImage(ExtractImage),
    /// Print the decoded container and filesystem headers of a save image.
    Inspect(Inspect),
    /// List folders and files in a save image.
    Ls(Ls),
}

impl Subcommands {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Self::Extract(c) => c,
            Self::ExtractImage(c) => c,
            Self::Inspect(c) => c,
            Self::Ls(c) => c,
        }
    }
}

#[derive(Parser)]
struct Cli {
    /// Increase logging verbosity. Can be specified multiple times
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Subcommands,
}

impl Cli {
    fn run() -> Result<()> {
        let cli = Self::parse();

        let log_level = match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(log_level.as_str()),
        );

        builder.init();

        let command = cli.command.as_cli_command();

        command.run()
    }
}

fn main() {
    let exit_code = match Cli::run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    };

    std::process::exit(exit_code)
}
