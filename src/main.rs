//! recavc CLI - lossless H.264 re-compression
//!
//! A command-line tool for losslessly shrinking and restoring files
//! containing H.264 video streams.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use recavc_lib::archive::Archive;
use recavc_lib::driver::{compress, decompress};
use recavc_lib::hooks::PassthroughParser;
use recavc_lib::{init, Config};

#[derive(Parser)]
#[command(name = "recavc")]
#[command(about = "Lossless H.264/AVC re-compressor", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a recavc archive
    Compress {
        /// Input file path
        input: PathBuf,

        /// Output file path (stdout if omitted)
        output: Option<PathBuf>,
    },

    /// Restore the original file from a recavc archive
    Decompress {
        /// Input archive path
        input: PathBuf,

        /// Output file path (stdout if omitted)
        output: Option<PathBuf>,
    },

    /// Compress, decompress, and verify the result matches the input
    Roundtrip {
        /// Input file path
        input: PathBuf,

        /// Where to write the verified archive (discarded if omitted)
        output: Option<PathBuf>,
    },

    /// Run roundtrip over every file in a directory and report ratios
    Test {
        /// Directory of input files
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage problems exit 1, like every other failure.
            let _ = err.print();
            std::process::exit(1);
        }
    };

    init(Config { verbose: cli.verbose, debug: cli.debug })?;

    let status = match cli.command {
        Commands::Compress { input, output } => cmd_compress(&input, output.as_deref())?,
        Commands::Decompress { input, output } => cmd_decompress(&input, output.as_deref())?,
        Commands::Roundtrip { input, output } => cmd_roundtrip(&input, output.as_deref())?,
        Commands::Test { input } => cmd_test(&input)?,
    };
    std::process::exit(status);
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(bytes)?;
        }
    }
    Ok(())
}

fn cmd_compress(input: &Path, output: Option<&Path>) -> anyhow::Result<i32> {
    let original =
        fs::read(input).with_context(|| format!("opening {}", input.display()))?;
    let mut parser = PassthroughParser::new();
    let archive = compress(&original, &mut parser)?;
    let bytes = archive.to_bytes()?;
    info!(
        original = original.len(),
        compressed = bytes.len(),
        "compressed {}",
        input.display()
    );
    write_output(output, &bytes)?;
    Ok(0)
}

fn cmd_decompress(input: &Path, output: Option<&Path>) -> anyhow::Result<i32> {
    let bytes = fs::read(input).with_context(|| format!("opening {}", input.display()))?;
    let archive = Archive::from_bytes(&bytes)?;
    let mut parser = PassthroughParser::new();
    let original = decompress(archive, &mut parser)?;
    write_output(output, &original)?;
    Ok(0)
}

/// Compress and decompress `input`, verifying a byte-exact roundtrip.
/// Returns the archive bytes on success.
fn roundtrip_file(input: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    let original =
        fs::read(input).with_context(|| format!("opening {}", input.display()))?;

    let mut parser = PassthroughParser::new();
    let archive = compress(&original, &mut parser)?;
    let compressed = archive.to_bytes()?;

    let reparsed = Archive::from_bytes(&compressed)?;
    let payload_bytes = reparsed.payload_bytes();
    let mut parser = PassthroughParser::new();
    let restored = decompress(reparsed, &mut parser)?;

    if restored != original {
        eprintln!("Compress-decompress roundtrip failed for {}", input.display());
        return Ok(None);
    }

    let ratio = compressed.len() as f64 / original.len().max(1) as f64;
    let overhead =
        (compressed.len().saturating_sub(payload_bytes)) as f64 / compressed.len().max(1) as f64;
    println!("Compress-decompress roundtrip succeeded:");
    println!(" compression ratio: {:.2}%", ratio * 100.0);
    println!(" container overhead: {:.2}%", overhead * 100.0);
    Ok(Some(compressed))
}

fn cmd_roundtrip(input: &Path, output: Option<&Path>) -> anyhow::Result<i32> {
    match roundtrip_file(input)? {
        Some(compressed) => {
            if output.is_some() {
                write_output(output, &compressed)?;
            }
            Ok(0)
        }
        None => Ok(1),
    }
}

fn cmd_test(dir: &Path) -> anyhow::Result<i32> {
    let mut total = 0usize;
    let mut failures = 0usize;
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    for path in entries {
        total += 1;
        println!("{}:", path.display());
        match roundtrip_file(&path) {
            Ok(Some(_)) => {}
            Ok(None) => failures += 1,
            Err(err) => {
                eprintln!("Error: {:#}", err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        println!(
            "Compress-decompress roundtrip failed on {} / {} files",
            failures, total
        );
        Ok(1)
    } else {
        println!("All {} files round-tripped", total);
        Ok(0)
    }
}
