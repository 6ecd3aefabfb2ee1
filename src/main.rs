//! machedit - Mach-O section editor for libraries extracted from the dyld
//! shared cache.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use machedit::dyld::DEFAULT_EXTRACTOR;
use machedit::macho::file_type_name;
use machedit::{
    add_method_names_to_file, backup_path, extract_cache, ExtractOptions, LoadCommand, MachImage,
    RewriteOptions,
};

/// Edit Mach-O images extracted from the dyld shared cache.
#[derive(Parser, Debug)]
#[command(name = "machedit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract every library in a cache with the platform extractor
    Extract {
        /// Path to the dyld shared cache
        cache: PathBuf,

        /// Directory to extract libraries into
        target_dir: PathBuf,

        /// Extractor program to run
        #[arg(long, default_value = DEFAULT_EXTRACTOR)]
        utility: PathBuf,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Copy selector names from the cache into an extracted library
    AddMethodNames {
        /// Path to the dyld shared cache the library was extracted from
        cache: PathBuf,

        /// Extracted library to rewrite
        library: PathBuf,

        /// Write the result here instead of overwriting the library
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not copy the library to `<library>.original` first
        #[arg(long)]
        no_backup: bool,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Show the header and load commands of a library
    Info {
        /// Library to inspect
        library: PathBuf,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            cache,
            target_dir,
            utility,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_extract(cache, target_dir, utility)
        }
        Commands::AddMethodNames {
            cache,
            library,
            output,
            no_backup,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_add_method_names(cache, library, output, no_backup)
        }
        Commands::Info { library, verbosity } => {
            setup_logging(verbosity);
            cmd_info(library)
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

fn cmd_extract(cache: PathBuf, target_dir: PathBuf, utility: PathBuf) -> Result<()> {
    if !cache.is_file() {
        bail!("Cache path does not exist: {}", cache.display());
    }

    fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;

    let start = Instant::now();
    let options = ExtractOptions { utility };
    extract_cache(&cache, &target_dir, &options)
        .with_context(|| format!("Failed to extract {}", cache.display()))?;

    info!(
        "Extraction finished in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn cmd_add_method_names(
    cache: PathBuf,
    library: PathBuf,
    output: Option<PathBuf>,
    no_backup: bool,
) -> Result<()> {
    let options = RewriteOptions {
        output,
        backup: !no_backup,
    };

    let stats = add_method_names_to_file(&cache, &library, &options)
        .with_context(|| format!("Failed to add method names to {}", library.display()))?;

    println!(
        "{}: restored {} selectors ({} bytes of names, __TEXT grew by {:#x})",
        library.display(),
        stats.selectors,
        stats.names_size,
        stats.growth
    );
    if options.backup {
        println!("Original saved as {}", backup_path(&library).display());
    }

    Ok(())
}

fn cmd_info(library: PathBuf) -> Result<()> {
    let data =
        fs::read(&library).with_context(|| format!("Failed to read {}", library.display()))?;
    let image = MachImage::parse(&data)
        .with_context(|| format!("Failed to parse {}", library.display()))?;

    let header = &image.header;
    println!("Mach-O Information");
    println!("==================");
    println!("Path:          {}", library.display());
    println!("Architecture:  {}", header.arch_name());
    println!("File type:     {}", file_type_name(header.filetype));
    println!("Flags:         {:?}", header.flags());
    println!(
        "Load commands: {} ({} bytes)",
        header.ncmds, header.sizeofcmds
    );

    println!("\nLoad commands:");
    for (i, lc) in image.load_commands.iter().enumerate() {
        match lc {
            LoadCommand::Segment(seg) => {
                println!(
                    "  [{:2}] {:<20} {:<16} {:#018x} - {:#018x} file {:#x}+{:#x} {}",
                    i,
                    lc.name(),
                    seg.name(),
                    seg.command.vmaddr,
                    seg.command.vmaddr + seg.command.vmsize,
                    seg.command.fileoff,
                    seg.command.filesize,
                    seg.command.init_prot().as_rwx()
                );
                for sect in &seg.sections {
                    println!(
                        "         {:<20} {:#018x} ({:#x} bytes)",
                        sect.name(),
                        sect.header.addr,
                        sect.header.size
                    );
                }
            }
            _ => println!("  [{:2}] {}", i, lc),
        }
    }

    Ok(())
}
