#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use e2kit_error::E2Error;
use e2kit_fs::{Ext2Fs, check, dump, mkfs, render};
use e2kit_image::Image;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "e2kit", about = "Offline tools for single-group ext2 images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format an image file with the canonical 128 KiB geometry.
    Mkfs {
        /// Path to the image file (created or truncated).
        image: PathBuf,
    },
    /// Print superblock, descriptor, bitmaps, inodes, and directory blocks.
    Dump {
        /// Path to the image file.
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Create a directory at an absolute path on the image.
    Mkdir {
        image: PathBuf,
        /// Absolute path of the directory to create.
        path: String,
    },
    /// Copy a host file onto the image.
    Cp {
        image: PathBuf,
        /// Regular file on the host filesystem.
        host_path: PathBuf,
        /// Absolute destination path on the image.
        path: String,
    },
    /// Create a hard or symbolic link.
    Ln {
        image: PathBuf,
        /// Create a symbolic link instead of a hard link.
        #[arg(short = 's', long = "symbolic")]
        symbolic: bool,
        /// Absolute source path on the image.
        src: String,
        /// Absolute destination path on the image.
        dst: String,
    },
    /// Remove a file or link (never a directory).
    Rm {
        image: PathBuf,
        path: String,
    },
    /// Bring back a removed file whose directory slot still exists.
    Restore {
        image: PathBuf,
        path: String,
    },
    /// Detect and repair metadata inconsistencies.
    Check {
        image: PathBuf,
        /// Output the repair report in JSON format.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error:#}");
        let code = error
            .downcast_ref::<E2Error>()
            .map_or(1, |e| -e.to_errno());
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Mkfs { image } => {
            let mut fs = mkfs(Image::create(&image)?)?;
            fs.flush()?;
            println!("formatted {}", image.display());
            Ok(())
        }
        Command::Dump { image, json } => {
            let fs = Ext2Fs::open(&image)?;
            let report = dump(&fs)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("serialize dump")?
                );
            } else {
                let stdout = std::io::stdout();
                render(&report, &mut stdout.lock()).context("write dump")?;
            }
            Ok(())
        }
        Command::Mkdir { image, path } => {
            let mut fs = Ext2Fs::open(&image)?;
            fs.make_directory(&path)?;
            fs.flush()?;
            Ok(())
        }
        Command::Cp {
            image,
            host_path,
            path,
        } => {
            let mut fs = Ext2Fs::open(&image)?;
            fs.copy_in(&host_path, &path)?;
            fs.flush()?;
            Ok(())
        }
        Command::Ln {
            image,
            symbolic,
            src,
            dst,
        } => {
            let mut fs = Ext2Fs::open(&image)?;
            fs.link(&src, &dst, symbolic)?;
            fs.flush()?;
            Ok(())
        }
        Command::Rm { image, path } => {
            let mut fs = Ext2Fs::open(&image)?;
            fs.remove(&path)?;
            fs.flush()?;
            Ok(())
        }
        Command::Restore { image, path } => {
            let mut fs = Ext2Fs::open(&image)?;
            fs.restore(&path)?;
            fs.flush()?;
            Ok(())
        }
        Command::Check { image, json } => {
            let mut fs = Ext2Fs::open(&image)?;
            let report = check(&mut fs)?;
            fs.flush()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("serialize report")?
                );
            } else {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                for line in &report.fixes {
                    writeln!(out, "{line}").context("write report")?;
                }
                writeln!(out, "{}", report.summary()).context("write report")?;
            }
            Ok(())
        }
    }
}
