//! MarFS format tool
//!
//! Formats an existing image file in place

use anyhow::{bail, Context};
use clap::Parser;
use marfs::{format_path, Config, DEFAULT_SECTOR_SIZE};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mkfs.marfs")]
#[command(about = "Format an image file as a MarFS filesystem")]
struct Args {
    /// Image file to format (must already exist)
    image: PathBuf,

    /// Sector size in bytes [default: 1024, or the config file's value]
    #[arg(short = 's', long)]
    sector_size: Option<u32>,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("could not load config {}", path.display()))?,
        None => Config::default(),
    };
    let sector_size = args.sector_size.unwrap_or(config.format.sector_size);

    if !args.image.exists() {
        bail!("image {} does not exist", args.image.display());
    }

    info!(
        "Formatting {:?} with {} byte sectors (default {})",
        args.image, sector_size, DEFAULT_SECTOR_SIZE
    );

    let mut volume = format_path(&args.image, sector_size)
        .with_context(|| format!("could not format {}", args.image.display()))?;
    volume.sync()?;

    let stats = volume.stats()?;
    info!(
        "{} sectors, {} free, {} records per directory sector",
        stats.total_sectors, stats.free_sectors, stats.dir_capacity
    );

    println!("MarFS format successful");
    Ok(())
}
