//! MarFS mount tool
//!
//! Opens and validates an image, then serves it over FUSE until unmounted

use anyhow::Context;
use clap::Parser;
use marfs::{fuse, Config, MarFs, Volume};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "marfs")]
#[command(about = "Mount a MarFS image with FUSE")]
struct Args {
    /// MarFS image file
    image: PathBuf,

    /// Directory to mount on
    mountpoint: PathBuf,

    /// Mount options passed to FUSE (comma separated, repeatable)
    #[arg(short = 'o', value_name = "OPTIONS")]
    options: Vec<String>,

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

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("could not load config {}", path.display()))?,
        None => Config::default(),
    };

    config.mount.read_only = fuse::is_read_only(&config.mount, &args.options);

    info!("Opening image: {:?}", args.image);
    let volume = Volume::open_path(&args.image, &config.mount.volume_options())
        .with_context(|| format!("could not open MarFS image {}", args.image.display()))?;

    let fs = MarFs::new(volume);
    info!("Mounting at {:?}", args.mountpoint);
    fuse::mount(fs, &args.mountpoint, &config.mount, &args.options)
        .with_context(|| format!("could not mount on {}", args.mountpoint.display()))?;

    info!("Unmounted");
    Ok(())
}
