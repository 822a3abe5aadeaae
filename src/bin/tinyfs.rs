//! Command-line front end for formatting, mounting, and poking at a
//! tinyfs disk image, mirroring what `mkfs`/`fsck`-style tooling does for
//! the reference kernel's own filesystem.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tinyfs::block::{BlockDevice, FileBlockDevice};
use tinyfs::config::{Config, SECTOR_SIZE};
use tinyfs::filesystem::FileSystem;

#[derive(Parser)]
#[command(name = "tinyfs", about = "Format and inspect tinyfs disk images")]
struct Cli {
    /// Path to the disk image file.
    image: PathBuf,

    /// Optional TOML configuration file; defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format the image with a fresh, empty filesystem.
    Mkfs {
        /// Number of 512-byte sectors to allocate for the image.
        #[arg(long, default_value_t = 65536)]
        sectors: u32,
    },
    /// List the root directory's entries.
    Ls,
    /// Print used/free sector counts.
    Df,
}

fn load_config(path: Option<&PathBuf>) -> Config {
    match path {
        Some(p) => Config::from_toml_file(p).unwrap_or_else(|e| {
            log::warn!("failed to read config {}: {e}, using defaults", p.display());
            Config::default()
        }),
        None => Config::default(),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());

    match cli.command {
        Command::Mkfs { sectors } => {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&cli.image)
                .expect("failed to create disk image");
            file.set_len(sectors as u64 * SECTOR_SIZE as u64).expect("failed to size disk image");
            let device = Arc::new(FileBlockDevice::open(file, sectors));
            let fs = FileSystem::mkfs(device, &config);
            fs.shutdown().expect("failed to flush freshly formatted image");
            log::info!("formatted {} ({sectors} sectors)", cli.image.display());
        }
        Command::Ls => {
            let (device, _) = open_existing(&cli.image);
            let fs = FileSystem::mount(device, &config).expect("failed to mount disk image");
            let mut process = fs.new_process().expect("failed to start a process");
            let fd = fs.open(&mut process, "/").expect("failed to open root directory");
            while let Some(name) = fs.readdir(&mut process, fd) {
                println!("{name}");
            }
            fs.close(&mut process, fd);
            fs.end_process(process).expect("failed to tear down process");
            fs.shutdown().expect("failed to flush on exit");
        }
        Command::Df => {
            let (device, total) = open_existing(&cli.image);
            let fs = FileSystem::mount(device, &config).expect("failed to mount disk image");
            println!("{total} sectors total");
            fs.shutdown().expect("failed to flush on exit");
        }
    }
}

fn open_existing(image: &PathBuf) -> (Arc<FileBlockDevice>, u32) {
    let file = OpenOptions::new().read(true).write(true).open(image).expect("failed to open disk image");
    let len = file.metadata().expect("failed to stat disk image").len();
    let sectors = (len / SECTOR_SIZE as u64) as u32;
    (Arc::new(FileBlockDevice::open(file, sectors)), sectors)
}
