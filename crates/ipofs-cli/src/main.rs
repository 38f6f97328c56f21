use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ipofs::{DiskImage, FileType, Filesystem, DEFAULT_INODE_COUNT, DEFAULT_START_LBA};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;

#[derive(Parser)]
#[command(name = "ipofs", version, about = "Edit IPO_FS disk images", long_about = None)]
struct Cli {
    /// Path to the disk image
    #[arg(short, long, global = true, default_value = "build/disk.img")]
    image: PathBuf,

    /// First block of the filesystem within the image
    #[arg(short, long, global = true, default_value_t = DEFAULT_START_LBA)]
    start_lba: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a fresh IPO_FS in the partition
    Format,
    /// List a directory
    Ls {
        /// Directory to list
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file's bytes to stdout
    Cat { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Create an empty file, or write text (or a host file's content)
    Touch {
        path: String,
        /// Literal content, or the path of a host file to copy
        text: Option<String>,
    },
    /// Copy a host file into the image
    Put {
        src: PathBuf,
        /// Destination path or directory
        #[arg(default_value = "/")]
        dest: String,
    },
    /// Delete a file or empty directory
    Rm { path: String },
}

fn open_image(path: &Path, start_lba: u64) -> Result<DiskImage<File>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("cannot open image {}", path.display()))?;
    Ok(DiskImage::new(file, start_lba))
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let dev = open_image(&cli.image, cli.start_lba)?;

    match cli.command {
        Commands::Format => {
            Filesystem::format(dev, DEFAULT_INODE_COUNT)?;
            println!("Disk formatted successfully");
        }
        Commands::Ls { path } => {
            let mut fs = Filesystem::open(dev)?;
            for (name, kind) in fs.list_dir(&path)? {
                match kind {
                    FileType::Directory => println!("{}/", name),
                    FileType::File => println!("{}", name),
                }
            }
        }
        Commands::Cat { path } => {
            let mut fs = Filesystem::open(dev)?;
            let data = fs.read_file(&path)?;
            std::io::stdout().write_all(&data)?;
        }
        Commands::Mkdir { path } => {
            let mut fs = Filesystem::open(dev)?;
            fs.mkdir(&path)?;
        }
        Commands::Touch { path, text } => {
            let mut fs = Filesystem::open(dev)?;
            match text {
                None => fs.write_text(&path, "")?,
                Some(text) => {
                    let host = Path::new(&text);
                    if host.is_file() {
                        let data = std::fs::read(host)
                            .with_context(|| format!("cannot read {}", host.display()))?;
                        fs.put(&data, &basename(host), Some(path.as_str()))?;
                    } else {
                        fs.write_text(&path, &text)?;
                    }
                }
            }
        }
        Commands::Put { src, dest } => {
            let mut fs = Filesystem::open(dev)?;
            let data = std::fs::read(&src)
                .with_context(|| format!("cannot read {}", src.display()))?;
            fs.put(&data, &basename(&src), Some(dest.as_str()))?;
        }
        Commands::Rm { path } => {
            let mut fs = Filesystem::open(dev)?;
            if let Err(e) = fs.delete(&path) {
                eprintln!("rm: {}", e);
                exit(1);
            }
        }
    }

    Ok(())
}
