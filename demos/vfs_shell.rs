//! Small shell over a jammdb-backed store.
//!
//! ```text
//! cargo run --example vfs_shell -- --db /tmp/vfs.db write /notes/today.txt "hello"
//! cargo run --example vfs_shell -- --db /tmp/vfs.db cat /notes/today.txt
//! cargo run --example vfs_shell -- --db /tmp/vfs.db ls /notes
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use blockvfs::{FileType, JammdbKvStore, MemoryCache, OpenFlags, Vfs, VfsConfig, VfsResult};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vfs_shell", version, about = "Inspect and edit a block-chunked store")]
struct Args {
    /// Database file, created if missing
    #[arg(long, default_value = "blockvfs.db")]
    db: PathBuf,
    /// JSON configuration document
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a folder
    Ls { path: String },
    /// Print a file
    Cat { path: String },
    /// Replace a file's content
    Write { path: String, content: String },
    /// Append to a file
    Append { path: String, content: String },
    /// Create a folder and its ancestors
    Mkdir { path: String },
    /// Set a file's length
    Truncate { path: String, len: u64 },
    /// Move a file or folder
    Mv { from: String, to: String },
    /// Delete a file or, with --recursive, a folder tree
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Show an entry's metadata
    Stat { path: String },
    /// Read a byte range
    Peek { path: String, offset: i64, len: usize },
}

fn main() -> VfsResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => VfsConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => VfsConfig::default(),
    };
    let kv = JammdbKvStore::open(&args.db)?;
    let shared = MemoryCache::new(config.shared_cache_capacity);
    let vfs = Vfs::new(Arc::new(kv), Arc::new(shared), config)?;
    vfs.init()?;

    vfs.run(|store| {
        let mut out = std::io::stdout().lock();
        match &args.command {
            Command::Ls { path } => {
                for child in store.list_children(path)? {
                    let marker = match store.file_type(&child)? {
                        FileType::Folder => "/",
                        _ => "",
                    };
                    writeln!(out, "{child}{marker}")?;
                }
            }
            Command::Cat { path } => {
                out.write_all(&store.read_to_vec(path)?)?;
            }
            Command::Write { path, content } => store.write_all(path, content.as_bytes())?,
            Command::Append { path, content } => store.append(path, content.as_bytes())?,
            Command::Mkdir { path } => {
                store.create_folder(path)?;
            }
            Command::Truncate { path, len } => store.truncate(path, *len)?,
            Command::Mv { from, to } => store.rename(from, to)?,
            Command::Rm { path, recursive } => {
                let removed = if *recursive {
                    store.delete_all(path)?
                } else {
                    usize::from(store.delete(path)?)
                };
                writeln!(out, "removed {removed}")?;
            }
            Command::Stat { path } => {
                let entry = store.load_uncached(path)?;
                writeln!(out, "path:          {}", entry.path())?;
                writeln!(out, "type:          {:?}", entry.file_type())?;
                writeln!(out, "last modified: {}", entry.last_modified())?;
                if let Some(block_size) = entry.block_size() {
                    writeln!(out, "block size:    {block_size}")?;
                    writeln!(out, "blocks:        {}", entry.block_count())?;
                    writeln!(out, "content size:  {}", entry.content_size())?;
                }
            }
            Command::Peek { path, offset, len } => {
                let mut session = store.open(path, OpenFlags::READ_ONLY)?;
                session.seek(*offset)?;
                let mut buf = vec![0u8; *len];
                let n = session.read(&mut buf)?;
                out.write_all(&buf[..n])?;
                writeln!(out)?;
            }
        }
        Ok(())
    })
}
