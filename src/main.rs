//! chunksync: operator CLI over the chunk store
//!
//! Store selection comes from `CHUNKSYNC_*` environment variables, or from
//! a TOML file passed with `--config`.

use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use transcript_sync::observability::{init_tracing, LogConfig};
use transcript_sync::storage::{open_store, SyncConfig};
use transcript_sync::ChunkStore;

#[derive(Parser)]
#[command(author, version, about = "Upload, inspect and reconstruct chunked transcript files", long_about = None)]
struct Cli {
    /// TOML configuration file (overrides CHUNKSYNC_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct FileArgs {
    /// Owning user id
    #[arg(long)]
    user: i64,
    /// Session external id
    #[arg(long)]
    session: String,
    /// Logical file name, e.g. transcript.jsonl
    #[arg(long)]
    file: String,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file as line-range chunks
    Upload {
        #[command(flatten)]
        target: FileArgs,
        /// Local file to read
        #[arg(long)]
        path: PathBuf,
        /// Lines per uploaded chunk
        #[arg(long, default_value_t = 100)]
        lines_per_chunk: usize,
        /// Line number of the first line in the file
        #[arg(long, default_value_t = 1)]
        first_line: u64,
    },
    /// List a file's chunk keys in merge order
    List {
        #[command(flatten)]
        target: FileArgs,
    },
    /// Reconstruct a file and write it to stdout
    Cat {
        #[command(flatten)]
        target: FileArgs,
        /// Only print lines numbered above this offset
        #[arg(long)]
        line_offset: Option<u64>,
    },
    /// Delete one file's chunks, or every chunk in the session
    Delete {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        session: String,
        /// Restrict deletion to one file
        #[arg(long)]
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&LogConfig::from_env());
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SyncConfig::from_toml_file(path)?,
        None => SyncConfig::from_env()?,
    };
    let store = open_store(&config)?;
    let chunks = ChunkStore::new(store, config.chunks);

    match cli.command {
        Command::Upload {
            target,
            path,
            lines_per_chunk,
            first_line,
        } => {
            if lines_per_chunk == 0 {
                return Err("--lines-per-chunk must be at least 1".into());
            }
            let text = tokio::fs::read_to_string(&path).await?;
            let lines: Vec<&str> = text.lines().collect();

            let mut next_line = first_line;
            for group in lines.chunks(lines_per_chunk) {
                let key = chunks
                    .upload_lines(target.user, &target.session, &target.file, next_line, group)
                    .await?;
                println!("{}", key);
                next_line += group.len() as u64;
            }
            tracing::info!(
                lines = lines.len(),
                chunks = lines.len().div_ceil(lines_per_chunk),
                "Upload complete"
            );
        }
        Command::List { target } => {
            for key in chunks
                .list_chunks(target.user, &target.session, &target.file)
                .await?
            {
                println!("{}", key);
            }
        }
        Command::Cat {
            target,
            line_offset,
        } => {
            let content = match line_offset {
                Some(offset) => {
                    chunks
                        .read_file_after(target.user, &target.session, &target.file, offset)
                        .await?
                }
                None => {
                    chunks
                        .download_and_merge_chunks(target.user, &target.session, &target.file)
                        .await?
                }
            };
            match content {
                Some(bytes) => std::io::stdout().lock().write_all(&bytes)?,
                None => eprintln!("no chunks for {}", target.file),
            }
        }
        Command::Delete {
            user,
            session,
            file,
        } => {
            let deleted = match file {
                Some(file) => chunks.delete_chunks(user, &session, &file).await?,
                None => chunks.delete_all_session_chunks(user, &session).await?,
            };
            println!("deleted {} chunks", deleted);
        }
    }

    Ok(())
}
