mod config;
mod db;
mod engine;
mod error;
mod storage;

use std::io::Write;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engine::Manager;
use error::Result;

/// Writing more than this far past the end of a file is refused even with
/// --allow-beyond-size, to prevent accidental huge zero-fill allocations.
const MAX_GAP_FILL: u64 = 10 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "stratafs")]
#[command(about = "Versioned differential storage engine")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write data to a file (created if absent)
    Write {
        /// Target file to write to
        #[arg(long)]
        file: String,

        /// Offset in the file to start writing from
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// ASCII data to write to the file
        #[arg(long)]
        data: String,

        /// Allow writing beyond the current file size (fills the gap with
        /// zero bytes first)
        #[arg(long)]
        allow_beyond_size: bool,
    },

    /// Read file content and print it to standard output
    Read {
        /// Target file to read from
        #[arg(long)]
        file: String,

        /// Offset in the file to start reading from
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Number of bytes to read (0 reads to the end of the file)
        #[arg(long, default_value_t = 0)]
        size: u64,

        /// Version tag to read at (default: latest)
        #[arg(long)]
        version: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries file bytes for the read subcommand.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratafs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let settings = config::Settings::from_env();

    let db = db::init_database(&settings.db_url)
        .await
        .expect("Failed to initialize metadata store");

    let mut manager = Manager::new(db);
    if let Some(storage_config) = &settings.storage {
        let backend = storage_config.build().await;
        manager = manager.with_object_store(backend, settings.externalize_threshold);
        tracing::info!("Object payload store configured");
    }

    let result = match args.command {
        Commands::Write {
            file,
            offset,
            data,
            allow_beyond_size,
        } => run_write(&manager, &file, offset, &data, allow_beyond_size).await,
        Commands::Read {
            file,
            offset,
            size,
            version,
        } => run_read(&manager, &file, offset, size, version.as_deref()).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "operation failed");
        std::process::exit(1);
    }
}

async fn run_write(
    sm: &Manager,
    file: &str,
    offset: u64,
    data: &str,
    allow_beyond_size: bool,
) -> Result<()> {
    if sm.file_id_by_name(file).await?.is_none() {
        tracing::info!(file, "file does not exist, creating it");
        sm.insert_file(file).await?;
    }

    let size = sm.size_of(file).await?;

    // The engine rejects writes past the end; the gap fill is an adapter
    // convenience layered on top of ordinary writes.
    if offset > size && allow_beyond_size {
        let gap = offset - size;
        if gap > MAX_GAP_FILL {
            tracing::error!(gap, "gap too large, aborting");
            std::process::exit(1);
        }
        sm.write_file(file, &vec![0u8; gap as usize], size).await?;
        tracing::info!(file, gap, "gap filled with zero bytes");
    }

    sm.write_file(file, data.as_bytes(), offset).await?;

    tracing::info!(file, offset, size = data.len(), "data written");
    println!(
        "Successfully wrote {} bytes to {} at offset {}",
        data.len(),
        file,
        offset
    );
    Ok(())
}

async fn run_read(
    sm: &Manager,
    file: &str,
    offset: u64,
    size: u64,
    version: Option<&str>,
) -> Result<()> {
    let file_size = sm.size_of(file).await?;

    // Size 0 means "read to the end of the image"
    let read_size = if size == 0 {
        file_size.saturating_sub(offset)
    } else {
        size
    };

    let data = match version {
        Some(tag) => sm.read_file_at(file, offset, read_size, tag).await?,
        None => sm.read_file(file, offset, read_size).await?,
    };

    tracing::info!(file, offset, read_size, bytes_read = data.len(), version, "read complete");

    let mut stdout = std::io::stdout();
    stdout.write_all(&data).expect("Failed to write to stdout");
    // Keep terminal output tidy when the content has no trailing newline
    if data.last().is_some_and(|&b| b != b'\n') {
        println!();
    }
    Ok(())
}
