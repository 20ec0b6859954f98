//! fstore - Command line interface for file storage operations.
//!
//! Providers and buckets come from a JSON storage configuration; files are
//! addressed with storage URIs (`alias://path` or `scheme://provider:bucket/path`).

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use filestorage::{
    CopyOptions, DeleteOptions, FileStorage, ListOptions, LocalBackend, MemoryBackend,
    StorageConfig,
};

#[derive(Parser)]
#[command(name = "fstore")]
#[command(about = "fstore - Backend-agnostic file storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Storage configuration file (default: <config dir>/fstore/storage.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered buckets.
    Buckets,

    /// List files below a directory URI.
    Ls {
        /// Directory URI.
        uri: String,

        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,

        /// Glob pattern relative to the directory.
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Print a file to stdout.
    Cat {
        /// File URI.
        uri: String,
    },

    /// Upload a local file.
    Put {
        /// Local source file.
        source: PathBuf,

        /// Destination file URI.
        dest: String,
    },

    /// Copy a file, or every file matching a pattern.
    Cp {
        /// Source URI.
        src: String,

        /// Destination URI.
        dest: String,

        /// Treat the URIs as directories and copy the matching files.
        #[arg(short, long)]
        pattern: Option<String>,

        /// Fail instead of replacing existing files.
        #[arg(long)]
        no_overwrite: bool,
    },

    /// Move a file, or every file matching a pattern.
    Mv {
        /// Source URI.
        src: String,

        /// Destination URI.
        dest: String,

        /// Treat the URIs as directories and move the matching files.
        #[arg(short, long)]
        pattern: Option<String>,

        /// Fail instead of replacing existing files.
        #[arg(long)]
        no_overwrite: bool,
    },

    /// Delete a file, or every file matching a pattern.
    Rm {
        /// File or directory URI.
        uri: String,

        /// Treat the URI as a directory and delete the matching files.
        #[arg(short, long)]
        pattern: Option<String>,

        /// Remove directories left empty.
        #[arg(long)]
        cleanup: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "fstore", &mut std::io::stdout());
        return Ok(());
    }

    let storage = open_storage(cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::Buckets => cmd_buckets(&storage),

        Commands::Ls {
            uri,
            recursive,
            pattern,
        } => cmd_ls(&storage, &uri, recursive, pattern).await,

        Commands::Cat { uri } => cmd_cat(&storage, &uri).await,

        Commands::Put { source, dest } => cmd_put(&storage, &source, &dest).await,

        Commands::Cp {
            src,
            dest,
            pattern,
            no_overwrite,
        } => cmd_cp(&storage, &src, &dest, pattern.as_deref(), !no_overwrite).await,

        Commands::Mv {
            src,
            dest,
            pattern,
            no_overwrite,
        } => cmd_mv(&storage, &src, &dest, pattern.as_deref(), !no_overwrite).await,

        Commands::Rm {
            uri,
            pattern,
            cleanup,
        } => cmd_rm(&storage, &uri, pattern.as_deref(), cleanup).await,

        Commands::Completions { .. } => Ok(()),
    };

    storage.dispose().await.context("Failed to release providers")?;
    result
}

fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not find the configuration directory")?;
    Ok(dir.join("fstore").join("storage.json"))
}

/// Register the bundled backend types and build the storage.
async fn open_storage(config: Option<&Path>) -> Result<FileStorage> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    debug!("Loading configuration from {}", path.display());

    let config = StorageConfig::from_file(&path)
        .await
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;

    FileStorage::register_provider_type("memory", MemoryBackend::factory(), true)?;
    FileStorage::register_provider_type("local", LocalBackend::factory(), true)?;

    FileStorage::from_config(config)
        .await
        .context("Failed to set up providers")
}

fn copy_options(overwrite: bool) -> CopyOptions {
    CopyOptions { overwrite }
}

/// List registered buckets.
fn cmd_buckets(storage: &FileStorage) -> Result<()> {
    let buckets = storage.buckets();
    if buckets.is_empty() {
        println!("No buckets registered.");
        return Ok(());
    }

    for bucket in buckets {
        println!(
            "  {:<24} provider={} name={}",
            bucket.absolute_name(),
            bucket.provider_name(),
            bucket.name()
        );
    }
    Ok(())
}

/// List files below a directory.
async fn cmd_ls(
    storage: &FileStorage,
    uri: &str,
    recursive: bool,
    pattern: Option<String>,
) -> Result<()> {
    let mut options = if recursive {
        ListOptions::recursive()
    } else {
        ListOptions::new()
    };
    if let Some(pattern) = pattern {
        options = options.with_pattern(pattern);
    }

    let directories = if recursive {
        Vec::new()
    } else {
        storage
            .list_directories(uri, &ListOptions::new())
            .await
            .context("Failed to list directories")?
            .entries
    };
    let files = storage
        .list_files(uri, &options)
        .await
        .context("Failed to list files")?;

    if directories.is_empty() && files.is_empty() {
        println!("Directory is empty.");
        return Ok(());
    }

    println!("Contents of {}:", uri);
    for dir in directories {
        println!("  [DIR]  {}/", dir.name());
    }
    for file in files {
        let size = file.size().map(|s| format!("{} bytes", s)).unwrap_or_default();
        let name = if recursive {
            file.path().to_string_path()
        } else {
            file.name().to_string()
        };
        println!("  [FILE] {} ({})", name, size);
    }
    Ok(())
}

/// Stream a file to stdout.
async fn cmd_cat(storage: &FileStorage, uri: &str) -> Result<()> {
    let mut stream = storage
        .get_file_stream(uri)
        .await
        .context("Failed to open file")?;

    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?).await?;
    }
    stdout.flush().await?;
    Ok(())
}

/// Upload a local file.
async fn cmd_put(storage: &FileStorage, source: &Path, dest: &str) -> Result<()> {
    info!("Uploading {} to {}", source.display(), dest);

    let content = tokio::fs::read(source)
        .await
        .context("Failed to read source file")?;
    let size = content.len();

    let response = storage
        .put_file(dest, content)
        .await
        .context("Failed to upload file")?;
    debug!("Native response: {}", response.native);

    println!("File uploaded: {} ({} bytes)", response.result.uri(), size);
    Ok(())
}

/// Copy one file or a pattern.
async fn cmd_cp(
    storage: &FileStorage,
    src: &str,
    dest: &str,
    pattern: Option<&str>,
    overwrite: bool,
) -> Result<()> {
    let options = copy_options(overwrite);
    match pattern {
        Some(pattern) => {
            let copied = storage
                .copy_files(src, dest, pattern, &options)
                .await
                .context("Failed to copy files")?;
            for file in &copied {
                println!("  {}", file.uri());
            }
            println!("Copied {} file(s).", copied.len());
        }
        None => {
            let response = storage
                .copy_file(src, dest, &options)
                .await
                .context("Failed to copy file")?;
            println!("Copied to {}", response.result.uri());
        }
    }
    Ok(())
}

/// Move one file or a pattern.
async fn cmd_mv(
    storage: &FileStorage,
    src: &str,
    dest: &str,
    pattern: Option<&str>,
    overwrite: bool,
) -> Result<()> {
    let options = copy_options(overwrite);
    match pattern {
        Some(pattern) => {
            let moved = storage
                .move_files(src, dest, pattern, &options)
                .await
                .context("Failed to move files")?;
            println!("Moved {} file(s).", moved.len());
        }
        None => {
            let response = storage
                .move_file(src, dest, &options)
                .await
                .context("Failed to move file")?;
            println!("Moved to {}", response.result.uri());
        }
    }
    Ok(())
}

/// Delete one file or a pattern.
async fn cmd_rm(
    storage: &FileStorage,
    uri: &str,
    pattern: Option<&str>,
    cleanup: bool,
) -> Result<()> {
    match pattern {
        Some(pattern) => {
            let deleted = storage
                .delete_files(uri, pattern, &DeleteOptions { cleanup })
                .await
                .context("Failed to delete files")?;
            println!("Deleted {} file(s).", deleted.len());
        }
        None => {
            if storage.delete_file(uri).await.context("Failed to delete file")? {
                println!("File removed: {}", uri);
            } else {
                println!("Nothing to remove at {}", uri);
            }
        }
    }
    Ok(())
}
