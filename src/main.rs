//! Dropstream - command-line client for Dropbox-style file storage
//!
//! Thin wrapper over the library: every subcommand maps to one client call.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dropstream::transport::CommitInfo;
use dropstream::{Client, Config, UploadPlan};
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Dropstream - filesystem-style access to a remote file store
#[derive(Parser, Debug)]
#[command(name = "dropstream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Access token; overrides the one in the configuration file
    #[arg(short, long, env = "DROPBOX_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show metadata for a file or folder
    Stat { path: String },

    /// List a folder
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Stop after this many entries (0 lists everything)
        #[arg(short = 'n', long, default_value_t = 0)]
        limit: usize,

        /// Only folders
        #[arg(long, conflicts_with = "files")]
        dirs: bool,

        /// Only files
        #[arg(long)]
        files: bool,
    },

    /// Write a remote file to stdout
    Cat { path: String },

    /// Download a remote file
    Get {
        remote: String,
        /// Local destination; defaults to the remote base name
        local: Option<PathBuf>,
    },

    /// Upload a local file, or stdin when LOCAL is "-"
    Put {
        local: PathBuf,
        remote: String,

        /// Bytes per session request
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Always use an upload session
        #[arg(long)]
        session: bool,
    },

    /// Create a folder
    Mkdir { path: String },

    /// Delete a file or folder
    Rm { path: String },

    /// Copy a file or folder
    Cp { src: String, dst: String },

    /// Move a file or folder
    Mv { src: String, dst: String },

    /// Search file names below a folder
    Search {
        query: String,
        #[arg(default_value = "/")]
        path: String,
    },
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match (&args.config, &args.token) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        (None, Some(token)) => Config::from_token(token.clone()),
        (None, None) => anyhow::bail!("No configuration file given and DROPBOX_ACCESS_TOKEN is not set"),
    };

    if let Some(token) = &args.token {
        config.api.token = token.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json {
        config.logging.json = true;
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.logging.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn base_name(remote: &str) -> &str {
    remote.rsplit('/').find(|s| !s.is_empty()).unwrap_or("download")
}

async fn put(
    client: &Client,
    local: &Path,
    remote: &str,
    chunk_size: Option<u64>,
    session: bool,
) -> anyhow::Result<dropstream::FileInfo> {
    let mut plan = UploadPlan::new(remote);
    if let Some(chunk_size) = chunk_size {
        plan = plan.with_chunk_size(chunk_size);
    }

    if local == Path::new("-") {
        let plan = plan.with_commit(CommitInfo::new(remote).with_client_modified(Utc::now()));
        let mut stdin = tokio::io::stdin();
        return Ok(client.upload_with(&plan, &mut stdin).await?);
    }

    let mut file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("Failed to open {:?}", local))?;
    let meta = file.metadata().await?;

    let mut commit = CommitInfo::new(remote);
    if let Ok(modified) = meta.modified() {
        commit = commit.with_client_modified(DateTime::<Utc>::from(modified));
    }
    plan = plan.with_commit(commit);
    // without a declared size the selector always picks a session
    if !session {
        plan = plan.with_size(meta.len());
    }

    Ok(client.upload_with(&plan, &mut file).await?)
}

async fn run(client: Client, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Stat { path } => {
            println!("{}", client.stat(&path).await?);
        }
        Command::Ls {
            path,
            limit,
            dirs,
            files,
        } => {
            let entries = client.list_n(&path, limit).await?;
            for entry in entries
                .iter()
                .filter(|e| (!dirs || e.is_dir()) && (!files || !e.is_dir()))
            {
                println!("{entry}");
            }
        }
        Command::Cat { path } => {
            let mut body = client.download(&path).await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut body, &mut stdout).await?;
            stdout.flush().await?;
        }
        Command::Get { remote, local } => {
            let local = local.unwrap_or_else(|| PathBuf::from(base_name(&remote)));
            let mut body = client.download(&remote).await?;
            let mut file = tokio::fs::File::create(&local)
                .await
                .with_context(|| format!("Failed to create {:?}", local))?;
            let bytes = tokio::io::copy(&mut body, &mut file).await?;
            file.flush().await?;
            info!(remote = %remote, local = ?local, bytes, "Downloaded");
        }
        Command::Put {
            local,
            remote,
            chunk_size,
            session,
        } => {
            let info = put(&client, &local, &remote, chunk_size, session).await?;
            println!("{info}");
        }
        Command::Mkdir { path } => {
            println!("{}", client.mkdir(&path).await?);
        }
        Command::Rm { path } => {
            println!("{}", client.delete(&path).await?);
        }
        Command::Cp { src, dst } => {
            println!("{}", client.copy(&src, &dst).await?);
        }
        Command::Mv { src, dst } => {
            println!("{}", client.rename(&src, &dst).await?);
        }
        Command::Search { query, path } => {
            let mut results = Box::pin(client.search(&path, &query));
            while let Some(entry) = results.try_next().await? {
                println!("{entry}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;
    info!("Starting Dropstream v{}", dropstream::VERSION);

    let print_metrics = args.print_metrics;
    let client = Client::from_config(&config)?;
    let result = run(client, args.command).await;

    if print_metrics {
        eprint!("{}", dropstream::metrics::gather_text());
    }
    result
}
