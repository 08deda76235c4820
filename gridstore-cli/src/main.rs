use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use gridstore_core::{Bucket, GridConfig, ObjectId, ReadByteRange, UploadRequest};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "gridstore")]
#[command(about = "Chunked binary object storage over document collections")]
struct Cli {
    /// Path to configuration file (defaults to a sqlite store at ./gridstore.db)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a local file and print its id
    Put {
        path: PathBuf,

        /// Name recorded for the file (defaults to the path's file name)
        #[arg(long)]
        filename: Option<String>,

        #[arg(long)]
        content_type: Option<String>,

        /// Override the bucket's chunk size in bytes
        #[arg(long)]
        chunk_size: Option<u64>,
    },
    /// Read a stored file, optionally a byte range of it
    Get {
        id: String,

        #[arg(long, default_value_t = 0)]
        start: i64,

        #[arg(long)]
        end: Option<i64>,

        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored files
    Ls,
    /// Remove a stored file and its chunks
    Rm { id: String },
    /// Recompute a file's digest from its chunks
    Verify { id: String },
    /// Drop both bucket collections
    Drop,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridstore=info,gridstore_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => GridConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path))?,
        None => GridConfig::sqlite("gridstore.db"),
    };

    let store = config.open_store().context("failed to open document store")?;
    let bucket = Bucket::new(store.as_ref(), config.bucket_options()).await?;

    match cli.command {
        Commands::Put {
            path,
            filename,
            content_type,
            chunk_size,
        } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;

            let filename = filename.or_else(|| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            });

            let mut request = UploadRequest::new(data);
            request.filename = filename;
            request.content_type = content_type;
            request.chunk_size = chunk_size;

            let id = bucket.store(request).await?;
            println!("{}", id);
        }
        Commands::Get {
            id,
            start,
            end,
            output,
        } => {
            let file = bucket
                .find_one(parse_id(&id)?)
                .await?
                .with_context(|| format!("file {} not found", id))?;

            let body = file.read(ReadByteRange::new(start, end)).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &body)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => {
                    use tokio::io::AsyncWriteExt;
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&body).await?;
                    stdout.flush().await?;
                }
            }
        }
        Commands::Ls => {
            let mut files = bucket.find(None).await?;
            while let Some(file) = files.next().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    file.id,
                    file.length,
                    file.chunk_size,
                    file.upload_date.to_rfc3339(),
                    file.md5,
                    file.filename.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Rm { id } => {
            bucket.remove(parse_id(&id)?).await?;
        }
        Commands::Verify { id } => {
            let file = bucket
                .find_one(parse_id(&id)?)
                .await?
                .with_context(|| format!("file {} not found", id))?;
            bucket.verify(&file).await?;
            println!("{} ok", file.md5);
        }
        Commands::Drop => {
            bucket.drop().await?;
        }
    }

    Ok(())
}

fn parse_id(id: &str) -> anyhow::Result<ObjectId> {
    match id.parse::<ObjectId>() {
        Ok(id) => Ok(id),
        Err(error) => bail!("invalid file id {}: {}", id, error),
    }
}
