use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "festa", about = "Festa event-photo face matching CLI")]
struct Cli {
    /// Base URL of the festad server
    #[arg(long, default_value = "http://127.0.0.1:5800", env = "FESTA_SERVER")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a guest from a selfie
    Register {
        /// Guest name (also the album name)
        #[arg(short, long)]
        name: String,
        /// Path to the selfie image
        selfie: PathBuf,
    },
    /// Upload a batch of event photos
    Upload {
        /// Image files to upload
        photos: Vec<PathBuf>,
    },
    /// Run the full match pass
    Match,
    /// Show a guest's album listing
    Album {
        /// Guest name
        name: String,
    },
}

fn file_part(path: &Path) -> Result<reqwest::multipart::Part> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo.jpg".to_string());
    Ok(reqwest::multipart::Part::bytes(bytes).file_name(file_name))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Register { name, selfie } => {
            let form = reqwest::multipart::Form::new()
                .text("name", name.clone())
                .part("selfie", file_part(&selfie)?);

            let response = client
                .post(format!("{}/upload_selfie", cli.server))
                .multipart(form)
                .send()
                .await
                .context("request failed")?;

            if !response.status().is_success() {
                bail!("registration failed: {}", response.text().await?);
            }
            println!("registered {name}");
        }
        Commands::Upload { photos } => {
            if photos.is_empty() {
                bail!("no photos given");
            }

            let mut form = reqwest::multipart::Form::new();
            for photo in &photos {
                form = form.part("eventphotos", file_part(photo)?);
            }

            let response = client
                .post(format!("{}/upload_event", cli.server))
                .multipart(form)
                .send()
                .await
                .context("request failed")?;

            if !response.status().is_success() {
                bail!("upload failed: {}", response.text().await?);
            }
            println!("uploaded {} photo(s)", photos.len());
        }
        Commands::Match => {
            let response = client
                .get(format!("{}/match_faces", cli.server))
                .send()
                .await
                .context("request failed")?;
            println!("{}", response.text().await?);
        }
        Commands::Album { name } => {
            let response = client
                .get(format!("{}/view_album/{name}", cli.server))
                .send()
                .await
                .context("request failed")?;
            let body = response.text().await?;

            if body.trim_start().starts_with("<!DOCTYPE") {
                let files = album_files(&body);
                if files.is_empty() {
                    println!("(empty album)");
                } else {
                    for file in files {
                        println!("{file}");
                    }
                }
            } else {
                // Plain-text server replies, e.g. "No matched photos found."
                println!("{}", body.trim());
            }
        }
    }

    Ok(())
}

/// Pull the photo filenames out of the server's album page.
fn album_files(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.trim().strip_prefix("<li><a href=\""))
        .filter_map(|rest| rest.split_once("\">"))
        .filter_map(|(_, rest)| rest.split_once("</a>"))
        .map(|(name, _)| name.to_string())
        .collect()
}
