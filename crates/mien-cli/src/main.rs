use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mien", about = "mien face ingestion CLI")]
struct Cli {
    /// Base URL of the miend daemon (or MIEN_SERVER).
    #[arg(long)]
    server: Option<String>,
    /// Shared secret for the ingestion endpoint (or MIEN_API_KEY).
    #[arg(long)]
    api_key: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an image for identity resolution
    Submit {
        /// Image file to upload
        image: PathBuf,
        /// Origin label recorded with each capture (e.g., a camera name)
        #[arg(short, long)]
        origin: Option<String>,
    },
    /// Check daemon liveness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let server = cli
        .server
        .or_else(|| std::env::var("MIEN_SERVER").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8090".to_string());
    let api_key = cli.api_key.or_else(|| std::env::var("MIEN_API_KEY").ok());

    match cli.command {
        Commands::Submit { image, origin } => submit(&server, api_key, &image, origin).await,
        Commands::Health => health(&server).await,
    }
}

async fn submit(
    server: &str,
    api_key: Option<String>,
    image: &PathBuf,
    origin: Option<String>,
) -> Result<()> {
    let bytes = std::fs::read(image)
        .with_context(|| format!("reading image {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture.jpg".to_string());

    let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
    let mut form = reqwest::multipart::Form::new().part("file", part);
    if let Some(origin) = origin {
        form = form.text("origin", origin);
    }

    let mut request = reqwest::Client::new()
        .post(format!("{server}/upload-face"))
        .multipart(form);
    if let Some(key) = api_key {
        request = request.header("X-Api-Key", key);
    }

    let response = request.send().await.context("submitting capture")?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.context("reading response")?;

    if !status.is_success() {
        bail!(
            "daemon rejected capture ({status}): {}",
            body["message"].as_str().unwrap_or("unknown error")
        );
    }

    let results = body["results"].as_array().cloned().unwrap_or_default();
    println!("{} face(s) processed", results.len());
    for entry in &results {
        let face_id = entry["face_id"].as_str().unwrap_or("?");
        let matched = entry["matched"].as_bool().unwrap_or(false);
        let label = if matched { "matched" } else { "new" };
        println!("  {face_id}  [{label}]  {}", entry["message"].as_str().unwrap_or(""));
        if let Some(url) = entry["image_url"].as_str() {
            println!("    image: {server}{url}");
        }
    }
    Ok(())
}

async fn health(server: &str) -> Result<()> {
    let response = reqwest::Client::new()
        .get(format!("{server}/health"))
        .send()
        .await
        .context("reaching daemon")?;

    if response.status().is_success() {
        println!("miend: ok ({server})");
        Ok(())
    } else {
        bail!("miend unhealthy: HTTP {}", response.status());
    }
}
