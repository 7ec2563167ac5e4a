/// HiveSpace Admin - command line client for the API gateway
mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crate::config::AdminConfig;
use hive_gateway_client::{
    FileSessionStore, GatewayClient, LoginCredentials, NotificationSink, OutcomeKind,
    ProgressCallback, RequestOptions, UploadProgress,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hive-admin")]
#[command(about = "HiveSpace admin client for the API gateway", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Gateway base URL, overriding the configuration
    #[arg(long, env = "HIVE_BASE_URL", global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a GET request
    Get {
        /// API path, relative to the versioned base URL
        path: String,
        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },
    /// Send a POST request
    Post {
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Send a PUT request
    Put {
        path: String,
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Send a PATCH request
    Patch {
        path: String,
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Send a DELETE request
    Delete { path: String },
    /// Upload a file as multipart form data
    Upload {
        path: String,
        /// Local file to upload
        file: PathBuf,
    },
    /// Download a file into the configured download directory
    Download {
        path: String,
        /// File name to save under
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "HIVE_PASSWORD")]
        password: String,
    },
    /// Log out and clear the stored session
    Logout,
    /// Show the gateway and session status
    Status,
}

/// Prints notifications to stderr.
struct StderrSink;

impl NotificationSink for StderrSink {
    fn notify(&self, _kind: OutcomeKind, title: &str, message: &str) {
        eprintln!("{}: {}", title, message);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hive_admin=info,hive_gateway_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = AdminConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.gateway.base_url = base_url;
    }
    config.validate()?;

    let session = FileSessionStore::open(&config.session_file).with_context(|| {
        format!(
            "Failed to open session file {}",
            config.session_file.display()
        )
    })?;

    let client = GatewayClient::builder(config.gateway.clone())
        .session_store(Arc::new(session))
        .notification_sink(Arc::new(StderrSink))
        .build()?;

    match cli.command {
        Commands::Get { path, query } => {
            let options = query
                .into_iter()
                .fold(RequestOptions::new(), |options, (key, value)| {
                    options.query(key, value)
                });
            let value: Value = client.get(&path, options).await?;
            print_json(&value)?;
        }
        Commands::Post { path, data } => {
            let body = parse_body(data.as_deref())?;
            let value: Value = client
                .post(&path, body.as_ref(), RequestOptions::default())
                .await?;
            print_json(&value)?;
        }
        Commands::Put { path, data } => {
            let body = parse_body(data.as_deref())?;
            let value: Value = client
                .put(&path, body.as_ref(), RequestOptions::default())
                .await?;
            print_json(&value)?;
        }
        Commands::Patch { path, data } => {
            let body = parse_body(data.as_deref())?;
            let value: Value = client
                .patch(&path, body.as_ref(), RequestOptions::default())
                .await?;
            print_json(&value)?;
        }
        Commands::Delete { path } => {
            let value: Value = client.delete(&path, RequestOptions::default()).await?;
            print_json(&value)?;
        }
        Commands::Upload { path, file } => {
            let on_progress: ProgressCallback = Arc::new(|progress: UploadProgress| {
                tracing::debug!(
                    file = %progress.file_name,
                    sent = progress.bytes_sent,
                    total = progress.bytes_total,
                    "Upload progress"
                );
            });
            let value: Value = client.upload_file(&path, &file, Some(on_progress)).await?;
            print_json(&value)?;
        }
        Commands::Download { path, name } => {
            let saved = client.download_file(&path, name.as_deref()).await?;
            println!("{}", saved.display());
        }
        Commands::Login { email, password } => {
            let response = client
                .login(&LoginCredentials::new(email, password))
                .await?;
            println!(
                "Logged in as {} ({})",
                response.user.name, response.user.role
            );
        }
        Commands::Logout => {
            client.logout().await;
            println!("Logged out");
        }
        Commands::Status => {
            let status = serde_json::json!({
                "baseUrl": client.config().base_url,
                "version": client.config().version,
                "authenticated": client.is_authenticated(),
                "sessionFile": config.session_file,
            });
            print_json(&status)?;
        }
    }

    Ok(())
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("missing key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_body(data: Option<&str>) -> anyhow::Result<Option<Value>> {
    data.map(serde_json::from_str)
        .transpose()
        .context("--data must be valid JSON")
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
