use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Command-line client for stream-relay", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show admission and dedup state
    Status,
    /// Liveness check
    Health,
    /// Send a query to the agent upstream
    Ask {
        query: String,
        /// Print events as they arrive instead of waiting for the answer
        #[arg(short, long)]
        stream: bool,
    },
    /// Run a blocking analysis call
    Analyze {
        content: String,
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/status", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Ask { query, stream: false } => {
            let res = client
                .post(format!("{}/api/agent/chat", cli.url))
                .json(&json!({ "query": query }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Ask { query, stream: true } => {
            let res = client
                .post(format!("{}/api/agent/stream", cli.url))
                .json(&json!({ "query": query }))
                .send()
                .await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            let mut body = res.bytes_stream();
            while let Some(chunk) = body.next().await {
                print!("{}", String::from_utf8_lossy(&chunk?));
            }
            println!();
        }
        Commands::Analyze { content, timeout } => {
            let res = client
                .post(format!("{}/api/analyze", cli.url))
                .json(&json!({ "content_data": content, "timeout_seconds": timeout }))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: relay returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
