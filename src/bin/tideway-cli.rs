use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

#[derive(Parser)]
#[command(name = "tideway-cli")]
#[command(about = "Operator CLI for the tideway orchestrator", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Liveness and subsystem summary
    Status,
    /// Readiness probe
    Ready,
    /// Aggregated worker health
    Agents,
    /// Text metrics exposition
    Metrics,
    /// Active alerts
    Alerts,
    /// Circuit breaker states
    Breakers,
    /// Worker and dependency statistics
    Stats,
    /// Dispatch one operation
    Dispatch {
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
    /// Run a composite plan; each branch is `section=tool`
    Plan {
        #[arg(short, long = "branch", required = true)]
        branches: Vec<String>,
        /// Arguments shared by every branch, as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
    /// Refresh a worker heartbeat
    Heartbeat { id: String },
    /// Stream progress events
    Watch {
        /// Ask for a status snapshot after connecting
        #[arg(long)]
        status: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => print_response(client.get(format!("{}/health", base)).send().await?).await?,
        Commands::Ready => print_response(client.get(format!("{}/ready", base)).send().await?).await?,
        Commands::Agents => {
            print_response(client.get(format!("{}/api/agents/status", base)).send().await?).await?
        }
        Commands::Metrics => {
            let res = client.get(format!("{}/metrics", base)).send().await?;
            print!("{}", res.text().await?);
        }
        Commands::Alerts => print_response(client.get(format!("{}/api/alerts", base)).send().await?).await?,
        Commands::Breakers => {
            print_response(client.get(format!("{}/api/breakers", base)).send().await?).await?
        }
        Commands::Stats => print_response(client.get(format!("{}/api/stats", base)).send().await?).await?,
        Commands::Dispatch { tool, args } => {
            let arguments: Value = serde_json::from_str(&args)?;
            let res = client
                .post(format!("{}/api/dispatch", base))
                .json(&json!({ "tool": tool, "arguments": arguments }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Plan { branches, args } => {
            let arguments: Value = serde_json::from_str(&args)?;
            let mut parsed = Vec::new();
            for branch in branches {
                let (section, tool) = branch
                    .split_once('=')
                    .ok_or_else(|| format!("branch must be section=tool, got {}", branch))?;
                parsed.push(json!({ "section": section, "tool": tool, "arguments": arguments }));
            }
            let res = client
                .post(format!("{}/api/plan", base))
                .json(&json!({ "branches": parsed }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Heartbeat { id } => {
            let res = client
                .post(format!("{}/api/workers/{}/heartbeat", base, id))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Watch { status } => watch(&base, status).await?,
    }

    Ok(())
}

async fn watch(base: &str, request_status: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut url = Url::parse(base)?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|_| "cannot derive websocket url")?;
    url.set_path("/ws");

    let (mut socket, _) = connect_async(url.as_str()).await?;
    eprintln!("Connected to {}", url);

    if request_status {
        socket
            .send(Message::Text(json!({ "type": "status" }).to_string().into()))
            .await?;
    }

    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(_) => println!("{}", text.as_str()),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
