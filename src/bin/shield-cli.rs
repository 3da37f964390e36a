use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "shield-cli")]
#[command(about = "Operator CLI for the DDoS shield admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "SHIELD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check system status and circuit state
    Status,
    /// Show circuit breaker, blocker, fingerprint and connection stats
    Stats,
    /// List blocked IPs with remaining block time
    Blocked,
    /// Remove an IP from the blocklist
    Unblock {
        ip: std::net::IpAddr,
    },
    /// Force the circuit breaker closed
    ResetCircuit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = match &cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string()),
        Commands::Stats => (Method::GET, "/admin/ddos/stats".to_string()),
        Commands::Blocked => (Method::GET, "/admin/ddos/blocked".to_string()),
        Commands::Unblock { ip } => (Method::DELETE, format!("/admin/ddos/blocked/{ip}")),
        Commands::ResetCircuit => (Method::POST, "/admin/ddos/circuit/reset".to_string()),
    };

    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
