use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "checkd-cli")]
#[command(about = "Management CLI for the checkd health-checking daemon", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "CHECKD_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon, pool and queue status
    Status,
    /// List host group health, or one group
    Groups { name: Option<String> },
    /// List every check key with its state
    Checks,
    /// Show the DNS cache
    Dns,
    /// Force a host or address DOWN
    Force {
        #[arg(long, conflicts_with = "address", required_unless_present = "address")]
        host: Option<String>,
        #[arg(long)]
        address: Option<String>,
        /// Release a previously forced target instead
        #[arg(long)]
        release: bool,
    },
    /// Re-read the daemon's config file
    Reload,
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

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Groups { name: None } => client.get(format!("{}/admin/groups", cli.url)),
        Commands::Groups { name: Some(name) } => client.get(format!("{}/admin/groups/{}", cli.url, name)),
        Commands::Checks => client.get(format!("{}/admin/checks", cli.url)),
        Commands::Dns => client.get(format!("{}/admin/dns", cli.url)),
        Commands::Force { host, address, release } => client
            .post(format!("{}/admin/force", cli.url))
            .json(&json!({ "host": host, "address": address, "down": !release })),
        Commands::Reload => client.post(format!("{}/admin/reload", cli.url)),
    };

    let res = request.headers(headers).send().await?;
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
