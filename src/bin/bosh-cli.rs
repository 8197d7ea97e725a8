use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "bosh-cli")]
#[command(about = "Management CLI for the BOSH gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List live sessions
    Sessions,
    /// Show one session
    Show { sid: String },
    /// Terminate a session
    Kill { sid: String },
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

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Sessions => {
            let res = client.get(format!("{}/admin/sessions", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Show { sid } => {
            let res = client.get(format!("{}/admin/sessions/{}", cli.url, sid))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Kill { sid } => {
            let res = client.delete(format!("{}/admin/sessions/{}", cli.url, sid))
                .headers(headers)
                .send()
                .await?;
            match res.status() {
                StatusCode::NO_CONTENT => println!("Session {} terminated", sid),
                StatusCode::NOT_FOUND => eprintln!("Session {} not found", sid),
                status => eprintln!("Error: Admin API returned status {}", status),
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
