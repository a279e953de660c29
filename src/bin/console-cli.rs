use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "console-cli")]
#[command(about = "Management CLI for the device console", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Basic-auth credentials as user:password.
    #[arg(short, long)]
    auth: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the live effective configuration
    Current,
    /// Show the built-in configuration defaults
    Defaults,
    /// Show read-only diagnostic variables
    Vars,
    /// Save a configuration fragment from a JSON file (device restarts)
    Save { file: PathBuf },
    /// Remove the persisted user configuration (device restarts)
    Reset,
    /// Reboot the device
    Reboot,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Cli { url, auth, command } = Cli::parse();
    let client = reqwest::Client::new();

    let credentials = match &auth {
        Some(auth) => {
            let (user, password) = auth
                .split_once(':')
                .ok_or("auth must be user:password")?;
            Some((user.to_string(), password.to_string()))
        }
        None => None,
    };

    let request = |method: reqwest::Method, path: &str| {
        let mut req = client.request(method, format!("{url}{path}"));
        if let Some((user, password)) = &credentials {
            req = req.basic_auth(user, Some(password));
        }
        req
    };

    let res = match command {
        Commands::Current => request(reqwest::Method::GET, "/conf/current?pretty").send().await?,
        Commands::Defaults => request(reqwest::Method::GET, "/conf/defaults?pretty").send().await?,
        Commands::Vars => request(reqwest::Method::GET, "/ro_vars?pretty").send().await?,
        Commands::Save { file } => {
            let body = std::fs::read(&file)?;
            request(reqwest::Method::POST, "/conf/save")
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?
        }
        Commands::Reset => request(reqwest::Method::POST, "/conf/reset").send().await?,
        Commands::Reboot => request(reqwest::Method::POST, "/reboot").send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: device returned status {}", status);
        if !text.is_empty() {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }
    if text.is_empty() {
        println!("OK");
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
