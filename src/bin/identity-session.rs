use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use identity_session::SessionClient;
use identity_session::auth::{
    AuthWindow, LoginFailure, PostMessageGateway, ProviderEndpoint, WindowOpener,
    gateway::ProviderMessage,
};
use identity_session::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

#[derive(Parser)]
#[command(name = "identity-session", version = build_version(), about = "Manage the identity session of this client")]
struct Cli {
    /// Configuration file (defaults to ./identity-session.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show whether a session is active
    Status,
    /// Log in with the identity provider
    Login,
    /// Drop the stored session
    Logout,
    /// Print the principal requests are signed as
    Whoami,
    /// Send a signed call to a canister
    Call {
        canister_id: String,
        method: String,
        /// JSON argument
        #[arg(default_value = "null")]
        arg: String,
        /// Send as a query instead of an update call
        #[arg(long)]
        query: bool,
    },
}

fn build_version() -> &'static str {
    match option_env!("VERGEN_GIT_SHA") {
        Some(sha) if !sha.is_empty() => sha,
        _ => env!("CARGO_PKG_VERSION"),
    }
}

/// Provider "window" on the terminal: the URL is printed and the provider's
/// response is pasted back as JSON. An empty line cancels.
struct TerminalOpener;

#[async_trait]
impl WindowOpener for TerminalOpener {
    async fn open(&self, url: Url) -> Result<AuthWindow, LoginFailure> {
        let (window, endpoint) = AuthWindow::pair();
        println!("Open the identity provider to continue:\n  {}", url);
        tokio::spawn(relay_terminal(endpoint));
        Ok(window)
    }
}

async fn relay_terminal(mut endpoint: ProviderEndpoint) {
    if !endpoint.post(&ProviderMessage::AuthorizeReady).await {
        return;
    }

    let Some(request) = endpoint.next_request().await else {
        return;
    };
    match serde_json::to_string_pretty(&request) {
        Ok(json) => println!("Authorization request:\n{}", json),
        Err(e) => eprintln!("failed to render authorization request: {}", e),
    }
    println!("Paste the provider response (empty line to cancel):");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                let _ = endpoint.to_client.send(value).await;
                return;
            }
            Err(e) => eprintln!("not valid JSON ({}), try again:", e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    identity_session::logging::init(&config.logging);

    let gateway = Arc::new(PostMessageGateway::new(TerminalOpener));
    let client = SessionClient::from_config(&config, gateway)?;
    let manager = client.manager();

    manager
        .initialize()
        .await
        .context("initializing session")?;

    match cli.command {
        Command::Status => {
            let identity = manager.current_identity();
            println!("authenticated: {}", manager.is_authenticated());
            println!("principal: {}", identity.principal());
            if let Some(expires_at) = identity.expiration() {
                println!("expires: {}", expires_at.to_rfc3339());
            }
        }
        Command::Login => {
            if manager.is_authenticated() {
                println!("Already logged in as {}", manager.principal());
                return Ok(());
            }
            let identity = manager.login().await?;
            println!("Logged in as {}", identity.principal());
        }
        Command::Logout => {
            manager.logout().await;
            println!("Logged out");
        }
        Command::Whoami => {
            println!("{}", manager.principal());
        }
        Command::Call {
            canister_id,
            method,
            arg,
            query,
        } => {
            let arg: serde_json::Value =
                serde_json::from_str(&arg).context("argument must be JSON")?;
            let agent = client.agent();
            let reply = if query {
                agent.query(&canister_id, &method, &arg).await?
            } else {
                agent.call(&canister_id, &method, &arg).await?
            };
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }

    Ok(())
}
