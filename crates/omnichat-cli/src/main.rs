use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use omnichat_core::{CoreConfig, CoreRuntime};

#[derive(Parser)]
#[command(name = "omnichat")]
#[command(about = "Headless client for the omnichat API")]
struct Cli {
    /// Directory for the local cache database (defaults to the platform
    /// data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// API base URL
    #[arg(long)]
    api_base: Option<String>,

    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session in the OS keychain
    Login {
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Drop the stored session and purge the local cache
    Logout,

    /// Show session and connectivity state
    Status,

    /// List conversations, most recently updated first
    Conversations,

    /// List the messages of one conversation
    Messages { conversation_id: String },

    /// Create a conversation
    CreateConversation {
        title: String,
        #[arg(long, short)]
        model: String,
    },

    /// Send a message to a conversation
    Send {
        conversation_id: String,
        content: String,
    },

    /// List the model catalog
    Models,

    /// List provider API key metadata
    Keys {
        #[arg(long)]
        provider: Option<String>,
    },

    /// Read the effective value of a preference key (all keys when omitted)
    PrefGet { key: Option<String> },

    /// Set a preference value (JSON; bare strings work too)
    PrefSet { key: String, value: String },
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.data_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("omnichat")
    })
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}

fn read_password() -> Result<String> {
    print!("password: ");
    std::io::stdout().flush()?;
    let mut password = String::new();
    std::io::stdin().read_line(&mut password)?;
    Ok(password.trim_end().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = CoreConfig::new(data_dir(&cli));
    if let Some(api_base) = &cli.api_base {
        config = config.with_api_base(api_base.clone());
    }
    let runtime = CoreRuntime::new(config).context("starting client runtime")?;

    match cli.command {
        Commands::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            let user = runtime.session().login(&email, &password).await?;
            println!("signed in as {}", user.email);
        }
        Commands::Logout => {
            runtime.session().logout();
            println!("signed out");
        }
        Commands::Status => {
            let state = runtime.monitor().current();
            print_json(
                &serde_json::json!({
                    "authenticated": runtime.session().is_authenticated(),
                    "user": runtime.session().user(),
                    "connectivity": format!("{:?}", state.connectivity),
                    "last_seen": state.last_seen,
                }),
                cli.pretty,
            )?;
        }
        Commands::Conversations => {
            print_json(&runtime.conversations().load().await?, cli.pretty)?;
        }
        Commands::Messages { conversation_id } => {
            print_json(
                &runtime.conversations().open(&conversation_id).await?,
                cli.pretty,
            )?;
        }
        Commands::CreateConversation { title, model } => {
            print_json(
                &runtime.conversations().create(&title, &model).await?,
                cli.pretty,
            )?;
        }
        Commands::Send {
            conversation_id,
            content,
        } => {
            print_json(
                &runtime
                    .conversations()
                    .send_message(&conversation_id, &content)
                    .await?,
                cli.pretty,
            )?;
        }
        Commands::Models => {
            print_json(&runtime.models().load().await?, cli.pretty)?;
        }
        Commands::Keys { provider } => {
            let keys = runtime.api_keys().load().await?;
            match provider {
                Some(provider) => print_json(
                    &runtime.api_keys().keys_for_provider(&provider),
                    cli.pretty,
                )?,
                None => print_json(&keys, cli.pretty)?,
            }
        }
        Commands::PrefGet { key } => match key {
            Some(key) => match runtime.preferences().get(&key) {
                Some(value) => print_json(&value, cli.pretty)?,
                None => bail!("no such preference: {key}"),
            },
            None => print_json(&runtime.preferences().effective(), cli.pretty)?,
        },
        Commands::PrefSet { key, value } => {
            // Accept raw JSON; fall back to treating the argument as a string.
            let value = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value));
            runtime.preferences().update_local(&key, value);
            runtime.preferences().sync().await?;
            println!("ok");
        }
    }

    Ok(())
}
