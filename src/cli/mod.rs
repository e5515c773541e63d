//! CLI module for Plaza
//!
//! Provides commands:
//! - `serve`: Start the canvas server with optional host/port/store overrides
//! - `config show`: Print the effective configuration

use clap::{Args, Parser, Subcommand};

/// Plaza canvas server CLI
#[derive(Parser, Debug)]
#[command(name = "plaza")]
#[command(about = "Shared pixel canvas service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve(ServeArgs),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

/// Overrides applied on top of file and environment configuration.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Bind address override
    #[arg(long)]
    pub host: Option<String>,
    /// Port override
    #[arg(long)]
    pub port: Option<u16>,
    /// Redis URL override
    #[arg(long)]
    pub redis_url: Option<String>,
    /// Write surface override: agent | session
    #[arg(long)]
    pub mode: Option<String>,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve(args)) => crate::server::run(args).await,
        Some(Commands::Config {
            command: ConfigCommands::Show,
        }) => {
            let config = crate::server::load_config()?;
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
