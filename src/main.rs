//! stalkercheck - Stalker portal client and IPTV account checker
//!
//! # Usage
//!
//! ```bash
//! stalkercheck add-stalker http://portal.tv/c/ 00:1A:79:12:34:56
//! stalkercheck check --stream --json
//! stalkercheck items <account> 12 --kind movie --page 2
//! ```

use clap::Parser;

use stalkercheck::cli::{Cli, Command, ExitCode, Output};
use stalkercheck::commands::{self, Context};
use stalkercheck::logging::{init_tracing, DEFAULT_FILTER};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(DEFAULT_FILTER, cli.log_json);

    run_cli(cli).await.into()
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);

    let command = match cli.command {
        // Identity needs no store
        Command::Identity(cmd) => return commands::identity_cmd(cmd, &output).await,
        command => command,
    };

    let ctx = match Context::new(cli.config, cli.store) {
        Ok(ctx) => ctx,
        Err(e) => return output.error(format!("{:#}", e), ExitCode::Error),
    };

    match command {
        Command::AddStalker(cmd) => commands::add_stalker_cmd(cmd, &ctx, &output).await,

        Command::AddXtream(cmd) => commands::add_xtream_cmd(cmd, &ctx, &output).await,

        Command::Accounts => commands::accounts_cmd(&ctx, &output).await,

        Command::Check(cmd) => commands::check_cmd(cmd, &ctx, &output).await,

        Command::Categories(cmd) => commands::categories_cmd(cmd, &ctx, &output).await,

        Command::Items(cmd) => commands::items_cmd(cmd, &ctx, &output).await,

        Command::Seasons(cmd) => commands::seasons_cmd(cmd, &ctx, &output).await,

        Command::Episodes(cmd) => commands::episodes_cmd(cmd, &ctx, &output).await,

        Command::Link(cmd) => commands::link_cmd(cmd, &ctx, &output).await,

        Command::Identity(cmd) => commands::identity_cmd(cmd, &output).await,
    }
}
