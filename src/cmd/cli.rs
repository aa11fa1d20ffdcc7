// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{env, net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::{error, set_max_level};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use crate::{config::Config, server};

use super::run_review;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
pub struct CommonOptions {
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one code-review build from its CI task group and publish the
    /// classified issues
    Run(RunOptions),

    /// Run the issue store web server for remote access to analysis history
    RunServer {
        /// Socket to bind for server
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind_socket: SocketAddr,

        /// Configuration document seeding the known repositories
        #[arg(short, long)]
        configuration: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct RunOptions {
    /// Path to the TOML configuration document
    #[arg(short, long)]
    pub configuration: Option<PathBuf>,

    /// Name of a CI secret holding the configuration instead of a local file
    #[arg(long)]
    pub taskcluster_secret: Option<String>,
}

pub async fn run_cli() -> ExitCode {
    let cli = Cli::parse();
    let _ = TermLogger::init(
        cli.common.verbose.log_level_filter(),
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    set_max_level(cli.common.verbose.log_level_filter());

    if env::var("REVIEWBOT_TRACE").is_ok() {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    match &cli.command {
        Commands::Run(options) => run_review::cli(&cli.common, options).await,
        Commands::RunServer {
            bind_socket,
            configuration,
        } => {
            let repositories = match configuration {
                Some(path) => match Config::load(path) {
                    Ok(config) => config.repositories,
                    Err(e) => {
                        error!("unable to load configuration: {e}");
                        return ExitCode::from(1);
                    }
                },
                None => Vec::new(),
            };
            server::cli(bind_socket, repositories).await;
            ExitCode::SUCCESS
        }
    }
}
