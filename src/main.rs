use std::error::Error;

use clap::Parser;
use cli::model::{Cli, CliCommands};
use heyu::{Heyu, X10Controller};
use settings::Settings;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use x10::SwitchState;

pub mod bridge;
pub mod cli;
pub mod heyu;
pub mod mqtt;
pub mod settings;
pub mod x10;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = dispatch(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<(), Box<dyn Error>> {
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(CliCommands::Run) {
        CliCommands::Run => {
            tokio::select! {
                res = bridge::run(settings) => {
                    res.map_err(|e| format!("bridge stopped: {e}"))?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down x10mqtt");
                }
            }
        }
        CliCommands::CheckConfig => {
            println!("{}", settings.redacted());
        }
        CliCommands::Send(args) => {
            let heyu = Heyu::from_settings(&settings);
            let state: SwitchState = args.state.into();
            heyu.execute(args.address, state).await?;
            info!("sent {state} to {}", args.address);
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose { "x10mqtt=debug" } else { "x10mqtt=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}
