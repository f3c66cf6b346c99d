use std::path::PathBuf;

use clap_derive::{Args, Parser, Subcommand, ValueEnum};

use crate::x10::{Address, SwitchState};

/// Bridges X10 modules driven by heyu to an MQTT broker
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional RON settings file, environment variables take precedence
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level (ignored when RUST_LOG is set)
    #[arg(short, long)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<CliCommands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommands {
    /// Run the bridge (default)
    Run,
    /// Print the resolved settings and exit
    CheckConfig,
    /// Switch one module through heyu and exit
    Send(SendArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SendArgs {
    /// Module address, ie. A1
    #[arg(value_parser = parse_address)]
    pub address: Address,
    pub state: StateArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateArg {
    On,
    Off,
}

impl From<StateArg> for SwitchState {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::On => SwitchState::On,
            StateArg::Off => SwitchState::Off,
        }
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse().map_err(|e| format!("{e}"))
}
