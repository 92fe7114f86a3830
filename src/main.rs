// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use fairlock::commands::config::ConfigCommand;
use fairlock::commands::simulate::{SimulateCommand, SimulateOptions};
use fairlock::config::{FairlockConfig, new_fairlock_config};
use fairlock::error::{FairlockError, Result, format_error_chain, get_exit_code};
use fairlock::locking::{LockTimeoutResolution, LockTimeoutResolver, LockTimeoutValue, signal_token};
use fairlock::logging;
use std::path::PathBuf;
use std::time::Duration;

const TIMEOUT_ENV: &str = "FAIRLOCK_LOCK_TIMEOUT";

#[derive(Parser)]
#[command(name = "fairlock")]
#[command(author, version, about = "Fair distributed mutex over a coordination service", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Race competitors for one lock against an in-memory service
    #[command(visible_alias = "sim")]
    Simulate {
        /// Lock root path
        #[arg(long, default_value = "/locks/simulation")]
        root: String,

        /// Number of competing sessions
        #[arg(short, long, default_value_t = 5)]
        workers: usize,

        /// How long each winner holds the lock
        #[arg(long, value_name = "MILLIS", default_value_t = 20)]
        hold_ms: u64,

        /// Acquisition timeout ("30", "250ms", "infinite")
        #[arg(long, value_name = "TIMEOUT")]
        timeout: Option<String>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Acquisition timeout override to resolve
        #[arg(long, value_name = "TIMEOUT")]
        timeout: Option<String>,
    },
}

fn resolve_timeout(config: &FairlockConfig, cli: Option<&str>) -> Result<LockTimeoutResolution> {
    let env = std::env::var(TIMEOUT_ENV).ok();
    LockTimeoutResolver::new(LockTimeoutValue::Infinite)
        .with_cli(cli)
        .with_env(env.as_deref())
        .with_config(config.locking.timeout_value()?)
        .resolve()
        .map_err(|e| FairlockError::InvalidConfig(e.to_string()))
}

fn main() {
    let cli = Cli::parse();

    logging::setup_logger(cli.verbose);

    let config = match new_fairlock_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error_chain(&e));
            std::process::exit(get_exit_code(&e));
        }
    };

    let result: Result<()> = (|| match cli.command {
        Commands::Simulate {
            root,
            workers,
            hold_ms,
            timeout,
            json,
        } => {
            let timeout = resolve_timeout(&config, timeout.as_deref())?;
            let command = SimulateCommand::new(&config, signal_token())?;
            command.execute(&SimulateOptions {
                root,
                workers,
                hold: Duration::from_millis(hold_ms),
                timeout: timeout.value,
                json,
            })
        }
        Commands::Config { timeout } => {
            let timeout = resolve_timeout(&config, timeout.as_deref())?;
            ConfigCommand::new(&config)?.execute(timeout)
        }
    })();

    if let Err(e) = result {
        eprintln!("{}", format_error_chain(&e));
        std::process::exit(get_exit_code(&e));
    }
}
