mod config;
mod run;

use clap::ArgMatches;
use tracing::error;

/// Dispatch a parsed command line. Returns the process exit code.
pub fn run_command(matches: &ArgMatches) -> Result<i32, Box<dyn std::error::Error>> {
    match matches.subcommand() {
        Some(("run", sub_matches)) => run::handle_run_command(sub_matches),
        Some(("config", _)) => config::handle_config_command(),
        _ => {
            error!(event = "cli.command_unknown");
            Err("Unknown command".into())
        }
    }
}
