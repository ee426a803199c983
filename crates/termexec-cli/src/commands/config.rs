use tracing::{error, info};

use termexec::load_config;

pub(crate) fn handle_config_command() -> Result<i32, Box<dyn std::error::Error>> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", crate::color::error(&format!("Failed to load config: {}", e)));
            error!(event = "cli.config_failed", error = %e);
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&config)?);
    info!(event = "cli.config_completed");
    Ok(0)
}
