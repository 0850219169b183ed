// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use indexmap::IndexMap;
use serde::Deserialize;

/// Multi-seat login and display manager daemon.
#[derive(Debug, Parser)]
#[command(name = "doorman", version, about)]
pub struct Config {
    /// Path to the seat definition file (JSON).
    #[arg(long, env = "DOORMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "DOORMAN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "DOORMAN_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Run unprivileged: skip hook scripts, credentials, and user switching.
    #[arg(long, env = "DOORMAN_TEST_MODE")]
    pub test_mode: bool,

    /// Static user table for the test-mode authentication stack
    /// (user:password per line).
    #[arg(long, env = "DOORMAN_PASSWD_FILE")]
    pub passwd_file: Option<PathBuf>,

    /// Greeter command for seats that do not set greeter-session.
    #[arg(long, env = "DOORMAN_GREETER_SESSION", default_value = "/usr/bin/doorman-greeter")]
    pub greeter_session: String,

    /// User session command for seats that do not set user-session.
    #[arg(long, env = "DOORMAN_USER_SESSION", default_value = "/usr/bin/x-session-manager")]
    pub user_session: String,

    /// System account the greeter runs as.
    #[arg(long, env = "DOORMAN_GREETER_USER", default_value = "doorman")]
    pub greeter_user: String,
}

/// One seat from the definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeatDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default = "default_seat_type")]
    pub kind: String,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

fn default_seat_type() -> String {
    "local".to_owned()
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if self.greeter_session.trim().is_empty() {
            anyhow::bail!("--greeter-session must not be empty");
        }
        Ok(())
    }

    /// Seats to bring up at startup. Without a definition file the daemon
    /// runs one local seat with default properties.
    pub fn load_seats(&self) -> anyhow::Result<Vec<SeatDefinition>> {
        let Some(path) = &self.config else {
            return Ok(vec![SeatDefinition {
                name: Some("seat0".to_owned()),
                kind: default_seat_type(),
                properties: IndexMap::new(),
            }]);
        };
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let seats: Vec<SeatDefinition> = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        if seats.is_empty() {
            anyhow::bail!("{}: no seats defined", path.display());
        }
        Ok(seats)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
