//! Config CLI command.

use super::output_error;
use crate::config::DupstackConfig;
use crate::Result;
use std::io::Write;

/// Prints the effective configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigCommand {
    /// Print only the database path.
    pub database_path: bool,
}

impl ConfigCommand {
    /// Renders the configuration after file and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    pub fn execute(&self, config: &DupstackConfig, out: &mut dyn Write) -> Result<()> {
        if self.database_path {
            writeln!(out, "{}", config.database_path().display()).map_err(output_error)?;
            return Ok(());
        }

        writeln!(out, "# Effective configuration").map_err(output_error)?;
        writeln!(out, "# Database: {}", config.database_path().display())
            .map_err(output_error)?;
        writeln!(out).map_err(output_error)?;
        write!(out, "{}", config.to_toml()?).map_err(output_error)
    }
}
