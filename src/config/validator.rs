// Config validation
// Runs once at startup, before any limit is installed or process spawned

use crate::config::types::{CgrunError, Result, RunConfig};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate config at startup
///
/// Errors are fatal; warnings are logged and the run continues.
pub fn validate_config(config: &RunConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_command(config, &mut result);
    validate_accounting(config, &mut result);

    for warning in &result.warnings {
        log::warn!("Config validation warning: {}", warning);
    }

    if !result.is_valid() {
        return Err(CgrunError::Config(result.errors.join("; ")));
    }

    Ok(result)
}

fn validate_command(config: &RunConfig, result: &mut ValidationResult) {
    match config.command.first() {
        None => result.add_error("no command supplied".to_string()),
        Some(program) if program.is_empty() => {
            result.add_error("command name is empty".to_string())
        }
        Some(_) => {}
    }
}

fn validate_accounting(config: &RunConfig, result: &mut ValidationResult) {
    if !config.collect_stats {
        return;
    }

    if config.subsystems.is_empty() {
        result.add_error("subsystem list is empty; use --no-stats to skip accounting".to_string());
    }

    if config.output_path.file_name().is_none() {
        result.add_error(format!(
            "output path {} does not name a file",
            config.output_path.display()
        ));
    }

    if let Some(parent) = config.output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            result.add_warning(format!(
                "output directory {} does not exist; the report will not be written",
                parent.display()
            ));
        }
    }
}
