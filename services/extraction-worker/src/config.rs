//! Worker configuration assembly.
//!
//! Command-line flags and environment variables become the engine's
//! explicit config structs; the optional mail directory maps owner ids to
//! addresses (user administration itself is an external concern).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use extract_common::FederationConfig;
use postprocess::ToolsConfig;

/// SMTP settings for the email notification path.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Fixed-backoff retry policy for email delivery.
#[derive(Debug, Clone, Copy)]
pub struct EmailRetryConfig {
    pub attempts: u32,
    pub backoff_secs: u64,
}

impl Default for EmailRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MailDirectoryFile {
    #[serde(default)]
    users: HashMap<Uuid, String>,
}

/// Load the owner-id → email-address directory from a JSON file. A missing
/// file is an empty directory, not an error.
pub fn load_mail_directory(path: &Path) -> Result<HashMap<Uuid, String>> {
    if !path.exists() {
        warn!(path = %path.display(), "Mail directory not found, email notifications disabled for all users");
        return Ok(HashMap::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mail directory: {}", path.display()))?;
    let parsed: MailDirectoryFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse mail directory: {}", path.display()))?;

    info!(count = parsed.users.len(), "Loaded mail directory");
    Ok(parsed.users)
}

/// Build the engine configuration from the service flags.
#[allow(clippy::too_many_arguments)]
pub fn federation_config(
    retention_days: i64,
    max_output_size: u64,
    user_quota: u64,
    data_dir: PathBuf,
    tmp_dir: PathBuf,
    multimodel_validity_hours: Vec<u32>,
    request_retention_days: i64,
) -> FederationConfig {
    FederationConfig {
        retention_days,
        max_output_size,
        user_quota,
        data_dir,
        tmp_dir,
        multimodel_validity_hours,
        request_retention_days,
    }
}

/// Tool programs, overridable one by one from the environment.
pub fn tools_config() -> ToolsConfig {
    let mut tools = ToolsConfig::default();

    let overrides = [
        ("TOOL_DERIVED_VARIABLES", &mut tools.derived_variables),
        ("TOOL_STATISTIC_ELABORATION", &mut tools.statistic_elaboration),
        ("TOOL_GRID_CROPPING", &mut tools.grid_cropping),
        ("TOOL_GRID_INTERPOLATION", &mut tools.grid_interpolation),
        ("TOOL_POINT_INTERPOLATION", &mut tools.point_interpolation),
        ("TOOL_FORMAT_CONVERSION", &mut tools.format_conversion),
    ];

    for (var, slot) in overrides {
        if let Ok(value) = std::env::var(var) {
            *slot = value;
        }
    }

    tools
}
