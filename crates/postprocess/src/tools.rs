//! External transform tool invocation.
//!
//! Every stage is a single blocking process call taking the input path,
//! the output path and stage-specific flags. A non-zero exit status is
//! always a post-processing failure.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use extract_common::{ExtractionError, ExtractionResult};

/// Programs used for each pipeline stage. Overridable so deployments can
/// point at site-local tool builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub derived_variables: String,
    pub statistic_elaboration: String,
    pub grid_cropping: String,
    pub grid_interpolation: String,
    pub point_interpolation: String,
    pub format_conversion: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            derived_variables: "met-derive".to_string(),
            statistic_elaboration: "met-stat".to_string(),
            grid_cropping: "met-crop".to_string(),
            grid_interpolation: "met-regrid".to_string(),
            point_interpolation: "met-pointinterp".to_string(),
            format_conversion: "met-convert".to_string(),
        }
    }
}

/// Run one external transform: `program <input> <output> <flags...>`.
pub async fn invoke(
    program: &str,
    input: &Path,
    output: &Path,
    flags: &[String],
) -> ExtractionResult<()> {
    debug!(program = %program, input = %input.display(), output = %output.display(), "Invoking transform tool");

    let result = Command::new(program)
        .arg(input)
        .arg(output)
        .args(flags)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            ExtractionError::PostProcessing(format!("Failed to launch {}: {}", program, e))
        })?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(ExtractionError::PostProcessing(format!(
            "{} exited with {}: {}",
            program,
            result.status,
            stderr.trim()
        )));
    }

    Ok(())
}
