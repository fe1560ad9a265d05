//! Fixed-order execution of a requested transform chain.

use std::path::{Path, PathBuf};

use tracing::info;

use extract_common::{DataFormat, ExtractionError, ExtractionResult};

use crate::spec::{self, PostProcessorSpec};
use crate::tools::{self, ToolsConfig};

/// Result of one pipeline stage, threaded explicitly between stage calls.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub path: PathBuf,
    pub format: DataFormat,
}

impl StageOutput {
    pub fn new(path: impl Into<PathBuf>, format: DataFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

/// The post-processing pipeline.
pub struct Pipeline<'a> {
    tools: &'a ToolsConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(tools: &'a ToolsConfig) -> Self {
        Self { tools }
    }

    /// Run the requested chain on the extraction output, then the optional
    /// format conversion. Stages execute in their fixed rank order, never
    /// in submission order.
    pub async fn run(
        &self,
        specs: &[PostProcessorSpec],
        input: StageOutput,
        requested_format: Option<DataFormat>,
        workdir: &Path,
    ) -> ExtractionResult<StageOutput> {
        spec::validate_specs(specs)?;

        let chain = spec::ordered(specs);
        let mut current = input;

        for (idx, stage) in chain.iter().enumerate() {
            current = self.run_stage(idx, stage, current, workdir).await?;
        }

        if let Some(format) = requested_format {
            if format != current.format {
                current = self.convert(chain.len(), current, format, workdir).await?;
            }
        }

        Ok(current)
    }

    async fn run_stage(
        &self,
        idx: usize,
        stage: &PostProcessorSpec,
        input: StageOutput,
        workdir: &Path,
    ) -> ExtractionResult<StageOutput> {
        let (program, flags, output_format) = match stage {
            PostProcessorSpec::DerivedVariables { variables } => (
                &self.tools.derived_variables,
                vec!["--derive".to_string(), variables.join(",")],
                input.format,
            ),
            PostProcessorSpec::StatisticElaboration {
                input_timerange,
                output_timerange,
                interval,
                step,
            } => (
                &self.tools.statistic_elaboration,
                vec![
                    "--input-timerange".to_string(),
                    input_timerange.to_string(),
                    "--output-timerange".to_string(),
                    output_timerange.to_string(),
                    "--interval".to_string(),
                    interval.as_str().to_string(),
                    "--step".to_string(),
                    step.to_string(),
                ],
                input.format,
            ),
            PostProcessorSpec::GridCropping {
                ilon,
                ilat,
                flon,
                flat,
            } => (
                &self.tools.grid_cropping,
                vec![
                    "--ilon".to_string(),
                    ilon.to_string(),
                    "--ilat".to_string(),
                    ilat.to_string(),
                    "--flon".to_string(),
                    flon.to_string(),
                    "--flat".to_string(),
                    flat.to_string(),
                ],
                input.format,
            ),
            PostProcessorSpec::GridInterpolation {
                sub_type,
                nx,
                ny,
                ilon,
                ilat,
                flon,
                flat,
            } => (
                &self.tools.grid_interpolation,
                vec![
                    "--mode".to_string(),
                    sub_type.mode().as_str().to_string(),
                    "--sub-type".to_string(),
                    sub_type.as_str().to_string(),
                    "--nx".to_string(),
                    nx.to_string(),
                    "--ny".to_string(),
                    ny.to_string(),
                    "--ilon".to_string(),
                    ilon.to_string(),
                    "--ilat".to_string(),
                    ilat.to_string(),
                    "--flon".to_string(),
                    flon.to_string(),
                    "--flat".to_string(),
                    flat.to_string(),
                ],
                input.format,
            ),
            PostProcessorSpec::PointInterpolation {
                sub_type,
                coord_filepath,
                coord_format,
            } => {
                // The coordinate file is user-uploaded earlier; its absence
                // must fail before the tool is launched.
                if !Path::new(coord_filepath).is_file() {
                    return Err(ExtractionError::PostProcessing(format!(
                        "Coordinate file not found: {}",
                        coord_filepath
                    )));
                }

                (
                    &self.tools.point_interpolation,
                    vec![
                        "--mode".to_string(),
                        sub_type.mode().as_str().to_string(),
                        "--sub-type".to_string(),
                        sub_type.as_str().to_string(),
                        "--coords".to_string(),
                        coord_filepath.clone(),
                        "--coord-format".to_string(),
                        coord_format.as_str().to_string(),
                    ],
                    // Point interpolation always yields the point-observation
                    // binary format, whatever the input was.
                    DataFormat::Bufr,
                )
            }
        };

        let output_path = workdir.join(format!(
            "stage{:02}_{}.{}",
            idx + 1,
            stage.name(),
            output_format.extension()
        ));

        info!(stage = stage.name(), output = %output_path.display(), "Running post-processing stage");
        tools::invoke(program, &input.path, &output_path, &flags).await?;
        require_nonempty(stage.name(), &output_path)?;

        Ok(StageOutput::new(output_path, output_format))
    }

    async fn convert(
        &self,
        idx: usize,
        input: StageOutput,
        format: DataFormat,
        workdir: &Path,
    ) -> ExtractionResult<StageOutput> {
        let output_path = workdir.join(format!(
            "stage{:02}_format_conversion.{}",
            idx + 1,
            format.extension()
        ));

        info!(to = format.as_str(), output = %output_path.display(), "Converting output format");
        tools::invoke(
            &self.tools.format_conversion,
            &input.path,
            &output_path,
            &["--to".to_string(), format.as_str().to_string()],
        )
        .await?;
        require_nonempty("format_conversion", &output_path)?;

        Ok(StageOutput::new(output_path, format))
    }
}

/// A missing or zero-byte stage output is always an error, never skipped.
fn require_nonempty(stage: &str, path: &Path) -> ExtractionResult<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(ExtractionError::PostProcessing(format!(
            "{} produced an empty output file",
            stage
        ))),
        Err(_) => Err(ExtractionError::PostProcessing(format!(
            "{} produced no output file",
            stage
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CoordFormat, GridInterpKind, StatInterval};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_tool(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn copy_tools(dir: &Path) -> ToolsConfig {
        let copy = write_tool(dir, "copytool", "cp \"$1\" \"$2\"");
        ToolsConfig {
            derived_variables: copy.clone(),
            statistic_elaboration: copy.clone(),
            grid_cropping: copy.clone(),
            grid_interpolation: copy.clone(),
            point_interpolation: copy.clone(),
            format_conversion: copy,
        }
    }

    fn input_file(dir: &Path) -> StageOutput {
        let path = dir.join("extracted.grib");
        std::fs::write(&path, b"grib payload").unwrap();
        StageOutput::new(path, DataFormat::Grib)
    }

    fn stat() -> PostProcessorSpec {
        PostProcessorSpec::StatisticElaboration {
            input_timerange: 0,
            output_timerange: 254,
            interval: StatInterval::Hours,
            step: 3,
        }
    }

    fn derived() -> PostProcessorSpec {
        PostProcessorSpec::DerivedVariables {
            variables: vec!["t2m".to_string()],
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_fixed_order() {
        let dir = TempDir::new().unwrap();
        let tools = copy_tools(dir.path());
        let pipeline = Pipeline::new(&tools);

        let out_a = pipeline
            .run(&[stat(), derived()], input_file(dir.path()), None, dir.path())
            .await
            .unwrap();
        let out_b = pipeline
            .run(&[derived(), stat()], input_file(dir.path()), None, dir.path())
            .await
            .unwrap();

        // Same chain, same final artifact, regardless of submission order.
        assert_eq!(out_a, out_b);
        assert!(out_a
            .path
            .to_string_lossy()
            .contains("statistic_elaboration"));
        assert_eq!(std::fs::read(&out_a.path).unwrap(), b"grib payload");
    }

    #[tokio::test]
    async fn test_empty_stage_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut tools = copy_tools(dir.path());
        tools.derived_variables = write_tool(dir.path(), "emptytool", ": > \"$2\"");
        let pipeline = Pipeline::new(&tools);

        let err = pipeline
            .run(&[derived()], input_file(dir.path()), None, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::PostProcessing(_)));
        assert!(err.to_string().contains("empty output"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut tools = copy_tools(dir.path());
        tools.statistic_elaboration = write_tool(dir.path(), "failtool", "exit 3");
        let pipeline = Pipeline::new(&tools);

        let err = pipeline
            .run(&[stat()], input_file(dir.path()), None, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::PostProcessing(_)));
    }

    #[tokio::test]
    async fn test_point_interpolation_requires_coordinate_file() {
        let dir = TempDir::new().unwrap();
        let tools = copy_tools(dir.path());
        let pipeline = Pipeline::new(&tools);

        let spec = PostProcessorSpec::PointInterpolation {
            sub_type: GridInterpKind::Near,
            coord_filepath: dir.path().join("missing.shp").to_string_lossy().into_owned(),
            coord_format: CoordFormat::Shp,
        };

        let err = pipeline
            .run(&[spec], input_file(dir.path()), None, dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Coordinate file not found"));
    }

    #[tokio::test]
    async fn test_point_interpolation_always_yields_bufr() {
        let dir = TempDir::new().unwrap();
        let tools = copy_tools(dir.path());
        let pipeline = Pipeline::new(&tools);

        let coords = dir.path().join("points.geojson");
        std::fs::write(&coords, b"{}").unwrap();

        let spec = PostProcessorSpec::PointInterpolation {
            sub_type: GridInterpKind::Bilin,
            coord_filepath: coords.to_string_lossy().into_owned(),
            coord_format: CoordFormat::Geojson,
        };

        let out = pipeline
            .run(&[spec], input_file(dir.path()), None, dir.path())
            .await
            .unwrap();
        assert_eq!(out.format, DataFormat::Bufr);
    }

    #[tokio::test]
    async fn test_format_conversion_runs_last() {
        let dir = TempDir::new().unwrap();
        let tools = copy_tools(dir.path());
        let pipeline = Pipeline::new(&tools);

        let out = pipeline
            .run(
                &[derived()],
                input_file(dir.path()),
                Some(DataFormat::Json),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(out.format, DataFormat::Json);
        assert!(out.path.to_string_lossy().ends_with("format_conversion.json"));
    }

    #[tokio::test]
    async fn test_conversion_skipped_when_format_matches() {
        let dir = TempDir::new().unwrap();
        let tools = copy_tools(dir.path());
        let pipeline = Pipeline::new(&tools);

        let out = pipeline
            .run(
                &[derived()],
                input_file(dir.path()),
                Some(DataFormat::Grib),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(out.format, DataFormat::Grib);
        assert!(out.path.to_string_lossy().contains("derived_variables"));
    }
}
