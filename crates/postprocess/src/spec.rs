//! Typed post-processor specifications.
//!
//! A closed tagged enum matched exhaustively by the pipeline: adding a new
//! stage is a compiler-enforced match update.

use serde::{Deserialize, Serialize};

use extract_common::{ExtractionError, ExtractionResult};

/// Aggregation interval for statistic elaboration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatInterval {
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl StatInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Months => "months",
            Self::Years => "years",
        }
    }
}

/// Sub-mode of grid and point interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridInterpKind {
    Near,
    Bilin,
    Average,
    Min,
    Max,
}

impl GridInterpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Near => "near",
            Self::Bilin => "bilin",
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// How the external tool is driven for this sub-mode.
    pub fn mode(&self) -> InvocationMode {
        match self {
            Self::Near | Self::Bilin => InvocationMode::Interpolate,
            Self::Average | Self::Min | Self::Max => InvocationMode::BoxAggregate,
        }
    }
}

/// Tool invocation mode selected by the interpolation sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    Interpolate,
    BoxAggregate,
}

impl InvocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interpolate => "interpolate",
            Self::BoxAggregate => "boxaggregate",
        }
    }
}

/// Format of an uploaded coordinate file for point interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordFormat {
    Shp,
    Geojson,
}

impl CoordFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shp => "shp",
            Self::Geojson => "geojson",
        }
    }
}

/// One post-processing transform with its typed parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "processor", rename_all = "snake_case")]
pub enum PostProcessorSpec {
    DerivedVariables {
        variables: Vec<String>,
    },
    StatisticElaboration {
        input_timerange: u32,
        output_timerange: u32,
        interval: StatInterval,
        step: u32,
    },
    GridCropping {
        ilon: f64,
        ilat: f64,
        flon: f64,
        flat: f64,
    },
    GridInterpolation {
        sub_type: GridInterpKind,
        nx: u32,
        ny: u32,
        ilon: f64,
        ilat: f64,
        flon: f64,
        flat: f64,
    },
    PointInterpolation {
        sub_type: GridInterpKind,
        coord_filepath: String,
        coord_format: CoordFormat,
    },
}

impl PostProcessorSpec {
    /// Fixed execution rank; stages always run in ascending rank
    /// regardless of the order supplied by the caller.
    pub fn rank(&self) -> u8 {
        match self {
            Self::DerivedVariables { .. } => 0,
            Self::StatisticElaboration { .. } => 1,
            Self::GridCropping { .. } => 2,
            Self::GridInterpolation { .. } => 3,
            Self::PointInterpolation { .. } => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DerivedVariables { .. } => "derived_variables",
            Self::StatisticElaboration { .. } => "statistic_elaboration",
            Self::GridCropping { .. } => "grid_cropping",
            Self::GridInterpolation { .. } => "grid_interpolation",
            Self::PointInterpolation { .. } => "point_interpolation",
        }
    }

    /// Cropping and the two interpolations are mutually exclusive.
    pub fn is_geographic(&self) -> bool {
        matches!(
            self,
            Self::GridCropping { .. }
                | Self::GridInterpolation { .. }
                | Self::PointInterpolation { .. }
        )
    }
}

/// Validate a requested transform chain: each variant at most once, at most
/// one geographic transform.
pub fn validate_specs(specs: &[PostProcessorSpec]) -> ExtractionResult<()> {
    let mut seen = [false; 5];
    let mut geographic = 0;

    for spec in specs {
        let rank = spec.rank() as usize;
        if seen[rank] {
            return Err(ExtractionError::InvalidFilters(format!(
                "Duplicate post-processor: {}",
                spec.name()
            )));
        }
        seen[rank] = true;

        if spec.is_geographic() {
            geographic += 1;
        }
    }

    if geographic > 1 {
        return Err(ExtractionError::InvalidFilters(
            "At most one of grid_cropping, grid_interpolation and point_interpolation \
             may be requested"
                .to_string(),
        ));
    }

    Ok(())
}

/// The requested chain in execution order.
pub fn ordered(specs: &[PostProcessorSpec]) -> Vec<PostProcessorSpec> {
    let mut ordered = specs.to_vec();
    ordered.sort_by_key(|spec| spec.rank());
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived() -> PostProcessorSpec {
        PostProcessorSpec::DerivedVariables {
            variables: vec!["t2m".to_string()],
        }
    }

    fn cropping() -> PostProcessorSpec {
        PostProcessorSpec::GridCropping {
            ilon: 6.0,
            ilat: 43.0,
            flon: 14.0,
            flat: 47.5,
        }
    }

    #[test]
    fn test_execution_order_is_invariant_under_input_order() {
        let a = ordered(&[cropping(), derived()]);
        let b = ordered(&[derived(), cropping()]);
        assert_eq!(a, b);
        assert_eq!(a[0].name(), "derived_variables");
        assert_eq!(a[1].name(), "grid_cropping");
    }

    #[test]
    fn test_duplicate_variant_rejected() {
        let err = validate_specs(&[derived(), derived()]).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidFilters(_)));
    }

    #[test]
    fn test_geographic_transforms_are_exclusive() {
        let interp = PostProcessorSpec::GridInterpolation {
            sub_type: GridInterpKind::Near,
            nx: 100,
            ny: 100,
            ilon: 6.0,
            ilat: 43.0,
            flon: 14.0,
            flat: 47.5,
        };
        assert!(validate_specs(&[cropping(), interp]).is_err());
        assert!(validate_specs(&[cropping(), derived()]).is_ok());
    }

    #[test]
    fn test_interp_sub_type_selects_mode() {
        assert_eq!(GridInterpKind::Near.mode(), InvocationMode::Interpolate);
        assert_eq!(GridInterpKind::Bilin.mode(), InvocationMode::Interpolate);
        assert_eq!(GridInterpKind::Average.mode(), InvocationMode::BoxAggregate);
        assert_eq!(GridInterpKind::Max.mode(), InvocationMode::BoxAggregate);
    }

    #[test]
    fn test_spec_serialization_tag() {
        let json = serde_json::to_string(&PostProcessorSpec::StatisticElaboration {
            input_timerange: 0,
            output_timerange: 254,
            interval: StatInterval::Hours,
            step: 3,
        })
        .unwrap();
        assert!(json.contains("\"processor\":\"statistic_elaboration\""));

        let parsed: PostProcessorSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rank(), 1);
    }
}
