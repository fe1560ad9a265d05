//! Post-processing pipeline for extracted data.
//!
//! An ordered chain of named transform stages, each invoking an external
//! tool that consumes the previous stage's output file and produces a new
//! one. The numeric internals of the tools are not this crate's concern;
//! their invocation contract, ordering and failure semantics are.

pub mod pipeline;
pub mod spec;
pub mod tools;

pub use pipeline::{Pipeline, StageOutput};
pub use spec::{
    validate_specs, CoordFormat, GridInterpKind, InvocationMode, PostProcessorSpec, StatInterval,
};
pub use tools::ToolsConfig;
