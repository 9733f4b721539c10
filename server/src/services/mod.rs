pub mod architecture;
pub mod experts;
pub mod failure_classifier;
pub mod llm;
pub mod load_profile;
pub mod pipeline;
pub mod probe;
pub mod registry;
pub mod report;
pub mod rules;

pub use architecture::Architecture;
pub use experts::{Expert, ExpertMetadata, ToolMode, ToolSpec};
pub use failure_classifier::{FailureCategory, classify_failure};
pub use pipeline::{DiagnosticReport, Pipeline};
pub use probe::{MysqlProbe, Probe};
pub use registry::ToolRegistry;
pub use rules::{Band, RuleLibrary};
