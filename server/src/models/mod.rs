pub mod dataset;
pub mod finding;
pub mod response;

pub use dataset::{
    CollectedDataset, CollectedItem, QueryDescriptor, QueryKind, Row, ScalarValue,
};
pub use finding::{
    Finding, HealthLevel, HealthScore, HealthStatus, Phase, Priority, Recommendation,
    RecommendedAction, Severity, Step, StepKind,
};
pub use response::{Analysis, ToolResponse};
