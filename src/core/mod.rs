mod family;
mod finding;
mod framework;
mod mapped;
mod report;
mod severity;
mod stats;
mod window;

pub use family::family_breakdown;
pub use finding::{Finding, RESOURCE_ID_ATTRIBUTE, UNKNOWN_RESOURCE};
pub use framework::{Framework, MappingTable};
pub use mapped::MappedFinding;
pub use report::{FrameworkSection, Narrative, NarrativeOrigin, Report};
pub use severity::Severity;
pub use stats::FrameworkStats;
pub use window::TimeWindow;
