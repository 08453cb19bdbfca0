use serde::Serialize;
use time::OffsetDateTime;

use crate::core::{Framework, FrameworkStats, MappedFinding, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeOrigin {
    Oracle,
    Fallback,
    NoFindings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Narrative {
    pub text: String,
    pub origin: NarrativeOrigin,
}

#[derive(Debug, Clone)]
pub struct FrameworkSection<'a> {
    pub framework: &'a Framework,
    pub stats: FrameworkStats,
    pub mapped: Vec<MappedFinding>,
    pub narrative: Narrative,
    pub csv: String,
}

#[derive(Debug, Clone)]
pub struct Report<'a> {
    pub generated_at: OffsetDateTime,
    pub window: TimeWindow,
    pub sections: Vec<FrameworkSection<'a>>,
    pub combined: Option<Narrative>,
}
