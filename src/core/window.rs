use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl TimeWindow {
    // None when the start would fall outside the RFC 3339 year range (0000..=9999).
    pub fn lookback(end: OffsetDateTime, hours: u32) -> Option<Self> {
        let start = end.checked_sub(Duration::hours(i64::from(hours)))?;
        (start.year() >= 0).then_some(Self { start, end })
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn describe(&self) -> String {
        let fmt = |t: OffsetDateTime| t.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string());
        format!("{} .. {}", fmt(self.start), fmt(self.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn lookback_window_is_inclusive() {
        let end = datetime!(2026-03-02 12:00 UTC);
        let w = TimeWindow::lookback(end, 24).expect("window");
        assert_eq!(w.start, datetime!(2026-03-01 12:00 UTC));
        assert!(w.contains(w.start));
        assert!(w.contains(end));
        assert!(!w.contains(datetime!(2026-03-01 11:59 UTC)));
    }

    #[test]
    fn lookback_past_year_zero_is_rejected() {
        let end = datetime!(2026-03-02 12:00 UTC);
        assert!(TimeWindow::lookback(end, u32::MAX).is_none());
        assert!(TimeWindow::lookback(end, 90_000_000).is_none());
        let far = TimeWindow::lookback(end, 17_000_000).expect("window within range");
        assert!(far.start.year() >= 0);
        assert!(!far.describe().contains("unknown"));
    }
}
