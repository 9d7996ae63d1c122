use chrono::NaiveDate;
use serde::Serialize;

use super::installments::ScheduleStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Overdue,
    Urgent,
    Warning,
    Normal,
}

/// Day cutoffs for the urgent and warning buckets. Each screen that shows
/// due dates has its own pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrgencyCutoffs {
    pub urgent_days: i64,
    pub warning_days: i64,
}

impl UrgencyCutoffs {
    pub const AMOUNT_MODIFICATION: Self = Self::new(3, 7);
    pub const SCHEDULE_TABLE: Self = Self::new(3, 15);
    pub const DUE_DATES: Self = Self::new(2, 7);

    pub const fn new(urgent_days: i64, warning_days: i64) -> Self {
        Self {
            urgent_days,
            warning_days,
        }
    }

    pub fn from_preset(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some("amount_modification") => Self::AMOUNT_MODIFICATION,
            Some("due_dates") => Self::DUE_DATES,
            _ => Self::SCHEDULE_TABLE,
        }
    }

    /// Apply optional overrides. A warning cutoff below the urgent one is
    /// raised to match it.
    pub fn with_overrides(self, urgent_days: Option<i64>, warning_days: Option<i64>) -> Self {
        let urgent_days = urgent_days.unwrap_or(self.urgent_days).max(0);
        let warning_days = warning_days.unwrap_or(self.warning_days).max(urgent_days);
        Self::new(urgent_days, warning_days)
    }
}

pub fn days_until_due(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (due_date - today).num_days()
}

pub fn classify(
    due_date: NaiveDate,
    today: NaiveDate,
    status: ScheduleStatus,
    cutoffs: UrgencyCutoffs,
) -> Urgency {
    let days = days_until_due(due_date, today);
    if days < 0 || status == ScheduleStatus::Overdue {
        Urgency::Overdue
    } else if days <= cutoffs.urgent_days {
        Urgency::Urgent
    } else if days <= cutoffs.warning_days {
        Urgency::Warning
    } else {
        Urgency::Normal
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn buckets_follow_cutoffs() {
        let today = date(10);
        let cutoffs = UrgencyCutoffs::SCHEDULE_TABLE;
        let pending = ScheduleStatus::Pending;
        assert_eq!(classify(date(9), today, pending, cutoffs), Urgency::Overdue);
        assert_eq!(classify(date(10), today, pending, cutoffs), Urgency::Urgent);
        assert_eq!(classify(date(13), today, pending, cutoffs), Urgency::Urgent);
        assert_eq!(classify(date(14), today, pending, cutoffs), Urgency::Warning);
        assert_eq!(classify(date(25), today, pending, cutoffs), Urgency::Warning);
        assert_eq!(classify(date(26), today, pending, cutoffs), Urgency::Normal);
    }

    #[test]
    fn overdue_status_wins_over_days() {
        let today = date(10);
        assert_eq!(
            classify(date(28), today, ScheduleStatus::Overdue, UrgencyCutoffs::DUE_DATES),
            Urgency::Overdue
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let inputs = (date(1), date(5), ScheduleStatus::Partial, UrgencyCutoffs::DUE_DATES);
        let first = classify(inputs.0, inputs.1, inputs.2, inputs.3);
        for _ in 0..10 {
            assert_eq!(classify(inputs.0, inputs.1, inputs.2, inputs.3), first);
        }
    }

    #[test]
    fn presets_differ_per_screen() {
        let today = date(10);
        let due = date(13);
        let pending = ScheduleStatus::Pending;
        assert_eq!(
            classify(due, today, pending, UrgencyCutoffs::AMOUNT_MODIFICATION),
            Urgency::Urgent
        );
        assert_eq!(
            classify(due, today, pending, UrgencyCutoffs::DUE_DATES),
            Urgency::Warning
        );
    }

    #[test]
    fn overrides_keep_warning_above_urgent() {
        let cutoffs = UrgencyCutoffs::from_preset(Some("due_dates")).with_overrides(Some(10), None);
        assert_eq!(cutoffs, UrgencyCutoffs::new(10, 10));
        let cutoffs = UrgencyCutoffs::from_preset(None).with_overrides(Some(-4), Some(5));
        assert_eq!(cutoffs, UrgencyCutoffs::new(0, 5));
    }
}
