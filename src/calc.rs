use serde::{Deserialize, Serialize};

/// Knobs for the attendance gate. Stored per workspace under the
/// `policy.attendance` settings key; these are the compiled-in defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePolicy {
    pub fine_rate_per_day: f64,
    pub safe_threshold: f64,
    pub warning_threshold: f64,
    pub required_fraction: f64,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            fine_rate_per_day: 50.0,
            safe_threshold: 75.0,
            warning_threshold: 50.0,
            required_fraction: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceStatus {
    Safe,
    Warning,
    Danger,
}

impl AttendanceStatus {
    fn message(self) -> &'static str {
        match self {
            AttendanceStatus::Safe => "Attendance requirement met",
            AttendanceStatus::Warning => "Attendance below the safe threshold",
            AttendanceStatus::Danger => "Attendance critically low",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    /// Actual percentage: present days over sessions actually taken.
    /// This figure drives `status`, `message` and the fine.
    pub percentage: f64,
    pub status: AttendanceStatus,
    pub message: String,
    pub fine: f64,
    pub needs_action: bool,
    pub present_days: i64,
    pub total_days: i64,
    pub working_days: Option<i64>,
    /// Secondary metric: present days over the configured working days.
    pub working_days_percentage: f64,
}

/// Two-decimal rounding applied to user-facing percentages.
pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn percent(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    round_off_2_decimals(100.0 * numerator as f64 / denominator as f64)
}

/// Derives the attendance summary for one student. Pure: callers pass the
/// stored counts, nothing is persisted. `total_days` is the number of
/// attendance records ever taken for the student; `working_days` is the
/// class's configured term length, if set.
pub fn attendance_summary(
    present_days: i64,
    total_days: i64,
    working_days: Option<i64>,
    policy: &AttendancePolicy,
) -> AttendanceSummary {
    let percentage = percent(present_days, total_days);
    let working_days_percentage = percent(present_days, working_days.unwrap_or(0));

    let status = if percentage >= policy.safe_threshold {
        AttendanceStatus::Safe
    } else if percentage >= policy.warning_threshold {
        AttendanceStatus::Warning
    } else {
        AttendanceStatus::Danger
    };

    // The fine derives from the working-day shortfall, and only applies
    // while the actual percentage sits below the safe threshold.
    let (fine, shortfall) = if percentage < policy.safe_threshold {
        let required = (working_days.unwrap_or(0) as f64 * policy.required_fraction).ceil() as i64;
        let shortfall = (required - present_days).max(0);
        (shortfall as f64 * policy.fine_rate_per_day, shortfall)
    } else {
        (0.0, 0)
    };

    AttendanceSummary {
        percentage,
        status,
        message: status.message().to_string(),
        fine,
        needs_action: shortfall > 0,
        present_days,
        total_days,
        working_days,
        working_days_percentage,
    }
}
