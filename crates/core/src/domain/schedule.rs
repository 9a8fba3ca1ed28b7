// Schedule Domain Model

use serde::{Deserialize, Serialize};

/// Schedule ID
pub type ScheduleId = String;

/// Recurrence definition, one variant per schedule type.
///
/// Preset variants (Daily/Weekly/Monthly) carry a local wall-clock time as
/// "HH:MM" plus an IANA timezone name; they expand to cron fields at
/// registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum Recurrence {
    OneTime {
        /// Epoch ms; a missing datetime leaves the schedule unregistered
        scheduled_at: Option<i64>,
    },
    Cron {
        expression: String,
        timezone: String,
    },
    Daily {
        time: String,
        timezone: String,
    },
    Weekly {
        time: String,
        /// 0 = Sunday .. 6 = Saturday
        day_of_week: u8,
        timezone: String,
    },
    Monthly {
        time: String,
        day_of_month: u8,
        timezone: String,
    },
}

impl Recurrence {
    pub fn type_name(&self) -> &'static str {
        match self {
            Recurrence::OneTime { .. } => "one_time",
            Recurrence::Cron { .. } => "cron",
            Recurrence::Daily { .. } => "daily",
            Recurrence::Weekly { .. } => "weekly",
            Recurrence::Monthly { .. } => "monthly",
        }
    }
}

/// Which pages AI-assisted checks run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiPagesMode {
    All,
    Selected,
}

/// Test configuration carried by a schedule and passed through to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub run_ai_tests: bool,
    pub ai_pages_mode: AiPagesMode,
    pub ai_page_ids: Vec<String>,
    pub take_screenshots: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            run_ai_tests: false,
            ai_pages_mode: AiPagesMode::All,
            ai_page_ids: Vec::new(),
            take_screenshots: false,
        }
    }
}

/// Schedule entity - one record per recurring or one-time test definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: ScheduleId,
    pub name: String,
    pub website_id: String,
    pub enabled: bool,

    pub recurrence: Recurrence,
    pub test_config: TestConfig,
    /// Website users to test as, in addition to the anonymous guest
    pub project_user_ids: Vec<String>,

    // Bookkeeping, written after each dispatch
    pub last_job_id: Option<String>,
    pub last_run_status: Option<String>,
    /// Epoch ms of the next computed fire time
    pub next_run_at: Option<i64>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Schedule {
    pub fn new(
        schedule_id: impl Into<String>,
        name: impl Into<String>,
        website_id: impl Into<String>,
        recurrence: Recurrence,
        created_at: i64,
    ) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            name: name.into(),
            website_id: website_id.into(),
            enabled: true,
            recurrence,
            test_config: TestConfig::default(),
            project_user_ids: Vec::new(),
            last_job_id: None,
            last_run_status: None,
            next_run_at: None,
            created_at,
            updated_at: created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurrence_serializes_tagged() {
        let rec = Recurrence::Weekly {
            time: "02:00".into(),
            day_of_week: 1,
            timezone: "UTC".into(),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["schedule_type"], "weekly");
        assert_eq!(json["day_of_week"], 1);
        let back: Recurrence = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn new_schedule_is_enabled_with_empty_bookkeeping() {
        let s = Schedule::new(
            "s1",
            "nightly",
            "w1",
            Recurrence::Daily {
                time: "02:00".into(),
                timezone: "UTC".into(),
            },
            1000,
        );
        assert!(s.enabled);
        assert!(s.last_job_id.is_none());
        assert!(s.next_run_at.is_none());
        assert_eq!(s.recurrence.type_name(), "daily");
    }
}
