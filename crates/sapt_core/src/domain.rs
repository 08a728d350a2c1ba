//! crates/sapt_core/src/domain.rs
//!
//! Defines the core data structures for the tracker.
//! Records mirror the document shapes kept in the store; field names are
//! camelCase on the wire so that documents written by other clients still decode.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

//=========================================================================================
// Roles and Identities
//=========================================================================================

/// The role attached to every user profile. Access checks assume one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Supervisor,
    Student,
    Employee,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Supervisor, Role::Student, Role::Employee];

    /// Admins and supervisors may mark attendance, assign and rate tasks.
    pub fn manages_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Supervisor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::Student => "student",
            Role::Employee => "employee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{}'", s))
    }
}

/// An authenticated identity as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

/// A user profile document (`users/{uid}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Input for creating or editing a profile from the admin panel.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraft {
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

//=========================================================================================
// Attendance
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceMethod {
    #[default]
    Manual,
    FaceRecognition,
}

/// One attendance mark for one user on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: String,
    pub marked_at: DateTime<Utc>,
    #[serde(default)]
    pub method: AttendanceMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

//=========================================================================================
// Tasks
//=========================================================================================

/// Task lifecycle values. Any value may follow any other; nothing enforces an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
}

/// A unit of work assigned by a supervisor or admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub assigned_to: String,
    pub assigned_by: String,
    pub due_date: NaiveDate,
    pub status: TaskStatus,
    /// 0 means unrated; otherwise within `[0, 5]`.
    #[serde(default)]
    pub rating: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for task creation. Missing fields are rejected before anything is written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub assigned_to: String,
    #[serde(default)]
    pub assigned_by: String,
    pub due_date: Option<NaiveDate>,
}

//=========================================================================================
// Performance
//=========================================================================================

/// A `YYYY-MM` month key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("'{}' is not a YYYY-MM month", s);
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        MonthKey::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for MonthKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Anomaly tags attached to a monthly snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceFlag {
    LowAttendance,
    OverdueTask,
    LowRating,
}

impl PerformanceFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceFlag::LowAttendance => "low_attendance",
            PerformanceFlag::OverdueTask => "overdue_task",
            PerformanceFlag::LowRating => "low_rating",
        }
    }
}

/// The figures written into a snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub attendance_rate: u32,
    pub tasks_completed: u32,
    pub average_task_rating: f64,
    #[serde(default)]
    pub flags: BTreeSet<PerformanceFlag>,
}

/// The monthly aggregate for one user. One per (user, month).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub id: String,
    pub user_id: String,
    pub month: MonthKey,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Notifications
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TaskAssigned,
    TaskDue,
    Absence,
    PerformanceAlert,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub action_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_key_parses_and_bounds() {
        let key: MonthKey = "2024-02".parse().unwrap();
        assert_eq!(key.to_string(), "2024-02");
        assert_eq!(key.first_day(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(key.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let december: MonthKey = "2023-12".parse().unwrap();
        assert_eq!(december.last_day(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());

        assert!("2024-13".parse::<MonthKey>().is_err());
        assert!("2024-1".parse::<MonthKey>().is_err());
        assert!("202402".parse::<MonthKey>().is_err());
    }

    #[test]
    fn role_parsing_rejects_unknown_values() {
        assert_eq!("supervisor".parse::<Role>().unwrap(), Role::Supervisor);
        assert!("manager".parse::<Role>().is_err());
        assert!(Role::Admin.manages_staff());
        assert!(!Role::Employee.manages_staff());
    }

    #[test]
    fn snapshot_flattens_metrics_on_the_wire() {
        let snapshot = PerformanceSnapshot {
            id: "p1".into(),
            user_id: "u1".into(),
            month: "2024-05".parse().unwrap(),
            metrics: PerformanceMetrics {
                attendance_rate: 80,
                tasks_completed: 2,
                average_task_rating: 4.5,
                flags: [PerformanceFlag::OverdueTask].into_iter().collect(),
            },
            updated_at: None,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["attendanceRate"], 80);
        assert_eq!(value["month"], "2024-05");
        assert_eq!(value["flags"][0], "overdue_task");
    }
}
