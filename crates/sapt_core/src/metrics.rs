//! crates/sapt_core/src/metrics.rs
//!
//! Pure aggregations over fetched record sets: attendance rates, task
//! completion, weekday charts and per-user progress.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::domain::{
    AttendanceRecord, AttendanceStatus, Notification, PerformanceFlag, PerformanceMetrics, Task, TaskStatus, User,
};

/// How many per-user progress rows the dashboard preview shows.
pub const TASK_PROGRESS_PREVIEW: usize = 3;

/// Attendance below this rate raises `low_attendance`.
pub const LOW_ATTENDANCE_THRESHOLD: u32 = 75;

/// An average rated score below this raises `low_rating`.
pub const LOW_RATING_THRESHOLD: f64 = 3.0;

const WORKDAYS: [Weekday; 5] = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AttendanceBreakdown {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub total: usize,
}

pub fn attendance_breakdown(records: &[AttendanceRecord]) -> AttendanceBreakdown {
    records.iter().fold(
        AttendanceBreakdown {
            total: records.len(),
            ..Default::default()
        },
        |mut acc, record| {
            match record.status {
                AttendanceStatus::Present => acc.present += 1,
                AttendanceStatus::Absent => acc.absent += 1,
                AttendanceStatus::Late => acc.late += 1,
            }
            acc
        },
    )
}

/// `part / total * 100` rounded to the nearest integer; 0 when `total` is 0.
pub fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as u32
}

/// Share of `present` records, as a whole percentage. An empty set yields 0.
pub fn attendance_rate(records: &[AttendanceRecord]) -> u32 {
    let breakdown = attendance_breakdown(records);
    percent(breakdown.present, breakdown.total)
}

/// Mean rating over every task given, unrated tasks (rating 0) included.
pub fn average_task_rating(tasks: &[Task]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    tasks.iter().map(|t| t.rating).sum::<f64>() / tasks.len() as f64
}

/// Mean rating over rated tasks only.
pub fn average_rated_task_rating(tasks: &[Task]) -> f64 {
    let rated: Vec<f64> = tasks.iter().map(|t| t.rating).filter(|r| *r > 0.0).collect();
    if rated.is_empty() {
        return 0.0;
    }
    rated.iter().sum::<f64>() / rated.len() as f64
}

pub fn completed_task_count(tasks: &[Task]) -> usize {
    tasks.iter().filter(|t| t.status == TaskStatus::Completed).count()
}

pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekdayBucket {
    pub day: String,
    pub present: usize,
    pub absent: usize,
}

/// Present/absent counts per weekday, Monday to Friday. Weekend records are
/// dropped; late marks count in neither column.
pub fn weekday_buckets(records: &[AttendanceRecord]) -> Vec<WeekdayBucket> {
    WORKDAYS
        .iter()
        .map(|day| {
            let on_day = records.iter().filter(|r| r.date.weekday() == *day);
            let (present, absent) = on_day.fold((0, 0), |(present, absent), r| match r.status {
                AttendanceStatus::Present => (present + 1, absent),
                AttendanceStatus::Absent => (present, absent + 1),
                AttendanceStatus::Late => (present, absent),
            });
            WeekdayBucket {
                day: day.to_string(),
                present,
                absent,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserTaskProgress {
    pub user_id: String,
    pub completed: usize,
    pub total: usize,
}

impl UserTaskProgress {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Groups tasks by assignee, keeping the order in which assignees first appear.
pub fn task_progress_by_user(tasks: &[Task]) -> Vec<UserTaskProgress> {
    let mut order: Vec<UserTaskProgress> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for task in tasks {
        let slot = *index.entry(task.assigned_to.as_str()).or_insert_with(|| {
            order.push(UserTaskProgress {
                user_id: task.assigned_to.clone(),
                completed: 0,
                total: 0,
            });
            order.len() - 1
        });
        let entry = &mut order[slot];
        entry.total += 1;
        if task.status == TaskStatus::Completed {
            entry.completed += 1;
        }
    }
    order
}

/// The Monday..Friday window shown on the dashboard for `today`.
/// A Sunday looks ahead to the coming week.
pub fn current_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = today - Duration::days(today.weekday().num_days_from_sunday() as i64) + Duration::days(1);
    (monday, monday + Duration::days(4))
}

fn is_overdue(task: &Task, today: NaiveDate) -> bool {
    match task.status {
        TaskStatus::Overdue => true,
        TaskStatus::Completed => false,
        TaskStatus::Pending | TaskStatus::InProgress => task.due_date < today,
    }
}

pub fn performance_flags(attendance_rate: u32, has_attendance: bool, tasks: &[Task], today: NaiveDate) -> BTreeSet<PerformanceFlag> {
    let mut flags = BTreeSet::new();
    if has_attendance && attendance_rate < LOW_ATTENDANCE_THRESHOLD {
        flags.insert(PerformanceFlag::LowAttendance);
    }
    if tasks.iter().any(|t| is_overdue(t, today)) {
        flags.insert(PerformanceFlag::OverdueTask);
    }
    let rated = average_rated_task_rating(tasks);
    if rated > 0.0 && rated < LOW_RATING_THRESHOLD {
        flags.insert(PerformanceFlag::LowRating);
    }
    flags
}

/// The figures of a monthly snapshot.
pub fn performance_metrics(attendance: &[AttendanceRecord], tasks: &[Task], today: NaiveDate) -> PerformanceMetrics {
    let rate = attendance_rate(attendance);
    PerformanceMetrics {
        attendance_rate: rate,
        tasks_completed: completed_task_count(tasks) as u32,
        average_task_rating: average_task_rating(tasks),
        flags: performance_flags(rate, !attendance.is_empty(), tasks, today),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamProgress {
    pub user: String,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub active_users: usize,
    pub attendance_rate: u32,
    pub completed_tasks: usize,
    /// Mean rating over all tasks, one decimal.
    pub average_rating: f64,
    pub weekly_attendance: Vec<WeekdayBucket>,
    pub present: usize,
    pub absent: usize,
    pub team_progress: Vec<TeamProgress>,
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn dashboard_summary(users: &[User], attendance: &[AttendanceRecord], tasks: &[Task]) -> DashboardSummary {
    let breakdown = attendance_breakdown(attendance);
    let team_progress = task_progress_by_user(tasks)
        .into_iter()
        .take(TASK_PROGRESS_PREVIEW)
        .map(|progress| {
            let user = users
                .iter()
                .find(|u| u.uid == progress.user_id)
                .map_or_else(|| progress.user_id.clone(), |u| u.name.clone());
            TeamProgress {
                user,
                completed: progress.completed,
                total: progress.total,
            }
        })
        .collect();

    DashboardSummary {
        active_users: users.len(),
        attendance_rate: percent(breakdown.present, breakdown.total),
        completed_tasks: completed_task_count(tasks),
        average_rating: round_one_decimal(average_task_rating(tasks)),
        weekly_attendance: weekday_buckets(attendance),
        present: breakdown.present,
        absent: breakdown.absent,
        team_progress,
    }
}
