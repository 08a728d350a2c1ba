//! crates/sapt_core/src/report.rs
//!
//! Report records handed to a document renderer. Rendering is not done here.

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{AttendanceRecord, AttendanceStatus, PerformanceMetrics};
use crate::metrics::{attendance_breakdown, round_one_decimal};

pub const REPORT_FOOTER: &str = "This is an auto-generated report from SAPT";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub title: String,
    pub subject: String,
    pub period: String,
    pub generated_on: NaiveDate,
    pub attendance_rate: u32,
    pub tasks_completed: u32,
    /// One decimal, out of 5.
    pub average_task_rating: f64,
    /// Human-readable flag names.
    pub alerts: Vec<String>,
    pub footer: String,
}

impl PerformanceReport {
    pub fn build(subject: &str, period: &str, metrics: &PerformanceMetrics, generated_on: NaiveDate) -> Self {
        Self {
            title: "Performance Report".to_string(),
            subject: subject.to_string(),
            period: period.to_string(),
            generated_on,
            attendance_rate: metrics.attendance_rate,
            tasks_completed: metrics.tasks_completed,
            average_task_rating: round_one_decimal(metrics.average_task_rating),
            alerts: metrics
                .flags
                .iter()
                .map(|flag| flag.as_str().replace('_', " "))
                .collect(),
            footer: REPORT_FOOTER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRow {
    pub date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReport {
    pub title: String,
    pub subject: String,
    pub period: String,
    pub generated_on: NaiveDate,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub total: usize,
    /// Percentage with one decimal; 0.0 for an empty period.
    pub rate: f64,
    pub rows: Vec<AttendanceRow>,
    pub footer: String,
}

fn status_label(status: AttendanceStatus) -> &'static str {
    match status {
        AttendanceStatus::Present => "Present",
        AttendanceStatus::Absent => "Absent",
        AttendanceStatus::Late => "Late",
    }
}

impl AttendanceReport {
    pub fn build(subject: &str, period: &str, records: &[AttendanceRecord], generated_on: NaiveDate) -> Self {
        let breakdown = attendance_breakdown(records);
        let rate = if breakdown.total == 0 {
            0.0
        } else {
            round_one_decimal(breakdown.present as f64 / breakdown.total as f64 * 100.0)
        };

        let mut rows: Vec<AttendanceRow> = records
            .iter()
            .map(|r| AttendanceRow {
                date: r.date,
                status: status_label(r.status).to_string(),
            })
            .collect();
        rows.sort_by_key(|row| row.date);

        Self {
            title: "Attendance Report".to_string(),
            subject: subject.to_string(),
            period: period.to_string(),
            generated_on,
            present: breakdown.present,
            absent: breakdown.absent,
            late: breakdown.late,
            total: breakdown.total,
            rate,
            rows,
            footer: REPORT_FOOTER.to_string(),
        }
    }
}
