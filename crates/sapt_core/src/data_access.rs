//! crates/sapt_core/src/data_access.rs
//!
//! The data access layer: translates tracker operations into document store
//! queries and mutations, and normalizes the returned documents into records.
//!
//! Every operation runs as an explicit `Caller`; the store enforces the access
//! rules. Errors are propagated, never swallowed.

use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{
    AttendanceMethod, AttendanceRecord, AttendanceStatus, Identity, MonthKey, NewNotification, NewTask,
    Notification, PerformanceMetrics, PerformanceSnapshot, Role, Task, TaskStatus, User, UserDraft,
};
use crate::error::{DataResult, ValidationError};
use crate::metrics;
use crate::ports::{Caller, Collection, Document, DocumentStore, Fields, Query, StoreError, StoreResult};
use crate::subscription::Subscription;

/// Highest rating a task can receive.
pub const MAX_RATING: f64 = 5.0;

/// Stateless facade over a `DocumentStore`. Cheap to clone.
#[derive(Clone)]
pub struct DataAccess {
    store: Arc<dyn DocumentStore>,
}

fn object(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(
    docs: Vec<Document>,
    collection: Collection,
    id_field: &str,
) -> StoreResult<Vec<T>> {
    docs.iter().map(|doc| doc.decode(collection, id_field)).collect()
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

impl DataAccess {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    //=====================================================================================
    // Attendance
    //=====================================================================================

    /// Records one attendance mark. Marking the same user twice on one day
    /// creates two records; nothing deduplicates.
    pub async fn mark_attendance(
        &self,
        caller: &Caller,
        user_id: &str,
        date: NaiveDate,
        status: AttendanceStatus,
        marked_by: &str,
        method: Option<AttendanceMethod>,
    ) -> DataResult<AttendanceRecord> {
        require(user_id, "userId")?;
        let record = AttendanceRecord {
            id: String::new(),
            user_id: user_id.to_string(),
            date,
            status,
            marked_by: marked_by.to_string(),
            marked_at: Utc::now(),
            method: method.unwrap_or_default(),
            notes: None,
        };
        let fields = object(json!({
            "userId": record.user_id,
            "date": record.date,
            "status": record.status,
            "markedBy": record.marked_by,
            "markedAt": record.marked_at,
            "method": record.method,
        }));

        let id = self.store.add(caller, Collection::Attendance, fields).await?;
        info!(attendance_id = %id, user_id = %user_id, status = ?status, "attendance marked");
        Ok(AttendanceRecord { id, ..record })
    }

    fn attendance_range(start: NaiveDate, end: NaiveDate) -> Query {
        Query::collection(Collection::Attendance)
            .where_gte("date", start.to_string())
            .where_lte("date", end.to_string())
    }

    pub async fn get_attendance_for_user(
        &self,
        caller: &Caller,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DataResult<Vec<AttendanceRecord>> {
        let query = Self::attendance_range(start, end).where_eq("userId", user_id);
        let docs = self.store.query(caller, &query).await?;
        Ok(decode_all(docs, Collection::Attendance, "id")?)
    }

    pub async fn get_all_attendance(
        &self,
        caller: &Caller,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DataResult<Vec<AttendanceRecord>> {
        let docs = self.store.query(caller, &Self::attendance_range(start, end)).await?;
        Ok(decode_all(docs, Collection::Attendance, "id")?)
    }

    pub async fn subscribe_to_all_attendance(
        &self,
        caller: &Caller,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DataResult<Subscription<AttendanceRecord>> {
        let stream = self.store.watch(caller, Self::attendance_range(start, end)).await?;
        Ok(Subscription::from_documents(stream, Collection::Attendance, "id"))
    }

    //=====================================================================================
    // Tasks
    //=====================================================================================

    /// Creates a pending, unrated task after checking the required fields.
    pub async fn create_task(&self, caller: &Caller, new_task: NewTask) -> DataResult<Task> {
        require(&new_task.title, "title")?;
        require(&new_task.assigned_to, "assignedTo")?;
        require(&new_task.assigned_by, "assignedBy")?;
        let due_date = new_task.due_date.ok_or(ValidationError::MissingField("dueDate"))?;

        let task = Task {
            id: String::new(),
            title: new_task.title.trim().to_string(),
            description: new_task.description,
            assigned_to: new_task.assigned_to,
            assigned_by: new_task.assigned_by,
            due_date,
            status: TaskStatus::Pending,
            rating: 0.0,
            feedback: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let fields = object(json!({
            "title": task.title,
            "description": task.description,
            "assignedTo": task.assigned_to,
            "assignedBy": task.assigned_by,
            "dueDate": task.due_date,
            "status": task.status,
            "rating": 0,
            "createdAt": task.created_at,
        }));

        let id = self.store.add(caller, Collection::Tasks, fields).await?;
        info!(task_id = %id, assigned_to = %task.assigned_to, "task created");
        Ok(Task { id, ..task })
    }

    /// Sets any status; transitions are not constrained.
    pub async fn update_task_status(&self, caller: &Caller, task_id: &str, status: TaskStatus) -> DataResult<()> {
        self.store
            .update(caller, Collection::Tasks, task_id, object(json!({ "status": status })))
            .await?;
        info!(task_id = %task_id, status = ?status, "task status updated");
        Ok(())
    }

    /// Rates a task. Rating always marks the task completed, whatever its status was.
    pub async fn rate_task(&self, caller: &Caller, task_id: &str, rating: f64, feedback: &str) -> DataResult<()> {
        if !rating.is_finite() || !(0.0..=MAX_RATING).contains(&rating) {
            return Err(ValidationError::OutOfRange {
                field: "rating",
                reason: format!("{} is not within 0..={}", rating, MAX_RATING),
            }
            .into());
        }
        let patch = object(json!({
            "rating": rating,
            "feedback": feedback,
            "status": TaskStatus::Completed,
            "completedAt": Utc::now(),
        }));
        self.store.update(caller, Collection::Tasks, task_id, patch).await?;
        info!(task_id = %task_id, rating, "task rated");
        Ok(())
    }

    pub async fn get_task(&self, caller: &Caller, task_id: &str) -> DataResult<Option<Task>> {
        let doc = self.store.get(caller, Collection::Tasks, task_id).await?;
        Ok(doc.map(|d| d.decode(Collection::Tasks, "id")).transpose()?)
    }

    pub async fn get_tasks_for_user(&self, caller: &Caller, user_id: &str) -> DataResult<Vec<Task>> {
        let query = Query::collection(Collection::Tasks).where_eq("assignedTo", user_id);
        let docs = self.store.query(caller, &query).await?;
        Ok(decode_all(docs, Collection::Tasks, "id")?)
    }

    /// Every task, unpaginated.
    pub async fn get_all_tasks(&self, caller: &Caller) -> DataResult<Vec<Task>> {
        let docs = self.store.query(caller, &Query::collection(Collection::Tasks)).await?;
        Ok(decode_all(docs, Collection::Tasks, "id")?)
    }

    pub async fn subscribe_to_user_tasks(&self, caller: &Caller, user_id: &str) -> DataResult<Subscription<Task>> {
        let query = Query::collection(Collection::Tasks).where_eq("assignedTo", user_id);
        let stream = self.store.watch(caller, query).await?;
        Ok(Subscription::from_documents(stream, Collection::Tasks, "id"))
    }

    pub async fn subscribe_to_all_tasks(&self, caller: &Caller) -> DataResult<Subscription<Task>> {
        let stream = self.store.watch(caller, Query::collection(Collection::Tasks)).await?;
        Ok(Subscription::from_documents(stream, Collection::Tasks, "id"))
    }

    //=====================================================================================
    // Performance
    //=====================================================================================

    fn performance_key(user_id: &str, month: MonthKey) -> Query {
        Query::collection(Collection::Performance)
            .where_eq("userId", user_id)
            .where_eq("month", month.to_string())
    }

    /// Writes the snapshot for (user, month), inserting it the first time and
    /// updating it afterwards. The store performs the upsert atomically per key.
    pub async fn update_performance_metrics(
        &self,
        caller: &Caller,
        user_id: &str,
        month: MonthKey,
        metrics: &PerformanceMetrics,
    ) -> DataResult<PerformanceSnapshot> {
        require(user_id, "userId")?;
        let updated_at = Utc::now();
        let mut fields = object(json!(metrics));
        fields.insert("updatedAt".into(), json!(updated_at));

        let id = self
            .store
            .upsert(caller, &Self::performance_key(user_id, month), fields)
            .await?;
        info!(snapshot_id = %id, user_id = %user_id, month = %month, "performance snapshot written");

        Ok(PerformanceSnapshot {
            id,
            user_id: user_id.to_string(),
            month,
            metrics: metrics.clone(),
            updated_at: Some(updated_at),
        })
    }

    pub async fn get_performance_for_user(
        &self,
        caller: &Caller,
        user_id: &str,
        month: MonthKey,
    ) -> DataResult<Option<PerformanceSnapshot>> {
        let docs = self
            .store
            .query(caller, &Self::performance_key(user_id, month))
            .await?;
        if docs.len() > 1 {
            warn!(user_id = %user_id, month = %month, count = docs.len(), "duplicate performance snapshots");
        }
        let mut snapshots: Vec<PerformanceSnapshot> = decode_all(docs, Collection::Performance, "id")?;
        // Prefer the most recently written one if duplicates exist.
        snapshots.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(snapshots.into_iter().next())
    }

    /// Recomputes a user's snapshot for `month` from their attendance and tasks.
    pub async fn refresh_performance_snapshot(
        &self,
        caller: &Caller,
        user_id: &str,
        month: MonthKey,
        today: NaiveDate,
    ) -> DataResult<PerformanceSnapshot> {
        let attendance = self
            .get_attendance_for_user(caller, user_id, month.first_day(), month.last_day())
            .await?;
        let tasks = self.get_tasks_for_user(caller, user_id).await?;
        let computed = metrics::performance_metrics(&attendance, &tasks, today);
        self.update_performance_metrics(caller, user_id, month, &computed).await
    }

    //=====================================================================================
    // Notifications
    //=====================================================================================

    pub async fn create_notification(&self, caller: &Caller, new: NewNotification) -> DataResult<Notification> {
        require(&new.user_id, "userId")?;
        require(&new.title, "title")?;
        let notification = Notification {
            id: String::new(),
            user_id: new.user_id,
            kind: new.kind,
            title: new.title,
            message: new.message,
            read: false,
            action_url: new.action_url,
            created_at: Utc::now(),
        };
        let fields = object(json!({
            "userId": notification.user_id,
            "type": notification.kind,
            "title": notification.title,
            "message": notification.message,
            "read": false,
            "actionUrl": notification.action_url,
            "createdAt": notification.created_at,
        }));
        let id = self.store.add(caller, Collection::Notifications, fields).await?;
        info!(notification_id = %id, user_id = %notification.user_id, "notification created");
        Ok(Notification { id, ..notification })
    }

    pub async fn mark_notification_read(&self, caller: &Caller, notification_id: &str) -> DataResult<()> {
        self.store
            .update(caller, Collection::Notifications, notification_id, object(json!({ "read": true })))
            .await?;
        Ok(())
    }

    pub async fn get_notifications_for_user(&self, caller: &Caller, user_id: &str) -> DataResult<Vec<Notification>> {
        let query = Query::collection(Collection::Notifications).where_eq("userId", user_id);
        let docs = self.store.query(caller, &query).await?;
        let mut notifications: Vec<Notification> = decode_all(docs, Collection::Notifications, "id")?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub async fn subscribe_to_user_notifications(
        &self,
        caller: &Caller,
        user_id: &str,
    ) -> DataResult<Subscription<Notification>> {
        let query = Query::collection(Collection::Notifications).where_eq("userId", user_id);
        let stream = self.store.watch(caller, query).await?;
        Ok(Subscription::from_documents(stream, Collection::Notifications, "id"))
    }

    //=====================================================================================
    // Users
    //=====================================================================================

    pub async fn get_user(&self, caller: &Caller, uid: &str) -> DataResult<Option<User>> {
        let doc = self.store.get(caller, Collection::Users, uid).await?;
        Ok(doc.map(|d| d.decode(Collection::Users, "uid")).transpose()?)
    }

    /// Every profile, unpaginated.
    pub async fn get_all_users(&self, caller: &Caller) -> DataResult<Vec<User>> {
        let docs = self.store.query(caller, &Query::collection(Collection::Users)).await?;
        Ok(decode_all(docs, Collection::Users, "uid")?)
    }

    /// Writes the profile of a freshly signed-up identity.
    pub async fn create_profile(&self, caller: &Caller, identity: &Identity, role: Role) -> DataResult<User> {
        let name = identity
            .email
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string();
        let user = User {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            name,
            role,
            department: None,
            phone: None,
            created_at: Some(Utc::now()),
            updated_at: None,
        };
        let fields = object(json!({
            "uid": user.uid,
            "email": user.email,
            "name": user.name,
            "role": user.role,
            "createdAt": user.created_at,
        }));
        self.store
            .set(caller, Collection::Users, &identity.uid, fields, false)
            .await?;
        info!(uid = %user.uid, role = %role, "profile created");
        Ok(user)
    }

    /// Creates or edits a profile from the admin panel. Without `uid` the
    /// profile is keyed by its email.
    pub async fn save_user(&self, caller: &Caller, uid: Option<&str>, draft: UserDraft) -> DataResult<User> {
        require(&draft.email, "email")?;
        require(&draft.name, "name")?;
        let now = Utc::now();
        let id = uid.unwrap_or(&draft.email).to_string();

        let mut fields = object(json!({
            "uid": id,
            "email": draft.email,
            "name": draft.name,
            "role": draft.role,
            "department": draft.department,
            "phone": draft.phone,
            "updatedAt": now,
        }));
        if uid.is_none() {
            fields.insert("createdAt".into(), json!(now));
        }

        self.store.set(caller, Collection::Users, &id, fields, true).await?;
        info!(uid = %id, "profile saved");
        self.get_user(caller, &id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("users/{}", id)).into())
    }

    pub async fn delete_user(&self, caller: &Caller, uid: &str) -> DataResult<()> {
        self.store.delete(caller, Collection::Users, uid).await?;
        warn!(uid = %uid, "profile deleted");
        Ok(())
    }
}
