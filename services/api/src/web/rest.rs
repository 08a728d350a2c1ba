//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Every handler resolves the caller from the `SessionContext` placed in the
//! request extensions by `require_auth`. Role gates here mirror the screens of
//! the tracker; the store's access rules stay authoritative underneath.

use crate::web::auth::{AuthResponse, LoginRequest, MeResponse, SignupRequest};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{NaiveDate, Utc};
use sapt_core::metrics::{self, DashboardSummary};
use sapt_core::report::{AttendanceReport, PerformanceReport};
use sapt_core::{
    AttendanceMethod, AttendanceRecord, AttendanceStatus, AuthError, Caller, DataError, MonthKey, NewNotification,
    NewTask, Notification, NotificationType, PerformanceFlag, PerformanceMetrics, PerformanceSnapshot, Role,
    SessionContext, StoreError, Task, TaskStatus, User, UserDraft,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        crate::web::auth::me_handler,
        list_attendance_handler,
        mark_attendance_handler,
        user_attendance_handler,
        list_tasks_handler,
        create_task_handler,
        user_tasks_handler,
        update_task_status_handler,
        rate_task_handler,
        get_performance_handler,
        put_performance_handler,
        refresh_performance_handler,
        list_notifications_handler,
        create_notification_handler,
        mark_notification_read_handler,
        list_users_handler,
        save_user_handler,
        delete_user_handler,
        dashboard_handler,
        performance_report_handler,
        attendance_report_handler,
    ),
    components(
        schemas(
            SignupRequest, LoginRequest, AuthResponse, MeResponse,
            MarkAttendanceRequest, CreateTaskRequest, UpdateStatusRequest, RateTaskRequest,
            PerformanceRequest, CreateNotificationRequest, SaveUserRequest
        )
    ),
    tags(
        (name = "SAPT API", description = "Staff attendance and performance tracking.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Role Gates and Error Mapping
//=========================================================================================

pub(crate) const MANAGERS: [Role; 2] = [Role::Admin, Role::Supervisor];
const ADMINS: [Role; 1] = [Role::Admin];

type Rejection = (StatusCode, String);

pub(crate) fn reject_store(e: StoreError) -> Rejection {
    let status = match &e {
        StoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        StoreError::Malformed { .. } | StoreError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Store error: {:?}", e);
    } else {
        warn!("Store request rejected: {}", e);
    }
    (status, e.to_string())
}

pub(crate) fn reject_data(e: DataError) -> Rejection {
    match e {
        DataError::Store(e) => reject_store(e),
        DataError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
    }
}

pub(crate) fn reject_auth(e: AuthError) -> Rejection {
    let status = match &e {
        AuthError::InvalidCredentials | AuthError::NotSignedIn | AuthError::SessionLoading => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::EmailInUse(_) => StatusCode::CONFLICT,
        AuthError::Forbidden => StatusCode::FORBIDDEN,
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::Store(store) => return reject_store(store.clone()),
        AuthError::Provider(_) => {
            error!("Identity provider error: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

fn signed_in(session: &SessionContext) -> Result<Caller, Rejection> {
    session.require_signed_in().map_err(reject_auth)?;
    Ok(session.caller())
}

fn parse_month(raw: &str) -> Result<MonthKey, Rejection> {
    raw.parse::<MonthKey>().map_err(|e| (StatusCode::BAD_REQUEST, e))
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

//=========================================================================================
// API Request Payload Structs
//=========================================================================================

/// An inclusive `YYYY-MM-DD` date range.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    fn checked(&self) -> Result<(NaiveDate, NaiveDate), Rejection> {
        if self.start > self.end {
            return Err((StatusCode::BAD_REQUEST, "start must not be after end".to_string()));
        }
        Ok((self.start, self.end))
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkAttendanceRequest {
    pub user_id: String,
    pub date: NaiveDate,
    /// present, absent or late.
    #[schema(value_type = String, example = "present")]
    pub status: AttendanceStatus,
    /// manual (default) or face_recognition.
    #[schema(value_type = Option<String>)]
    #[serde(default)]
    pub method: Option<AttendanceMethod>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub assigned_to: String,
    pub due_date: Option<NaiveDate>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// pending, in_progress, completed or overdue.
    #[schema(value_type = String, example = "in_progress")]
    pub status: TaskStatus,
}

#[derive(Deserialize, ToSchema)]
pub struct RateTaskRequest {
    /// 0 to 5.
    pub rating: f64,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRequest {
    pub attendance_rate: u32,
    pub tasks_completed: u32,
    pub average_task_rating: f64,
    /// low_attendance, overdue_task, low_rating.
    #[schema(value_type = Vec<String>)]
    #[serde(default)]
    pub flags: Vec<PerformanceFlag>,
}

impl From<PerformanceRequest> for PerformanceMetrics {
    fn from(req: PerformanceRequest) -> Self {
        PerformanceMetrics {
            attendance_rate: req.attendance_rate,
            tasks_completed: req.tasks_completed,
            average_task_rating: req.average_task_rating,
            flags: req.flags.into_iter().collect(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub user_id: String,
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "system")]
    pub kind: NotificationType,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub action_url: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveUserRequest {
    /// Omit to create a profile keyed by its email.
    #[serde(default)]
    pub uid: Option<String>,
    pub email: String,
    pub name: String,
    #[schema(value_type = String, example = "employee")]
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct NotificationList {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

//=========================================================================================
// Attendance
//=========================================================================================

/// List every attendance record in a date range.
#[utoipa::path(
    get,
    path = "/attendance",
    params(DateRange),
    responses(
        (status = 200, description = "Attendance records in the range"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn list_attendance_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Query(range): Query<DateRange>,
) -> Result<Json<Vec<AttendanceRecord>>, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let (start, end) = range.checked()?;
    let records = state
        .data
        .get_all_attendance(&caller, start, end)
        .await
        .map_err(reject_data)?;
    Ok(Json(records))
}

/// Mark attendance for one user on one day.
#[utoipa::path(
    post,
    path = "/attendance",
    request_body = MarkAttendanceRequest,
    responses(
        (status = 201, description = "Attendance recorded"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn mark_attendance_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<MarkAttendanceRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let marked_by = caller.uid().unwrap_or_default().to_string();
    let record = state
        .data
        .mark_attendance(&caller, &req.user_id, req.date, req.status, &marked_by, req.method)
        .await
        .map_err(reject_data)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Attendance of one user in a date range.
#[utoipa::path(
    get,
    path = "/attendance/user/{uid}",
    params(("uid" = String, Path, description = "The user's id."), DateRange),
    responses(
        (status = 200, description = "Attendance records of the user"),
        (status = 403, description = "Not the subject, an admin or a supervisor")
    )
)]
pub async fn user_attendance_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(uid): Path<String>,
    Query(range): Query<DateRange>,
) -> Result<Json<Vec<AttendanceRecord>>, Rejection> {
    let caller = signed_in(&session)?;
    let (start, end) = range.checked()?;
    let records = state
        .data
        .get_attendance_for_user(&caller, &uid, start, end)
        .await
        .map_err(reject_data)?;
    Ok(Json(records))
}

//=========================================================================================
// Tasks
//=========================================================================================

/// List every task.
#[utoipa::path(
    get,
    path = "/tasks",
    responses(
        (status = 200, description = "All tasks"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn list_tasks_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<Vec<Task>>, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let tasks = state.data.get_all_tasks(&caller).await.map_err(reject_data)?;
    Ok(Json(tasks))
}

/// Create and assign a task. The assignee is notified.
#[utoipa::path(
    post,
    path = "/tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created"),
        (status = 400, description = "Missing title, assignee or due date"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn create_task_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let new_task = NewTask {
        title: req.title,
        description: req.description,
        assigned_to: req.assigned_to,
        assigned_by: caller.uid().unwrap_or_default().to_string(),
        due_date: req.due_date,
    };
    let task = state.data.create_task(&caller, new_task).await.map_err(reject_data)?;

    let notice = NewNotification {
        user_id: task.assigned_to.clone(),
        kind: NotificationType::TaskAssigned,
        title: "New task assigned".to_string(),
        message: format!("{} is due {}", task.title, task.due_date),
        action_url: Some("/tasks".to_string()),
    };
    if let Err(e) = state.data.create_notification(&caller, notice).await {
        // The task stands even if the notice could not be written.
        warn!(task_id = %task.id, error = %e, "Failed to notify assignee");
    }

    Ok((StatusCode::CREATED, Json(task)))
}

/// Tasks assigned to one user.
#[utoipa::path(
    get,
    path = "/tasks/user/{uid}",
    params(("uid" = String, Path, description = "The assignee's id.")),
    responses(
        (status = 200, description = "Tasks of the user"),
        (status = 403, description = "Not the assignee, an admin or a supervisor")
    )
)]
pub async fn user_tasks_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(uid): Path<String>,
) -> Result<Json<Vec<Task>>, Rejection> {
    let caller = signed_in(&session)?;
    let tasks = state.data.get_tasks_for_user(&caller, &uid).await.map_err(reject_data)?;
    Ok(Json(tasks))
}

/// Set a task's status. Assignees may change the status of their own tasks.
#[utoipa::path(
    patch,
    path = "/tasks/{id}/status",
    params(("id" = String, Path, description = "The task id.")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 204, description = "Status updated"),
        (status = 403, description = "Not allowed to change this task"),
        (status = 404, description = "No such task")
    )
)]
pub async fn update_task_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<StatusCode, Rejection> {
    let caller = signed_in(&session)?;
    state
        .data
        .update_task_status(&caller, &id, req.status)
        .await
        .map_err(reject_data)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Rate a task. Rating always marks it completed.
#[utoipa::path(
    post,
    path = "/tasks/{id}/rating",
    params(("id" = String, Path, description = "The task id.")),
    request_body = RateTaskRequest,
    responses(
        (status = 204, description = "Task rated"),
        (status = 400, description = "Rating outside 0 to 5"),
        (status = 403, description = "Admins and supervisors only"),
        (status = 404, description = "No such task")
    )
)]
pub async fn rate_task_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(req): Json<RateTaskRequest>,
) -> Result<StatusCode, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    state
        .data
        .rate_task(&caller, &id, req.rating, &req.feedback)
        .await
        .map_err(reject_data)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Performance
//=========================================================================================

/// The performance snapshot of one user for one month.
#[utoipa::path(
    get,
    path = "/performance/{uid}/{month}",
    params(
        ("uid" = String, Path, description = "The user's id."),
        ("month" = String, Path, description = "The month, as YYYY-MM.")
    ),
    responses(
        (status = 200, description = "The snapshot"),
        (status = 404, description = "No snapshot for this month")
    )
)]
pub async fn get_performance_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path((uid, month)): Path<(String, String)>,
) -> Result<Json<PerformanceSnapshot>, Rejection> {
    let caller = signed_in(&session)?;
    let month = parse_month(&month)?;
    let snapshot = state
        .data
        .get_performance_for_user(&caller, &uid, month)
        .await
        .map_err(reject_data)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No snapshot for {} in {}", uid, month)))?;
    Ok(Json(snapshot))
}

/// Write the snapshot of one user for one month.
#[utoipa::path(
    put,
    path = "/performance/{uid}/{month}",
    params(
        ("uid" = String, Path, description = "The user's id."),
        ("month" = String, Path, description = "The month, as YYYY-MM.")
    ),
    request_body = PerformanceRequest,
    responses(
        (status = 200, description = "The written snapshot"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn put_performance_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path((uid, month)): Path<(String, String)>,
    Json(req): Json<PerformanceRequest>,
) -> Result<Json<PerformanceSnapshot>, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let month = parse_month(&month)?;
    let snapshot = state
        .data
        .update_performance_metrics(&caller, &uid, month, &req.into())
        .await
        .map_err(reject_data)?;
    Ok(Json(snapshot))
}

/// Recompute the snapshot from the month's attendance and the user's tasks.
#[utoipa::path(
    post,
    path = "/performance/{uid}/{month}/refresh",
    params(
        ("uid" = String, Path, description = "The user's id."),
        ("month" = String, Path, description = "The month, as YYYY-MM.")
    ),
    responses(
        (status = 200, description = "The recomputed snapshot"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn refresh_performance_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path((uid, month)): Path<(String, String)>,
) -> Result<Json<PerformanceSnapshot>, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let month = parse_month(&month)?;
    let snapshot = state
        .data
        .refresh_performance_snapshot(&caller, &uid, month, today())
        .await
        .map_err(reject_data)?;
    info!(uid = %uid, month = %month, flags = ?snapshot.metrics.flags, "Performance refreshed");
    Ok(Json(snapshot))
}

//=========================================================================================
// Notifications
//=========================================================================================

/// The signed-in user's notifications, newest first.
#[utoipa::path(
    get,
    path = "/notifications",
    responses((status = 200, description = "Notifications with the unread count"))
)]
pub async fn list_notifications_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<NotificationList>, Rejection> {
    let identity = session.require_signed_in().map_err(reject_auth)?;
    let notifications = state
        .data
        .get_notifications_for_user(&session.caller(), &identity.uid)
        .await
        .map_err(reject_data)?;
    Ok(Json(NotificationList {
        unread: metrics::unread_count(&notifications),
        notifications,
    }))
}

/// Send a notification to one user.
#[utoipa::path(
    post,
    path = "/notifications",
    request_body = CreateNotificationRequest,
    responses(
        (status = 201, description = "Notification created"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn create_notification_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let new = NewNotification {
        user_id: req.user_id,
        kind: req.kind,
        title: req.title,
        message: req.message,
        action_url: req.action_url,
    };
    let notification = state.data.create_notification(&caller, new).await.map_err(reject_data)?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// Mark one of the caller's notifications as read.
#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    params(("id" = String, Path, description = "The notification id.")),
    responses(
        (status = 204, description = "Marked as read"),
        (status = 404, description = "No such notification")
    )
)]
pub async fn mark_notification_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, Rejection> {
    let caller = signed_in(&session)?;
    state
        .data
        .mark_notification_read(&caller, &id)
        .await
        .map_err(reject_data)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Users
//=========================================================================================

/// List every profile.
#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "All profiles"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<Vec<User>>, Rejection> {
    let caller = session.authorize(&ADMINS).map_err(reject_auth)?;
    let users = state.data.get_all_users(&caller).await.map_err(reject_data)?;
    Ok(Json(users))
}

/// Create or edit a profile.
#[utoipa::path(
    post,
    path = "/users",
    request_body = SaveUserRequest,
    responses(
        (status = 200, description = "The saved profile"),
        (status = 400, description = "Missing email or name"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn save_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<SaveUserRequest>,
) -> Result<Json<User>, Rejection> {
    let caller = session.authorize(&ADMINS).map_err(reject_auth)?;
    let draft = UserDraft {
        email: req.email,
        name: req.name,
        role: req.role,
        department: req.department,
        phone: req.phone,
    };
    let user = state
        .data
        .save_user(&caller, req.uid.as_deref(), draft)
        .await
        .map_err(reject_data)?;
    Ok(Json(user))
}

/// Delete a profile.
#[utoipa::path(
    delete,
    path = "/users/{uid}",
    params(("uid" = String, Path, description = "The user's id.")),
    responses(
        (status = 204, description = "Profile deleted"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "No such profile")
    )
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(uid): Path<String>,
) -> Result<StatusCode, Rejection> {
    let caller = session.authorize(&ADMINS).map_err(reject_auth)?;
    state.data.delete_user(&caller, &uid).await.map_err(reject_data)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Dashboard and Reports
//=========================================================================================

/// Team summary for the current Monday to Friday.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Dashboard figures"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<DashboardSummary>, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let (monday, friday) = metrics::current_week(today());
    let (users, attendance, tasks) = tokio::try_join!(
        state.data.get_all_users(&caller),
        state.data.get_all_attendance(&caller, monday, friday),
        state.data.get_all_tasks(&caller),
    )
    .map_err(reject_data)?;
    Ok(Json(metrics::dashboard_summary(&users, &attendance, &tasks)))
}

async fn subject_name(state: &AppState, caller: &Caller, uid: &str) -> Result<String, Rejection> {
    let user = state.data.get_user(caller, uid).await.map_err(reject_data)?;
    Ok(user.map_or_else(|| uid.to_string(), |u| u.name))
}

/// The performance report record of one user for one month.
#[utoipa::path(
    get,
    path = "/reports/performance/{uid}/{month}",
    params(
        ("uid" = String, Path, description = "The user's id."),
        ("month" = String, Path, description = "The month, as YYYY-MM.")
    ),
    responses(
        (status = 200, description = "Report record"),
        (status = 403, description = "Admins and supervisors only"),
        (status = 404, description = "No snapshot for this month")
    )
)]
pub async fn performance_report_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path((uid, month)): Path<(String, String)>,
) -> Result<Json<PerformanceReport>, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let month = parse_month(&month)?;
    let snapshot = state
        .data
        .get_performance_for_user(&caller, &uid, month)
        .await
        .map_err(reject_data)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No snapshot for {} in {}", uid, month)))?;
    let name = subject_name(&state, &caller, &uid).await?;
    Ok(Json(PerformanceReport::build(&name, &month.to_string(), &snapshot.metrics, today())))
}

/// The attendance report record of one user for a date range.
#[utoipa::path(
    get,
    path = "/reports/attendance/{uid}",
    params(("uid" = String, Path, description = "The user's id."), DateRange),
    responses(
        (status = 200, description = "Report record"),
        (status = 403, description = "Admins and supervisors only")
    )
)]
pub async fn attendance_report_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(uid): Path<String>,
    Query(range): Query<DateRange>,
) -> Result<Json<AttendanceReport>, Rejection> {
    let caller = session.authorize(&MANAGERS).map_err(reject_auth)?;
    let (start, end) = range.checked()?;
    let records = state
        .data
        .get_attendance_for_user(&caller, &uid, start, end)
        .await
        .map_err(reject_data)?;
    let name = subject_name(&state, &caller, &uid).await?;
    let period = format!("{} to {}", start, end);
    Ok(Json(AttendanceReport::build(&name, &period, &records, today())))
}
