//! Integration tests for the data access layer against the in-memory store.

use chrono::NaiveDate;
use futures::StreamExt;
use sapt_core::memory::seed_user;
use sapt_core::{
    AttendanceStatus, Caller, Collection, DataAccess, DataError, MemoryStore, MonthKey, NewNotification, NewTask,
    NotificationType, PerformanceMetrics, Role, StoreError, TaskStatus, UserDraft, ValidationError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

/// A store with one admin, one supervisor, one student and one employee.
async fn setup() -> (MemoryStore, DataAccess) {
    let store = MemoryStore::new();
    seed_user(&store, "admin", "admin@example.com", "Ada", Role::Admin).await.unwrap();
    seed_user(&store, "sup", "sup@example.com", "Sam", Role::Supervisor).await.unwrap();
    seed_user(&store, "stu", "stu@example.com", "Stu", Role::Student).await.unwrap();
    seed_user(&store, "emp", "emp@example.com", "Emma", Role::Employee).await.unwrap();
    let data = DataAccess::new(Arc::new(store.clone()));
    (store, data)
}

fn new_task(assignee: &str) -> NewTask {
    NewTask {
        title: "Write weekly report".into(),
        description: "Summarize the week".into(),
        assigned_to: assignee.into(),
        assigned_by: "sup".into(),
        due_date: Some(day("2024-05-10")),
    }
}

#[tokio::test]
async fn student_cannot_create_tasks() {
    let (store, data) = setup().await;

    let err = data
        .create_task(&Caller::user("stu"), new_task("emp"))
        .await
        .unwrap_err();

    assert!(err.is_permission_denied(), "unexpected error: {err:?}");
    assert_eq!(store.count(Collection::Tasks).await, 0);
}

#[tokio::test]
async fn create_task_rejects_missing_fields() {
    let (_store, data) = setup().await;
    let sup = Caller::user("sup");

    let mut no_title = new_task("emp");
    no_title.title = "   ".into();
    assert_eq!(
        data.create_task(&sup, no_title).await.unwrap_err(),
        DataError::Validation(ValidationError::MissingField("title"))
    );

    let mut no_due = new_task("emp");
    no_due.due_date = None;
    assert_eq!(
        data.create_task(&sup, no_due).await.unwrap_err(),
        DataError::Validation(ValidationError::MissingField("dueDate"))
    );

    let mut no_assignee = new_task("");
    no_assignee.assigned_to = String::new();
    assert_eq!(
        data.create_task(&sup, no_assignee).await.unwrap_err(),
        DataError::Validation(ValidationError::MissingField("assignedTo"))
    );
}

#[tokio::test]
async fn rating_always_completes_and_is_idempotent() {
    let (_store, data) = setup().await;
    let sup = Caller::user("sup");

    let task = data.create_task(&sup, new_task("emp")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.rating, 0.0);

    data.update_task_status(&sup, &task.id, TaskStatus::Overdue).await.unwrap();
    data.rate_task(&sup, &task.id, 4.0, "Solid work").await.unwrap();
    let first = data.get_task(&sup, &task.id).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(first.rating, 4.0);
    assert_eq!(first.feedback.as_deref(), Some("Solid work"));
    assert!(first.completed_at.is_some());

    data.rate_task(&sup, &task.id, 4.0, "Solid work").await.unwrap();
    let second = data.get_task(&sup, &task.id).await.unwrap().unwrap();
    assert_eq!(second.status, first.status);
    assert_eq!(second.rating, first.rating);
    assert_eq!(second.feedback, first.feedback);

    let err = data.rate_task(&sup, &task.id, 6.0, "").await.unwrap_err();
    assert!(matches!(err, DataError::Validation(ValidationError::OutOfRange { field: "rating", .. })));
}

#[tokio::test]
async fn assignee_can_move_status_but_not_rate() {
    let (_store, data) = setup().await;
    let task = data.create_task(&Caller::user("sup"), new_task("emp")).await.unwrap();
    data.create_task(&Caller::user("sup"), new_task("stu")).await.unwrap();
    let emp = Caller::user("emp");

    // Any status may follow any other.
    data.update_task_status(&emp, &task.id, TaskStatus::Completed).await.unwrap();
    data.update_task_status(&emp, &task.id, TaskStatus::Pending).await.unwrap();

    let err = data.rate_task(&emp, &task.id, 5.0, "self review").await.unwrap_err();
    assert!(err.is_permission_denied());

    let mine = data.get_tasks_for_user(&emp, "emp").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].status, TaskStatus::Pending);

    assert!(data.get_all_tasks(&emp).await.unwrap_err().is_permission_denied());
}

#[tokio::test]
async fn updating_a_missing_task_is_not_found() {
    let (_store, data) = setup().await;
    let err = data
        .update_task_status(&Caller::user("sup"), "missing", TaskStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn sequential_performance_updates_keep_one_snapshot() {
    let (store, data) = setup().await;
    let sup = Caller::user("sup");
    let month: MonthKey = "2024-05".parse().unwrap();

    let first = PerformanceMetrics {
        attendance_rate: 80,
        tasks_completed: 2,
        average_task_rating: 4.0,
        flags: Default::default(),
    };
    let second = PerformanceMetrics {
        attendance_rate: 90,
        tasks_completed: 3,
        ..first.clone()
    };

    let a = data.update_performance_metrics(&sup, "emp", month, &first).await.unwrap();
    let b = data.update_performance_metrics(&sup, "emp", month, &second).await.unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(store.count(Collection::Performance).await, 1);

    let stored = data.get_performance_for_user(&sup, "emp", month).await.unwrap().unwrap();
    assert_eq!(stored.metrics.attendance_rate, 90);
    assert_eq!(stored.metrics.tasks_completed, 3);

    // The subject can read its own snapshot but not write it.
    let own = data.get_performance_for_user(&Caller::user("emp"), "emp", month).await.unwrap();
    assert!(own.is_some());
    let err = data
        .update_performance_metrics(&Caller::user("emp"), "emp", month, &first)
        .await
        .unwrap_err();
    assert!(err.is_permission_denied());

    let other_month = data
        .get_performance_for_user(&sup, "emp", "2024-06".parse().unwrap())
        .await
        .unwrap();
    assert!(other_month.is_none());
}

#[tokio::test]
async fn attendance_allows_duplicates_and_ranges_are_inclusive() {
    let (_store, data) = setup().await;
    let sup = Caller::user("sup");

    for (date, status) in [
        ("2024-05-06", AttendanceStatus::Present),
        ("2024-05-06", AttendanceStatus::Late),
        ("2024-05-10", AttendanceStatus::Absent),
        ("2024-05-13", AttendanceStatus::Present),
    ] {
        data.mark_attendance(&sup, "stu", day(date), status, "sup", None).await.unwrap();
    }
    data.mark_attendance(&sup, "emp", day("2024-05-07"), AttendanceStatus::Present, "sup", None)
        .await
        .unwrap();

    let week = data
        .get_attendance_for_user(&sup, "stu", day("2024-05-06"), day("2024-05-10"))
        .await
        .unwrap();
    assert_eq!(week.len(), 3);

    let everyone = data.get_all_attendance(&sup, day("2024-05-06"), day("2024-05-10")).await.unwrap();
    assert_eq!(everyone.len(), 4);

    let own = data
        .get_attendance_for_user(&Caller::user("stu"), "stu", day("2024-05-01"), day("2024-05-31"))
        .await
        .unwrap();
    assert_eq!(own.len(), 4);

    let err = data
        .mark_attendance(&Caller::user("stu"), "stu", day("2024-05-14"), AttendanceStatus::Present, "stu", None)
        .await
        .unwrap_err();
    assert!(err.is_permission_denied());
}

#[tokio::test]
async fn refresh_computes_snapshot_from_records() {
    let (_store, data) = setup().await;
    let sup = Caller::user("sup");

    for (date, status) in [
        ("2024-05-06", AttendanceStatus::Present),
        ("2024-05-07", AttendanceStatus::Present),
        ("2024-05-08", AttendanceStatus::Absent),
        ("2024-04-30", AttendanceStatus::Absent),
    ] {
        data.mark_attendance(&sup, "emp", day(date), status, "sup", None).await.unwrap();
    }
    let rated = data.create_task(&sup, new_task("emp")).await.unwrap();
    data.rate_task(&sup, &rated.id, 4.0, "good").await.unwrap();
    data.create_task(&sup, new_task("emp")).await.unwrap();

    let month = "2024-05".parse().unwrap();
    let snapshot = data
        .refresh_performance_snapshot(&sup, "emp", month, day("2024-05-31"))
        .await
        .unwrap();

    assert_eq!(snapshot.metrics.attendance_rate, 67);
    assert_eq!(snapshot.metrics.tasks_completed, 1);
    assert_eq!(snapshot.metrics.average_task_rating, 2.0);
    assert!(snapshot
        .metrics
        .flags
        .contains(&sapt_core::PerformanceFlag::LowAttendance));
    assert!(snapshot.metrics.flags.contains(&sapt_core::PerformanceFlag::OverdueTask));
}

#[tokio::test]
async fn unsubscribed_callbacks_never_fire_again() {
    let (_store, data) = setup().await;
    let sup = Caller::user("sup");

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let counter = calls.clone();

    let handle = data
        .subscribe_to_all_tasks(&sup)
        .await
        .unwrap()
        .for_each_snapshot(move |snapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(snapshot.map(|tasks| tasks.len()));
        });

    assert_eq!(rx.recv().await.unwrap().unwrap(), 0);
    data.create_task(&sup, new_task("emp")).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    handle.unsubscribe();
    data.create_task(&sup, new_task("stu")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(rx.recv().await.is_none(), "callback state should be released");
}

#[tokio::test]
async fn user_task_subscription_sees_only_own_tasks() {
    let (_store, data) = setup().await;
    let sup = Caller::user("sup");

    let mut mine = data.subscribe_to_user_tasks(&Caller::user("emp"), "emp").await.unwrap();
    assert!(mine.next().await.unwrap().unwrap().is_empty());

    data.create_task(&sup, new_task("stu")).await.unwrap();
    data.create_task(&sup, new_task("emp")).await.unwrap();

    let snapshot = mine.next().await.unwrap().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].assigned_to, "emp");
}

#[tokio::test]
async fn attendance_subscription_follows_the_range() {
    let (_store, data) = setup().await;
    let sup = Caller::user("sup");

    let mut live = data
        .subscribe_to_all_attendance(&sup, day("2024-05-06"), day("2024-05-10"))
        .await
        .unwrap();
    assert!(live.next().await.unwrap().unwrap().is_empty());

    data.mark_attendance(&sup, "stu", day("2024-05-08"), AttendanceStatus::Late, "sup", None)
        .await
        .unwrap();
    let snapshot = live.next().await.unwrap().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, AttendanceStatus::Late);

    // A student may watch a range holding only its own records, until
    // someone else's record lands in it.
    let mut own = data
        .subscribe_to_all_attendance(&Caller::user("stu"), day("2024-05-06"), day("2024-05-10"))
        .await
        .unwrap();
    assert_eq!(own.next().await.unwrap().unwrap().len(), 1);

    data.mark_attendance(&sup, "emp", day("2024-05-09"), AttendanceStatus::Present, "sup", None)
        .await
        .unwrap();
    assert!(own.next().await.unwrap().unwrap_err().is_permission_denied());
    assert!(own.next().await.is_none());

    assert!(data
        .subscribe_to_all_attendance(&Caller::user("stu"), day("2024-05-06"), day("2024-05-10"))
        .await
        .err()
        .is_some_and(|e| e.is_permission_denied()));
}

#[tokio::test]
async fn notifications_are_created_read_and_streamed() {
    let (_store, data) = setup().await;
    let sup = Caller::user("sup");
    let stu = Caller::user("stu");

    let mut live = data.subscribe_to_user_notifications(&stu, "stu").await.unwrap();
    assert!(live.next().await.unwrap().unwrap().is_empty());

    let created = data
        .create_notification(
            &sup,
            NewNotification {
                user_id: "stu".into(),
                kind: NotificationType::TaskAssigned,
                title: "New task".into(),
                message: "You have a new task".into(),
                action_url: Some("/tasks".into()),
            },
        )
        .await
        .unwrap();
    assert!(!created.read);

    let delivered = live.next().await.unwrap().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(sapt_core::metrics::unread_count(&delivered), 1);

    data.mark_notification_read(&stu, &created.id).await.unwrap();
    let after = live.next().await.unwrap().unwrap();
    assert_eq!(sapt_core::metrics::unread_count(&after), 0);

    let listed = data.get_notifications_for_user(&stu, "stu").await.unwrap();
    assert!(listed[0].read);

    let err = data
        .create_notification(
            &stu,
            NewNotification {
                user_id: "emp".into(),
                kind: NotificationType::System,
                title: "Hi".into(),
                message: "".into(),
                action_url: None,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_permission_denied());
}

#[tokio::test]
async fn only_admins_manage_profiles() {
    let (store, data) = setup().await;
    let admin = Caller::user("admin");

    let draft = UserDraft {
        email: "new@example.com".into(),
        name: "Newcomer".into(),
        role: Role::Employee,
        department: Some("Ops".into()),
        phone: None,
    };
    let created = data.save_user(&admin, None, draft.clone()).await.unwrap();
    assert_eq!(created.uid, "new@example.com");
    assert_eq!(created.department.as_deref(), Some("Ops"));
    assert!(created.created_at.is_some());

    let users = data.get_all_users(&admin).await.unwrap();
    assert_eq!(users.len(), 5);
    // Supervisors see the roster; other roles only their own profile.
    assert_eq!(data.get_all_users(&Caller::user("sup")).await.unwrap().len(), 5);
    assert!(data.get_all_users(&Caller::user("stu")).await.unwrap_err().is_permission_denied());
    assert!(data.save_user(&Caller::user("sup"), None, draft.clone()).await.unwrap_err().is_permission_denied());

    let edited = data
        .save_user(&admin, Some("stu"), UserDraft { role: Role::Supervisor, ..draft.clone() })
        .await
        .unwrap();
    assert_eq!(edited.role, Role::Supervisor);

    assert!(data.delete_user(&Caller::user("sup"), "emp").await.unwrap_err().is_permission_denied());
    data.delete_user(&admin, "emp").await.unwrap();
    assert_eq!(store.count(Collection::Users).await, 4);
    assert!(data.get_user(&admin, "emp").await.unwrap().is_none());

    let missing_name = UserDraft { name: String::new(), ..draft };
    assert_eq!(
        data.save_user(&admin, None, missing_name).await.unwrap_err(),
        DataError::Validation(ValidationError::MissingField("name"))
    );
}
