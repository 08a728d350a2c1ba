pub mod auth;
pub mod data_access;
pub mod domain;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod ports;
pub mod report;
pub mod rules;
pub mod session;
pub mod subscription;

pub use auth::{AuthClient, AuthService};
pub use data_access::DataAccess;
pub use domain::{
    AttendanceMethod, AttendanceRecord, AttendanceStatus, Identity, MonthKey, NewNotification, NewTask, Notification,
    NotificationType, PerformanceFlag, PerformanceMetrics, PerformanceSnapshot, Role, Task, TaskStatus, User, UserDraft,
};
pub use error::{AuthError, DataError, DataResult, ValidationError};
pub use memory::MemoryStore;
pub use ports::{
    AuthGrant, Caller, Collection, Document, DocumentStore, DocumentStream, Fields, Filter, IdentityProvider, Query,
    StoreError, StoreResult,
};
pub use session::{SessionContext, SessionState};
pub use subscription::{Subscription, SubscriptionHandle};
