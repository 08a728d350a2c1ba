//! crates/sapt_core/src/ports.rs
//!
//! Defines the service contracts (traits) the core depends on.
//! The document store and the identity provider are external collaborators;
//! these traits are the narrow boundary through which the core talks to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::pin::Pin;

use crate::domain::Identity;
use crate::error::AuthError;

//=========================================================================================
// Store Error and Result Types
//=========================================================================================

/// Errors reported by the document store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Malformed document {collection}/{id}: {reason}")]
    Malformed {
        collection: String,
        id: String,
        reason: String,
    },
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

//=========================================================================================
// Documents, Collections and Queries
//=========================================================================================

/// The raw field map of a stored document.
pub type Fields = Map<String, Value>;

/// The collections the tracker keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Attendance,
    Tasks,
    Performance,
    Notifications,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Users,
        Collection::Attendance,
        Collection::Tasks,
        Collection::Performance,
        Collection::Notifications,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Attendance => "attendance",
            Collection::Tasks => "tasks",
            Collection::Performance => "performance",
            Collection::Notifications => "notifications",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Collection::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document as returned by the store: an opaque id plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Normalizes the document into a typed record, copying the document id
    /// into `id_field` first.
    pub fn decode<T: DeserializeOwned>(&self, collection: Collection, id_field: &str) -> StoreResult<T> {
        let mut fields = self.fields.clone();
        fields.insert(id_field.to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| StoreError::Malformed {
            collection: collection.to_string(),
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// A single query constraint. Range filters compare strings lexically and
/// numbers numerically; values of mismatched kinds never match.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
    Gte { field: String, value: Value },
    Lte { field: String, value: Value },
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq { field, .. } | Filter::Gte { field, .. } | Filter::Lte { field, .. } => field,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Filter::Eq { value, .. } | Filter::Gte { value, .. } | Filter::Lte { value, .. } => value,
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        let Some(actual) = fields.get(self.field()) else {
            return false;
        };
        match self {
            Filter::Eq { value, .. } => actual == value,
            Filter::Gte { value, .. } => {
                matches!(compare_values(actual, value), Some(Ordering::Greater | Ordering::Equal))
            }
            Filter::Lte { value, .. } => {
                matches!(compare_values(actual, value), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// A collection-scoped query: every filter must match.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filters: Vec<Filter>,
}

impl Query {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_lte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|f| f.matches(fields))
    }

    /// The equality constraints of this query, used as the composite key of an upsert.
    pub fn equalities(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.filters.iter().filter_map(|f| match f {
            Filter::Eq { field, value } => Some((field.as_str(), value)),
            _ => None,
        })
    }
}

//=========================================================================================
// Callers
//=========================================================================================

/// The principal a store operation runs as. Access rules are evaluated against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(String),
    /// Internal work such as seeding; bypasses access rules.
    Service,
}

impl Caller {
    pub fn user(uid: impl Into<String>) -> Self {
        Caller::User(uid.into())
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            Caller::User(uid) => Some(uid),
            _ => None,
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// A live query: yields the full matching result set on subscription and after
/// every change. Dropping the stream releases the subscription.
pub type DocumentStream = Pin<Box<dyn Stream<Item = StoreResult<Vec<Document>>> + Send>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `Ok(None)` when the document does not exist.
    async fn get(&self, caller: &Caller, collection: Collection, id: &str) -> StoreResult<Option<Document>>;

    /// Inserts a document under a freshly generated id and returns that id.
    async fn add(&self, caller: &Caller, collection: Collection, fields: Fields) -> StoreResult<String>;

    /// Writes a document under a known id. With `merge`, existing fields not
    /// present in `fields` are kept.
    async fn set(
        &self,
        caller: &Caller,
        collection: Collection,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> StoreResult<()>;

    /// Partial update of an existing document. `NotFound` if it does not exist.
    async fn update(&self, caller: &Caller, collection: Collection, id: &str, patch: Fields) -> StoreResult<()>;

    async fn delete(&self, caller: &Caller, collection: Collection, id: &str) -> StoreResult<()>;

    async fn query(&self, caller: &Caller, query: &Query) -> StoreResult<Vec<Document>>;

    /// Insert-or-update keyed on the equality filters of `key`, atomic per key.
    /// On insert the key fields are written along with `fields`. Returns the document id.
    async fn upsert(&self, caller: &Caller, key: &Query, fields: Fields) -> StoreResult<String>;

    /// Opens a live query.
    async fn watch(&self, caller: &Caller, query: Query) -> StoreResult<DocumentStream>;
}

/// A session opened by the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthGrant {
    pub identity: Identity,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Registers new credentials. `AuthError::EmailInUse` on duplicates.
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Checks credentials. `AuthError::InvalidCredentials` on any mismatch.
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn open_session(&self, identity: &Identity) -> Result<AuthGrant, AuthError>;

    async fn close_session(&self, token: &str) -> Result<(), AuthError>;

    /// Resolves a session token. `Ok(None)` for unknown or expired tokens.
    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn range_filters_are_inclusive_on_dates() {
        let query = Query::collection(Collection::Attendance)
            .where_eq("userId", "u1")
            .where_gte("date", "2024-05-06")
            .where_lte("date", "2024-05-10");

        assert!(query.matches(&fields(json!({"userId": "u1", "date": "2024-05-06"}))));
        assert!(query.matches(&fields(json!({"userId": "u1", "date": "2024-05-10"}))));
        assert!(!query.matches(&fields(json!({"userId": "u1", "date": "2024-05-11"}))));
        assert!(!query.matches(&fields(json!({"userId": "u2", "date": "2024-05-07"}))));
        assert!(!query.matches(&fields(json!({"userId": "u1"}))));
    }

    #[test]
    fn mismatched_kinds_never_match_ranges() {
        let query = Query::collection(Collection::Tasks).where_gte("rating", 3);
        assert!(query.matches(&fields(json!({"rating": 4.5}))));
        assert!(!query.matches(&fields(json!({"rating": "5"}))));
    }

    #[test]
    fn decode_reports_malformed_documents() {
        #[derive(serde::Deserialize, Debug)]
        struct Named {
            #[allow(dead_code)]
            id: String,
            #[allow(dead_code)]
            name: String,
        }

        let doc = Document::new("d1", fields(json!({"other": 1})));
        let err = doc.decode::<Named>(Collection::Users, "id").unwrap_err();
        assert!(matches!(err, StoreError::Malformed { ref id, .. } if id == "d1"));
    }
}
