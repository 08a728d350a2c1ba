//! services/api/src/adapters/pg_store.rs
//!
//! The PostgreSQL implementation of the `DocumentStore` port from the core
//! crate. Documents live as JSONB rows in a single `documents` table keyed by
//! (collection, id). Access rules are checked here, inside the adapter, the
//! same way the in-memory store checks them.

use async_trait::async_trait;
use sapt_core::domain::Role;
use sapt_core::ports::{
    Caller, Collection, Document, DocumentStore, DocumentStream, Fields, Filter, Query, StoreError, StoreResult,
};
use sapt_core::rules::{self, Access, Principal};
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPool};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, warn};
use uuid::Uuid;

/// The NOTIFY channel written by the `documents_changed` trigger.
pub const CHANGE_CHANNEL: &str = "document_changes";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter backed by a Postgres pool.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    id: String,
    data: Json<Fields>,
}

impl DocumentRecord {
    fn to_domain(self) -> Document {
        Document::new(self.id, self.data.0)
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Unexpected(e.to_string()),
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The role stored on the caller's profile, if any.
async fn role_of(conn: &mut PgConnection, caller: &Caller) -> StoreResult<Option<Role>> {
    let Caller::User(uid) = caller else {
        return Ok(None);
    };
    let role = sqlx::query_scalar::<_, Option<String>>(
        "SELECT data ->> 'role' FROM documents WHERE collection = 'users' AND id = $1",
    )
    .bind(uid)
    .fetch_optional(&mut *conn)
    .await
    .map_err(store_error)?
    .flatten();

    Ok(role.and_then(|r| match r.parse::<Role>() {
        Ok(role) => Some(role),
        Err(e) => {
            warn!(uid = %uid, error = %e, "profile carries an unknown role");
            None
        }
    }))
}

fn authorize(
    caller: &Caller,
    role: Option<Role>,
    collection: Collection,
    id: &str,
    access: Access<'_>,
) -> StoreResult<()> {
    match caller {
        Caller::Service => Ok(()),
        Caller::Anonymous => Err(rules::anonymous_denied(collection)),
        Caller::User(uid) => rules::check(collection, Principal { uid, role }, id, access),
    }
}

async fn fetch_locked(conn: &mut PgConnection, collection: Collection, id: &str) -> StoreResult<Option<Fields>> {
    let data = sqlx::query_scalar::<_, Json<Fields>>(
        "SELECT data FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
    )
    .bind(collection.as_str())
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(store_error)?;
    Ok(data.map(|Json(fields)| fields))
}

async fn write(conn: &mut PgConnection, collection: Collection, id: &str, fields: Fields) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) \
         ON CONFLICT (collection, id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()",
    )
    .bind(collection.as_str())
    .bind(id)
    .bind(Value::Object(fields))
    .execute(&mut *conn)
    .await
    .map_err(store_error)?;
    Ok(())
}

/// Translates a `Query` into SQL. Range and equality filters only match values
/// of the same JSON type, so strings compare as strings and numbers as numbers.
fn select_matching(query: &Query) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new("SELECT id, data FROM documents WHERE collection = ");
    builder.push_bind(query.collection.as_str());
    for filter in &query.filters {
        let op = match filter {
            Filter::Eq { .. } => " = ",
            Filter::Gte { .. } => " >= ",
            Filter::Lte { .. } => " <= ",
        };
        builder
            .push(" AND jsonb_typeof(data -> ")
            .push_bind(filter.field())
            .push(") = jsonb_typeof(")
            .push_bind(filter.value().clone())
            .push(") AND (data -> ")
            .push_bind(filter.field())
            .push(")")
            .push(op)
            .push_bind(filter.value().clone());
    }
    builder.push(" ORDER BY id");
    builder
}

/// A stable advisory-lock key for the equality part of an upsert key.
fn upsert_lock_key(key: &Query) -> String {
    let parts: Vec<String> = key
        .equalities()
        .map(|(field, value)| format!("{}={}", field, value))
        .collect();
    format!("{}:{}", key.collection, parts.join("&"))
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, caller: &Caller, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        let record = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(store_error)?;

        let Some(record) = record else {
            return Ok(None);
        };
        let role = role_of(&mut conn, caller).await?;
        let doc = record.to_domain();
        authorize(caller, role, collection, id, Access::Read(&doc.fields))?;
        Ok(Some(doc))
    }

    async fn add(&self, caller: &Caller, collection: Collection, fields: Fields) -> StoreResult<String> {
        let id = new_id();
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        let role = role_of(&mut conn, caller).await?;
        authorize(caller, role, collection, &id, Access::Create(&fields))?;
        write(&mut conn, collection, &id, fields).await?;
        debug!(collection = %collection, id = %id, "document added");
        Ok(id)
    }

    async fn set(
        &self,
        caller: &Caller,
        collection: Collection,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let role = role_of(&mut tx, caller).await?;
        let next = match fetch_locked(&mut tx, collection, id).await? {
            Some(mut existing) => {
                authorize(caller, role, collection, id, Access::Update { existing: &existing, patch: &fields })?;
                if merge {
                    existing.extend(fields);
                    existing
                } else {
                    fields
                }
            }
            None => {
                authorize(caller, role, collection, id, Access::Create(&fields))?;
                fields
            }
        };
        write(&mut tx, collection, id, next).await?;
        tx.commit().await.map_err(store_error)?;
        debug!(collection = %collection, id = %id, "document set");
        Ok(())
    }

    async fn update(&self, caller: &Caller, collection: Collection, id: &str, patch: Fields) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let role = role_of(&mut tx, caller).await?;
        let mut existing = fetch_locked(&mut tx, collection, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
        authorize(caller, role, collection, id, Access::Update { existing: &existing, patch: &patch })?;
        existing.extend(patch);
        write(&mut tx, collection, id, existing).await?;
        tx.commit().await.map_err(store_error)?;
        debug!(collection = %collection, id = %id, "document updated");
        Ok(())
    }

    async fn delete(&self, caller: &Caller, collection: Collection, id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let role = role_of(&mut tx, caller).await?;
        let existing = fetch_locked(&mut tx, collection, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
        authorize(caller, role, collection, id, Access::Delete(&existing))?;
        sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        tx.commit().await.map_err(store_error)?;
        debug!(collection = %collection, id = %id, "document deleted");
        Ok(())
    }

    async fn query(&self, caller: &Caller, query: &Query) -> StoreResult<Vec<Document>> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        let role = role_of(&mut conn, caller).await?;
        let records = select_matching(query)
            .build_query_as::<DocumentRecord>()
            .fetch_all(&mut *conn)
            .await
            .map_err(store_error)?;

        records
            .into_iter()
            .map(|record| {
                let doc = record.to_domain();
                authorize(caller, role, query.collection, &doc.id, Access::Read(&doc.fields))?;
                Ok(doc)
            })
            .collect()
    }

    async fn upsert(&self, caller: &Caller, key: &Query, fields: Fields) -> StoreResult<String> {
        let collection = key.collection;
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        // Serializes concurrent upserts on the same key until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(upsert_lock_key(key))
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        let role = role_of(&mut tx, caller).await?;
        let mut select = select_matching(key);
        select.push(" LIMIT 1 FOR UPDATE");
        let existing = select
            .build_query_as::<DocumentRecord>()
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error)?;

        let id = match existing {
            Some(record) => {
                let doc = record.to_domain();
                authorize(caller, role, collection, &doc.id, Access::Update { existing: &doc.fields, patch: &fields })?;
                let mut next = doc.fields;
                next.extend(fields);
                write(&mut tx, collection, &doc.id, next).await?;
                doc.id
            }
            None => {
                let mut next: Fields = key
                    .equalities()
                    .map(|(field, value)| (field.to_string(), value.clone()))
                    .collect();
                next.extend(fields);
                let id = new_id();
                authorize(caller, role, collection, &id, Access::Create(&next))?;
                write(&mut tx, collection, &id, next).await?;
                id
            }
        };
        tx.commit().await.map_err(store_error)?;
        debug!(collection = %collection, id = %id, "document upserted");
        Ok(id)
    }

    async fn watch(&self, caller: &Caller, query: Query) -> StoreResult<DocumentStream> {
        // Listen before the first read so no change slips between the two.
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(store_error)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(store_error)?;
        let initial = self.query(caller, &query).await?;
        let store = self.clone();
        let caller = caller.clone();

        Ok(Box::pin(async_stream::stream! {
            let mut last = initial.clone();
            yield Ok(initial);
            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => notification,
                    Err(e) => {
                        warn!(error = %e, "change listener failed");
                        yield Err(store_error(e));
                        break;
                    }
                };
                // Profile changes can revoke access, so they re-evaluate too.
                match Collection::from_name(notification.payload()) {
                    Some(changed) if changed == query.collection || changed == Collection::Users => {}
                    _ => continue,
                }
                match store.query(&caller, &query).await {
                    Ok(docs) if docs == last => {}
                    Ok(docs) => {
                        last = docs.clone();
                        yield Ok(docs);
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }))
    }
}
