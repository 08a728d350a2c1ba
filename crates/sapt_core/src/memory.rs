//! crates/sapt_core/src/memory.rs
//!
//! An in-process implementation of the `DocumentStore` port. It applies the
//! same access rules as the Postgres adapter and pushes change notifications to
//! live queries, so it stands in for the remote store in tests and in the
//! `memory` backend of the api service.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use uuid::Uuid;

use crate::domain::Role;
use crate::ports::{Caller, Collection, Document, DocumentStore, DocumentStream, Fields, Query, StoreError, StoreResult};
use crate::rules::{self, Access, Principal};

type Collections = HashMap<Collection, BTreeMap<String, Fields>>;

const CHANGE_BUFFER: usize = 256;

/// A document store held entirely in memory. Cloning shares the same data.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<Collections>>,
    changes: broadcast::Sender<Collection>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    /// Number of documents in a collection, ignoring access rules.
    pub async fn count(&self, collection: Collection) -> usize {
        self.data
            .read()
            .await
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    fn notify(&self, collection: Collection) {
        // No receivers simply means nobody is watching.
        let _ = self.changes.send(collection);
    }
}

fn role_of(data: &Collections, uid: &str) -> Option<Role> {
    data.get(&Collection::Users)?
        .get(uid)?
        .get("role")?
        .as_str()?
        .parse()
        .ok()
}

fn authorize(data: &Collections, caller: &Caller, collection: Collection, id: &str, access: Access<'_>) -> StoreResult<()> {
    match caller {
        Caller::Service => Ok(()),
        Caller::Anonymous => Err(rules::anonymous_denied(collection)),
        Caller::User(uid) => {
            let principal = Principal {
                uid,
                role: role_of(data, uid),
            };
            rules::check(collection, principal, id, access)
        }
    }
}

fn merge(target: &mut Fields, patch: Fields) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn run_query(data: &Collections, caller: &Caller, query: &Query) -> StoreResult<Vec<Document>> {
    let Some(docs) = data.get(&query.collection) else {
        return Ok(Vec::new());
    };
    docs.iter()
        .filter(|(_, fields)| query.matches(fields))
        .map(|(id, fields)| {
            authorize(data, caller, query.collection, id, Access::Read(fields))?;
            Ok(Document::new(id.clone(), fields.clone()))
        })
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, caller: &Caller, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        let data = self.data.read().await;
        let Some(fields) = data.get(&collection).and_then(|docs| docs.get(id)) else {
            return Ok(None);
        };
        authorize(&data, caller, collection, id, Access::Read(fields))?;
        Ok(Some(Document::new(id, fields.clone())))
    }

    async fn add(&self, caller: &Caller, collection: Collection, fields: Fields) -> StoreResult<String> {
        let id = new_id();
        {
            let mut data = self.data.write().await;
            authorize(&data, caller, collection, &id, Access::Create(&fields))?;
            data.entry(collection).or_default().insert(id.clone(), fields);
        }
        debug!(collection = %collection, id = %id, "document added");
        self.notify(collection);
        Ok(id)
    }

    async fn set(
        &self,
        caller: &Caller,
        collection: Collection,
        id: &str,
        fields: Fields,
        merge_existing: bool,
    ) -> StoreResult<()> {
        {
            let mut data = self.data.write().await;
            let existing = data.get(&collection).and_then(|docs| docs.get(id)).cloned();
            let next = match existing {
                Some(existing) => {
                    authorize(&data, caller, collection, id, Access::Update { existing: &existing, patch: &fields })?;
                    if merge_existing {
                        let mut next = existing;
                        merge(&mut next, fields);
                        next
                    } else {
                        fields
                    }
                }
                None => {
                    authorize(&data, caller, collection, id, Access::Create(&fields))?;
                    fields
                }
            };
            data.entry(collection).or_default().insert(id.to_string(), next);
        }
        debug!(collection = %collection, id = %id, "document set");
        self.notify(collection);
        Ok(())
    }

    async fn update(&self, caller: &Caller, collection: Collection, id: &str, patch: Fields) -> StoreResult<()> {
        {
            let mut data = self.data.write().await;
            let existing = data
                .get(&collection)
                .and_then(|docs| docs.get(id))
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
            authorize(&data, caller, collection, id, Access::Update { existing: &existing, patch: &patch })?;
            let mut next = existing;
            merge(&mut next, patch);
            data.entry(collection).or_default().insert(id.to_string(), next);
        }
        debug!(collection = %collection, id = %id, "document updated");
        self.notify(collection);
        Ok(())
    }

    async fn delete(&self, caller: &Caller, collection: Collection, id: &str) -> StoreResult<()> {
        {
            let mut data = self.data.write().await;
            let existing = data
                .get(&collection)
                .and_then(|docs| docs.get(id))
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
            authorize(&data, caller, collection, id, Access::Delete(existing))?;
            if let Some(docs) = data.get_mut(&collection) {
                docs.remove(id);
            }
        }
        debug!(collection = %collection, id = %id, "document deleted");
        self.notify(collection);
        Ok(())
    }

    async fn query(&self, caller: &Caller, query: &Query) -> StoreResult<Vec<Document>> {
        let data = self.data.read().await;
        run_query(&data, caller, query)
    }

    async fn upsert(&self, caller: &Caller, key: &Query, fields: Fields) -> StoreResult<String> {
        let collection = key.collection;
        let id = {
            // The whole read-decide-write runs under one write guard.
            let mut data = self.data.write().await;
            let existing = data.get(&collection).and_then(|docs| {
                docs.iter()
                    .find(|(_, doc)| key.matches(doc))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
            });

            match existing {
                Some((id, existing)) => {
                    authorize(&data, caller, collection, &id, Access::Update { existing: &existing, patch: &fields })?;
                    let mut next = existing;
                    merge(&mut next, fields);
                    data.entry(collection).or_default().insert(id.clone(), next);
                    id
                }
                None => {
                    let mut next: Fields = key
                        .equalities()
                        .map(|(field, value)| (field.to_string(), value.clone()))
                        .collect();
                    merge(&mut next, fields);
                    let id = new_id();
                    authorize(&data, caller, collection, &id, Access::Create(&next))?;
                    data.entry(collection).or_default().insert(id.clone(), next);
                    id
                }
            }
        };
        debug!(collection = %collection, id = %id, "document upserted");
        self.notify(collection);
        Ok(id)
    }

    async fn watch(&self, caller: &Caller, query: Query) -> StoreResult<DocumentStream> {
        // Subscribe before the first read so no change slips between the two.
        let mut changes = self.changes.subscribe();
        let initial = self.query(caller, &query).await?;
        let store = self.clone();
        let caller = caller.clone();

        Ok(Box::pin(async_stream::stream! {
            let mut last = initial.clone();
            yield Ok(initial);
            loop {
                match changes.recv().await {
                    // Profile changes can revoke access, so they re-evaluate too.
                    Ok(changed) if changed != query.collection && changed != Collection::Users => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
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

/// Helper for seeding a profile without going through the rules.
pub async fn seed_user(store: &MemoryStore, uid: &str, email: &str, name: &str, role: Role) -> StoreResult<()> {
    let mut fields = Fields::new();
    fields.insert("uid".into(), Value::String(uid.into()));
    fields.insert("email".into(), Value::String(email.into()));
    fields.insert("name".into(), Value::String(name.into()));
    fields.insert("role".into(), Value::String(role.as_str().into()));
    fields.insert("createdAt".into(), serde_json::to_value(chrono::Utc::now()).unwrap_or(Value::Null));
    store.set(&Caller::Service, Collection::Users, uid, fields, false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn anonymous_callers_are_rejected() {
        let store = MemoryStore::new();
        let err = store
            .add(&Caller::Anonymous, Collection::Tasks, fields(json!({"title": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn query_fails_when_any_match_is_unreadable() {
        let store = MemoryStore::new();
        seed_user(&store, "s1", "s1@example.com", "s1", Role::Student).await.unwrap();
        for user in ["s1", "s2"] {
            store
                .add(&Caller::Service, Collection::Attendance, fields(json!({"userId": user, "date": "2024-05-06"})))
                .await
                .unwrap();
        }

        let all = Query::collection(Collection::Attendance);
        let own = Query::collection(Collection::Attendance).where_eq("userId", "s1");
        let caller = Caller::user("s1");

        assert!(store.query(&caller, &all).await.is_err());
        assert_eq!(store.query(&caller, &own).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_upserts_keep_one_document_per_key() {
        let store = MemoryStore::new();
        let key = Query::collection(Collection::Performance)
            .where_eq("userId", "u1")
            .where_eq("month", "2024-05");

        let writes = (0..16).map(|i| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .upsert(&Caller::Service, &key, fields(json!({"tasksCompleted": i})))
                    .await
            })
        });
        for handle in writes.collect::<Vec<_>>() {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count(Collection::Performance).await, 1);
        let docs = store.query(&Caller::Service, &key).await.unwrap();
        assert_eq!(docs[0].str_field("month"), Some("2024-05"));
    }

    #[tokio::test]
    async fn watch_redelivers_full_snapshots() {
        let store = MemoryStore::new();
        let mut stream = store
            .watch(&Caller::Service, Query::collection(Collection::Tasks))
            .await
            .unwrap();

        assert!(stream.next().await.unwrap().unwrap().is_empty());
        store.add(&Caller::Service, Collection::Tasks, fields(json!({"title": "a"}))).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 1);
        store.add(&Caller::Service, Collection::Tasks, fields(json!({"title": "b"}))).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn watch_ends_with_error_when_access_is_revoked() {
        let store = MemoryStore::new();
        seed_user(&store, "sup", "sup@example.com", "sup", Role::Supervisor).await.unwrap();
        store
            .add(&Caller::Service, Collection::Tasks, fields(json!({"assignedTo": "e1"})))
            .await
            .unwrap();

        let mut stream = store
            .watch(&Caller::user("sup"), Query::collection(Collection::Tasks))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 1);

        store
            .update(&Caller::Service, Collection::Users, "sup", fields(json!({"role": "employee"})))
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(Err(StoreError::PermissionDenied(_)))));
        assert!(stream.next().await.is_none());
    }
}
