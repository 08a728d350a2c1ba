//! crates/sapt_core/src/subscription.rs
//!
//! Live subscriptions as cancellable streams of full snapshots.

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::DataResult;
use crate::ports::{Collection, DocumentStream};

/// A live query over typed records. Each item is the complete current result
/// set. Dropping the subscription releases the underlying live query.
pub struct Subscription<T> {
    inner: Pin<Box<dyn Stream<Item = DataResult<Vec<T>>> + Send>>,
}

impl<T> Subscription<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) fn from_documents(documents: DocumentStream, collection: Collection, id_field: &'static str) -> Self {
        let inner = documents.map(move |snapshot| {
            let docs = snapshot?;
            let records = docs
                .iter()
                .map(|doc| doc.decode::<T>(collection, id_field))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        });
        Self { inner: Box::pin(inner) }
    }

    /// Delivers every snapshot to `on_snapshot` from a background task.
    ///
    /// Delivery and [`SubscriptionHandle::unsubscribe`] are serialized, so once
    /// `unsubscribe` returns the callback is never invoked again. The callback
    /// may call [`SubscriptionHandle::is_active`], but must not unsubscribe its
    /// own handle.
    pub fn for_each_snapshot<F>(mut self, mut on_snapshot: F) -> SubscriptionHandle
    where
        F: FnMut(DataResult<Vec<T>>) + Send + 'static,
    {
        let gate = Arc::new(DeliveryGate::default());
        let delivery = gate.clone();

        let task = tokio::spawn(async move {
            while let Some(snapshot) = self.inner.next().await {
                let delivered = {
                    let _delivering = delivery.lock();
                    let open = delivery.open.load(Ordering::Acquire);
                    if open {
                        on_snapshot(snapshot);
                    }
                    open
                };
                if !delivered {
                    break;
                }
            }
            debug!("subscription delivery finished");
        });

        SubscriptionHandle { gate, task: Some(task) }
    }
}

/// `open` is only cleared while `delivering` is held.
struct DeliveryGate {
    open: AtomicBool,
    delivering: Mutex<()>,
}

impl Default for DeliveryGate {
    fn default() -> Self {
        Self {
            open: AtomicBool::new(true),
            delivering: Mutex::new(()),
        }
    }
}

impl DeliveryGate {
    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.delivering.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Stream for Subscription<T> {
    type Item = DataResult<Vec<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// The release capability of a callback subscription.
pub struct SubscriptionHandle {
    gate: Arc<DeliveryGate>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stops delivery. Consumes the handle, so it can only be called once;
    /// dropping the handle has the same effect.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    pub fn is_active(&self) -> bool {
        self.gate.open.load(Ordering::Acquire)
    }

    fn release(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        {
            let _delivering = self.gate.lock();
            self.gate.open.store(false, Ordering::Release);
        }
        task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}
