//! Dynamic watches on product-declared kinds.
//!
//! Products declare the kinds they own once installed.  The first time a
//! product reports Completed a namespaced reflector is started for each kind
//! and every event re-queues the owning installation through the
//! controller's trigger channel.  Watches are keyed by `(kind, namespace)`
//! and live for the rest of the process.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::UnboundedSender;
use futures::{FutureExt, StreamExt};
use kube::api::{Api, ApiResource, DynamicObject};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::crd::rhmi::Rhmi;
use crate::error::{Error, Result};
use crate::products::WatchableKind;

/// Upper bound on the initial list of a freshly started watch.
pub const WATCH_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchSync {
    Synced,
    /// Registered but the initial list has not completed yet.
    Pending,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchProvisioner: Send + Sync {
    /// Make sure a watch on `kind` in `namespace` exists and report whether
    /// its cache has synced.  Events re-trigger `owner`.
    async fn ensure_watch(
        &self,
        kind: &WatchableKind,
        namespace: &str,
        owner: &ObjectRef<Rhmi>,
    ) -> Result<WatchSync>;
}

pub struct DynamicWatches {
    client: Client,
    trigger: UnboundedSender<ObjectRef<Rhmi>>,
    stores: Mutex<HashMap<(String, String), Store<DynamicObject>>>,
}

impl DynamicWatches {
    pub fn new(client: Client, trigger: UnboundedSender<ObjectRef<Rhmi>>) -> Self {
        Self {
            client,
            trigger,
            stores: Mutex::new(HashMap::new()),
        }
    }

    fn start(&self, kind: &WatchableKind, namespace: &str, owner: ObjectRef<Rhmi>) -> Store<DynamicObject> {
        let ar = ApiResource::from_gvk(&kind.gvk());
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let writer: Writer<DynamicObject> = Writer::new(ar);
        let reader = writer.as_reader();
        let trigger = self.trigger.clone();
        let label = format!("{kind}");
        let ns = namespace.to_string();

        tokio::spawn(async move {
            let stream = watcher(api, watcher::Config::default())
                .default_backoff()
                .reflect(writer)
                .touched_objects();
            tokio::pin!(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(_) => {
                        if trigger.unbounded_send(owner.clone()).is_err() {
                            debug!(watch = %label, namespace = %ns, "controller gone, stopping watch");
                            return;
                        }
                    }
                    Err(e) => warn!(watch = %label, namespace = %ns, error = %e, "watch error"),
                }
            }
        });

        reader
    }
}

#[async_trait]
impl WatchProvisioner for DynamicWatches {
    async fn ensure_watch(
        &self,
        kind: &WatchableKind,
        namespace: &str,
        owner: &ObjectRef<Rhmi>,
    ) -> Result<WatchSync> {
        let key = (kind.to_string(), namespace.to_string());

        let reader = {
            let mut stores = self.stores.lock().await;
            if let Some(existing) = stores.get(&key) {
                let ready = existing.wait_until_ready().now_or_never();
                return Ok(match ready {
                    Some(Ok(())) => WatchSync::Synced,
                    _ => WatchSync::Pending,
                });
            }
            let reader = self.start(kind, namespace, owner.clone());
            stores.insert(key, reader.clone());
            reader
        };

        match tokio::time::timeout(WATCH_SYNC_TIMEOUT, reader.wait_until_ready()).await {
            Ok(Ok(())) => {
                info!(watch = %kind, %namespace, "cache synced, watch initialised");
                Ok(WatchSync::Synced)
            }
            Ok(Err(e)) => Err(Error::WatchSync(format!(
                "{kind} watch in {namespace} namespace stopped: {e}"
            ))),
            Err(_) => Err(Error::WatchSync(format!(
                "failed to sync cache for {kind} watch in {namespace} namespace"
            ))),
        }
    }
}

/// Trigger reference for an installation.
pub fn owner_ref(installation: &Rhmi) -> ObjectRef<Rhmi> {
    reflector::ObjectRef::from_obj(installation)
}
