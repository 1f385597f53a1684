use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use super::{Child, ChildStore, StoreError, StoreResult};

/// (apiVersion/kind, namespace, name)
type ObjectKey = (String, String, String);

/// In-process [`ChildStore`] that mimics the API server semantics the
/// reconciler relies on: resourceVersion conflicts on replace, finalizers
/// holding back deletion, and the status subresource surviving replaces.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<ObjectKey, Value>>>,
    next_version: Arc<AtomicU64>,
    mutations: Arc<AtomicUsize>,
    pending_conflicts: Arc<AtomicUsize>,
}

fn type_key<K: Child>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

fn key<K: Child>(ns: &str, name: &str) -> ObjectKey {
    (type_key::<K>(), ns.to_string(), name.to_string())
}

fn describe<K: Child>(ns: &str, name: &str) -> String {
    format!("{} {}/{}", K::kind(&()), ns, name)
}

/// RFC 7386 JSON merge patch.
fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(p) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(t) = target {
                for (k, v) in p {
                    if v.is_null() {
                        t.remove(k);
                    } else {
                        merge(t.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

fn has_finalizers(obj: &Value) -> bool {
    obj.pointer("/metadata/finalizers")
        .and_then(|f| f.as_array())
        .is_some_and(|f| !f.is_empty())
}

fn is_terminating(obj: &Value) -> bool {
    obj.pointer("/metadata/deletionTimestamp")
        .is_some_and(|t| !t.is_null())
}

fn resource_version(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/resourceVersion")
        .and_then(|v| v.as_str())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create/replace/delete/patch calls that changed state.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Make the next `n` replace calls fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Overwrite an object's status, as an external controller would.
    pub async fn set_status<K: Child>(
        &self,
        ns: &str,
        name: &str,
        status: Value,
    ) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(&key::<K>(ns, name))
            .ok_or_else(|| StoreError::NotFound(describe::<K>(ns, name)))?;
        if let Value::Object(map) = obj {
            map.insert("status".into(), status);
        }
        self.bump(obj);
        Ok(())
    }

    fn bump(&self, obj: &mut Value) {
        let rv = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        merge(obj, &json!({"metadata": {"resourceVersion": rv.to_string()}}));
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
    }

    /// Apply a patch to the stored object and finish a pending deletion once
    /// the last finalizer is gone.
    async fn patch_stored<K: Child>(
        &self,
        ns: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<K> {
        let k = key::<K>(ns, name);
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(&k)
            .ok_or_else(|| StoreError::NotFound(describe::<K>(ns, name)))?;
        merge(obj, patch);
        self.bump(obj);
        let out: K = serde_json::from_value(obj.clone())?;
        if is_terminating(obj) && !has_finalizers(obj) {
            objects.remove(&k);
        }
        self.record_mutation();
        Ok(out)
    }
}

#[async_trait]
impl ChildStore for MemoryStore {
    async fn get<K: Child>(
        &self,
        ns: &str,
        name: &str,
    ) -> StoreResult<Option<K>> {
        let objects = self.objects.read().await;
        match objects.get(&key::<K>(ns, name)) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn list<K: Child>(
        &self,
        ns: &str,
        label: (&str, &str),
    ) -> StoreResult<Vec<K>> {
        let tk = type_key::<K>();
        let objects = self.objects.read().await;
        let mut matched: Vec<(&ObjectKey, &Value)> = objects
            .iter()
            .filter(|((t, n, _), _)| *t == tk && n == ns)
            .filter(|(_, v)| {
                v.pointer("/metadata/labels")
                    .and_then(|l| l.get(label.0))
                    .and_then(|l| l.as_str())
                    == Some(label.1)
            })
            .collect();
        matched.sort_by(|a, b| a.0.cmp(b.0));
        matched
            .into_iter()
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Into::into))
            .collect()
    }

    async fn create<K: Child>(&self, ns: &str, obj: &K) -> StoreResult<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let k = key::<K>(ns, &name);
        let mut objects = self.objects.write().await;
        if objects.contains_key(&k) {
            return Err(StoreError::AlreadyExists(describe::<K>(ns, &name)));
        }
        let mut value = serde_json::to_value(obj)?;
        let uid = format!(
            "mem-{}",
            self.next_version.fetch_add(1, Ordering::SeqCst) + 1
        );
        merge(
            &mut value,
            &json!({"metadata": {
                "namespace": ns,
                "uid": uid,
                "generation": 1,
                "creationTimestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            }}),
        );
        self.bump(&mut value);
        let out: K = serde_json::from_value(value.clone())?;
        objects.insert(k, value);
        self.record_mutation();
        Ok(out)
    }

    async fn replace<K: Child>(&self, ns: &str, obj: &K) -> StoreResult<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let k = key::<K>(ns, &name);
        let mut objects = self.objects.write().await;
        let current = objects
            .get(&k)
            .ok_or_else(|| StoreError::NotFound(describe::<K>(ns, &name)))?;
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict(describe::<K>(ns, &name)));
        }
        let incoming_rv = obj.meta().resource_version.as_deref();
        if incoming_rv.is_some() && incoming_rv != resource_version(current) {
            return Err(StoreError::Conflict(describe::<K>(ns, &name)));
        }
        let mut value = serde_json::to_value(obj)?;
        if let Value::Object(map) = &mut value {
            // Replace never touches the status subresource.
            match current.get("status") {
                Some(status) => {
                    map.insert("status".into(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
            if let Some(meta) = current.get("metadata") {
                let carried = json!({
                    "metadata": {
                        "namespace": meta.get("namespace"),
                        "uid": meta.get("uid"),
                        "creationTimestamp": meta.get("creationTimestamp"),
                        "deletionTimestamp": meta.get("deletionTimestamp"),
                        "generation": meta.get("generation"),
                    }
                });
                merge(&mut value, &carried);
            }
        }
        self.bump(&mut value);
        let out: K = serde_json::from_value(value.clone())?;
        if is_terminating(&value) && !has_finalizers(&value) {
            objects.remove(&k);
        } else {
            objects.insert(k, value);
        }
        self.record_mutation();
        Ok(out)
    }

    async fn delete<K: Child>(&self, ns: &str, name: &str) -> StoreResult<()> {
        let k = key::<K>(ns, name);
        let mut objects = self.objects.write().await;
        let Some(obj) = objects.get_mut(&k) else {
            return Err(StoreError::NotFound(describe::<K>(ns, name)));
        };
        if has_finalizers(obj) {
            if !is_terminating(obj) {
                merge(
                    obj,
                    &json!({"metadata": {"deletionTimestamp":
                        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)}}),
                );
                self.bump(obj);
                self.record_mutation();
            }
            return Ok(());
        }
        objects.remove(&k);
        self.record_mutation();
        Ok(())
    }

    async fn merge_patch<K: Child>(
        &self,
        ns: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<K> {
        let mut patch = patch.clone();
        if let Value::Object(map) = &mut patch {
            map.remove("status");
        }
        self.patch_stored(ns, name, &patch).await
    }

    async fn merge_patch_status<K: Child>(
        &self,
        ns: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<K> {
        let status_only = json!({ "status": patch.get("status").cloned().unwrap_or(Value::Null) });
        self.patch_stored(ns, name, &status_only).await
    }
}
