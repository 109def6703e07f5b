//! Copy-on-write worker registry.
//!
//! Readers load an immutable snapshot through `ArcSwap` without locking;
//! writers serialize on a mutex, clone the snapshot, modify it and publish it.

use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::cache::entry::MAX_TTL;
use crate::error::{ServiceError, ServiceResult};
use crate::registry::descriptor::{Capability, WorkerDescriptor};
use crate::registry::worker::Worker;

/// A worker together with its descriptor.
#[derive(Clone)]
pub struct RegisteredWorker {
    pub descriptor: Arc<WorkerDescriptor>,
    pub worker: Arc<dyn Worker>,
}

#[derive(Clone, Default)]
struct Snapshot {
    workers: HashMap<String, RegisteredWorker>,
    /// capability name → owning worker id
    owners: HashMap<String, String>,
}

pub struct WorkerRegistry {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Validate and add a worker. Re-registering an id replaces the old entry.
    pub fn register(
        &self,
        descriptor: WorkerDescriptor,
        worker: Arc<dyn Worker>,
    ) -> ServiceResult<Arc<WorkerDescriptor>> {
        let _guard = self.write_lock.lock().expect("registry write mutex poisoned");
        let current = self.snapshot.load_full();

        validate(&descriptor, worker.as_ref(), &current)?;

        let mut next = (*current).clone();
        if let Some(previous) = next.workers.remove(&descriptor.id) {
            for cap in &previous.descriptor.capabilities {
                next.owners.remove(&cap.name);
            }
        }
        for cap in &descriptor.capabilities {
            next.owners.insert(cap.name.clone(), descriptor.id.clone());
        }

        let descriptor = Arc::new(descriptor);
        next.workers.insert(
            descriptor.id.clone(),
            RegisteredWorker {
                descriptor: descriptor.clone(),
                worker,
            },
        );
        self.snapshot.store(Arc::new(next));

        tracing::info!(
            worker = %descriptor.id,
            capabilities = descriptor.capabilities.len(),
            "Worker registered"
        );
        Ok(descriptor)
    }

    pub fn deregister(&self, id: &str) -> Option<Arc<WorkerDescriptor>> {
        let _guard = self.write_lock.lock().expect("registry write mutex poisoned");
        let current = self.snapshot.load_full();
        if !current.workers.contains_key(id) {
            return None;
        }

        let mut next = (*current).clone();
        let removed = next.workers.remove(id)?;
        next.owners.retain(|_, owner| owner != id);
        self.snapshot.store(Arc::new(next));

        tracing::info!(worker = %id, "Worker deregistered");
        Some(removed.descriptor)
    }

    /// The worker owning `capability`. Unknown capabilities are a validation error.
    pub fn resolve(&self, capability: &str) -> ServiceResult<(RegisteredWorker, Capability)> {
        let snapshot = self.snapshot.load();
        let owner = snapshot
            .owners
            .get(capability)
            .and_then(|id| snapshot.workers.get(id))
            .ok_or_else(|| ServiceError::Validation(format!("unknown capability: {}", capability)))?;
        let declared = owner
            .descriptor
            .capability(capability)
            .cloned()
            .ok_or_else(|| ServiceError::Validation(format!("unknown capability: {}", capability)))?;
        Ok((owner.clone(), declared))
    }

    pub fn get(&self, id: &str) -> Option<RegisteredWorker> {
        self.snapshot.load().workers.get(id).cloned()
    }

    /// All descriptors, ordered by id.
    pub fn descriptors(&self) -> Vec<Arc<WorkerDescriptor>> {
        let snapshot = self.snapshot.load();
        let mut descriptors: Vec<_> = snapshot
            .workers
            .values()
            .map(|w| w.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    pub fn workers(&self) -> Vec<RegisteredWorker> {
        let snapshot = self.snapshot.load();
        let mut workers: Vec<_> = snapshot.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));
        workers
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(descriptor: &WorkerDescriptor, worker: &dyn Worker, snapshot: &Snapshot) -> ServiceResult<()> {
    if descriptor.id.trim().is_empty() {
        return Err(ServiceError::Validation("worker id must not be empty".into()));
    }
    if worker.id() != descriptor.id {
        return Err(ServiceError::Validation(format!(
            "worker id {} does not match descriptor id {}",
            worker.id(),
            descriptor.id
        )));
    }
    if descriptor.capabilities.is_empty() {
        return Err(ServiceError::Validation(format!(
            "worker {} declares no capabilities",
            descriptor.id
        )));
    }

    let mut seen = HashSet::new();
    for cap in &descriptor.capabilities {
        if cap.name.trim().is_empty() {
            return Err(ServiceError::Validation(format!(
                "worker {} declares an empty capability name",
                descriptor.id
            )));
        }
        if !seen.insert(cap.name.as_str()) {
            return Err(ServiceError::Validation(format!(
                "worker {} declares {} twice",
                descriptor.id, cap.name
            )));
        }
        if cap.ttl.is_some_and(|ttl| ttl > MAX_TTL) {
            return Err(ServiceError::Validation(format!(
                "capability {} TTL exceeds {}s",
                cap.name,
                MAX_TTL.as_secs()
            )));
        }
        if !worker.handles(&cap.name) {
            return Err(ServiceError::Validation(format!(
                "worker {} has no handler for {}",
                descriptor.id, cap.name
            )));
        }
        if let Some(owner) = snapshot.owners.get(&cap.name) {
            if owner != &descriptor.id {
                return Err(ServiceError::Validation(format!(
                    "capability {} is already provided by {}",
                    cap.name, owner
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::worker::HandlerWorker;
    use serde_json::json;
    use std::time::Duration;

    fn worker(id: &str, caps: &[&str]) -> (WorkerDescriptor, Arc<dyn Worker>) {
        let mut handler = HandlerWorker::new(id);
        for cap in caps {
            let name = cap.to_string();
            handler = handler.handler(*cap, move |_| {
                let name = name.clone();
                async move { Ok(json!(name)) }
            });
        }
        let descriptor = WorkerDescriptor::new(id, caps.iter().map(|c| Capability::new(*c)).collect());
        (descriptor, Arc::new(handler))
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = WorkerRegistry::new();
        let (descriptor, w) = worker("tides", &["tide_height", "tide_table"]);
        registry.register(descriptor, w).unwrap();

        let (owner, cap) = registry.resolve("tide_table").unwrap();
        assert_eq!(owner.descriptor.id, "tides");
        assert_eq!(cap.name, "tide_table");
        assert_eq!(owner.worker.invoke("tide_table", json!({})).await, Ok(json!("tide_table")));

        assert!(matches!(registry.resolve("bearing"), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_registration_validation() {
        let registry = WorkerRegistry::new();
        let (descriptor, w) = worker("tides", &["tide_height"]);
        registry.register(descriptor, w).unwrap();

        // capability owned by another worker
        let (descriptor, w) = worker("tides2", &["tide_height"]);
        assert!(registry.register(descriptor, w).is_err());

        // declared but not handled
        let (_, w) = worker("weather", &["forecast"]);
        let descriptor = WorkerDescriptor::new(
            "weather",
            vec![Capability::new("forecast"), Capability::new("buoys")],
        );
        assert!(registry.register(descriptor, w).is_err());

        // duplicate names
        let (_, w) = worker("routing", &["bearing"]);
        let descriptor = WorkerDescriptor::new(
            "routing",
            vec![Capability::new("bearing"), Capability::new("bearing")],
        );
        assert!(registry.register(descriptor, w).is_err());

        // TTL beyond the cache ceiling
        let (_, w) = worker("weather", &["forecast"]);
        let descriptor = WorkerDescriptor::new(
            "weather",
            vec![Capability::new("forecast").cacheable(Some(Duration::from_secs(u64::MAX)))],
        );
        assert!(matches!(registry.register(descriptor, w), Err(ServiceError::Validation(_))));

        let (_, w) = worker("empty", &[]);
        assert!(registry.register(WorkerDescriptor::new("empty", vec![]), w).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregister_replaces_and_deregister_frees_capabilities() {
        let registry = WorkerRegistry::new();
        let (descriptor, w) = worker("tides", &["tide_height", "tide_table"]);
        registry.register(descriptor, w).unwrap();

        let (descriptor, w) = worker("tides", &["tide_height"]);
        registry.register(descriptor, w).unwrap();
        assert!(registry.resolve("tide_table").is_err());
        assert_eq!(registry.len(), 1);

        let before = registry.descriptors();
        assert!(registry.deregister("tides").is_some());
        assert!(registry.deregister("tides").is_none());
        assert!(registry.resolve("tide_height").is_err());
        // earlier snapshots are unaffected
        assert_eq!(before.len(), 1);

        let (descriptor, w) = worker("tides2", &["tide_height"]);
        assert!(registry.register(descriptor, w).is_ok());
    }
}
