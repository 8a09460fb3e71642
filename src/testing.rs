//! In-memory stand-ins for the case-management API, shared by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::api::{CaseApi, DownstreamError, EntityResolver, Resolution, Resource};
use crate::models::RecordId;

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Create {
        resource: Resource,
        fields: serde_json::Value,
    },
    Update {
        resource: Resource,
        id: RecordId,
        fields: serde_json::Value,
    },
}

/// Records every create/update attempt, including failed ones. Created ids
/// count up from 100.
pub struct FakeCaseApi {
    calls: Mutex<Vec<ApiCall>>,
    next_id: AtomicU64,
    failing_creates: Mutex<HashSet<Resource>>,
    failing_updates: AtomicBool,
}

impl FakeCaseApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(100),
            failing_creates: Mutex::new(HashSet::new()),
            failing_updates: AtomicBool::new(false),
        }
    }

    pub fn fail_creates(&self, resource: Resource) {
        self.failing_creates.lock().unwrap().insert(resource);
    }

    pub fn fail_updates(&self) {
        self.failing_updates.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creates(&self, resource: Resource) -> Vec<serde_json::Value> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Create { resource: r, fields } if r == resource => Some(fields),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self, resource: Resource) -> Vec<(RecordId, serde_json::Value)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Update {
                    resource: r,
                    id,
                    fields,
                } if r == resource => Some((id, fields)),
                _ => None,
            })
            .collect()
    }

    fn failure(resource: Resource) -> DownstreamError {
        DownstreamError::Status {
            status: 500,
            url: format!("fake://{}", resource.path()),
            body: "boom".to_string(),
        }
    }
}

#[async_trait]
impl CaseApi for FakeCaseApi {
    async fn create(
        &self,
        resource: Resource,
        fields: serde_json::Value,
    ) -> Result<RecordId, DownstreamError> {
        self.calls
            .lock()
            .unwrap()
            .push(ApiCall::Create { resource, fields });

        if self.failing_creates.lock().unwrap().contains(&resource) {
            return Err(Self::failure(resource));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(RecordId::new(id.to_string()))
    }

    async fn update(
        &self,
        resource: Resource,
        id: &RecordId,
        fields: serde_json::Value,
    ) -> Result<(), DownstreamError> {
        self.calls.lock().unwrap().push(ApiCall::Update {
            resource,
            id: id.clone(),
            fields,
        });

        if self.failing_updates.load(Ordering::SeqCst) {
            return Err(Self::failure(resource));
        }
        Ok(())
    }
}

/// Resolves from a fixed table; unknown numbers resolve to nothing.
#[derive(Default)]
pub struct FakeResolver {
    table: HashMap<String, Resolution>,
    lookups: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, number: &str, resolution: Resolution) -> Self {
        self.table.insert(number.to_string(), resolution);
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntityResolver for FakeResolver {
    async fn resolve_by_phone(&self, number: &str) -> Resolution {
        self.lookups.lock().unwrap().push(number.to_string());
        self.table.get(number).cloned().unwrap_or_default()
    }
}
