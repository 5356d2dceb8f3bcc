use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Resource, ResourceId, ResourceKind, ResourceStatus, UsageLocation};
use crate::shared::lock;

/// Identifies one optimistic reorder so a late confirmation cannot settle a
/// newer projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderToken(u64);

#[derive(Debug, Clone)]
struct PendingReorder {
    token: ReorderToken,
    order: Vec<ResourceId>,
    sort_key: String,
}

#[derive(Debug, Default)]
struct RegistryInner {
    resources: HashMap<ResourceId, Resource>,
    committed_order: Vec<ResourceId>,
    sort_key: Option<String>,
    pending: Option<PendingReorder>,
    next_token: u64,
}

impl RegistryInner {
    fn view_order(&self) -> &[ResourceId] {
        match &self.pending {
            Some(pending) => &pending.order,
            None => &self.committed_order,
        }
    }

    fn renumber(&mut self) {
        let order = self.view_order().to_vec();
        for (index, id) in order.iter().enumerate() {
            if let Some(resource) = self.resources.get_mut(id) {
                resource.sort_order = index;
            }
        }
    }

    fn push_id(&mut self, id: ResourceId) {
        self.committed_order.push(id.clone());
        if let Some(pending) = &mut self.pending {
            pending.order.push(id);
        }
    }

    fn replace_id(&mut self, from: &ResourceId, to: &ResourceId) {
        let already_present = self.resources.contains_key(to);
        let orders = std::iter::once(&mut self.committed_order)
            .chain(self.pending.as_mut().map(|p| &mut p.order));
        for order in orders {
            if already_present {
                order.retain(|id| id != from);
            } else if let Some(slot) = order.iter_mut().find(|id| *id == from) {
                *slot = to.clone();
            }
        }
    }

    fn drop_id(&mut self, target: &ResourceId) {
        self.committed_order.retain(|id| id != target);
        if let Some(pending) = &mut self.pending {
            pending.order.retain(|id| id != target);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub resources: Vec<Resource>,
    pub sort_key: Option<String>,
    pub reorder_pending: bool,
}

/// Normalized store of every resource the session knows about.
///
/// Entries are last-writer-wins per id. Uploads only ever touch the entry keyed by
/// their own transient id, so interleaved completions never contend on an entry.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    inner: Mutex<RegistryInner>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every remote entry with a freshly loaded list, keeping in-flight
    /// placeholders after them.
    pub fn replace_all(&self, resources: Vec<Resource>) {
        let mut inner = lock(&self.inner);
        let placeholders: Vec<ResourceId> = inner
            .committed_order
            .iter()
            .filter(|id| matches!(id, ResourceId::Transient(_)))
            .cloned()
            .collect();
        let mut kept: HashMap<ResourceId, Resource> = placeholders
            .iter()
            .filter_map(|id| inner.resources.remove(id).map(|r| (id.clone(), r)))
            .collect();

        inner.resources.clear();
        inner.committed_order.clear();
        inner.pending = None;
        for resource in resources {
            let id = resource.id.clone();
            if inner.resources.insert(id.clone(), resource).is_none() {
                inner.committed_order.push(id);
            }
        }
        for id in placeholders {
            if let Some(resource) = kept.remove(&id) {
                inner.resources.insert(id.clone(), resource);
                inner.committed_order.push(id);
            }
        }
        inner.renumber();
    }

    /// Insert or overwrite by id. A new descriptor drops any cached usage paths.
    pub fn upsert(&self, resource: Resource) {
        let mut inner = lock(&self.inner);
        let id = resource.id.clone();
        if inner.resources.insert(id.clone(), resource).is_none() {
            inner.push_id(id);
        }
        inner.renumber();
    }

    /// Move a transient entry's slot over to its confirmed remote resource. When the
    /// remote id is already present (an overwrite) the existing slot wins.
    pub fn promote(&self, transient_id: Uuid, resource: Resource) {
        let mut inner = lock(&self.inner);
        let from = ResourceId::Transient(transient_id);
        let to = resource.id.clone();
        if inner.resources.remove(&from).is_some() {
            inner.replace_id(&from, &to);
        } else if !inner.resources.contains_key(&to) {
            inner.push_id(to.clone());
        }
        inner.resources.insert(to, resource);
        inner.renumber();
    }

    /// Move a non-terminal entry to `status`. Terminal entries never move back.
    pub fn transition(&self, id: &ResourceId, status: ResourceStatus) -> bool {
        let mut inner = lock(&self.inner);
        match inner.resources.get_mut(id) {
            Some(resource) if !resource.status.is_terminal() => {
                resource.status = status;
                true
            }
            _ => false,
        }
    }

    /// Forget a resource. Only call this once the remote side confirmed the delete.
    pub fn remove(&self, id: &ResourceId) -> Option<Resource> {
        let mut inner = lock(&self.inner);
        let removed = inner.resources.remove(id);
        if removed.is_some() {
            inner.drop_id(id);
            inner.renumber();
        }
        removed
    }

    pub fn set_lock(&self, id: &ResourceId, locked: bool) -> bool {
        let mut inner = lock(&self.inner);
        let Some(resource) = inner.resources.get_mut(id) else {
            return false;
        };
        match (resource.status, locked) {
            (ResourceStatus::Ready, true) => resource.status = ResourceStatus::Locked,
            (ResourceStatus::Locked, false) => resource.status = ResourceStatus::Ready,
            (ResourceStatus::Ready, false) | (ResourceStatus::Locked, true) => {}
            _ => return false,
        }
        true
    }

    /// Project a new order locally. Ids not mentioned keep their relative order
    /// after the listed ones. The committed order is untouched until
    /// [`confirm_reorder`](Self::confirm_reorder).
    pub fn reorder(&self, ids: &[ResourceId], sort_key: &str) -> ReorderToken {
        let mut inner = lock(&self.inner);
        let listed: HashSet<&ResourceId> = ids.iter().collect();
        let mut order: Vec<ResourceId> = Vec::with_capacity(inner.committed_order.len());
        let mut seen = HashSet::new();
        for id in ids {
            if inner.resources.contains_key(id) && seen.insert(id.clone()) {
                order.push(id.clone());
            }
        }
        order.extend(
            inner
                .committed_order
                .iter()
                .filter(|id| !listed.contains(id))
                .cloned(),
        );

        inner.next_token += 1;
        let token = ReorderToken(inner.next_token);
        inner.pending = Some(PendingReorder {
            token,
            order,
            sort_key: sort_key.to_owned(),
        });
        inner.renumber();
        token
    }

    pub fn confirm_reorder(&self, token: ReorderToken) -> bool {
        let mut inner = lock(&self.inner);
        match inner.pending.take() {
            Some(pending) if pending.token == token => {
                inner.committed_order = pending.order;
                inner.sort_key = Some(pending.sort_key);
                inner.renumber();
                true
            }
            other => {
                inner.pending = other;
                false
            }
        }
    }

    pub fn rollback_reorder(&self, token: ReorderToken) -> bool {
        let mut inner = lock(&self.inner);
        match inner.pending.take() {
            Some(pending) if pending.token == token => {
                inner.renumber();
                true
            }
            other => {
                inner.pending = other;
                false
            }
        }
    }

    pub fn cached_usage(&self, id: &ResourceId) -> Option<Vec<UsageLocation>> {
        lock(&self.inner)
            .resources
            .get(id)
            .and_then(|r| r.usage_paths.clone())
    }

    pub fn set_usage(&self, id: &ResourceId, usage: Vec<UsageLocation>) -> bool {
        match lock(&self.inner).resources.get_mut(id) {
            Some(resource) => {
                resource.usage_paths = Some(usage);
                true
            }
            None => false,
        }
    }

    pub fn set_thumbnail(&self, id: &ResourceId, thumbnail: String) -> bool {
        match lock(&self.inner).resources.get_mut(id) {
            Some(resource) => {
                resource.thumbnail = Some(thumbnail);
                true
            }
            None => false,
        }
    }

    pub fn invalidate_usage(&self, id: &ResourceId) {
        if let Some(resource) = lock(&self.inner).resources.get_mut(id) {
            resource.usage_paths = None;
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<Resource> {
        lock(&self.inner).resources.get(id).cloned()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        lock(&self.inner).resources.contains_key(id)
    }

    /// Display names of confirmed resources of `kind`, for duplicate detection.
    /// Names a new upload of `kind` would collide with: every remote resource
    /// plus placeholders whose upload has not settled yet.
    pub fn display_names(&self, kind: ResourceKind) -> HashSet<String> {
        lock(&self.inner)
            .resources
            .values()
            .filter(|r| r.kind == kind && (r.id.as_remote().is_some() || !r.status.is_terminal()))
            .map(|r| r.display_name.clone())
            .collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = lock(&self.inner);
        let resources = inner
            .view_order()
            .iter()
            .filter_map(|id| inner.resources.get(id).cloned())
            .collect();
        RegistrySnapshot {
            resources,
            sort_key: inner
                .pending
                .as_ref()
                .map(|p| p.sort_key.clone())
                .or_else(|| inner.sort_key.clone()),
            reorder_pending: inner.pending.is_some(),
        }
    }
}
