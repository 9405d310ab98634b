//! Per-item bookkeeping shared by jobs and single-item rewrites: the
//! cancellation map and the live preview of in-flight streams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dataset::RecordId;
use extract::ExtractionResult;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::rewrite::{RewriteField, RewriteTarget};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RewriteKey {
    pub item_id: RecordId,
    pub message_index: Option<usize>,
}

impl RewriteKey {
    pub fn new(item_id: impl Into<RecordId>, message_index: Option<usize>) -> Self {
        Self { item_id: item_id.into(), message_index }
    }

    pub fn for_target(item_id: &str, target: Option<RewriteTarget>) -> Self {
        Self::new(item_id, target.and_then(RewriteTarget::message_index))
    }
}

struct Slot {
    ticket: u64,
    cancel: CancellationToken,
}

/// Cancellation handles for single-item rewrites. Registering a key that is
/// already running cancels the earlier request.
#[derive(Clone, Default)]
pub struct RewriteRegistry {
    inner: Arc<Mutex<(u64, HashMap<RewriteKey, Slot>)>>,
}

impl RewriteRegistry {
    pub fn register(&self, key: RewriteKey, cancel: CancellationToken) -> u64 {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.0 += 1;
        let ticket = guard.0;
        if let Some(prev) = guard.1.insert(key, Slot { ticket, cancel }) {
            prev.cancel.cancel();
        }
        ticket
    }

    /// Removes the entry if it still belongs to `ticket`.
    pub fn finish(&self, key: &RewriteKey, ticket: u64) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.1.get(key).is_some_and(|s| s.ticket == ticket) {
            guard.1.remove(key);
        }
    }

    pub fn cancel(&self, key: &RewriteKey) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.1.remove(key) {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &RewriteKey) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).1.contains_key(key)
    }
}

/// Preview slot of one in-flight unit. Job units and single-item rewrites
/// of the same record never share a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewKey {
    pub job_id: Option<Uuid>,
    pub rewrite: RewriteKey,
}

impl PreviewKey {
    pub fn single(rewrite: RewriteKey) -> Self {
        Self { job_id: None, rewrite }
    }

    pub fn job(job_id: Uuid, rewrite: RewriteKey) -> Self {
        Self { job_id: Some(job_id), rewrite }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePreview {
    pub field: RewriteField,
    pub extraction: ExtractionResult,
    pub chars: usize,
}

/// Latest partial extraction per in-flight unit.
#[derive(Clone, Default)]
pub struct LivePreviews {
    inner: Arc<Mutex<HashMap<PreviewKey, LivePreview>>>,
}

impl LivePreviews {
    pub fn publish(&self, key: &PreviewKey, preview: LivePreview) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).insert(key.clone(), preview);
    }

    pub fn get(&self, key: &PreviewKey) -> Option<LivePreview> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    pub fn clear(&self, key: &PreviewKey) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_cancels_first() {
        let reg = RewriteRegistry::default();
        let key = RewriteKey::new("a", Some(1));
        let first = CancellationToken::new();
        let t1 = reg.register(key.clone(), first.clone());
        let second = CancellationToken::new();
        let t2 = reg.register(key.clone(), second.clone());

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        // the superseded request finishing must not drop the new entry
        reg.finish(&key, t1);
        assert!(reg.is_running(&key));
        reg.finish(&key, t2);
        assert!(!reg.is_running(&key));
    }

    #[test]
    fn cancel_removes_entry() {
        let reg = RewriteRegistry::default();
        let key = RewriteKey::new("b", None);
        let token = CancellationToken::new();
        reg.register(key.clone(), token.clone());
        assert!(reg.cancel(&key));
        assert!(token.is_cancelled());
        assert!(!reg.cancel(&key));
    }

    #[test]
    fn job_and_single_previews_are_separate() {
        let previews = LivePreviews::default();
        let rewrite = RewriteKey::new("a", None);
        let single = PreviewKey::single(rewrite.clone());
        let job = PreviewKey::job(Uuid::new_v4(), rewrite.clone());
        let other_job = PreviewKey::job(Uuid::new_v4(), rewrite);

        let preview = |chars| LivePreview { field: RewriteField::Answer, extraction: ExtractionResult::default(), chars };
        previews.publish(&single, preview(1));
        previews.publish(&job, preview(2));
        previews.publish(&other_job, preview(3));

        previews.clear(&single);
        assert!(previews.get(&single).is_none());
        assert_eq!(previews.get(&job).map(|p| p.chars), Some(2));
        assert_eq!(previews.get(&other_job).map(|p| p.chars), Some(3));
    }
}
