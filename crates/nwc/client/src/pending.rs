//! Pending request registry.
//!
//! Maps correlation ids (request event ids) to in-flight awaiters. Entries
//! are created at dispatch and removed on completion, error fan-out, or
//! timeout; each entry completes at most once. The mutex is a plain blocking
//! lock: completion signals are oneshot sends, which never block.

use crate::error::{Failure, NwcResult};
use nwc_core::nip47::{Method, NwcError, RawResponse};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::warn;

/// Terminal signal delivered to an awaiter.
#[derive(Debug)]
pub enum Completion {
    Single(RawResponse),
    Multi(HashMap<String, RawResponse>),
    Cancelled,
}

enum Pending {
    Single {
        method: Method,
        tx: oneshot::Sender<Completion>,
    },
    Multi {
        method: Method,
        expected: HashSet<String>,
        results: HashMap<String, RawResponse>,
        tx: oneshot::Sender<Completion>,
    },
}

impl Pending {
    fn method(&self) -> Method {
        match self {
            Pending::Single { method, .. } | Pending::Multi { method, .. } => *method,
        }
    }
}

/// Outcome of feeding a response into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryOutcome {
    SingleCompleted,
    MultiCompleted,
    /// A multi entry absorbed the response but is still waiting for more keys.
    Partial,
    /// No matching entry (or the entry kind / item key did not match).
    NotFound,
}

#[derive(Default)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<String, Pending>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-response awaiter. Correlation ids are event ids, so
    /// a duplicate means a broken invariant upstream.
    pub fn register_single(
        &self,
        id: &str,
        method: Method,
    ) -> NwcResult<oneshot::Receiver<Completion>> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();
        if entries.contains_key(id) {
            return Err(Failure::unknown(format!("duplicate correlation id {id}")));
        }
        entries.insert(id.to_string(), Pending::Single { method, tx });
        Ok(rx)
    }

    /// Register a multi-response awaiter expecting one response per key.
    pub fn register_multi(
        &self,
        id: &str,
        method: Method,
        expected: HashSet<String>,
    ) -> NwcResult<oneshot::Receiver<Completion>> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();
        if entries.contains_key(id) {
            return Err(Failure::unknown(format!("duplicate correlation id {id}")));
        }
        entries.insert(
            id.to_string(),
            Pending::Multi {
                method,
                expected,
                results: HashMap::new(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Complete a single entry. Multi entries are left untouched so the
    /// caller can route the response as a multi item instead.
    pub fn complete_single(&self, id: &str, response: RawResponse) -> RegistryOutcome {
        let mut entries = self.lock();
        match entries.get(id) {
            Some(Pending::Single { .. }) => {
                if let Some(Pending::Single { tx, .. }) = entries.remove(id) {
                    let _ = tx.send(Completion::Single(response));
                }
                RegistryOutcome::SingleCompleted
            }
            _ => RegistryOutcome::NotFound,
        }
    }

    /// Absorb one multi-item response. The first arrival per key wins; keys
    /// outside the expected set are rejected so completion snapshots always
    /// match the expectation exactly.
    pub fn add_multi(&self, id: &str, key: &str, response: RawResponse) -> RegistryOutcome {
        let mut entries = self.lock();
        let Some(Pending::Multi {
            expected, results, ..
        }) = entries.get_mut(id)
        else {
            return RegistryOutcome::NotFound;
        };

        if !expected.contains(key) {
            warn!(id, key, "multi response for unexpected item key");
            return RegistryOutcome::NotFound;
        }
        if results.contains_key(key) {
            return RegistryOutcome::Partial;
        }
        results.insert(key.to_string(), response);

        if results.len() == expected.len() {
            if let Some(Pending::Multi { results, tx, .. }) = entries.remove(id) {
                let _ = tx.send(Completion::Multi(results));
            }
            RegistryOutcome::MultiCompleted
        } else {
            RegistryOutcome::Partial
        }
    }

    /// Fan an error out to the awaiter: singles get a synthetic envelope,
    /// multis get the error under every expected key.
    pub fn complete_with_error(&self, id: &str, error: NwcError) -> RegistryOutcome {
        let mut entries = self.lock();
        match entries.remove(id) {
            Some(Pending::Single { method, tx }) => {
                let _ = tx.send(Completion::Single(RawResponse::from_error(
                    method.as_str(),
                    error,
                )));
                RegistryOutcome::SingleCompleted
            }
            Some(Pending::Multi {
                method,
                expected,
                mut results,
                tx,
            }) => {
                for key in expected {
                    results
                        .entry(key)
                        .or_insert_with(|| RawResponse::from_error(method.as_str(), error.clone()));
                }
                let _ = tx.send(Completion::Multi(results));
                RegistryOutcome::MultiCompleted
            }
            None => RegistryOutcome::NotFound,
        }
    }

    /// Disambiguate a response that carries no `e` tag: a lone pending entry
    /// wins; failing that, a unique entry whose method matches the response's
    /// `result_type`; otherwise give up.
    pub fn resolve_request_id(&self, result_type: &str) -> Option<String> {
        let entries = self.lock();
        if entries.len() == 1 {
            return entries.keys().next().cloned();
        }

        let mut matching = entries
            .iter()
            .filter(|(_, pending)| pending.method().as_str() == result_type);
        let candidate = matching.next().map(|(id, _)| id.clone());
        match (candidate, matching.next()) {
            (Some(id), None) => Some(id),
            _ => None,
        }
    }

    /// Drop an entry without completing it (request timed out or was
    /// abandoned). Late responses will no longer match.
    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Signal cancellation to every awaiter and clear the table.
    pub fn cancel_all(&self) {
        let entries = std::mem::take(&mut *self.lock());
        for (_, pending) in entries {
            match pending {
                Pending::Single { tx, .. } => {
                    let _ = tx.send(Completion::Cancelled);
                }
                Pending::Multi { tx, .. } => {
                    let _ = tx.send(Completion::Cancelled);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
