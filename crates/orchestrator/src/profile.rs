//! Learner profile storage and the deep-merge update semantics.
//!
//! Profiles are schemaless JSON owned by client-local storage. Updates deep
//! merge: nested objects recurse, list fields union (existing order kept,
//! new members appended), scalars overwrite.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;

use tinge_domain::error::Result;

/// Client-local profile storage (an external collaborator in production).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Value>>;
    async fn put(&self, user_id: &str, profile: &Value) -> Result<()>;
}

/// In-memory store, used in tests and as the default collaborator.
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, user_id: &str) -> Result<Option<Value>> {
        Ok(self.profiles.read().get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, profile: &Value) -> Result<()> {
        self.profiles
            .write()
            .insert(user_id.to_string(), profile.clone());
        Ok(())
    }
}

/// Fresh profile for a first-time learner.
pub fn default_profile(user_id: &str) -> Value {
    json!({
        "user_id": user_id,
        "session_count": 0,
        "last_session": null,
        "l1": {
            "mistake_patterns": [],
            "mastery_status": {
                "learned": [],
                "struggling": [],
                "forgotten": []
            }
        },
        "learning_style": {
            "preferred_modalities": [],
            "pacing_notes": []
        },
        "personal_context": {
            "interests": [],
            "goals": []
        },
        "communication_patterns": {
            "register_preferences": [],
            "notes": []
        },
        "practical_usage": {
            "scenarios": []
        },
        "meta_learning": {
            "strategies": []
        }
    })
}

/// Stamp session bookkeeping onto a profile: bump `session_count`, set
/// `last_session` to now.
pub fn touch_session(profile: &mut Value) {
    let count = profile
        .get("session_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    profile["session_count"] = json!(count + 1);
    profile["last_session"] = json!(Utc::now().to_rfc3339());
}

/// Deep merge `updates` into `base`.
///
/// Objects recurse. Arrays union: members of `updates` not already present
/// (by equality) are appended, existing order preserved. Everything else
/// overwrites.
pub fn deep_merge(base: &mut Value, updates: &Value) {
    match (base, updates) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (key, update_value) in update_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, update_value),
                    None => {
                        base_map.insert(key.clone(), update_value.clone());
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(update_items)) => {
            for item in update_items {
                if !base_items.contains(item) {
                    base_items.push(item.clone());
                }
            }
        }
        (base_slot, update_value) => {
            *base_slot = update_value.clone();
        }
    }
}
