// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Global label registry. Labels are trimmed and hashed with the default
//! SipHash of the standard library, which is keyed with constants and
//! therefore identical across threads and invocations. Both directions of
//! the mapping are kept so reports can recover labels; colliding labels
//! are retained under the same hash with the first insertion as primary.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::Error;

struct LabelRegistry {
    forward: HashMap<String, u64>,
    reverse: HashMap<u64, Vec<String>>,
}

static REGISTRY: Lazy<RwLock<LabelRegistry>> = Lazy::new(|| {
    RwLock::new(LabelRegistry {
        forward: HashMap::new(),
        reverse: HashMap::new(),
    })
});

/// Stable 64-bit hash of a label. Surrounding whitespace never changes
/// the identity of a region.
pub fn hash_label(label: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    label.trim().as_bytes().hash(&mut hasher);
    hasher.finish()
}

/// Register `label` and return its hash, or `None` for empty labels.
/// Insertion is idempotent; collisions keep both labels and warn once.
pub(crate) fn intern(label: &str) -> Option<u64> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        log::warn!("{}", Error::Logic("empty measurement label rejected".into()));
        return None;
    }
    let hash = hash_label(trimmed);
    intern_with_hash(trimmed, hash);
    Some(hash)
}

pub(crate) fn intern_with_hash(label: &str, hash: u64) {
    {
        let registry = REGISTRY.read();
        if registry.forward.contains_key(label) {
            return;
        }
    }
    let mut registry = REGISTRY.write();
    if registry.forward.contains_key(label) {
        return;
    }
    registry.forward.insert(label.to_owned(), hash);
    let labels = registry.reverse.entry(hash).or_default();
    labels.push(label.to_owned());
    if labels.len() > 1 {
        log::warn!("{}", Error::HashCollision(hash));
    }
}

/// The first label registered under `hash`.
pub fn label_of(hash: u64) -> Option<String> {
    REGISTRY
        .read()
        .reverse
        .get(&hash)
        .and_then(|labels| labels.first().cloned())
}

pub(crate) fn is_collided(hash: u64) -> bool {
    REGISTRY
        .read()
        .reverse
        .get(&hash)
        .map_or(false, |labels| labels.len() > 1)
}

/// Label used in reports: the primary label, annotated when other labels
/// share the hash, or the raw hash when nothing was registered.
pub(crate) fn display_label(hash: u64) -> String {
    match label_of(hash) {
        Some(label) if is_collided(hash) => format!("{} (hash collision)", label),
        Some(label) => label,
        None => format!("{:#018x}", hash),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = intern("interning_is_idempotent").unwrap();
        let b = intern("interning_is_idempotent").unwrap();
        assert_eq!(a, b);
        assert_eq!(label_of(a).as_deref(), Some("interning_is_idempotent"));
    }

    #[test]
    fn whitespace_does_not_change_identity() {
        let a = intern("  padded_label \t").unwrap();
        let b = intern("padded_label").unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_label(" padded_label "), hash_label("padded_label"));
        assert_eq!(label_of(a).as_deref(), Some("padded_label"));
    }

    #[test]
    fn empty_labels_are_rejected() {
        assert_eq!(intern(""), None);
        assert_eq!(intern("   "), None);
    }

    #[test]
    fn hashes_agree_across_threads() {
        let here = hash_label("cross_thread_label");
        let there = std::thread::spawn(|| hash_label("cross_thread_label"))
            .join()
            .unwrap();
        assert_eq!(here, there);
    }

    #[test]
    fn collisions_keep_first_label_as_primary() {
        let hash = 0xfeed_beef_dead_cafe;
        intern_with_hash("first_colliding_label", hash);
        intern_with_hash("second_colliding_label", hash);
        assert!(is_collided(hash));
        assert_eq!(label_of(hash).as_deref(), Some("first_colliding_label"));
        assert!(display_label(hash).ends_with("(hash collision)"));
    }

    #[test]
    fn unknown_hash_renders_as_hex() {
        assert_eq!(display_label(0x1234), format!("{:#018x}", 0x1234u64));
    }
}
