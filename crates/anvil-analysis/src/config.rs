// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Configurations: interned, digest-keyed option sets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::options::{BuildOptions, Digest};

/// Identity of a configuration: the canonical digest of its options.
///
/// Interning guarantees `ConfigurationKey(o1) == ConfigurationKey(o2) ⇔
/// o1 == o2`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigurationKey(Digest);

impl ConfigurationKey {
    /// Wraps a raw digest.
    #[must_use]
    pub const fn from_digest(digest: Digest) -> Self {
        Self(digest)
    }

    /// The underlying digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &Digest {
        &self.0
    }

    /// Short hex form for logs.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[0..6])
    }
}

impl core::fmt::Debug for ConfigurationKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ConfigurationKey({})", self.short())
    }
}

/// A configuration: options plus memoized digest and an event id for
/// reporting streams.
#[derive(Debug)]
pub struct Configuration {
    options: BuildOptions,
    key: ConfigurationKey,
    event_id: u64,
}

impl Configuration {
    /// The options.
    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// The memoized key.
    #[must_use]
    pub fn key(&self) -> ConfigurationKey {
        self.key
    }

    /// Reporting-stream id assigned at interning time.
    #[must_use]
    pub fn event_id(&self) -> u64 {
        self.event_id
    }
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Configuration {}

/// Interning table for configurations, striped like the other intern tables
/// but also indexed by key so graph functions can recover options from a
/// [`ConfigurationKey`].
#[derive(Debug, Default)]
pub struct ConfigCache {
    by_key: RwLock<FxHashMap<ConfigurationKey, Arc<Configuration>>>,
    next_event_id: AtomicU64,
}

impl ConfigCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `options`, returning the canonical configuration.
    ///
    /// Equal options always return the same key and the same handle.
    pub fn intern(&self, options: BuildOptions) -> Arc<Configuration> {
        let key = ConfigurationKey::from_digest(options.digest());
        if let Some(existing) = self.by_key.read().get(&key) {
            return Arc::clone(existing);
        }
        let mut table = self.by_key.write();
        if let Some(existing) = table.get(&key) {
            return Arc::clone(existing);
        }
        let config = Arc::new(Configuration {
            options,
            key,
            event_id: self.next_event_id.fetch_add(1, Ordering::Relaxed),
        });
        table.insert(key, Arc::clone(&config));
        config
    }

    /// Looks up an interned configuration by key.
    #[must_use]
    pub fn get(&self, key: &ConfigurationKey) -> Option<Arc<Configuration>> {
        self.by_key.read().get(key).map(Arc::clone)
    }

    /// Number of interned configurations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.read().len()
    }

    /// True when nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.read().is_empty()
    }
}
