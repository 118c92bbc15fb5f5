//! Reactive, deduplicated device registry.
//!
//! Every write builds a fresh map and publishes it as a new [`Snapshot`]
//! through a `tokio::sync::watch` channel. Published snapshots are never
//! mutated, so readers always see a complete set.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::device::DeviceDescriptor;

/// Values that can be stored in a [`Registry`].
pub trait Keyed {
    /// Unique key of this value.
    fn key(&self) -> &str;
}

impl Keyed for DeviceDescriptor {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Immutable view of the registry at one point in time.
#[derive(Debug)]
pub struct Snapshot<T> {
    version: u64,
    entries: Arc<BTreeMap<String, T>>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            version: 0,
            entries: Arc::new(BTreeMap::new()),
        }
    }
}

impl<T> Snapshot<T> {
    /// Monotonic version, bumped on every published change.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    /// Iterates entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }
}

impl<T: Clone> Snapshot<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.values().cloned().collect()
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The id was not present before.
    Inserted,
    /// An entry with the same id was replaced.
    Updated,
    /// An identical entry was already present; nothing was published.
    Unchanged,
}

/// Deduplicated set keyed by [`Keyed::key`], observable through watch receivers.
pub struct Registry<T> {
    tx: watch::Sender<Snapshot<T>>,
}

impl<T> Default for Registry<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self { tx }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.tx.borrow().clone()
    }

    /// Returns a receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.tx.subscribe()
    }

    /// Inserts `item`, replacing any entry with the same key.
    pub fn upsert(&self, item: T) -> Upsert {
        self.write_upsert(item, None).unwrap_or(Upsert::Unchanged)
    }

    /// Like [`upsert`](Self::upsert) but discards the write if `guard` is
    /// cancelled at publish time. Returns `None` when discarded.
    pub fn upsert_unless_cancelled(&self, item: T, guard: &CancellationToken) -> Option<Upsert> {
        self.write_upsert(item, Some(guard))
    }

    fn write_upsert(&self, item: T, guard: Option<&CancellationToken>) -> Option<Upsert> {
        let mut outcome = None;

        self.tx.send_if_modified(|snapshot| {
            if guard.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }

            let result = match snapshot.entries.get(item.key()) {
                Some(existing) if *existing == item => Upsert::Unchanged,
                Some(_) => Upsert::Updated,
                None => Upsert::Inserted,
            };
            outcome = Some(result);

            if result == Upsert::Unchanged {
                return false;
            }

            let mut next = (*snapshot.entries).clone();
            next.insert(item.key().to_string(), item.clone());
            publish(snapshot, next);
            true
        });

        outcome
    }

    /// Removes every entry matching `predicate`. Publishes only if something
    /// was removed; returns the removed entries.
    pub fn remove_where(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();

        self.tx.send_if_modified(|snapshot| {
            let (gone, kept): (BTreeMap<_, _>, BTreeMap<_, _>) = snapshot
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .partition(|(_, v)| predicate(v));

            if gone.is_empty() {
                return false;
            }

            removed = gone.into_values().collect();
            publish(snapshot, kept);
            true
        });

        removed
    }

    /// Publishes the empty set. Always publishes, even if already empty;
    /// returns the entries that were present.
    pub fn clear(&self) -> Vec<T> {
        let mut cleared = Vec::new();
        self.tx.send_modify(|snapshot| {
            cleared = snapshot.entries.values().cloned().collect();
            publish(snapshot, BTreeMap::new());
        });
        cleared
    }
}

fn publish<T>(snapshot: &mut Snapshot<T>, entries: BTreeMap<String, T>) {
    snapshot.version += 1;
    snapshot.entries = Arc::new(entries);
}
