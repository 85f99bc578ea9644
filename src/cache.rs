//! Short-lived response caches.
//!
//! Both caches expire entries lazily on access against a caller-supplied `now`, so nothing runs
//! in the background and tests can move time explicitly.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

#[derive(Clone, Debug)]
struct Entry<V> {
	value: V,
	stored_at: OffsetDateTime,
}
impl<V> Entry<V> {
	fn is_live_at(&self, now: OffsetDateTime, ttl: Duration) -> bool {
		now - self.stored_at < ttl
	}
}

/// Holds at most one keyed value; storing a new key replaces the previous one.
#[derive(Debug)]
pub struct SingleSlotCache<V> {
	slot: Mutex<Option<(String, Entry<V>)>>,
	ttl: Duration,
}
impl<V> SingleSlotCache<V>
where
	V: Clone,
{
	/// Creates an empty slot with the given lifetime.
	pub fn new(ttl: Duration) -> Self {
		Self { slot: Mutex::new(None), ttl }
	}

	/// Returns the value when the key matches and the entry is still live.
	pub fn get(&self, key: &str, now: OffsetDateTime) -> Option<V> {
		let mut slot = self.slot.lock();
		let (same_key, live) = match slot.as_ref() {
			Some((stored_key, entry)) => (stored_key == key, entry.is_live_at(now, self.ttl)),
			None => return None,
		};

		if !live {
			*slot = None;

			return None;
		}
		if !same_key {
			return None;
		}

		slot.as_ref().map(|(_, entry)| entry.value.clone())
	}

	/// Replaces the slot contents.
	pub fn insert(&self, key: impl Into<String>, value: V, now: OffsetDateTime) {
		*self.slot.lock() = Some((key.into(), Entry { value, stored_at: now }));
	}

	/// Empties the slot.
	pub fn clear(&self) {
		*self.slot.lock() = None;
	}
}

#[derive(Debug)]
struct BoundedInner<K, V> {
	entries: HashMap<K, Entry<V>>,
	order: VecDeque<K>,
}

/// TTL map with a size bound; the oldest inserted entry is evicted first.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
	inner: Mutex<BoundedInner<K, V>>,
	ttl: Duration,
	max_entries: usize,
}
impl<K, V> BoundedCache<K, V>
where
	K: Clone + Eq + std::hash::Hash,
	V: Clone,
{
	/// Creates an empty cache; a zero bound is raised to one.
	pub fn new(ttl: Duration, max_entries: usize) -> Self {
		Self {
			inner: Mutex::new(BoundedInner { entries: HashMap::new(), order: VecDeque::new() }),
			ttl,
			max_entries: max_entries.max(1),
		}
	}

	/// Returns a live value, dropping it when it has expired.
	pub fn get(&self, key: &K, now: OffsetDateTime) -> Option<V> {
		let mut inner = self.inner.lock();
		let live = inner.entries.get(key).map(|entry| entry.is_live_at(now, self.ttl))?;

		if live {
			return inner.entries.get(key).map(|entry| entry.value.clone());
		}

		inner.entries.remove(key);
		inner.order.retain(|k| k != key);

		None
	}

	/// Stores `value`, refreshing its insertion position and evicting the oldest entries past
	/// the bound.
	pub fn insert(&self, key: K, value: V, now: OffsetDateTime) {
		let mut inner = self.inner.lock();

		if inner.entries.insert(key.clone(), Entry { value, stored_at: now }).is_some() {
			inner.order.retain(|k| k != &key);
		}

		inner.order.push_back(key);

		while inner.entries.len() > self.max_entries {
			let Some(oldest) = inner.order.pop_front() else {
				break;
			};

			inner.entries.remove(&oldest);
		}
	}

	/// Number of stored entries, expired ones included until they are touched.
	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Stable SHA-256 fingerprint (unpadded base64) of already-canonicalized key parts.
pub fn fingerprint<I, S>(parts: I) -> String
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut hasher = Sha256::new();

	for part in parts {
		hasher.update(part.as_ref().as_bytes());
		hasher.update([0x1f]);
	}

	STANDARD_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const T0: OffsetDateTime = macros::datetime!(2025-06-01 12:00 UTC);

	#[test]
	fn single_slot_replaces_and_expires() {
		let cache = SingleSlotCache::new(Duration::seconds(60));

		cache.insert("a", 1, T0);

		assert_eq!(cache.get("a", T0 + Duration::seconds(59)), Some(1));
		assert_eq!(cache.get("b", T0), None);

		cache.insert("b", 2, T0);

		assert_eq!(cache.get("a", T0), None);
		assert_eq!(cache.get("b", T0 + Duration::seconds(60)), None);
		assert_eq!(cache.get("b", T0), None);
	}

	#[test]
	fn bounded_cache_evicts_in_insertion_order() {
		let cache = BoundedCache::new(Duration::minutes(10), 2);

		cache.insert("a", 1, T0);
		cache.insert("b", 2, T0);
		cache.insert("c", 3, T0);

		assert_eq!(cache.len(), 2);
		assert_eq!(cache.get(&"a", T0), None);
		assert_eq!(cache.get(&"b", T0), Some(2));

		cache.insert("b", 20, T0);
		cache.insert("d", 4, T0);

		assert_eq!(cache.get(&"c", T0), None);
		assert_eq!(cache.get(&"b", T0), Some(20));
		assert_eq!(cache.get(&"d", T0), Some(4));
	}

	#[test]
	fn bounded_cache_expires_lazily() {
		let cache = BoundedCache::new(Duration::minutes(10), 10);

		cache.insert("a", 1, T0);

		assert_eq!(cache.get(&"a", T0 + Duration::minutes(9)), Some(1));
		assert_eq!(cache.get(&"a", T0 + Duration::minutes(10)), None);
		assert!(cache.is_empty());
	}

	#[test]
	fn fingerprint_is_stable_and_separator_aware() {
		assert_eq!(fingerprint(["a", "b"]), fingerprint(vec!["a".to_owned(), "b".to_owned()]));
		assert_ne!(fingerprint(["ab", ""]), fingerprint(["a", "b"]));
		assert_eq!(fingerprint(["x"]).len(), 43);
	}
}
