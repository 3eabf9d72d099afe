/*!
 * In-memory keyspace
 *
 * Stored values are a tagged variant (`Str`/`List`) wrapped in an `Object`
 * that carries an optional absolute expiry in fractional seconds since the
 * epoch. Expiration is resolved lazily: any lookup that observes an expired
 * entry deletes it in place and reports the key as absent. Databases are
 * plain hash maps; under the single-threaded loop no locking is needed.
 */

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as fractional seconds since the epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A stored value. Commands pattern-match the tag and answer `WRONGTYPE`
/// on a mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(Vec<u8>),
    List(ListValue),
}

/// An ordered sequence of byte strings with head/tail access.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListValue {
    items: VecDeque<Vec<u8>>,
}

impl ListValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Prepend one element; pushing `a b c` one at a time leaves `c` at the
    /// head.
    pub fn push_head(&mut self, value: Vec<u8>) {
        self.items.push_front(value);
    }

    /// Remove and return the element at `index` (head is 0).
    pub fn pop(&mut self, index: usize) -> Option<Vec<u8>> {
        self.items.remove(index)
    }

    pub fn get(&self, index: usize) -> Option<&Vec<u8>> {
        self.items.get(index)
    }

    /// Replace the element at `index`; false when out of bounds.
    pub fn set(&mut self, index: usize, value: Vec<u8>) -> bool {
        match self.items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Insert before `index`; `index == len` appends. False when beyond the
    /// end.
    pub fn insert(&mut self, index: usize, value: Vec<u8>) -> bool {
        if index > self.items.len() {
            return false;
        }
        self.items.insert(index, value);
        true
    }

    /// Index of the first element equal to `value`.
    pub fn position(&self, value: &[u8]) -> Option<usize> {
        self.items.iter().position(|item| item == value)
    }

    /// Inclusive range with negative indices counting from the tail,
    /// clamped to the list bounds. Out-of-range requests yield an empty
    /// vector.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Vec<u8>> {
        let Some((s, e)) = self.clamp_range(start, stop) else {
            return Vec::new();
        };
        self.items.iter().skip(s).take(e - s + 1).cloned().collect()
    }

    /// Keep only the inclusive range, using the same index rules as
    /// [`ListValue::range`].
    pub fn trim(&mut self, start: i64, stop: i64) {
        match self.clamp_range(start, stop) {
            Some((s, e)) => {
                self.items.truncate(e + 1);
                self.items.drain(..s);
            }
            None => self.items.clear(),
        }
    }

    fn clamp_range(&self, start: i64, stop: i64) -> Option<(usize, usize)> {
        let n = self.items.len() as i64;
        let mut s = if start < 0 { n + start } else { start };
        let mut e = if stop < 0 { n + stop } else { stop };
        if s < 0 {
            s = 0;
        }
        if e >= n {
            e = n - 1;
        }
        if s > e || s >= n || e < 0 {
            return None;
        }
        Some((s as usize, e as usize))
    }
}

impl FromIterator<Vec<u8>> for ListValue {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        ListValue {
            items: iter.into_iter().collect(),
        }
    }
}

/// A value plus its optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub value: Value,
    pub expire_at: Option<f64>,
}

impl Object {
    pub fn string(bytes: Vec<u8>) -> Self {
        Object {
            value: Value::Str(bytes),
            expire_at: None,
        }
    }

    pub fn list(list: ListValue) -> Self {
        Object {
            value: Value::List(list),
            expire_at: None,
        }
    }

    pub fn with_expiry(mut self, expire_at: Option<f64>) -> Self {
        self.expire_at = expire_at;
        self
    }

    /// Expired once the clock strictly exceeds the deadline.
    pub fn expired(&self, now: f64) -> bool {
        matches!(self.expire_at, Some(at) if now > at)
    }
}

/// One keyspace. The server keys databases by number; database 0 always
/// exists and others are created on first use.
pub struct Database {
    keys: HashMap<Vec<u8>, Object, ahash::RandomState>,
}

impl Database {
    pub fn new() -> Self {
        Database {
            keys: HashMap::default(),
        }
    }

    /// Lookup that deletes an expired entry before reporting absence.
    pub fn get(&mut self, key: &[u8]) -> Option<&Object> {
        self.evict_if_expired(key);
        self.keys.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Object> {
        self.evict_if_expired(key);
        self.keys.get_mut(key)
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Store unconditionally, replacing any existing entry and its expiry.
    pub fn set(&mut self, key: Vec<u8>, obj: Object) {
        self.keys.insert(key, obj);
    }

    /// Remove the entry; true when something was actually removed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.keys.remove(key).is_some()
    }

    pub fn flush(&mut self) {
        self.keys.clear();
    }

    fn evict_if_expired(&mut self, key: &[u8]) {
        let expired = match self.keys.get(key) {
            Some(obj) => obj.expired(now_secs()),
            None => false,
        };
        if expired {
            self.keys.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_push_order() {
        let mut list = ListValue::new();
        for v in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
            list.push_head(v);
        }
        assert_eq!(
            list.range(0, -1),
            vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );
    }

    #[test]
    fn range_clamps_and_trims() {
        let mut list: ListValue = (0..5u8).map(|i| vec![b'0' + i]).collect();
        assert_eq!(list.range(1, 100), vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec(), b"4".to_vec()]);
        assert_eq!(list.range(-2, -1), vec![b"3".to_vec(), b"4".to_vec()]);
        assert!(list.range(4, 1).is_empty());
        list.trim(1, 2);
        assert_eq!(list.range(0, -1), vec![b"1".to_vec(), b"2".to_vec()]);
        list.trim(5, 9);
        assert!(list.is_empty());
    }

    #[test]
    fn expired_entries_vanish_on_lookup() {
        let mut db = Database::new();
        db.set(
            b"gone".to_vec(),
            Object::string(b"v".to_vec()).with_expiry(Some(now_secs() - 1.0)),
        );
        db.set(b"kept".to_vec(), Object::string(b"v".to_vec()));
        assert!(db.get(b"gone").is_none());
        // the lookup already removed the entry in place
        assert!(!db.remove(b"gone"));
        assert!(db.get(b"kept").is_some());
    }
}
