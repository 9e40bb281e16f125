//! The open-bucket hash table behind dicts, scopes,
//! globals and the keyword set.
//!
//! Layout: a power-of-two `buckets` array of item indices,
//! and an append-mostly `items` array holding the owned
//! keys, payloads and chain links. Insertion appends and
//! links at the bucket head, so iteration over `items`
//! visits keys in insertion order. Removal swaps the hole
//! with the last item and patches that item's chain.

/// FNV-1a over a byte string, continuing from a previous
/// hash value. The fold property `fnv(a ++ b) ==
/// fnv_fold(fnv(a), b)` is what makes hot string appends
/// cheap.
pub fn fnv_fold(mut hash: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub fn fnv(bytes: &[u8]) -> u32 {
    fnv_fold(2166136261, bytes)
}

const EMPTY: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Item<V> {
    key: Box<[u8]>,
    value: V,
    next: u32,
    hash: u32,
}

#[derive(Debug, Clone)]
pub struct Table<V> {
    items: Vec<Item<V>>,
    buckets: Vec<u32>,
}

impl<V> Table<V> {
    /// Creates a table with `2^rank` initial buckets.
    pub fn new(rank: u8) -> Table<V> {
        Table {
            items: Vec::new(),
            buckets: vec![EMPTY; 1usize << rank],
        }
    }

    pub fn len(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn bucket_of(&self, hash: u32) -> usize {
        (hash & (self.buckets.len() as u32 - 1)) as usize
    }

    fn find(&self, key: &[u8], hash: u32) -> Option<u32> {
        let mut i = self.buckets[self.bucket_of(hash)];
        while i != EMPTY {
            let item = &self.items[i as usize];
            if &*item.key == key {
                return Some(i);
            }
            i = item.next;
        }
        None
    }

    pub fn get(&self, key: &[u8], hash: u32) -> Option<&V> {
        self.find(key, hash).map(|i| &self.items[i as usize].value)
    }

    pub fn get_mut(&mut self, key: &[u8], hash: u32) -> Option<&mut V> {
        self.find(key, hash)
            .map(move |i| &mut self.items[i as usize].value)
    }

    /// Returns the slot for `key`, inserting
    /// `default()` first if the key is absent.
    pub fn slot(&mut self, key: &[u8], hash: u32, default: impl FnOnce() -> V) -> &mut V {
        match self.find(key, hash) {
            Some(i) => &mut self.items[i as usize].value,
            None => self.insert_new_unchecked(key, hash, default()),
        }
    }

    /// Appends an entry without probing for an existing
    /// key. The caller guarantees the key is fresh.
    pub fn insert_new_unchecked(&mut self, key: &[u8], hash: u32, value: V) -> &mut V {
        if self.items.len() as u64 >= EMPTY as u64 {
            panic!("too many elements in a hash table (would overflow u32)");
        }
        let idx = self.items.len() as u32;
        let bucket = self.bucket_of(hash);
        self.items.push(Item {
            key: key.into(),
            value,
            next: self.buckets[bucket],
            hash,
        });
        self.buckets[bucket] = idx;

        if self.items.len() as u64 * 4 > self.buckets.len() as u64 * 3 {
            self.grow_buckets();
        }
        &mut self.items[idx as usize].value
    }

    fn grow_buckets(&mut self) {
        let nbuckets = self.buckets.len() * 2;
        self.buckets.clear();
        self.buckets.resize(nbuckets, EMPTY);
        let mask = nbuckets as u32 - 1;
        for (i, item) in self.items.iter_mut().enumerate() {
            let bucket = (item.hash & mask) as usize;
            item.next = self.buckets[bucket];
            self.buckets[bucket] = i as u32;
        }
    }

    /// Unlinks an item index from its bucket chain.
    fn unlink(&mut self, idx: u32) {
        let bucket = self.bucket_of(self.items[idx as usize].hash);
        let mut cur = self.buckets[bucket];
        if cur == idx {
            self.buckets[bucket] = self.items[idx as usize].next;
            return;
        }
        loop {
            let next = self.items[cur as usize].next;
            if next == idx {
                self.items[cur as usize].next = self.items[idx as usize].next;
                return;
            }
            cur = next;
        }
    }

    /// Relinks whichever chain entry points at `from` to
    /// point at `to` instead.
    fn relink(&mut self, from: u32, to: u32) {
        let bucket = self.bucket_of(self.items[from as usize].hash);
        if self.buckets[bucket] == from {
            self.buckets[bucket] = to;
            return;
        }
        let mut cur = self.buckets[bucket];
        loop {
            let next = self.items[cur as usize].next;
            if next == from {
                self.items[cur as usize].next = to;
                return;
            }
            cur = next;
        }
    }

    /// O(1) removal: the removed slot is refilled by the
    /// last item, whose chain link is patched.
    pub fn remove(&mut self, key: &[u8], hash: u32) -> Option<V> {
        let idx = self.find(key, hash)?;
        self.unlink(idx);

        let last = self.items.len() as u32 - 1;
        if idx != last {
            self.relink(last, idx);
            let item = self.items.swap_remove(idx as usize);
            Some(item.value)
        } else {
            self.items.pop().map(|item| item.value)
        }
    }

    /// Stable insertion-order iteration.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        self.items.iter().map(|item| (&*item.key, &item.value))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.items.iter().map(|item| &item.value)
    }

    /// The key stored at item index `idx`. Valid for tables
    /// that never remove (scopes, globals).
    pub fn key_at(&self, idx: u32) -> &[u8] {
        &self.items[idx as usize].key
    }

    /// First item index in bucket-ID order, starting the
    /// scan at `start_bucket`.
    pub fn indexed_first(&self, start_bucket: u32) -> Option<u32> {
        for b in start_bucket as usize..self.buckets.len() {
            if self.buckets[b] != EMPTY {
                return Some(self.buckets[b]);
            }
        }
        None
    }

    /// The item index after `key` in bucket-ID order (not
    /// insertion order). `None` once the scan is exhausted
    /// or when the key is absent.
    pub fn indexed_next(&self, key: &[u8], hash: u32) -> Option<u32> {
        let bucket = self.bucket_of(hash);
        let mut i = self.buckets[bucket];
        while i != EMPTY {
            let item = &self.items[i as usize];
            if &*item.key == key {
                if item.next != EMPTY {
                    return Some(item.next);
                }
                return self.indexed_first(bucket as u32 + 1);
            }
            i = item.next;
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn put(t: &mut Table<u32>, key: &str, value: u32) {
        *t.slot(key.as_bytes(), fnv(key.as_bytes()), || value) = value;
    }

    fn get(t: &Table<u32>, key: &str) -> Option<u32> {
        t.get(key.as_bytes(), fnv(key.as_bytes())).copied()
    }

    #[test]
    fn fnv_fold_property() {
        let a = b"hello, ";
        let b = b"world";
        let whole = b"hello, world";
        assert_eq!(fnv(whole), fnv_fold(fnv(a), b));
    }

    #[test]
    fn insert_get_remove() {
        let mut t: Table<u32> = Table::new(0);
        for i in 0..100u32 {
            put(&mut t, &format!("key{}", i), i);
        }
        assert_eq!(t.len(), 100);
        for i in 0..100u32 {
            assert_eq!(get(&t, &format!("key{}", i)), Some(i));
        }
        assert_eq!(get(&t, "missing"), None);

        let k = "key42";
        assert_eq!(t.remove(k.as_bytes(), fnv(k.as_bytes())), Some(42));
        assert_eq!(t.remove(k.as_bytes(), fnv(k.as_bytes())), None);
        assert_eq!(t.len(), 99);
        for i in (0..100u32).filter(|&i| i != 42) {
            assert_eq!(get(&t, &format!("key{}", i)), Some(i));
        }
    }

    #[test]
    fn iteration_is_insertion_order() {
        let mut t: Table<u32> = Table::new(0);
        let keys = ["zebra", "apple", "mango", "fig", "kiwi"];
        for (i, k) in keys.iter().enumerate() {
            put(&mut t, k, i as u32);
        }
        let seen: Vec<&[u8]> = t.iter().map(|(k, _)| k).collect();
        let expect: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
        assert_eq!(seen, expect);
    }

    #[test]
    fn removal_refills_from_last() {
        let mut t: Table<u32> = Table::new(0);
        for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
            put(&mut t, k, i as u32);
        }
        t.remove(b"b", fnv(b"b"));
        let seen: Vec<&[u8]> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(seen, vec![b"a" as &[u8], b"d", b"c"]);
        assert_eq!(get(&t, "d"), Some(3));
        assert_eq!(get(&t, "c"), Some(2));
    }

    #[test]
    fn indexed_walk_visits_every_key() {
        let mut t: Table<u32> = Table::new(0);
        for i in 0..37u32 {
            put(&mut t, &format!("item{}", i), i);
        }

        let mut seen = std::collections::HashSet::new();
        let mut cur = t.indexed_first(0);
        while let Some(idx) = cur {
            let key = t.key_at(idx).to_vec();
            assert!(seen.insert(key.clone()), "key visited twice");
            cur = t.indexed_next(&key, fnv(&key));
        }
        assert_eq!(seen.len(), 37);
    }

    #[test]
    fn key_at_matches_interning_order() {
        let mut t: Table<u32> = Table::new(0);
        for (i, k) in ["x", "y", "z"].iter().enumerate() {
            let idx = t.len();
            t.slot(k.as_bytes(), fnv(k.as_bytes()), || idx);
            assert_eq!(i as u32, idx);
        }
        assert_eq!(t.key_at(1), b"y");
    }
}
