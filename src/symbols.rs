//! Deduplicated string interning.
//!
//! Module and field names flow through the engine as [`Symbol`] handles: small
//! integers that compare in O(1) and key the host-module registry. The pool
//! hashes byte strings into open chains over an entries array; entries are
//! refcounted so short-lived names (e.g. from a failed load) are reclaimed.
//! A fixed set of well-known names is interned at construction into the
//! lowest handles and pinned for the pool's lifetime.

use std::sync::Arc;
use wasmet_core::{Error, ErrorKind};

/// Well-known names pinned at fixed low handles.
///
/// The order is part of the pool's contract: `RESERVED[i]` always receives
/// handle `i + 1`.
pub(crate) const RESERVED: &[&str] = &[
    "env",
    "spectest",
    "wasi_snapshot_preview1",
    "func_gas",
    "gas",
    "_start",
    "memory",
    "abort",
];

/// Handle to an interned string. The zero handle is the null symbol.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    /// The null symbol; never resolves to a string.
    pub const NULL: Symbol = Symbol(0);

    /// Returns the raw `u32` value of the handle.
    pub fn into_u32(self) -> u32 {
        self.0
    }

    /// Whether this is the null symbol.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn from_index(index: usize) -> Symbol {
        Symbol(index as u32 + 1)
    }

    fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

#[derive(Debug)]
struct Entry {
    hash: u32,
    bytes: Arc<str>,
    refcount: u32,
    /// Next entry index + 1 in the bucket chain; 0 terminates.
    next: u32,
}

/// The interning pool. See the module docs.
#[derive(Debug)]
pub struct SymbolPool {
    /// Entry index + 1 per bucket; 0 means empty. Length is a power of two.
    buckets: Vec<u32>,
    entries: Vec<Option<Entry>>,
    free: Vec<u32>,
    live: usize,
    reserved_end: u32,
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl SymbolPool {
    const INITIAL_BUCKETS: usize = 64;

    /// Creates a pool with the reserved symbols pinned.
    pub fn new() -> SymbolPool {
        let mut pool = SymbolPool {
            buckets: vec![0; Self::INITIAL_BUCKETS],
            entries: Vec::new(),
            free: Vec::new(),
            live: 0,
            reserved_end: 0,
        };
        for name in RESERVED {
            let sym = pool
                .intern(name)
                .expect("reserved symbols fit the fresh pool");
            debug_assert_eq!(sym.index(), Some(pool.entries.len() - 1));
        }
        pool.reserved_end = RESERVED.len() as u32 + 1;
        pool
    }

    /// Number of live symbols, reserved ones included.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the handle belongs to the pinned reserved range.
    pub fn is_reserved(&self, sym: Symbol) -> bool {
        !sym.is_null() && sym.into_u32() < self.reserved_end
    }

    /// Interns `name`, returning its handle. Bumps the refcount of an
    /// existing entry unless it is reserved.
    pub fn intern(&mut self, name: &str) -> Result<Symbol, Error> {
        let hash = fnv1a(name.as_bytes());
        if let Some(sym) = self.lookup(hash, name) {
            if !self.is_reserved(sym) {
                let entry = self.entry_mut(sym);
                entry.refcount = entry.refcount.saturating_add(1);
            }
            return Ok(sym);
        }
        if self.entries.len() >= u32::MAX as usize - 1 {
            return Err(Error::new(ErrorKind::SymbolAllocFailed));
        }
        if self.live >= self.buckets.len() {
            self.rehash();
        }
        let index = match self.free.pop() {
            Some(index) => index as usize,
            None => {
                self.entries.push(None);
                self.entries.len() - 1
            }
        };
        let bucket = hash as usize & (self.buckets.len() - 1);
        self.entries[index] = Some(Entry {
            hash,
            bytes: Arc::from(name),
            refcount: 1,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = index as u32 + 1;
        self.live += 1;
        Ok(Symbol::from_index(index))
    }

    /// Looks up `name` without touching refcounts.
    ///
    /// The caller must be confident about the symbol's lifetime (reserved
    /// symbols, or names known to stay interned); the handle does not keep
    /// the entry alive.
    pub fn probe(&self, name: &str) -> Option<Symbol> {
        self.lookup(fnv1a(name.as_bytes()), name)
    }

    /// Returns the string behind a handle.
    pub fn resolve(&self, sym: Symbol) -> Option<Arc<str>> {
        let index = sym.index()?;
        self.entries
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.bytes.clone())
    }

    /// Drops one reference; frees the entry when the count reaches zero.
    /// Reserved symbols are pinned and never freed.
    pub fn release(&mut self, sym: Symbol) {
        if sym.is_null() || self.is_reserved(sym) {
            return;
        }
        let Some(index) = sym.index() else { return };
        let Some(Some(entry)) = self.entries.get_mut(index) else {
            return;
        };
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return;
        }
        let hash = entry.hash;
        self.unlink(hash, index);
        self.entries[index] = None;
        self.free.push(index as u32);
        self.live -= 1;
    }

    fn lookup(&self, hash: u32, name: &str) -> Option<Symbol> {
        let mut cursor = self.buckets[hash as usize & (self.buckets.len() - 1)];
        while cursor != 0 {
            let index = cursor as usize - 1;
            let entry = self.entries[index]
                .as_ref()
                .expect("bucket chains reference occupied entries");
            if entry.hash == hash && &*entry.bytes == name {
                return Some(Symbol::from_index(index));
            }
            cursor = entry.next;
        }
        None
    }

    fn entry_mut(&mut self, sym: Symbol) -> &mut Entry {
        let index = sym.index().expect("null symbol has no entry");
        self.entries[index]
            .as_mut()
            .expect("live symbol has an entry")
    }

    fn unlink(&mut self, hash: u32, index: usize) {
        let bucket = hash as usize & (self.buckets.len() - 1);
        let mut cursor = self.buckets[bucket];
        let mut prev: Option<usize> = None;
        while cursor != 0 {
            let cur_index = cursor as usize - 1;
            let next = self.entries[cur_index]
                .as_ref()
                .expect("bucket chains reference occupied entries")
                .next;
            if cur_index == index {
                match prev {
                    None => self.buckets[bucket] = next,
                    Some(prev_index) => {
                        self.entries[prev_index]
                            .as_mut()
                            .expect("bucket chains reference occupied entries")
                            .next = next;
                    }
                }
                return;
            }
            prev = Some(cur_index);
            cursor = next;
        }
        unreachable!("entry {} missing from its bucket chain", index);
    }

    fn rehash(&mut self) {
        let new_len = self.buckets.len() * 2;
        self.buckets = vec![0; new_len];
        for index in 0..self.entries.len() {
            if let Some(entry) = self.entries[index].as_mut() {
                let bucket = entry.hash as usize & (new_len - 1);
                entry.next = self.buckets[bucket];
                self.buckets[bucket] = index as u32 + 1;
            }
        }
    }
}

impl Default for SymbolPool {
    fn default() -> Self {
        SymbolPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut pool = SymbolPool::new();
        let a = pool.intern("hello").unwrap();
        let b = pool.intern("hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(&*pool.resolve(a).unwrap(), "hello");
    }

    #[test]
    fn reserved_symbols_have_fixed_handles() {
        let pool = SymbolPool::new();
        assert_eq!(pool.probe("env"), Some(Symbol(1)));
        assert_eq!(pool.probe("func_gas"), Some(Symbol(4)));
        assert!(pool.is_reserved(Symbol(1)));
    }

    #[test]
    fn reserved_symbols_survive_release() {
        let mut pool = SymbolPool::new();
        let env = pool.probe("env").unwrap();
        pool.release(env);
        pool.release(env);
        assert_eq!(&*pool.resolve(env).unwrap(), "env");
    }

    #[test]
    fn release_frees_and_slot_is_reused() {
        let mut pool = SymbolPool::new();
        let sym = pool.intern("transient").unwrap();
        pool.release(sym);
        assert_eq!(pool.resolve(sym), None);
        assert_eq!(pool.probe("transient"), None);
        let replacement = pool.intern("other").unwrap();
        assert_eq!(replacement, sym);
    }

    #[test]
    fn refcounting_keeps_entries_alive() {
        let mut pool = SymbolPool::new();
        let sym = pool.intern("shared").unwrap();
        pool.intern("shared").unwrap();
        pool.release(sym);
        assert_eq!(&*pool.resolve(sym).unwrap(), "shared");
        pool.release(sym);
        assert_eq!(pool.resolve(sym), None);
    }

    #[test]
    fn rehash_preserves_entries() {
        let mut pool = SymbolPool::new();
        let mut handles = Vec::new();
        for i in 0..200 {
            handles.push((i, pool.intern(&format!("name-{}", i)).unwrap()));
        }
        for (i, sym) in handles {
            assert_eq!(&*pool.resolve(sym).unwrap(), &format!("name-{}", i));
            assert_eq!(pool.probe(&format!("name-{}", i)), Some(sym));
        }
    }
}
