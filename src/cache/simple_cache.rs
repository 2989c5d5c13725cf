use std::collections::VecDeque;

use serde::Serialize;

use super::simple_hash;
use crate::Result;

/// Secondary component of a cache lock.
///
/// An omitted pass is stored as [`Pass::Open`], so entries added without a
/// pass match lookups made without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pass<P> {
    #[default]
    Open,
    Key(P),
}

impl<P> From<Option<P>> for Pass<P> {
    fn from(pass: Option<P>) -> Self {
        match pass {
            Some(p) => Pass::Key(p),
            None => Pass::Open,
        }
    }
}

/// Hashed key plus pass; entries are matched on both
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock<P> {
    pub key_hash: String,
    pub pass: Pass<P>,
}

impl<P> Lock<P> {
    pub fn new(
        key_hash: impl Into<String>,
        pass: impl Into<Pass<P>>,
    ) -> Self {
        Self {
            key_hash: key_hash.into(),
            pass: pass.into(),
        }
    }
}

#[derive(Debug)]
struct Entry<A, P> {
    asset: A,
    lock: Lock<P>,
}

/// Map-like store keyed by simple keys.
///
/// Keys are canonicalized with [`simple_hash`], so two keys that differ only
/// in property order address the same entry. Entries are kept
/// most-recently-added first and looked up by linear scan; the table is
/// expected to stay small.
#[derive(Debug)]
pub struct SimpleCache<A, P = ()> {
    archive: VecDeque<Entry<A, P>>,
}

impl<A, P> Default for SimpleCache<A, P> {
    fn default() -> Self {
        Self {
            archive: VecDeque::new(),
        }
    }
}

impl<A, P> SimpleCache<A, P>
where
    P: PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    fn position(
        &self,
        key_hash: &str,
        pass: &Pass<P>,
    ) -> Option<usize> {
        self.archive
            .iter()
            .position(|entry| entry.lock.key_hash == key_hash && &entry.lock.pass == pass)
    }

    /// Get asset by already hashed key and pass
    pub fn lookup(
        &self,
        key_hash: &str,
        pass: impl Into<Pass<P>>,
    ) -> Option<&A> {
        let pass = pass.into();
        self.position(key_hash, &pass).map(|index| &self.archive[index].asset)
    }

    /// Get asset by raw key and pass.
    ///
    /// # Errors
    /// Fails when `key` is not a simple value.
    pub fn lookup_by_key<K>(
        &self,
        key: &K,
        pass: impl Into<Pass<P>>,
    ) -> Result<Option<&A>>
    where
        K: Serialize + ?Sized,
    {
        let key_hash = simple_hash(key)?;
        Ok(self.lookup(&key_hash, pass))
    }

    /// Removes the entry matching `lock` and returns its asset
    pub fn remove(
        &mut self,
        lock: &Lock<P>,
    ) -> Option<A> {
        let index = self.position(&lock.key_hash, &lock.pass)?;
        self.archive.remove(index).map(|entry| entry.asset)
    }

    /// Upsert: replaces the asset in place when `lock` exists, otherwise adds
    /// a new entry at the front
    pub fn replace(
        &mut self,
        asset: A,
        lock: Lock<P>,
    ) {
        match self.position(&lock.key_hash, &lock.pass) {
            Some(index) => self.archive[index] = Entry { asset, lock },
            None => self.archive.push_front(Entry { asset, lock }),
        }
    }

    /// Adds an entry at the front without looking for an existing lock.
    ///
    /// The newest entry shadows any older one with the same lock; callers are
    /// responsible for not piling up duplicates.
    pub fn blind_add(
        &mut self,
        asset: A,
        lock: Lock<P>,
    ) {
        self.archive.push_front(Entry { asset, lock });
    }

    /// [`blind_add`](Self::blind_add) for a raw key.
    ///
    /// # Errors
    /// Fails when `key` is not a simple value.
    pub fn blind_add_by_key<K>(
        &mut self,
        asset: A,
        key: &K,
        pass: impl Into<Pass<P>>,
    ) -> Result<()>
    where
        K: Serialize + ?Sized,
    {
        let lock = Lock::new(simple_hash(key)?, pass);
        self.blind_add(asset, lock);
        Ok(())
    }
}
