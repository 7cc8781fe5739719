//! Lazy paged prefix scans over an LMDB database.
//!
//! A scan never holds a read transaction between calls to `next`: each page
//! opens a fresh snapshot, copies out up to `page_size` items and resumes
//! after the last key it saw. The iterator is `'static` and `Send`, and
//! callers may freely read or write the same environment while iterating.

use std::collections::VecDeque;
use std::ops::Bound;

use heed::types::Bytes;
use heed::{Database, Env};
use stash_core::StashResult;

use crate::embedded::EmbeddedStoreError;

pub(crate) struct PagedScan<T> {
    env: Env,
    db: Database<Bytes, Bytes>,
    prefix: Vec<u8>,
    /// Lower bound of the next page; `None` once the prefix is exhausted.
    cursor: Option<Bound<Vec<u8>>>,
    page_size: usize,
    buffer: VecDeque<T>,
    project: fn(&[u8], &[u8]) -> T,
}

impl<T> PagedScan<T> {
    pub(crate) fn new(
        env: Env,
        db: Database<Bytes, Bytes>,
        start: Bound<Vec<u8>>,
        prefix: Vec<u8>,
        page_size: usize,
        project: fn(&[u8], &[u8]) -> T,
    ) -> Self {
        Self {
            env,
            db,
            prefix,
            cursor: Some(start),
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            project,
        }
    }

    fn fill(&mut self) -> Result<(), EmbeddedStoreError> {
        let Some(lower) = self.cursor.take() else {
            return Ok(());
        };

        let rtxn = self.env.read_txn().map_err(EmbeddedStoreError::txn)?;
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (as_slice_bound(&lower), Bound::Unbounded);
        let iter = self
            .db
            .range(&rtxn, &bounds)
            .map_err(EmbeddedStoreError::txn)?;

        let mut last_key = None;
        let mut more = false;
        for item in iter {
            let (key, value) = item.map_err(EmbeddedStoreError::txn)?;
            if !key.starts_with(&self.prefix) {
                break;
            }
            if self.buffer.len() == self.page_size {
                more = true;
                break;
            }
            self.buffer.push_back((self.project)(key, value));
            last_key = Some(key.to_vec());
        }

        if more {
            self.cursor = last_key.map(Bound::Excluded);
        }
        Ok(())
    }
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl<T> Iterator for PagedScan<T> {
    type Item = StashResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(e) = self.fill() {
                self.cursor = None;
                return Some(Err(e.into()));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Project a data-partition row to its key.
pub(crate) fn key_only(key: &[u8], _value: &[u8]) -> Vec<u8> {
    key.to_vec()
}
