//! Lazy forward iteration over a half-open key range of the tree.
//!
//! There are no sibling pointers in the page layout, so the scan re-descends
//! from the root whenever a leaf is exhausted, using the last emitted key
//! with a zero byte appended, the smallest possible strictly-greater key.
//! This makes the iterator tolerant of structural changes between leaves;
//! within one statement the caller materializes the range before mutating.
//!
//! Objects are emitted whole: the caller inspects `tid`/`xid` to decide
//! visibility under its own snapshot.

use std::collections::VecDeque;

use super::Btree;
use crate::error::Result;
use crate::record::PageObject;

pub struct RangeScan<'a> {
    btree: &'a mut Btree,
    cursor: Vec<u8>,
    end: Option<Vec<u8>>,
    buf: VecDeque<PageObject>,
    done: bool,
}

impl<'a> RangeScan<'a> {
    pub(crate) fn new(btree: &'a mut Btree, start: Vec<u8>, end: Option<Vec<u8>>) -> RangeScan<'a> {
        RangeScan { btree, cursor: start, end, buf: VecDeque::new(), done: false }
    }

    /// The next object in key order within `[start, end)`, or `None` once
    /// the range is exhausted.
    pub fn next_object(&mut self) -> Result<Option<PageObject>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if let Some(obj) = self.buf.pop_front() {
                if let Some(end) = &self.end {
                    if obj.key.as_slice() >= end.as_slice() {
                        self.done = true;
                        return Ok(None);
                    }
                }
                return Ok(Some(obj));
            }
            let batch = self.btree.leaf_objects_from(&self.cursor)?;
            match batch.last() {
                None => {
                    self.done = true;
                    return Ok(None);
                }
                Some(last) => {
                    let mut next = last.key.clone();
                    next.push(0);
                    self.cursor = next;
                    self.buf = batch.into();
                }
            }
        }
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Result<PageObject>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_object().transpose()
    }
}
