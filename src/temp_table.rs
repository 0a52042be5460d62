//! Provides the in-memory table that query results are collected into.
//!
//! Internal operators avoid copies where they can, but a finished query's
//! rows are materialized here so the caller holds plain values with no
//! reference lifetimes back into the storage layer, and any locks can be
//! released as soon as the statement ends. The assumption is an interactive
//! caller wanting a bounded number of rows.

use streaming_iterator::StreamingIterator;

use crate::sql_value::SqlValue;

#[derive(Debug, Clone, PartialEq)]
pub struct TempTable {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl TempTable {
    pub fn empty() -> TempTable {
        TempTable { column_names: vec![], rows: vec![] }
    }

    pub fn streaming_iterator(&self) -> TempTableStreamingIterator<'_> {
        TempTableStreamingIterator::new(self.rows.iter())
    }
}

/// Iterates over the rows of a TempTable; bound by the table's lifetime.
pub struct TempTableStreamingIterator<'a> {
    it: std::slice::Iter<'a, Vec<SqlValue>>,
    item: Option<Vec<SqlValue>>,
}

impl<'a> TempTableStreamingIterator<'a> {
    fn new(it: std::slice::Iter<'a, Vec<SqlValue>>) -> TempTableStreamingIterator<'a> {
        TempTableStreamingIterator { it, item: None }
    }
}

impl<'a> StreamingIterator for TempTableStreamingIterator<'a> {
    type Item = Vec<SqlValue>;

    #[inline]
    fn advance(&mut self) {
        self.item = self.it.next().cloned();
    }

    #[inline]
    fn get(&self) -> Option<&Vec<SqlValue>> {
        self.item.as_ref()
    }
}

#[test]
fn test_temp_table_iteration() {
    let tbl = TempTable {
        column_names: vec![String::from("B")],
        rows: vec![vec![SqlValue::int(1)], vec![SqlValue::int(2)]],
    };
    let mut it = tbl.streaming_iterator();
    it.advance();
    assert_eq!(it.get(), Some(&vec![SqlValue::int(1)]));
    it.advance();
    assert_eq!(it.get(), Some(&vec![SqlValue::int(2)]));
    it.advance();
    assert_eq!(it.get(), None);
}
