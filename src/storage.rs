//! The storage layer: maps logical tables onto the shared B-tree key space
//! and implements the MVCC row operations the statement executors call.
//!
//! One `Storage` belongs to one connection. Connections against the same
//! file meet in a per-path `DbShared` registry entry that carries the
//! in-process writer mutex, the set of transaction identifiers currently
//! in flight (their creations are invisible to everyone else, their
//! deletions not yet binding), and the per-table row id counters.
//! Cross-process exclusion uses shared/exclusive file locks on the backing
//! file; `:memory:` databases are never shared and skip all of it.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use lazy_static::lazy_static;

use crate::btree::Btree;
use crate::dbheader::DEFAULT_PAGE_SIZE;
use crate::error::{Error, Result};
use crate::page::PageKind;
use crate::pager::{PageNum, Pager};
use crate::record::PageObject;
use crate::schema::{self, Column, Table};
use crate::sql_value::SqlValue;
use crate::typed_row::{self, Row};

/// The path that selects an in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// State shared by every connection to one database path.
pub struct DbShared {
    /// Serializes in-process write statements against the same path.
    pub write_mutex: Mutex<()>,
    /// Transaction identifiers currently active in this process.
    active_tids: Mutex<HashSet<u32>>,
    /// Per-table row id allocation.
    row_counters: Mutex<HashMap<u32, i64>>,
}

impl DbShared {
    fn new() -> DbShared {
        DbShared {
            write_mutex: Mutex::new(()),
            active_tids: Mutex::new(HashSet::new()),
            row_counters: Mutex::new(HashMap::new()),
        }
    }
}

lazy_static! {
    static ref SHARED_REGISTRY: Mutex<HashMap<PathBuf, Arc<DbShared>>> = Mutex::new(HashMap::new());
}

/// A reader's view of the object space: its snapshot identifier, its own
/// transaction (whose in-flight work it does see), and a copy of the
/// in-flight set taken when the statement began.
#[derive(Debug, Clone)]
pub struct Visibility {
    pub snapshot: u32,
    pub own_tid: Option<u32>,
    active: HashSet<u32>,
}

impl Visibility {
    pub fn new(snapshot: u32, own_tid: Option<u32>, active: HashSet<u32>) -> Visibility {
        Visibility { snapshot, own_tid, active }
    }

    fn in_flight_elsewhere(&self, tid: u32) -> bool {
        tid != 0 && self.active.contains(&tid) && Some(tid) != self.own_tid
    }

    /// The MVCC visibility rule: an object is visible iff its creator is
    /// within the snapshot and its expirer (if any) is beyond it, with
    /// other writers' in-flight creations never visible and their in-flight
    /// deletions not yet binding.
    pub fn sees(&self, obj: &PageObject) -> bool {
        if self.in_flight_elsewhere(obj.tid) {
            return false;
        }
        let xid = if self.in_flight_elsewhere(obj.xid) { 0 } else { obj.xid };
        obj.tid <= self.snapshot && (xid == 0 || xid > self.snapshot)
    }
}

pub struct Storage {
    btree: Btree,
    shared: Arc<DbShared>,
}

impl Storage {
    /// Opens a database. `page_size` applies to `:memory:` databases only;
    /// files always use the format default.
    pub fn open(path: &str, page_size: Option<u16>) -> Result<Storage> {
        if path == MEMORY_PATH {
            let pager = Pager::open_memory(page_size.unwrap_or(DEFAULT_PAGE_SIZE));
            let mut btree = Btree::new(pager);
            btree.ensure_root()?;
            btree.take_touched();
            return Ok(Storage { btree, shared: Arc::new(DbShared::new()) });
        }
        let pager = Pager::open_file(std::path::Path::new(path))?;
        let mut btree = Btree::new(pager);
        btree.ensure_root()?;
        btree.take_touched();
        let canonical = std::fs::canonicalize(path)?;
        let shared = {
            let mut registry = SHARED_REGISTRY.lock().expect("registry mutex poisoned");
            Arc::clone(registry.entry(canonical).or_insert_with(|| Arc::new(DbShared::new())))
        };
        Ok(Storage { btree, shared })
    }

    /// Re-reads header state from the backing file so this connection sees
    /// other connections' committed work. Called at statement start, under
    /// the statement's lock.
    pub fn refresh(&mut self) -> Result<()> {
        self.btree.pager_mut().refresh()?;
        Ok(())
    }

    pub fn claim_tid(&mut self) -> Result<u32> {
        Ok(self.btree.pager_mut().claim_tid()?)
    }

    pub fn peek_tid(&self) -> u32 {
        self.btree.pager().peek_tid()
    }

    pub fn mark_active(&self, tid: u32) {
        self.shared.active_tids.lock().expect("active set mutex poisoned").insert(tid);
    }

    pub fn mark_inactive(&self, tid: u32) {
        self.shared.active_tids.lock().expect("active set mutex poisoned").remove(&tid);
    }

    /// The view a statement evaluates visibility under.
    pub fn visibility(&self, snapshot: u32, own_tid: Option<u32>) -> Visibility {
        let active = self.shared.active_tids.lock().expect("active set mutex poisoned").clone();
        Visibility::new(snapshot, own_tid, active)
    }

    /// Pages written since the last call, for the dirty-page set.
    pub fn take_touched(&mut self) -> HashSet<PageNum> {
        self.btree.take_touched()
    }

    pub fn write_mutex(&self) -> Arc<DbShared> {
        Arc::clone(&self.shared)
    }

    pub fn lock_exclusive(&self) -> Result<()> {
        if let Some(f) = self.btree.pager().file() {
            f.lock_exclusive()?;
        }
        Ok(())
    }

    pub fn lock_shared(&self) -> Result<()> {
        if let Some(f) = self.btree.pager().file() {
            f.lock_shared()?;
        }
        Ok(())
    }

    pub fn unlock(&self) -> Result<()> {
        if let Some(f) = self.btree.pager().file() {
            FileExt::unlock(f)?;
        }
        Ok(())
    }

    /// All tables visible under `vis`, keyed by uppercase name.
    pub fn load_tables(&mut self, vis: &Visibility) -> Result<HashMap<String, Table>> {
        let (start, end) = schema::catalog_range();
        let mut out = HashMap::new();
        let mut it = self.btree.new_range_iterator(start, Some(end));
        while let Some(obj) = it.next_object()? {
            if !vis.sees(&obj) {
                continue;
            }
            let table = Table::decode(&obj.value, obj.tid)?;
            out.insert(table.name.clone(), table);
        }
        Ok(out)
    }

    pub fn get_table(&mut self, vis: &Visibility, name: &str) -> Result<Table> {
        let name = name.to_uppercase();
        self.load_tables(vis)?
            .remove(&name)
            .ok_or(Error::UndefinedTable(name))
    }

    /// Binds a name to a new table and persists its catalog record.
    pub fn create_table(
        &mut self,
        vis: &Visibility,
        tid: u32,
        name: &str,
        columns: Vec<Column>,
        primary_key: Option<String>,
    ) -> Result<Table> {
        let name = name.to_uppercase();
        if self.load_tables(vis)?.contains_key(&name) {
            return Err(Error::DuplicateTable(name));
        }
        if let Some(pk) = &primary_key {
            let col = columns
                .iter()
                .find(|c| &c.name == pk)
                .ok_or_else(|| Error::UndefinedColumn(pk.clone()))?;
            if !col.sql_type.is_integer() {
                return Err(Error::Syntax(format!(
                    "primary key column \"{}\" must have an integer type",
                    pk
                )));
            }
        }
        let id = self.btree.pager_mut().claim_table_id()?;
        let table = Table { id, name: name.clone(), columns, primary_key, tid };
        self.btree
            .add(PageObject::new(schema::catalog_key(&name), table.encode(), tid, 0))?;
        Ok(table)
    }

    /// Unbinds a table: expires its catalog record and every visible row
    /// version, so a rolled-back DROP restores both.
    pub fn delete_table(&mut self, vis: &Visibility, tid: u32, name: &str) -> Result<()> {
        let table = self.get_table(vis, name)?;
        let (start, end) = table.row_range();
        let mut doomed = vec![];
        let mut it = self.btree.new_range_iterator(start, Some(end));
        while let Some(obj) = it.next_object()? {
            if vis.sees(&obj) {
                doomed.push((obj.key.clone(), obj.tid));
            }
        }
        for (key, creator) in doomed {
            self.btree.expire(&key, creator, tid)?;
        }
        if !self.btree.expire(&schema::catalog_key(&table.name), table.tid, tid)? {
            return Err(Error::Internal(format!(
                "catalog record for \"{}\" vanished mid-statement",
                table.name
            )));
        }
        Ok(())
    }

    /// Inserts one row, evaluating the primary key (or allocating the next
    /// row id) and stamping the stored object with the writer's tid.
    pub fn write_row(
        &mut self,
        tid: u32,
        table: &Table,
        values: HashMap<String, SqlValue>,
    ) -> Result<i64> {
        let complete = complete_row(table, values)?;
        let row_id = match &table.primary_key {
            Some(pk) => {
                let (_, v) = complete
                    .iter()
                    .find(|(n, _)| n == pk)
                    .expect("primary key column always completed");
                v.as_i64().ok_or_else(|| {
                    Error::Syntax(format!("primary key \"{}\" must be an integer value", pk))
                })?
            }
            None => self.next_row_id(table)?,
        };
        let pairs: Vec<(&str, &SqlValue)> =
            complete.iter().map(|(n, v)| (n.as_str(), v)).collect();
        let payload = typed_row::serialize_values(&pairs);
        self.btree
            .add(PageObject::new(table.row_key(row_id), payload, tid, 0))?;
        Ok(row_id)
    }

    /// Expires the exact stored version this row was decoded from.
    pub fn delete_row(&mut self, tid: u32, table: &Table, row: &Row) -> Result<()> {
        let key = table.row_key(row.row_id);
        if !self.btree.expire(&key, row.tid, tid)? {
            return Err(Error::Internal(String::from("row version vanished mid-statement")));
        }
        Ok(())
    }

    /// Replaces a row's values. An update that moves the primary key is a
    /// delete under the old key plus an insert under the new one, and can
    /// serialization-fail like either half.
    pub fn update_row(
        &mut self,
        tid: u32,
        table: &Table,
        old_row: &Row,
        values: HashMap<String, SqlValue>,
    ) -> Result<()> {
        let complete = complete_row(table, values)?;
        if let Some(pk) = &table.primary_key {
            let (_, v) = complete
                .iter()
                .find(|(n, _)| n == pk)
                .expect("primary key column always completed");
            let new_id = v.as_i64().ok_or_else(|| {
                Error::Syntax(format!("primary key \"{}\" must be an integer value", pk))
            })?;
            if new_id != old_row.row_id {
                self.delete_row(tid, table, old_row)?;
                let items: HashMap<String, SqlValue> =
                    complete.into_iter().collect();
                self.write_row(tid, table, items)?;
                return Ok(());
            }
        }
        let key = table.row_key(old_row.row_id);
        let pairs: Vec<(&str, &SqlValue)> =
            complete.iter().map(|(n, v)| (n.as_str(), v)).collect();
        let payload = typed_row::serialize_values(&pairs);
        let old_obj = PageObject::new(key.clone(), vec![], old_row.tid, 0);
        let new_obj = PageObject::new(key, payload, tid, 0);
        self.btree.update(&old_obj, new_obj, tid)
    }

    /// Materializes every row of `table` visible under `vis`, in row id
    /// order.
    pub fn scan_table(&mut self, vis: &Visibility, table: &Table) -> Result<Vec<Row>> {
        let (start, end) = table.row_range();
        let mut out = vec![];
        let mut it = self.btree.new_range_iterator(start, Some(end));
        while let Some(obj) = it.next_object()? {
            if !vis.sees(&obj) {
                continue;
            }
            let row_id = schema::row_id_from_key(&obj.key)?;
            out.push(typed_row::row_from_object(&obj, row_id)?);
        }
        Ok(out)
    }

    /// Commit cleanup: expirations by this transaction become permanent, so
    /// the expired versions are physically removed. Going through the
    /// B-tree keeps the empty-page and head-key invariants intact.
    pub fn commit_cleanup(&mut self, tid: u32, dirty: &HashSet<PageNum>) -> Result<()> {
        let mut doomed: Vec<(Vec<u8>, u32)> = vec![];
        for pn in dirty {
            if *pn >= self.btree.pager().total_pages() {
                continue;
            }
            let page = self.btree.pager_mut().fetch_page(*pn)?;
            if page.kind != PageKind::Leaf {
                continue;
            }
            for obj in page.objects() {
                if obj.xid == tid {
                    doomed.push((obj.key.clone(), obj.tid));
                }
            }
        }
        for (key, creator) in doomed {
            self.btree.remove(&key, creator)?;
        }
        Ok(())
    }

    /// Rollback cleanup: this transaction's creations are removed and its
    /// expirations revived.
    pub fn rollback_cleanup(&mut self, tid: u32, dirty: &HashSet<PageNum>) -> Result<()> {
        let mut created: Vec<Vec<u8>> = vec![];
        let mut expired: Vec<(Vec<u8>, u32)> = vec![];
        for pn in dirty {
            if *pn >= self.btree.pager().total_pages() {
                continue;
            }
            let page = self.btree.pager_mut().fetch_page(*pn)?;
            if page.kind != PageKind::Leaf {
                continue;
            }
            for obj in page.objects() {
                if obj.tid == tid {
                    created.push(obj.key.clone());
                } else if obj.xid == tid {
                    expired.push((obj.key.clone(), obj.tid));
                }
            }
        }
        for key in created {
            self.btree.remove(&key, tid)?;
        }
        for (key, creator) in expired {
            self.btree.expire(&key, creator, 0)?;
        }
        Ok(())
    }

    fn next_row_id(&mut self, table: &Table) -> Result<i64> {
        let shared = Arc::clone(&self.shared);
        let mut counters = shared.row_counters.lock().expect("row counter mutex poisoned");
        let next = match counters.get(&table.id) {
            Some(n) => *n,
            None => self.max_row_id(table)? + 1,
        };
        counters.insert(table.id, next + 1);
        Ok(next)
    }

    fn max_row_id(&mut self, table: &Table) -> Result<i64> {
        let (start, end) = table.row_range();
        let mut max = 0;
        let mut it = self.btree.new_range_iterator(start, Some(end));
        while let Some(obj) = it.next_object()? {
            max = max.max(schema::row_id_from_key(&obj.key)?);
        }
        Ok(max)
    }
}

/// Completes a value map against the table's column list: unknown columns
/// are rejected, missing columns become NULL, everything is coerced to its
/// declared type, and NOT NULL (including the primary key) is enforced.
fn complete_row(
    table: &Table,
    mut values: HashMap<String, SqlValue>,
) -> Result<Vec<(String, SqlValue)>> {
    for name in values.keys() {
        if table.column(name).is_none() {
            return Err(Error::UndefinedColumn(name.clone()));
        }
    }
    let mut out = Vec::with_capacity(table.columns.len());
    for col in &table.columns {
        let v = match values.remove(&col.name) {
            Some(v) => v.coerce(col.sql_type)?,
            None => SqlValue::null(col.sql_type),
        };
        let is_pk = table.primary_key.as_deref() == Some(col.name.as_str());
        if (col.not_null || is_pk) && v.is_null() {
            return Err(Error::NotNullViolation(col.name.clone()));
        }
        out.push((col.name.clone(), v));
    }
    Ok(out)
}
