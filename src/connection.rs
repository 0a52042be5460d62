//! The host API: connections, prepared statements, and statement dispatch.
//!
//! A connection owns its storage, its transaction state, a scalar function
//! registry, and any registered virtual tables. The statement dispatcher
//! enforces the transaction state machine (`not_active` / `active` /
//! `aborted`) and the per-statement locking protocol: write statements run
//! under the per-path writer mutex plus an exclusive file lock, reads under
//! a shared file lock, and `:memory:` databases skip the file locks
//! entirely.
//!
//! Parsed statements are cached in a process-wide map keyed by the
//! normalized SQL text; entries are immutable once published, so cache hits
//! share one `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

use crate::ast::{self, Statement};
use crate::ast_to_ir;
use crate::error::{Error, Result};
use crate::eval::eval_expr;
use crate::functions::{FunctionRegistry, ScalarFn};
use crate::ir_interpreter::{run_ir, QueryCtx};
use crate::pt_to_ast;
use crate::schema::Column;
use crate::sql_value::SqlValue;
use crate::storage::{Storage, MEMORY_PATH};
use crate::temp_table::TempTable;
use crate::transaction::{Transaction, TxState};

/// A host-provided table: scans consult these before the stored catalog.
pub trait VirtualTableProvider: Send {
    fn column_names(&self) -> Vec<String>;
    fn rows(&self) -> Result<Vec<Vec<SqlValue>>>;
}

#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Share parsed statements through the process-wide query cache.
    pub query_cache: bool,
    /// Page size override; `:memory:` databases only.
    pub page_size: Option<u16>,
}

impl Default for OpenOptions {
    fn default() -> OpenOptions {
        OpenOptions { query_cache: true, page_size: None }
    }
}

lazy_static! {
    static ref QUERY_CACHE: Mutex<HashMap<String, Arc<Statement>>> = Mutex::new(HashMap::new());
}

pub struct Connection {
    inner: Mutex<ConnInner>,
    use_query_cache: bool,
}

struct ConnInner {
    storage: Storage,
    tx: Transaction,
    functions: FunctionRegistry,
    virtual_tables: HashMap<String, Box<dyn VirtualTableProvider>>,
}

pub struct PreparedStatement<'conn> {
    conn: &'conn Connection,
    stmt: Arc<Statement>,
}

impl Connection {
    pub fn open(path: &str, options: OpenOptions) -> Result<Connection> {
        if path != MEMORY_PATH && options.page_size.is_some() {
            return Err(Error::Syntax(String::from(
                "page_size can only be configured for \":memory:\" databases",
            )));
        }
        let storage = Storage::open(path, options.page_size)?;
        Ok(Connection {
            inner: Mutex::new(ConnInner {
                storage,
                tx: Transaction::new(),
                functions: FunctionRegistry::with_builtins(),
                virtual_tables: HashMap::new(),
            }),
            use_query_cache: options.query_cache,
        })
    }

    pub fn query(&self, sql: &str) -> Result<TempTable> {
        self.query_with_params(sql, &[])
    }

    pub fn query_with_params(&self, sql: &str, params: &[SqlValue]) -> Result<TempTable> {
        let stmt = self.parse_cached(sql)?;
        let mut inner = self.inner.lock().expect("connection mutex poisoned");
        inner.execute(&stmt, params)
    }

    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement<'_>> {
        Ok(PreparedStatement { conn: self, stmt: self.parse_cached(sql)? })
    }

    /// Registers a scalar function under the name in `prototype`.
    pub fn register_function(&self, prototype: &str, implementation: ScalarFn) -> Result<()> {
        let mut inner = self.inner.lock().expect("connection mutex poisoned");
        inner.functions.register(prototype, implementation)
    }

    /// Registers a virtual table. `create_sql` is a CREATE TABLE statement
    /// naming the table; the provider supplies its rows at scan time.
    pub fn register_virtual_table(
        &self,
        create_sql: &str,
        provider: Box<dyn VirtualTableProvider>,
    ) -> Result<()> {
        let stmt = pt_to_ast::parse_statement(create_sql)?;
        let create = stmt.as_create_table().ok_or_else(|| {
            Error::Syntax(String::from("register_virtual_table needs a CREATE TABLE statement"))
        })?;
        let mut inner = self.inner.lock().expect("connection mutex poisoned");
        inner.virtual_tables.insert(create.tablename.clone(), provider);
        Ok(())
    }

    fn parse_cached(&self, sql: &str) -> Result<Arc<Statement>> {
        let key = sql.trim();
        if self.use_query_cache {
            if let Some(stmt) = QUERY_CACHE.lock().expect("query cache mutex poisoned").get(key)
            {
                return Ok(Arc::clone(stmt));
            }
        }
        let stmt = Arc::new(pt_to_ast::parse_statement(key)?);
        if self.use_query_cache {
            QUERY_CACHE
                .lock()
                .expect("query cache mutex poisoned")
                .insert(String::from(key), Arc::clone(&stmt));
        }
        Ok(stmt)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // A connection abandoned mid-transaction rolls back, releasing its
        // in-flight objects and its slot in the active set.
        if let Ok(mut inner) = self.inner.lock() {
            if inner.tx.state() != TxState::NotActive {
                let _ = inner.do_rollback();
            }
        }
    }
}

impl<'conn> PreparedStatement<'conn> {
    pub fn query(&self, params: &[SqlValue]) -> Result<TempTable> {
        let mut inner = self.conn.inner.lock().expect("connection mutex poisoned");
        inner.execute(&self.stmt, params)
    }
}

fn is_write_statement(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::CreateTable(_)
            | Statement::DropTable(_)
            | Statement::Insert(_)
            | Statement::Update(_)
            | Statement::Delete(_)
    )
}

impl ConnInner {
    fn execute(&mut self, stmt: &Statement, params: &[SqlValue]) -> Result<TempTable> {
        match stmt {
            Statement::StartTransaction => self.exec_start(),
            Statement::Commit => self.exec_commit(),
            Statement::Rollback => self.exec_rollback(),
            _ => self.exec_ordinary(stmt, params),
        }
    }

    fn exec_start(&mut self) -> Result<TempTable> {
        match self.tx.state() {
            TxState::Active => Err(Error::ActiveSqlTransaction),
            TxState::Aborted => Err(Error::InFailedSqlTransaction),
            TxState::NotActive => {
                let tid = self.claim_tid_locked()?;
                self.storage.mark_active(tid);
                self.tx.begin(tid, true);
                Ok(TempTable::empty())
            }
        }
    }

    fn exec_commit(&mut self) -> Result<TempTable> {
        match self.tx.state() {
            TxState::NotActive => Err(Error::InvalidTransactionTermination),
            TxState::Aborted => Err(Error::InFailedSqlTransaction),
            TxState::Active => {
                let (tid, dirty) = self.tx.clear();
                let tid = tid.expect("active transaction has a tid");
                let shared = self.storage.write_mutex();
                let _guard = shared.write_mutex.lock().expect("writer mutex poisoned");
                self.storage.lock_exclusive()?;
                let result = (|| {
                    self.storage.refresh()?;
                    self.storage.commit_cleanup(tid, &dirty)
                })();
                let _ = self.storage.unlock();
                self.storage.mark_inactive(tid);
                self.storage.take_touched();
                result?;
                Ok(TempTable::empty())
            }
        }
    }

    fn exec_rollback(&mut self) -> Result<TempTable> {
        match self.tx.state() {
            TxState::NotActive => Err(Error::InvalidTransactionTermination),
            TxState::Active | TxState::Aborted => {
                self.do_rollback()?;
                Ok(TempTable::empty())
            }
        }
    }

    fn do_rollback(&mut self) -> Result<()> {
        let (tid, dirty) = self.tx.clear();
        let tid = match tid {
            Some(t) => t,
            None => return Ok(()),
        };
        let shared = self.storage.write_mutex();
        let _guard = shared.write_mutex.lock().expect("writer mutex poisoned");
        self.storage.lock_exclusive()?;
        let result = (|| {
            self.storage.refresh()?;
            self.storage.rollback_cleanup(tid, &dirty)
        })();
        let _ = self.storage.unlock();
        self.storage.mark_inactive(tid);
        self.storage.take_touched();
        result
    }

    fn exec_ordinary(&mut self, stmt: &Statement, params: &[SqlValue]) -> Result<TempTable> {
        match self.tx.state() {
            TxState::Aborted => Err(Error::InFailedSqlTransaction),
            TxState::Active => match self.run_statement(stmt, params) {
                Ok(tt) => Ok(tt),
                Err(e) => {
                    if !e.is_transaction_state_error() {
                        self.tx.mark_aborted();
                    }
                    Err(e)
                }
            },
            TxState::NotActive => {
                if is_write_statement(stmt) {
                    self.begin_implicit()?;
                    match self.run_statement(stmt, params) {
                        Ok(tt) => {
                            self.end_implicit_commit()?;
                            Ok(tt)
                        }
                        Err(e) => {
                            let _ = self.do_rollback();
                            Err(e)
                        }
                    }
                } else {
                    self.run_statement(stmt, params)
                }
            }
        }
    }

    fn begin_implicit(&mut self) -> Result<()> {
        let tid = self.claim_tid_locked()?;
        self.storage.mark_active(tid);
        self.tx.begin(tid, false);
        Ok(())
    }

    fn end_implicit_commit(&mut self) -> Result<()> {
        let (tid, dirty) = self.tx.clear();
        let tid = tid.expect("implicit transaction has a tid");
        let shared = self.storage.write_mutex();
        let _guard = shared.write_mutex.lock().expect("writer mutex poisoned");
        self.storage.lock_exclusive()?;
        let result = (|| {
            self.storage.refresh()?;
            self.storage.commit_cleanup(tid, &dirty)
        })();
        let _ = self.storage.unlock();
        self.storage.mark_inactive(tid);
        self.storage.take_touched();
        result
    }

    /// Claims the next transaction identifier under the writer exclusion
    /// protocol (the counter lives in the header).
    fn claim_tid_locked(&mut self) -> Result<u32> {
        let shared = self.storage.write_mutex();
        let _guard = shared.write_mutex.lock().expect("writer mutex poisoned");
        self.storage.lock_exclusive()?;
        let claimed = (|| {
            self.storage.refresh()?;
            self.storage.claim_tid()
        })();
        let _ = self.storage.unlock();
        claimed
    }

    /// The snapshot a statement reads under: the transaction's own id, or
    /// for autocommit reads the next unused id taken non-destructively.
    fn snapshot_ids(&self) -> (u32, Option<u32>) {
        match self.tx.tid() {
            Some(t) => (t, Some(t)),
            None => (self.storage.peek_tid(), None),
        }
    }

    fn with_read_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.storage.lock_shared()?;
        let result = (|| {
            self.storage.refresh()?;
            f(self)
        })();
        let _ = self.storage.unlock();
        result
    }

    fn with_write_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let shared = self.storage.write_mutex();
        let _guard = shared.write_mutex.lock().expect("writer mutex poisoned");
        self.storage.lock_exclusive()?;
        let result = (|| {
            self.storage.refresh()?;
            f(self)
        })();
        // Pages dirtied before a mid-statement failure still need rollback
        // cleanup, so the set is collected on both paths.
        let dirty = self.storage.take_touched();
        self.tx.note_dirty(dirty);
        let _ = self.storage.unlock();
        result
    }

    fn run_statement(&mut self, stmt: &Statement, params: &[SqlValue]) -> Result<TempTable> {
        match stmt {
            Statement::Select(s) => self.run_select(s, params),
            Statement::CreateTable(c) => self.run_create_table(c),
            Statement::DropTable(d) => self.run_drop_table(d),
            Statement::Insert(i) => self.run_insert(i, params),
            Statement::Update(u) => self.run_update(u, params),
            Statement::Delete(d) => self.run_delete(d, params),
            Statement::StartTransaction | Statement::Commit | Statement::Rollback => {
                unreachable!("transaction control is dispatched before run_statement")
            }
        }
    }

    fn run_select(&mut self, s: &ast::SelectStatement, params: &[SqlValue]) -> Result<TempTable> {
        self.with_read_lock(|this| {
            let (snapshot, own) = this.snapshot_ids();
            let vis = this.storage.visibility(snapshot, own);
            let block = ast_to_ir::select_to_ir(s)?;
            let mut ctx = QueryCtx {
                storage: &mut this.storage,
                vis: &vis,
                functions: &this.functions,
                virtual_tables: &this.virtual_tables,
                params,
            };
            run_ir(&mut ctx, &block)
        })
    }

    fn run_create_table(&mut self, c: &ast::CreateTableStatement) -> Result<TempTable> {
        self.with_write_lock(|this| {
            let tid = this.tx.tid().expect("write statement runs in a transaction");
            let vis = this.storage.visibility(tid, Some(tid));
            let columns: Vec<Column> = c
                .coldefs
                .iter()
                .map(|d| Column {
                    name: d.colname.clone(),
                    sql_type: d.coltype,
                    not_null: d.not_null,
                })
                .collect();
            this.storage
                .create_table(&vis, tid, &c.tablename, columns, c.primary_key.clone())?;
            Ok(TempTable::empty())
        })
    }

    fn run_drop_table(&mut self, d: &ast::DropTableStatement) -> Result<TempTable> {
        self.with_write_lock(|this| {
            let tid = this.tx.tid().expect("write statement runs in a transaction");
            let vis = this.storage.visibility(tid, Some(tid));
            this.storage.delete_table(&vis, tid, &d.tablename)?;
            Ok(TempTable::empty())
        })
    }

    fn run_insert(&mut self, ins: &ast::InsertStatement, params: &[SqlValue]) -> Result<TempTable> {
        self.with_write_lock(|this| {
            let tid = this.tx.tid().expect("write statement runs in a transaction");
            let vis = this.storage.visibility(tid, Some(tid));
            let table = this.storage.get_table(&vis, &ins.tablename)?;
            let target_cols: Vec<String> = match &ins.columns {
                Some(cols) => cols.clone(),
                None => table.column_names(),
            };
            for row_exprs in &ins.rows {
                if row_exprs.len() != target_cols.len() {
                    return Err(Error::Syntax(format!(
                        "INSERT has {} values for {} columns",
                        row_exprs.len(),
                        target_cols.len()
                    )));
                }
                let mut values = HashMap::new();
                for (name, e) in target_cols.iter().zip(row_exprs) {
                    values.insert(name.clone(), eval_expr(e, None, &this.functions, params)?);
                }
                this.storage.write_row(tid, &table, values)?;
            }
            Ok(TempTable::empty())
        })
    }

    fn run_update(&mut self, u: &ast::UpdateStatement, params: &[SqlValue]) -> Result<TempTable> {
        self.with_write_lock(|this| {
            let tid = this.tx.tid().expect("write statement runs in a transaction");
            let vis = this.storage.visibility(tid, Some(tid));
            let table = this.storage.get_table(&vis, &u.tablename)?;
            let names = table.column_names();
            for (col, e) in &u.assignments {
                if table.column(col).is_none() {
                    return Err(Error::UndefinedColumn(col.clone()));
                }
                crate::ir_interpreter::check_columns(e, &names)?;
            }
            if let Some(pred) = &u.where_clause {
                crate::ir_interpreter::check_columns(pred, &names)?;
            }
            // Materialize the scan before mutating.
            let rows = this.storage.scan_table(&vis, &table)?;
            for row in rows {
                if let Some(pred) = &u.where_clause {
                    if !eval_expr(pred, Some(&row.items), &this.functions, params)?.is_true() {
                        continue;
                    }
                }
                let mut new_items = row.items.clone();
                for (col, e) in &u.assignments {
                    new_items.insert(
                        col.clone(),
                        eval_expr(e, Some(&row.items), &this.functions, params)?,
                    );
                }
                this.storage.update_row(tid, &table, &row, new_items)?;
            }
            Ok(TempTable::empty())
        })
    }

    fn run_delete(&mut self, d: &ast::DeleteStatement, params: &[SqlValue]) -> Result<TempTable> {
        self.with_write_lock(|this| {
            let tid = this.tx.tid().expect("write statement runs in a transaction");
            let vis = this.storage.visibility(tid, Some(tid));
            let table = this.storage.get_table(&vis, &d.tablename)?;
            if let Some(pred) = &d.where_clause {
                crate::ir_interpreter::check_columns(pred, &table.column_names())?;
            }
            let rows = this.storage.scan_table(&vis, &table)?;
            for row in rows {
                if let Some(pred) = &d.where_clause {
                    if !eval_expr(pred, Some(&row.items), &this.functions, params)?.is_true() {
                        continue;
                    }
                }
                this.storage.delete_row(tid, &table, &row)?;
            }
            Ok(TempTable::empty())
        })
    }
}
