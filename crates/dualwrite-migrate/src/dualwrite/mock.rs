//! Recording store for router and transaction tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{
    Conn, Dialect, ExecResult, Row, SqlValue, Statement, Transaction, TxBeginner, TxOptions,
};
use crate::drivers::sqlite::SqliteDialect;
use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Begin,
    Exec,
    Query,
    Commit,
    Rollback,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Begin => "begin",
            Op::Exec => "exec",
            Op::Query => "query",
            Op::Commit => "commit",
            Op::Rollback => "rollback",
        }
    }
}

/// Store that records every call into a log shared with its sibling and
/// fails chosen operations on demand.
pub(crate) struct MockStore {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    failing: Mutex<HashSet<Op>>,
    dialect: SqliteDialect,
}

impl MockStore {
    /// A base and a target store sharing one call log.
    pub(crate) fn pair() -> (Arc<MockStore>, Arc<MockStore>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self::new("base", Arc::clone(&log))),
            Arc::new(Self::new("target", log)),
        )
    }

    fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            log,
            failing: Mutex::new(HashSet::new()),
            dialect: SqliteDialect::new(),
        }
    }

    pub(crate) fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub(crate) fn heal(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    /// Calls made on this store, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        let prefix = format!("{} ", self.name);
        self.log()
            .into_iter()
            .filter(|entry| entry.starts_with(&prefix))
            .collect()
    }

    /// Calls made on both stores, in order.
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn call(&self, cancel: &CancellationToken, op: Op, detail: &str) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        self.record(op, detail)
    }

    fn record(&self, op: Op, detail: &str) -> Result<()> {
        let entry = if detail.is_empty() {
            format!("{} {}", self.name, op.as_str())
        } else {
            format!("{} {} {}", self.name, op.as_str(), detail)
        };
        self.log.lock().unwrap().push(entry);

        if self.failing.lock().unwrap().contains(&op) {
            return Err(MigrateError::pool(
                format!("injected {} failure", op.as_str()),
                self.name,
            ));
        }
        Ok(())
    }

    fn row(&self) -> Row {
        Row::from_pairs([("side", SqlValue::Text(self.name.to_string()))])
    }
}

#[async_trait]
impl Conn for MockStore {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        _args: &[SqlValue],
    ) -> Result<ExecResult> {
        self.call(cancel, Op::Exec, sql)?;
        Ok(ExecResult::new(1))
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        _args: &[SqlValue],
    ) -> Result<Vec<Row>> {
        self.call(cancel, Op::Query, sql)?;
        Ok(vec![self.row()])
    }

    async fn prepare(&self, _cancel: &CancellationToken, _sql: &str) -> Result<Box<dyn Statement>> {
        Err(MigrateError::Unsupported("mock prepare".into()))
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }
}

#[async_trait]
impl TxBeginner for MockStore {
    async fn begin_tx(
        &self,
        cancel: &CancellationToken,
        _opts: &TxOptions,
    ) -> Result<Box<dyn Transaction>> {
        self.call(cancel, Op::Begin, "")?;
        Ok(Box::new(MockTx {
            store: MockStore {
                name: self.name,
                log: Arc::clone(&self.log),
                failing: Mutex::new(self.failing.lock().unwrap().clone()),
                dialect: SqliteDialect::new(),
            },
        }))
    }
}

/// Transaction on a [`MockStore`]; records as `"<side> tx <op> ..."`.
///
/// Failure flags are copied from the store at begin time.
pub(crate) struct MockTx {
    store: MockStore,
}

#[async_trait]
impl Conn for MockTx {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        self.store.exec(cancel, &format!("tx {}", sql), args).await
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Vec<Row>> {
        self.store.query(cancel, &format!("tx {}", sql), args).await
    }

    async fn prepare(&self, cancel: &CancellationToken, sql: &str) -> Result<Box<dyn Statement>> {
        self.store.prepare(cancel, sql).await
    }

    fn dialect(&self) -> &dyn Dialect {
        self.store.dialect()
    }
}

#[async_trait]
impl Transaction for MockTx {
    async fn commit(&self) -> Result<()> {
        self.store.record(Op::Commit, "")
    }

    async fn rollback(&self) -> Result<()> {
        self.store.record(Op::Rollback, "")
    }
}
