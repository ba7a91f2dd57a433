use keel::{
    Connection, Driver, Error, Executor, GenericSqlWriter, Query, QueryResult, Result,
    RowsAffected,
    stream::{self, Stream},
};
use std::{
    collections::HashMap,
    sync::{LazyLock, Mutex, PoisonError},
};

static JOURNALS: LazyLock<Mutex<HashMap<String, Vec<String>>>> =
    LazyLock::new(Default::default);

fn record(url: &str, entry: &str) {
    JOURNALS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(url.to_string())
        .or_default()
        .push(entry.to_string());
}

/// Everything the connections opened on `url` did, in order.
pub fn journal(url: &str) -> Vec<String> {
    JOURNALS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(url)
        .cloned()
        .unwrap_or_default()
}

/// Driver that records statements instead of running them.
#[derive(Default, Debug, Clone, Copy)]
pub struct MockDriver;

impl Driver for MockDriver {
    const NAME: &'static str = "mock";
    type Connection = MockConnection;
    type SqlWriter = GenericSqlWriter;

    fn sql_writer(&self) -> GenericSqlWriter {
        GenericSqlWriter::new()
    }
}

#[derive(Debug)]
pub struct MockConnection {
    url: String,
    transaction: bool,
}

impl Executor for MockConnection {
    type Driver = MockDriver;

    fn driver(&self) -> &Self::Driver {
        &MockDriver
    }

    fn run(&mut self, query: Query) -> impl Stream<Item = Result<QueryResult>> + Send {
        record(&self.url, &query.sql);
        let sql = query.sql.trim_start().to_uppercase();
        if sql.contains("BEGIN TRANSACTION") {
            self.transaction = true;
        } else if sql.starts_with("COMMIT") || sql.starts_with("ROLLBACK") {
            self.transaction = false;
        }
        let affected = (!sql.starts_with("SELECT")).then(|| {
            Ok(QueryResult::Affected(RowsAffected {
                rows_affected: 1,
                last_affected_id: None,
            }))
        });
        stream::iter(affected)
    }
}

impl Connection for MockConnection {
    async fn connect(url: &str) -> Result<Self> {
        let prefix = format!("{}://", MockDriver::NAME);
        if !url.starts_with(&prefix) {
            let error = Error::msg(format!(
                "Mock connection url must start with `{}`",
                prefix
            ));
            log::error!("{:#}", error);
            return Err(error);
        }
        record(url, "CONNECT");
        Ok(Self {
            url: url.to_string(),
            transaction: false,
        })
    }

    fn in_transaction(&self) -> bool {
        self.transaction
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        record(&self.url, "CLOSE");
    }
}
