use crate::{Driver, Executor, IsolationLevel, Result, SqlWriter, future::TryFutureExt};
use std::future::Future;

pub trait Connection: Executor + Sync + 'static {
    /// Open a connection to the given URL (`<driver name>://...`).
    fn connect(url: &str) -> impl Future<Output = Result<Self>> + Send;

    /// Whether an explicit transaction is open on this connection.
    fn in_transaction(&self) -> bool;

    fn begin(&mut self, isolation: IsolationLevel) -> impl Future<Output = Result<()>> + Send {
        let mut sql = String::new();
        self.driver()
            .sql_writer()
            .write_transaction_begin(&mut sql, isolation);
        self.execute(sql.into()).map_ok(|_| ())
    }

    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send {
        let mut sql = String::new();
        self.driver().sql_writer().write_transaction_commit(&mut sql);
        self.execute(sql.into()).map_ok(|_| ())
    }

    fn rollback(&mut self) -> impl Future<Output = Result<()>> + Send {
        let mut sql = String::new();
        self.driver().sql_writer().write_transaction_rollback(&mut sql);
        self.execute(sql.into()).map_ok(|_| ())
    }
}
