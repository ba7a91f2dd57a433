use crate::{SqliteConnection, SqliteSqlWriter};
use keel_core::Driver;

#[derive(Default, Debug, Clone, Copy)]
pub struct SqliteDriver {}

impl SqliteDriver {
    pub const fn new() -> Self {
        Self {}
    }
}

impl Driver for SqliteDriver {
    const NAME: &'static str = "sqlite";
    type Connection = SqliteConnection;
    type SqlWriter = SqliteSqlWriter;

    fn sql_writer(&self) -> SqliteSqlWriter {
        SqliteSqlWriter {}
    }
}
