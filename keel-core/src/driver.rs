use crate::{Connection, SqlWriter};

/// A database backend: its connection type and its SQL dialect.
pub trait Driver: Default + Clone + Send + Sync + 'static {
    /// URL scheme accepted by [`Connection::connect`], e.g. `sqlite`.
    const NAME: &'static str;

    type Connection: Connection<Driver = Self>;
    type SqlWriter: SqlWriter;

    fn sql_writer(&self) -> Self::SqlWriter;
}
