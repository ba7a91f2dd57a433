use crate::{
    CBox, SqliteDriver, error_message_from_ptr,
    extract::{bind_value, extract_name, extract_value},
};
use async_stream::try_stream;
use keel_core::{
    BulkCopy, BulkOptions, Connection, Context, Driver, Error, Executor, IsolationLevel,
    Parameter, Query, QueryResult, Result, Row, RowLabeled, RowNames, RowsAffected, Value,
    insert_batches,
    stream::Stream,
    truncate_long,
};
use libsqlite3_sys::*;
use std::{
    ffi::{CString, c_int},
    future::Future,
    ptr,
    sync::Arc,
    time::Duration,
};
use tokio::task::spawn_blocking;

/// Default time a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of host parameters in a single statement.
const MAX_VARIABLES: usize = 32766;

/// Rows stepped per trip to the blocking pool.
const STEP_CHUNK: usize = 256;

pub struct SqliteConnection {
    pub(crate) connection: CBox<*mut sqlite3>,
    busy_timeout: Duration,
}

fn millis(duration: Duration) -> c_int {
    duration.as_millis().min(c_int::MAX as u128) as c_int
}

fn connection_error(connection: *mut sqlite3) -> Error {
    unsafe { Error::msg(error_message_from_ptr(&sqlite3_errmsg(connection)).to_string()) }
}

/// Prepare the first statement found at `offset` in `sql`, returns it with the
/// offset where the next one starts. The statement is null when only
/// whitespace or comments remain.
async fn prepare(
    connection: CBox<*mut sqlite3>,
    sql: Arc<CString>,
    offset: usize,
) -> Result<(CBox<*mut sqlite3_stmt>, usize)> {
    spawn_blocking(move || unsafe {
        let bytes = sql.as_bytes();
        let start = sql.as_ptr().add(offset);
        let mut statement = CBox::new(ptr::null_mut(), |p| {
            sqlite3_finalize(p);
        });
        let mut tail = ptr::null();
        let rc = sqlite3_prepare_v2(
            *connection,
            start,
            (bytes.len() - offset) as c_int,
            &mut *statement,
            &mut tail,
        );
        if rc != SQLITE_OK {
            let text = String::from_utf8_lossy(&bytes[offset..]);
            let error = connection_error(*connection)
                .context(format!("While preparing the query:\n{}", truncate_long!(text)));
            log::error!("{:#}", error);
            return Err(error);
        }
        let next = if tail.is_null() {
            bytes.len()
        } else {
            tail.offset_from(sql.as_ptr()) as usize
        };
        Ok((statement, next))
    })
    .await?
}

/// Step `statement` on the blocking pool, up to `STEP_CHUNK` rows per call.
/// The statement travels with the task so that it is finalized there when the
/// caller stops waiting.
async fn step(
    connection: CBox<*mut sqlite3>,
    statement: CBox<*mut sqlite3_stmt>,
    count: c_int,
) -> Result<(CBox<*mut sqlite3_stmt>, Vec<Row>, bool)> {
    spawn_blocking(move || {
        let mut rows = Vec::new();
        while rows.len() < STEP_CHUNK {
            let rc = unsafe { sqlite3_step(*statement) };
            match rc {
                SQLITE_ROW => rows.push(
                    (0..count)
                        .map(|i| extract_value(*statement, i))
                        .collect::<Result<Row>>()?,
                ),
                SQLITE_DONE => return Ok((statement, rows, true)),
                _ => {
                    let mut error = connection_error(*connection);
                    if rc & 0xff == SQLITE_BUSY {
                        error = error.context("The busy timeout expired");
                    }
                    log::error!("{:#}", error);
                    return Err(error);
                }
            }
        }
        Ok((statement, rows, false))
    })
    .await?
}

/// Bind every parameter the statement mentions, by its `@pN` name.
fn bind_parameters(statement: *mut sqlite3_stmt, parameters: &[Parameter]) -> Result<()> {
    for parameter in parameters {
        let name = CString::new(format!("@{}", parameter.name.trim_start_matches('@')))?;
        let index = unsafe { sqlite3_bind_parameter_index(statement, name.as_ptr()) };
        if index == 0 {
            continue;
        }
        if parameter.is_output() {
            log::warn!(
                "sqlite has no output parameters, `{}` is bound as an input",
                parameter.name
            );
        }
        bind_value(statement, index, &parameter.value)?;
    }
    Ok(())
}

/// Busy timeout and sqlite URI of `sqlite://<path>[?<options>]`.
fn open_options(url: &str) -> Result<(Duration, CString)> {
    let prefix = format!("{}://", <SqliteDriver as Driver>::NAME);
    let Some(rest) = url.strip_prefix(&prefix) else {
        let error = Error::msg(format!(
            "Expected sqlite connection url to start with `{}`",
            prefix
        ));
        log::error!("{:#}", error);
        return Err(error);
    };
    let (path, options) = rest.split_once('?').unwrap_or((rest, ""));
    let mut busy_timeout = DEFAULT_BUSY_TIMEOUT;
    let mut parameters = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in url::form_urlencoded::parse(options.as_bytes()) {
        if key == "busy_timeout" {
            let ms: u64 = value
                .parse()
                .with_context(|| format!("Invalid busy_timeout `{}` in `{}`", value, url))?;
            busy_timeout = Duration::from_millis(ms);
        } else {
            parameters.append_pair(&key, &value);
        }
    }
    let mut uri = format!(
        "file:{}",
        urlencoding::encode(path)
            .replace("%2F", "/")
            .replace("%3A", ":")
    );
    let parameters = parameters.finish();
    if !parameters.is_empty() {
        uri.push('?');
        uri.push_str(&parameters);
    }
    let uri = CString::new(uri)
        .with_context(|| format!("Error while decoding connection URL: `{}`", url))?;
    Ok((busy_timeout, uri))
}

fn is_insert(sql: &[u8]) -> bool {
    let sql = String::from_utf8_lossy(sql);
    sql.trim_start()
        .get(..6)
        .is_some_and(|v| v.eq_ignore_ascii_case("insert"))
}

impl Executor for SqliteConnection {
    type Driver = SqliteDriver;

    fn driver(&self) -> &Self::Driver {
        &SqliteDriver {}
    }

    fn run(&mut self, query: Query) -> impl Stream<Item = Result<QueryResult>> + Send {
        let connection = CBox::new(*self.connection, |_| {});
        let busy_timeout = millis(query.timeout.unwrap_or(self.busy_timeout));
        try_stream! {
            let Query { sql, parameters, .. } = query;
            let sql = Arc::new(CString::new(sql).map_err(|e| {
                let error = Error::new(e).context("The query contains a nul byte");
                log::error!("{:#}", error);
                error
            })?);
            unsafe {
                sqlite3_busy_timeout(*connection, busy_timeout);
            }
            let len = sql.as_bytes().len();
            let mut offset = 0;
            while offset < len {
                let handle = CBox::new(*connection, |_| {});
                let (mut statement, next) = prepare(handle, sql.clone(), offset).await?;
                if next <= offset {
                    break;
                }
                let insert = is_insert(&sql.as_bytes()[offset..next]);
                offset = next;
                if statement.is_null() {
                    continue;
                }
                bind_parameters(*statement, &parameters)?;
                let readonly = unsafe { sqlite3_stmt_readonly(*statement) != 0 };
                let before = unsafe { sqlite3_total_changes64(*connection) };
                let count = unsafe { sqlite3_column_count(*statement) };
                let labels: RowNames = (0..count)
                    .map(|i| extract_name(*statement, i))
                    .collect::<Result<_>>()?;
                loop {
                    let (returned, rows, done) = step(
                        CBox::new(*connection, |_| {}),
                        statement,
                        count,
                    )
                    .await?;
                    statement = returned;
                    for values in rows {
                        yield QueryResult::Row(RowLabeled {
                            labels: labels.clone(),
                            values,
                        });
                    }
                    if done {
                        break;
                    }
                }
                if !readonly {
                    let rows_affected = unsafe { sqlite3_total_changes64(*connection) } - before;
                    let last_affected_id = if insert && rows_affected > 0 {
                        Some(unsafe { sqlite3_last_insert_rowid(*connection) })
                    } else {
                        None
                    };
                    let affected = QueryResult::Affected(RowsAffected {
                        rows_affected: rows_affected.max(0) as u64,
                        last_affected_id,
                    });
                    yield affected;
                }
            }
        }
    }

    /// Multi row inserts inside a single transaction, batches are capped to
    /// the number of host parameters sqlite accepts.
    fn bulk_copy<S>(
        &mut self,
        mut copy: BulkCopy,
        rows: S,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> impl Future<Output = Result<u64>> + Send
    where
        S: Stream<Item = Result<Vec<Value>>> + Send,
    {
        async move {
            let columns = copy.columns.len().max(1);
            copy.batch_size = copy.batch_size.clamp(1, MAX_VARIABLES / columns);
            if copy.options != BulkOptions::default() {
                log::debug!("sqlite ignores the bulk options {:?}", copy.options);
            }
            let owned = !self.in_transaction();
            if owned {
                self.begin(IsolationLevel::Unspecified).await?;
            }
            let result = insert_batches(self, copy, rows, progress).await;
            if owned {
                match &result {
                    Ok(..) => self.commit().await?,
                    Err(..) => {
                        if let Err(e) = self.rollback().await {
                            log::error!("Could not roll back a failed bulk copy: {:#}", e);
                        }
                    }
                }
            }
            result
        }
    }
}

impl Connection for SqliteConnection {
    /// Open `sqlite://<path>[?<options>]`. The path may be `:memory:`, the
    /// options are sqlite URI parameters (`mode`, `cache`, ...) plus
    /// `busy_timeout` in milliseconds.
    fn connect(url: &str) -> impl Future<Output = Result<Self>> + Send {
        let url = url.to_string();
        async move {
            let (busy_timeout, uri) = open_options(&url)?;
            let connection = spawn_blocking(move || unsafe {
                let mut connection = CBox::new(ptr::null_mut(), |p| {
                    sqlite3_close(p);
                });
                let rc = sqlite3_open_v2(
                    uri.as_ptr(),
                    &mut *connection,
                    SQLITE_OPEN_READWRITE
                        | SQLITE_OPEN_CREATE
                        | SQLITE_OPEN_URI
                        | SQLITE_OPEN_FULLMUTEX,
                    ptr::null(),
                );
                if rc != SQLITE_OK {
                    return Err(connection_error(*connection));
                }
                Ok(connection)
            })
            .await?
            .map_err(|e| {
                let error = e.context(format!("Could not open `{}`", url));
                log::error!("{:#}", error);
                error
            })?;
            unsafe {
                sqlite3_busy_timeout(*connection, millis(busy_timeout));
            }
            log::debug!("Opened `{}`", url);
            Ok(Self {
                connection,
                busy_timeout,
            })
        }
    }

    fn in_transaction(&self) -> bool {
        unsafe { sqlite3_get_autocommit(*self.connection) == 0 }
    }
}
