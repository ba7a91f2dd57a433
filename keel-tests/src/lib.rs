mod accounts;
mod ambient;
mod books;
mod bulk;
mod mock;
mod orders;

pub use mock::*;

use crate::{
    accounts::accounts, ambient::ambient, books::books, bulk::bulk, orders::orders,
};
use keel::{Database, Driver};
use log::LevelFilter;
use std::env;

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

/// Run every scenario against `db`. The database must persist data across
/// connections (a file, not `:memory:`), each scenario owns its tables.
pub async fn execute_tests<D: Driver>(db: &Database<D>) {
    books(db).await;
    orders(db).await;
    accounts(db).await;
    bulk(db).await;
    ambient(db).await;
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        $($code)+
        log::set_max_level(level);
    }};
}
