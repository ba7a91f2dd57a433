mod as_value;
mod cancel;
mod column;
mod command;
mod connection;
mod database;
mod driver;
mod entity;
mod error;
mod executor;
mod expression;
mod metadata;
mod query;
mod registry;
mod tracker;
mod transaction;
mod util;
mod value;
pub mod writer;

pub use ::anyhow::Context;
pub use as_value::*;
pub use cancel::*;
pub use column::*;
pub use command::*;
pub use connection::*;
pub use database::*;
pub use driver::*;
pub use entity::*;
pub use error::*;
pub use executor::*;
pub use expression::*;
pub use metadata::*;
pub use query::*;
pub use registry::*;
pub use tracker::*;
pub use transaction::*;
pub use util::*;
pub use value::*;
pub use writer::*;
pub mod stream {
    pub use ::futures::stream::*;
}
pub use ::futures::future;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
