pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod embedding;
pub mod error;
pub mod fulltext;
pub mod query;
pub mod recommend;
pub mod relational;
pub mod types;

pub use dispatcher::SearchService;
pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
