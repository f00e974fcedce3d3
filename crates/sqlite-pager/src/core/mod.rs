pub mod aggregate;
pub mod connection;
pub mod cursor;
pub mod limits;
pub mod pager;
pub mod port;
pub mod query;
pub mod readonly;
pub mod rewrite;
pub mod schema;
pub mod shape;
pub mod sink;
pub mod stream;
pub mod types;
