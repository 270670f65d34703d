//! Runtime driver layer for COBOL programs with embedded SQL.
//!
//! The generated code produced by `cobsql-pp` drives this library at
//! execution time: it opens connections, executes statements and
//! cursors, and moves values between COBOL host-variable encodings and
//! database-native parameter formats.
//!
//! The central abstraction is the [`DbInterface`] trait — one
//! implementation per backend — obtained through
//! [`factory::DbInterfaceFactory`]. [`pgsql::PgsqlDriver`] is the
//! reference implementation; its live paths sit behind the `postgres`
//! cargo feature while its mock mode backs the test suite.

pub mod codes;
pub mod datasource;
pub mod factory;
pub mod iface;
pub mod manager;
pub mod marshal;
pub mod pgsql;
pub mod types;

pub use codes::*;
pub use datasource::{AutoCommitMode, ConnectionOptions, DataSourceInfo};
pub use factory::DbInterfaceFactory;
pub use iface::{Cursor, DbInterface, FetchMode, ResultSetContext, RetrievedValue};
pub use manager::ConnectionManager;
pub use pgsql::PgsqlDriver;
pub use types::{field_flags, CobolVarType};
