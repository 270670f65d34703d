//! The driver capability contract.

use crate::datasource::{ConnectionOptions, DataSourceInfo};
use crate::types::CobolVarType;

/// Positional fetch modes. `Prev` and `Current` are available only with
/// emulated cursors on backends without scrollable native cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Next,
    Prev,
    Current,
}

/// Which result set a value is read from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSetContext {
    /// The most recent statement-level result set.
    CurrentResultSet,
    /// The result set of a named prepared statement.
    PreparedStatement(String),
    /// The result set of a named cursor; the cursor's own row position
    /// overrides the caller's row index once fetching has started.
    Cursor(String),
}

/// Outcome of a successful [`DbInterface::get_resultset_value`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievedValue {
    /// Bytes written into the caller's buffer.
    pub length: usize,
    pub is_null: bool,
}

/// A cursor record handed to the driver at declare time.
///
/// Parameter arrays are parallel; values are copied into driver-owned
/// storage before any backend call.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    pub name: String,
    /// Literal query text. An `@name` value refers to an already
    /// prepared statement; empty means the text arrives via
    /// `query_source` at open time.
    pub query: String,
    /// Raw host-variable bytes holding the query when `query` is empty.
    pub query_source: Option<Vec<u8>>,
    pub with_hold: bool,
    pub param_types: Vec<CobolVarType>,
    pub param_values: Vec<Vec<u8>>,
    pub param_lengths: Vec<u64>,
    pub param_flags: Vec<u32>,
}

impl Cursor {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_hold(mut self) -> Self {
        self.with_hold = true;
        self
    }

    pub fn with_param(
        mut self,
        var_type: CobolVarType,
        value: Vec<u8>,
        length: u64,
        flags: u32,
    ) -> Self {
        self.param_types.push(var_type);
        self.param_values.push(value);
        self.param_lengths.push(length);
        self.param_flags.push(flags);
        self
    }
}

/// Native capabilities a backend may report.
pub mod native_features {
    /// The backend reports affected-row counts on its result sets.
    pub const RESULTSET_ROW_COUNT: u64 = 0x01;
}

/// Capability set consumed by generated code at execution time.
///
/// Operations return 0 on success, 100 for "no data", or a negative
/// `DBERR_*` code; the last `(code, message, sqlstate)` triple stays
/// readable until the next call. A driver instance serves one
/// connection and must not be shared across threads.
pub trait DbInterface {
    /// Reset internal state; called once by the factory after
    /// construction.
    fn init(&mut self) -> i32;

    fn connect(&mut self, info: &DataSourceInfo, opts: &ConnectionOptions) -> i32;

    /// Tear down and forget the connection, keeping the instance usable
    /// for a later `connect`.
    fn reset(&mut self) -> i32;

    /// Finalise the connection and free every tracked result set.
    fn terminate_connection(&mut self) -> i32;

    fn exec(&mut self, query: &str) -> i32;

    /// Execute with parameters. The four arrays are parallel; a length
    /// equal to [`crate::codes::DB_NULL`] binds SQL NULL; flag bit
    /// BINARY selects binary parameter format.
    fn exec_params(
        &mut self,
        query: &str,
        types: &[CobolVarType],
        values: &[Vec<u8>],
        lengths: &[u64],
        flags: &[u32],
    ) -> i32;

    /// Prepare `query` under `stmt_name` (normalised to lower case). A
    /// name still present in the statement table fails.
    fn prepare(&mut self, stmt_name: &str, query: &str) -> i32;

    fn exec_prepared(
        &mut self,
        stmt_name: &str,
        types: &[CobolVarType],
        values: &[Vec<u8>],
        lengths: &[u64],
        flags: &[u32],
    ) -> i32;

    /// Record a cursor without executing anything.
    fn cursor_declare(&mut self, cursor: Cursor) -> i32;

    /// Execute the cursor's query (or `DECLARE ... CURSOR` natively).
    fn cursor_open(&mut self, name: &str) -> i32;

    fn cursor_fetch_one(&mut self, name: &str, mode: FetchMode) -> i32;

    fn cursor_close(&mut self, name: &str) -> i32;

    /// Copy one column value into `bfr`. Fails (returning `None`,
    /// without writing past the buffer) on truncation or an invalid
    /// context.
    fn get_resultset_value(
        &mut self,
        ctx: &ResultSetContext,
        row: usize,
        col: usize,
        bfr: &mut [u8],
    ) -> Option<RetrievedValue>;

    /// True iff the named (or current) result set has at least one row;
    /// otherwise the state is set to `02000` / code 100.
    fn move_to_first_record(&mut self, stmt_name: &str) -> bool;

    fn get_num_rows(&self, ctx: &ResultSetContext) -> i64;

    fn get_num_fields(&self, ctx: &ResultSetContext) -> i64;

    /// Bitfield of [`native_features`] values.
    fn get_native_features(&self) -> u64;

    fn get_error_message(&self) -> String;

    fn get_error_code(&self) -> i32;

    /// SQLSTATE of the last operation; `00000` on success.
    fn get_state(&self) -> String;
}
