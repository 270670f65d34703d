//! PostgreSQL reference driver.
//!
//! The driver keeps the statement/cursor state machines backend-neutral
//! and routes actual wire traffic through one of two modes: live
//! (`postgres` cargo feature) or mock, where results are scripted by the
//! caller and every SQL statement is appended to a log. The test suite
//! runs entirely against mock mode.

use std::collections::{HashMap, VecDeque};

use tracing::{error, trace};

use crate::codes::*;
use crate::datasource::{AutoCommitMode, ConnectionOptions, DataSourceInfo};
use crate::iface::{
    native_features, Cursor, DbInterface, FetchMode, ResultSetContext, RetrievedValue,
};
use crate::marshal::{self, ParamValue};
use crate::types::CobolVarType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverMode {
    Mock,
    Live,
}

/// One materialised result set. Cells hold backend text (or raw bytes
/// for binary columns); `None` is SQL NULL.
#[derive(Debug, Clone, Default)]
pub struct ResultSetData {
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    pub affected: u64,
    /// -1 before the first fetch.
    pub current_row_index: i64,
}

/// A scripted result for mock mode.
#[derive(Debug, Clone, Default)]
pub struct MockResult {
    pub rows: Vec<Vec<Option<String>>>,
    pub affected: u64,
}

impl MockResult {
    pub fn rows(rows: Vec<Vec<Option<String>>>) -> Self {
        Self { rows, affected: 0 }
    }

    pub fn affected(n: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected: n,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    scripted: VecDeque<MockResult>,
    statement_log: Vec<String>,
    last_params: Vec<ParamValue>,
}

struct PreparedEntry {
    sql: String,
    rs: Option<ResultSetData>,
    #[cfg(feature = "postgres")]
    stmt: Option<postgres::Statement>,
}

struct CursorEntry {
    cursor: Cursor,
    rs: Option<ResultSetData>,
}

/// The driver. One instance per connection; not thread-safe.
pub struct PgsqlDriver {
    mode: DriverMode,
    connected: bool,
    opts: ConnectionOptions,
    decode_binary: bool,
    use_native_cursors: bool,
    current: Option<ResultSetData>,
    prepared: HashMap<String, PreparedEntry>,
    cursors: HashMap<String, CursorEntry>,
    last_rc: i32,
    last_error: String,
    last_state: String,
    mock: MockState,
    #[cfg(feature = "postgres")]
    client: Option<postgres::Client>,
}

impl Default for PgsqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PgsqlDriver {
    /// A mock-mode driver: no backend, scripted results.
    pub fn new() -> Self {
        Self {
            mode: DriverMode::Mock,
            connected: false,
            opts: ConnectionOptions::default(),
            decode_binary: true,
            use_native_cursors: false,
            current: None,
            prepared: HashMap::new(),
            cursors: HashMap::new(),
            last_rc: 0,
            last_error: String::new(),
            last_state: SQLSTATE_OK.to_string(),
            mock: MockState::default(),
            #[cfg(feature = "postgres")]
            client: None,
        }
    }

    /// A live driver speaking to a real server.
    #[cfg(feature = "postgres")]
    pub fn new_live() -> Self {
        Self {
            mode: DriverMode::Live,
            ..Self::new()
        }
    }

    /// Queue a scripted result for the next mock statement.
    pub fn push_mock_result(&mut self, result: MockResult) {
        self.mock.scripted.push_back(result);
    }

    /// SQL statements seen by the mock backend, in execution order.
    pub fn statement_log(&self) -> &[String] {
        &self.mock.statement_log
    }

    /// Parameter values bound by the most recent statement.
    pub fn last_bound_params(&self) -> &[ParamValue] {
        &self.mock.last_params
    }

    fn clear_error(&mut self) {
        self.last_rc = DBERR_NO_ERROR;
        self.last_error.clear();
        self.last_state = SQLSTATE_OK.to_string();
    }

    fn set_error(&mut self, rc: i32, state: &str, message: impl Into<String>) {
        self.last_rc = rc;
        self.last_state = state.to_string();
        self.last_error = message.into();
    }

    /// Marshal the caller's parallel parameter arrays. Shape mismatch is
    /// a caller error.
    fn build_params(
        &mut self,
        types: &[CobolVarType],
        values: &[Vec<u8>],
        lengths: &[u64],
        flags: &[u32],
    ) -> Result<Vec<ParamValue>, i32> {
        if types.len() != values.len()
            || types.len() != lengths.len()
            || types.len() != flags.len()
        {
            error!("parameter count mismatch");
            self.set_error(
                DBERR_INTERNAL_ERR,
                SQLSTATE_GENERAL,
                "Internal error: parameter count mismatch",
            );
            return Err(DBERR_INTERNAL_ERR);
        }

        let mut params = Vec::with_capacity(types.len());
        for i in 0..types.len() {
            if lengths[i] == DB_NULL {
                params.push(ParamValue::Null);
                continue;
            }
            let data = &values[i][..(lengths[i] as usize).min(values[i].len())];
            match marshal::to_param(types[i], data, 0, flags[i]) {
                Ok(p) => params.push(p),
                Err(e) => {
                    self.set_error(
                        DBERR_INTERNAL_ERR,
                        SQLSTATE_GENERAL,
                        format!("parameter {i}: {e}"),
                    );
                    return Err(DBERR_INTERNAL_ERR);
                }
            }
        }
        Ok(params)
    }

    /// Run one statement against the active mode.
    ///
    /// `consume_scripted` is false for statements the driver issues on
    /// its own (transaction restarts, SET, native cursor plumbing), so
    /// scripted results stay aligned with caller statements.
    fn run_query(
        &mut self,
        query: &str,
        params: &[ParamValue],
        consume_scripted: bool,
    ) -> Result<ResultSetData, (i32, String, String)> {
        if !self.connected {
            return Err((
                DBERR_SQL_ERROR,
                SQLSTATE_GENERAL.to_string(),
                "not connected".to_string(),
            ));
        }
        trace!(sql = query, "executing");
        match self.mode {
            DriverMode::Mock => {
                self.mock.statement_log.push(query.to_string());
                self.mock.last_params = params.to_vec();
                let scripted = if consume_scripted {
                    self.mock.scripted.pop_front()
                } else {
                    None
                };
                let scripted = scripted.unwrap_or_default();
                Ok(ResultSetData {
                    rows: scripted
                        .rows
                        .into_iter()
                        .map(|r| {
                            r.into_iter()
                                .map(|c| c.map(|s| s.into_bytes()))
                                .collect()
                        })
                        .collect(),
                    affected: scripted.affected,
                    current_row_index: -1,
                })
            }
            DriverMode::Live => self.live_query(query, params),
        }
    }

    #[cfg(not(feature = "postgres"))]
    fn live_query(
        &mut self,
        _query: &str,
        _params: &[ParamValue],
    ) -> Result<ResultSetData, (i32, String, String)> {
        Err((
            DBERR_SQL_ERROR,
            SQLSTATE_GENERAL.to_string(),
            "postgres support not built into this binary".to_string(),
        ))
    }

    #[cfg(feature = "postgres")]
    fn live_query(
        &mut self,
        query: &str,
        params: &[ParamValue],
    ) -> Result<ResultSetData, (i32, String, String)> {
        use postgres::types::ToSql;

        let decode_binary = self.decode_binary;
        let client = self.client.as_mut().ok_or_else(|| {
            (
                DBERR_SQL_ERROR,
                SQLSTATE_GENERAL.to_string(),
                "not connected".to_string(),
            )
        })?;

        let boxed = boxed_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        if is_query_statement(query) {
            match client.query(query, &refs) {
                Ok(rows) => Ok(rows_to_resultset(&rows, decode_binary)),
                Err(e) => Err(pg_error_triple(&e)),
            }
        } else {
            match client.execute(query, &refs) {
                Ok(n) => Ok(ResultSetData {
                    rows: Vec::new(),
                    affected: n,
                    current_row_index: -1,
                }),
                Err(e) => Err(pg_error_triple(&e)),
            }
        }
    }

    fn stash(&mut self, (rc, state, msg): (i32, String, String)) {
        error!(code = rc, state = %state, "{msg}");
        self.set_error(rc, &state, msg);
    }

    /// Shared statement executor: runs `query`, traps COMMIT/ROLLBACK
    /// for autocommit-off sessions, applies the zero-row DML rule, and
    /// parks the result set on the connection or the named cursor.
    fn do_exec(&mut self, cursor: Option<&str>, query: &str, params: &[ParamValue]) -> i32 {
        if query.trim().is_empty() {
            self.set_error(DBERR_EMPTY_QUERY, SQLSTATE_GENERAL, "Empty query");
            return DBERR_EMPTY_QUERY;
        }

        let rs = match self.run_query(query, params, true) {
            Ok(rs) => rs,
            Err(e) => {
                self.stash(e);
                return DBERR_SQL_ERROR;
            }
        };

        if self.opts.autocommit == AutoCommitMode::Off && is_tx_termination(query) {
            // the terminated transaction's results are gone either way
            self.current = None;
            return match self.run_query("START TRANSACTION", &[], false) {
                Ok(_) => {
                    self.clear_error();
                    DBERR_NO_ERROR
                }
                Err(e) => {
                    self.stash(e);
                    DBERR_SQL_ERROR
                }
            };
        }

        if is_dml_statement(query) && rs.rows.is_empty() && rs.affected == 0 {
            self.set_error(DBERR_NO_DATA, SQLSTATE_NO_DATA, "No data");
            return DBERR_NO_DATA;
        }

        match cursor {
            Some(name) => {
                if let Some(entry) = self.cursors.get_mut(name) {
                    entry.rs = Some(rs);
                }
            }
            None => self.current = Some(rs),
        }
        DBERR_NO_ERROR
    }

    /// SQL text of an already-prepared statement, for `@name` cursor
    /// sources. The local statement table answers first; a live session
    /// falls back to the server catalogue.
    fn prepared_statement_source(&mut self, name: &str) -> Option<String> {
        let key = name.to_lowercase();
        if let Some(entry) = self.prepared.get(&key) {
            return Some(entry.sql.clone());
        }
        #[cfg(feature = "postgres")]
        if self.mode == DriverMode::Live {
            let rs = self
                .run_query(
                    "select statement from pg_prepared_statements where lower(name) = lower($1)",
                    &[ParamValue::Text(name.to_string())],
                    false,
                )
                .ok()?;
            if rs.rows.len() == 1 {
                if let Some(Some(cell)) = rs.rows[0].first().map(|c| c.clone()) {
                    return Some(String::from_utf8_lossy(&cell).into_owned());
                }
            }
        }
        None
    }

    fn resultset_for(&self, ctx: &ResultSetContext) -> Option<&ResultSetData> {
        match ctx {
            ResultSetContext::CurrentResultSet => self.current.as_ref(),
            ResultSetContext::PreparedStatement(name) => self
                .prepared
                .get(&name.to_lowercase())
                .and_then(|e| e.rs.as_ref()),
            ResultSetContext::Cursor(name) => {
                self.cursors.get(name).and_then(|e| e.rs.as_ref())
            }
        }
    }
}

impl DbInterface for PgsqlDriver {
    fn init(&mut self) -> i32 {
        self.connected = false;
        self.current = None;
        self.prepared.clear();
        self.cursors.clear();
        self.clear_error();
        trace!("pgsql driver initialised");
        DBERR_NO_ERROR
    }

    fn connect(&mut self, info: &DataSourceInfo, opts: &ConnectionOptions) -> i32 {
        self.clear_error();
        self.current = None;
        self.opts = opts.clone();

        if let Some(b) = info.option_flag("decode_binary") {
            self.decode_binary = b;
        }
        if let Some(b) = info.option_flag("native_cursors") {
            self.use_native_cursors = b;
        }

        #[cfg(feature = "postgres")]
        if self.mode == DriverMode::Live {
            match postgres::Client::connect(&info.conninfo(), postgres::NoTls) {
                Ok(client) => self.client = Some(client),
                Err(e) => {
                    error!("connection failed: {e}");
                    self.set_error(
                        DBERR_CONNECTION_FAILED,
                        SQLSTATE_GENERAL,
                        e.to_string(),
                    );
                    return DBERR_CONNECTION_FAILED;
                }
            }
        }
        #[cfg(not(feature = "postgres"))]
        if self.mode == DriverMode::Live {
            self.set_error(
                DBERR_CONNECTION_FAILED,
                SQLSTATE_GENERAL,
                "postgres support not built into this binary",
            );
            return DBERR_CONNECTION_FAILED;
        }

        self.connected = true;

        if !opts.client_encoding.is_empty() {
            let q = format!("SET client_encoding TO '{}'", opts.client_encoding);
            if let Err(e) = self.run_query(&q, &[], false) {
                self.stash(e);
                self.terminate_connection();
                self.last_rc = DBERR_CONNECTION_FAILED;
                return DBERR_CONNECTION_FAILED;
            }
        }

        if let Some(schema) = info.options.get("default_schema") {
            if !schema.is_empty() {
                let q = format!("SET search_path TO {schema}");
                if let Err(e) = self.run_query(&q, &[], false) {
                    self.stash(e);
                    self.terminate_connection();
                    self.last_rc = DBERR_CONNECTION_FAILED;
                    return DBERR_CONNECTION_FAILED;
                }
            }
        }

        // the backend always autocommits; an autocommit-off session
        // simply lives inside driver-managed transactions
        if opts.autocommit == AutoCommitMode::Off {
            if let Err(e) = self.run_query("BEGIN TRANSACTION", &[], false) {
                self.stash(e);
                self.terminate_connection();
                self.last_rc = DBERR_CONNECTION_FAILED;
                return DBERR_CONNECTION_FAILED;
            }
        }

        trace!(db = %info.dbname, "connected");
        DBERR_NO_ERROR
    }

    fn reset(&mut self) -> i32 {
        match self.terminate_connection() {
            DBERR_NO_ERROR => DBERR_NO_ERROR,
            _ => DBERR_CONN_RESET_FAILED,
        }
    }

    fn terminate_connection(&mut self) -> i32 {
        #[cfg(feature = "postgres")]
        {
            self.client = None;
        }
        self.connected = false;
        self.current = None;
        self.prepared.clear();
        self.cursors.clear();
        DBERR_NO_ERROR
    }

    fn exec(&mut self, query: &str) -> i32 {
        self.clear_error();
        self.do_exec(None, query, &[])
    }

    fn exec_params(
        &mut self,
        query: &str,
        types: &[CobolVarType],
        values: &[Vec<u8>],
        lengths: &[u64],
        flags: &[u32],
    ) -> i32 {
        self.clear_error();
        let params = match self.build_params(types, values, lengths, flags) {
            Ok(p) => p,
            Err(rc) => return rc,
        };
        self.do_exec(None, query, &params)
    }

    fn prepare(&mut self, stmt_name: &str, query: &str) -> i32 {
        self.clear_error();
        let name = stmt_name.to_lowercase();
        trace!(name = %name, sql = query, "prepare");

        if self.prepared.contains_key(&name) {
            self.set_error(
                DBERR_PREPARE_FAILED,
                SQLSTATE_GENERAL,
                format!("statement '{name}' is already prepared"),
            );
            return DBERR_PREPARE_FAILED;
        }

        let prepared_sql = if self.opts.fixup_parameters {
            fixup_parameters(query)
        } else {
            query.to_string()
        };

        #[cfg(feature = "postgres")]
        let stmt = if self.mode == DriverMode::Live {
            let Some(client) = self.client.as_mut() else {
                self.set_error(DBERR_PREPARE_FAILED, SQLSTATE_GENERAL, "not connected");
                return DBERR_PREPARE_FAILED;
            };
            match client.prepare(&prepared_sql) {
                Ok(s) => Some(s),
                Err(e) => {
                    self.stash(pg_error_triple(&e));
                    self.last_rc = DBERR_PREPARE_FAILED;
                    return DBERR_PREPARE_FAILED;
                }
            }
        } else {
            None
        };

        if self.mode == DriverMode::Mock {
            if !self.connected {
                self.set_error(DBERR_PREPARE_FAILED, SQLSTATE_GENERAL, "not connected");
                return DBERR_PREPARE_FAILED;
            }
            self.mock
                .statement_log
                .push(format!("PREPARE {name} AS {prepared_sql}"));
        }

        self.prepared.insert(
            name,
            PreparedEntry {
                sql: prepared_sql,
                rs: None,
                #[cfg(feature = "postgres")]
                stmt,
            },
        );
        DBERR_NO_ERROR
    }

    fn exec_prepared(
        &mut self,
        stmt_name: &str,
        types: &[CobolVarType],
        values: &[Vec<u8>],
        lengths: &[u64],
        flags: &[u32],
    ) -> i32 {
        self.clear_error();
        let name = stmt_name.to_lowercase();

        if !self.prepared.contains_key(&name) {
            error!("invalid prepared statement name: {name}");
            self.set_error(
                DBERR_SQL_ERROR,
                SQLSTATE_GENERAL,
                format!("invalid prepared statement name: {name}"),
            );
            return DBERR_SQL_ERROR;
        }

        let params = match self.build_params(types, values, lengths, flags) {
            Ok(p) => p,
            Err(rc) => return rc,
        };

        let result = match self.mode {
            DriverMode::Mock => self.run_query(&format!("EXECUTE {name}"), &params, true),
            DriverMode::Live => self.live_exec_prepared(&name, &params),
        };
        let rs = match result {
            Ok(rs) => rs,
            Err(e) => {
                self.stash(e);
                return DBERR_SQL_ERROR;
            }
        };

        if let Some(entry) = self.prepared.get_mut(&name) {
            entry.rs = Some(rs);
        }
        DBERR_NO_ERROR
    }

    fn cursor_declare(&mut self, cursor: Cursor) -> i32 {
        self.clear_error();
        if cursor.name.is_empty() {
            self.set_error(
                DBERR_DECLARE_CURSOR_FAILED,
                SQLSTATE_GENERAL,
                "cursor has no name",
            );
            return DBERR_DECLARE_CURSOR_FAILED;
        }
        self.cursors
            .entry(cursor.name.clone())
            .or_insert(CursorEntry { cursor, rs: None });
        DBERR_NO_ERROR
    }

    fn cursor_open(&mut self, name: &str) -> i32 {
        self.clear_error();

        let Some(entry) = self.cursors.get(name) else {
            self.set_error(
                DBERR_OPEN_CURSOR_FAILED,
                SQLSTATE_GENERAL,
                format!("cursor '{name}' is not declared"),
            );
            return DBERR_OPEN_CURSOR_FAILED;
        };

        let mut query = entry.cursor.query.clone();
        if query.is_empty() {
            if let Some(src) = &entry.cursor.query_source {
                query = String::from_utf8_lossy(src).trim().to_string();
            }
        }
        let with_hold = entry.cursor.with_hold;
        let types = entry.cursor.param_types.clone();
        let values = entry.cursor.param_values.clone();
        let lengths = entry.cursor.param_lengths.clone();
        let flags = entry.cursor.param_flags.clone();

        if query.starts_with('@') {
            let stmt_name = query[1..].to_string();
            match self.prepared_statement_source(&stmt_name) {
                Some(src) => query = src,
                None => {
                    error!("cannot resolve prepared statement '{stmt_name}'");
                    self.set_error(
                        DBERR_OPEN_CURSOR_FAILED,
                        SQLSTATE_UNDEFINED,
                        format!("'{stmt_name}' not found"),
                    );
                    return DBERR_OPEN_CURSOR_FAILED;
                }
            }
        }

        if query.trim().is_empty() {
            self.set_error(DBERR_OPEN_CURSOR_FAILED, SQLSTATE_GENERAL, "Empty query");
            return DBERR_OPEN_CURSOR_FAILED;
        }

        let params = match self.build_params(&types, &values, &lengths, &flags) {
            Ok(p) => p,
            Err(rc) => return rc,
        };

        let native = self.use_native_cursors && self.mode == DriverMode::Live;
        let full_query = if native {
            if with_hold {
                format!("DECLARE {name} CURSOR WITH HOLD FOR {query}")
            } else {
                format!("DECLARE {name} CURSOR FOR {query}")
            }
        } else {
            query
        };

        let rc = self.do_exec(Some(name), &full_query, &params);
        if rc == DBERR_NO_ERROR {
            DBERR_NO_ERROR
        } else {
            self.last_rc = DBERR_OPEN_CURSOR_FAILED;
            DBERR_OPEN_CURSOR_FAILED
        }
    }

    fn cursor_fetch_one(&mut self, name: &str, mode: FetchMode) -> i32 {
        self.clear_error();

        if !self.cursors.contains_key(name) {
            self.set_error(
                DBERR_FETCH_ROW_FAILED,
                SQLSTATE_GENERAL,
                format!("cursor '{name}' is not declared"),
            );
            return DBERR_FETCH_ROW_FAILED;
        }

        let native = self.use_native_cursors && self.mode == DriverMode::Live;
        if native {
            let rel = match mode {
                FetchMode::Next => 1,
                FetchMode::Prev => -1,
                FetchMode::Current => 0,
            };
            let q = format!("FETCH RELATIVE {rel} FROM {name}");
            let rc = self.do_exec(Some(name), &q, &[]);
            if rc != DBERR_NO_ERROR {
                return DBERR_SQL_ERROR;
            }
            let nrows = self
                .cursors
                .get(name)
                .and_then(|e| e.rs.as_ref())
                .map(|rs| rs.rows.len())
                .unwrap_or(0);
            return match nrows {
                0 => {
                    self.set_error(DBERR_NO_DATA, SQLSTATE_NO_DATA, "No data");
                    DBERR_NO_DATA
                }
                1 => DBERR_NO_ERROR,
                _ => {
                    self.set_error(DBERR_TOO_MUCH_DATA, SQLSTATE_GENERAL, "Too much data");
                    DBERR_TOO_MUCH_DATA
                }
            };
        }

        // emulated: advance the local row index over the materialised set
        let Some(entry) = self.cursors.get_mut(name) else {
            return DBERR_FETCH_ROW_FAILED;
        };
        let Some(rs) = entry.rs.as_mut() else {
            self.set_error(
                DBERR_FETCH_ROW_FAILED,
                SQLSTATE_GENERAL,
                format!("cursor '{name}' is not open"),
            );
            return DBERR_FETCH_ROW_FAILED;
        };

        let next = match mode {
            FetchMode::Next => rs.current_row_index + 1,
            FetchMode::Prev => rs.current_row_index - 1,
            FetchMode::Current => rs.current_row_index.max(0),
        };
        if next < 0 || next >= rs.rows.len() as i64 {
            self.set_error(DBERR_NO_DATA, SQLSTATE_NO_DATA, "No data");
            return DBERR_NO_DATA;
        }
        rs.current_row_index = next;
        DBERR_NO_ERROR
    }

    fn cursor_close(&mut self, name: &str) -> i32 {
        self.clear_error();

        if !self.cursors.contains_key(name) {
            self.set_error(
                DBERR_CLOSE_CURSOR_FAILED,
                SQLSTATE_GENERAL,
                format!("cursor '{name}' is not declared"),
            );
            return DBERR_CLOSE_CURSOR_FAILED;
        }

        if self.use_native_cursors && self.mode == DriverMode::Live {
            let q = format!("CLOSE {name}");
            if let Err(e) = self.run_query(&q, &[], false) {
                self.stash(e);
                self.last_rc = DBERR_CLOSE_CURSOR_FAILED;
                return DBERR_CLOSE_CURSOR_FAILED;
            }
        }

        if let Some(entry) = self.cursors.get_mut(name) {
            entry.rs = None;
        }
        DBERR_NO_ERROR
    }

    fn get_resultset_value(
        &mut self,
        ctx: &ResultSetContext,
        row: usize,
        col: usize,
        bfr: &mut [u8],
    ) -> Option<RetrievedValue> {
        let cell: Option<Option<Vec<u8>>> = {
            let rs = self.resultset_for(ctx)?;
            let row = match ctx {
                ResultSetContext::Cursor(_) if rs.current_row_index != -1 => {
                    rs.current_row_index as usize
                }
                _ => row,
            };
            rs.rows.get(row).and_then(|r| r.get(col)).cloned()
        };

        let Some(cell) = cell else {
            self.set_error(
                DBERR_SQL_ERROR,
                SQLSTATE_GENERAL,
                format!("no value at row {row} col {col}"),
            );
            return None;
        };

        match cell {
            None => Some(RetrievedValue {
                length: 0,
                is_null: true,
            }),
            Some(bytes) => {
                if bytes.len() > bfr.len() {
                    self.set_error(
                        DBERR_TOO_MUCH_DATA,
                        SQLSTATE_GENERAL,
                        "value does not fit the caller buffer",
                    );
                    return None;
                }
                bfr[..bytes.len()].copy_from_slice(&bytes);
                Some(RetrievedValue {
                    length: bytes.len(),
                    is_null: false,
                })
            }
        }
    }

    fn move_to_first_record(&mut self, stmt_name: &str) -> bool {
        self.clear_error();
        let rs = if stmt_name.is_empty() {
            self.current.as_ref()
        } else {
            self.prepared
                .get(&stmt_name.to_lowercase())
                .and_then(|e| e.rs.as_ref())
        };

        let Some(rs) = rs else {
            self.set_error(
                DBERR_MOVE_TO_FIRST_FAILED,
                SQLSTATE_GENERAL,
                "Invalid statement reference",
            );
            return false;
        };

        if rs.rows.is_empty() {
            self.set_error(DBERR_NO_DATA, SQLSTATE_NO_DATA, "No data");
            return false;
        }
        true
    }

    fn get_num_rows(&self, ctx: &ResultSetContext) -> i64 {
        match self.resultset_for(ctx) {
            Some(rs) if !rs.rows.is_empty() => rs.rows.len() as i64,
            Some(rs) => rs.affected as i64,
            None => -1,
        }
    }

    fn get_num_fields(&self, ctx: &ResultSetContext) -> i64 {
        match self.resultset_for(ctx) {
            Some(rs) => rs.rows.first().map(|r| r.len() as i64).unwrap_or(0),
            None => -1,
        }
    }

    fn get_native_features(&self) -> u64 {
        native_features::RESULTSET_ROW_COUNT
    }

    fn get_error_message(&self) -> String {
        self.last_error.clone()
    }

    fn get_error_code(&self) -> i32 {
        self.last_rc
    }

    fn get_state(&self) -> String {
        self.last_state.clone()
    }
}

#[cfg(not(feature = "postgres"))]
impl PgsqlDriver {
    fn live_exec_prepared(
        &mut self,
        _name: &str,
        _params: &[ParamValue],
    ) -> Result<ResultSetData, (i32, String, String)> {
        Err((
            DBERR_SQL_ERROR,
            SQLSTATE_GENERAL.to_string(),
            "postgres support not built into this binary".to_string(),
        ))
    }
}

#[cfg(feature = "postgres")]
impl PgsqlDriver {
    fn live_exec_prepared(
        &mut self,
        name: &str,
        params: &[ParamValue],
    ) -> Result<ResultSetData, (i32, String, String)> {
        use postgres::types::ToSql;

        let decode_binary = self.decode_binary;
        let stmt = self
            .prepared
            .get(name)
            .and_then(|e| e.stmt.clone())
            .ok_or_else(|| {
                (
                    DBERR_SQL_ERROR,
                    SQLSTATE_GENERAL.to_string(),
                    "statement was prepared without a connection".to_string(),
                )
            })?;
        let client = self.client.as_mut().ok_or_else(|| {
            (
                DBERR_SQL_ERROR,
                SQLSTATE_GENERAL.to_string(),
                "not connected".to_string(),
            )
        })?;

        let boxed = boxed_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        match client.query(&stmt, &refs) {
            Ok(rows) => Ok(rows_to_resultset(&rows, decode_binary)),
            Err(e) => Err(pg_error_triple(&e)),
        }
    }
}

#[cfg(feature = "postgres")]
fn boxed_params(params: &[ParamValue]) -> Vec<Box<dyn postgres::types::ToSql + Sync>> {
    params
        .iter()
        .map(|p| -> Box<dyn postgres::types::ToSql + Sync> {
            match p {
                ParamValue::Null => Box::new(Option::<String>::None),
                ParamValue::Text(s) => Box::new(s.clone()),
                ParamValue::Bytes(b) => Box::new(b.clone()),
            }
        })
        .collect()
}

#[cfg(feature = "postgres")]
fn rows_to_resultset(rows: &[postgres::Row], decode_binary: bool) -> ResultSetData {
    use postgres::types::Type;

    let mut out = ResultSetData {
        rows: Vec::with_capacity(rows.len()),
        affected: 0,
        current_row_index: -1,
    };
    for row in rows {
        let mut cells = Vec::with_capacity(row.len());
        for (idx, col) in row.columns().iter().enumerate() {
            let cell: Option<Vec<u8>> = match *col.type_() {
                Type::BOOL => row
                    .try_get::<_, Option<bool>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| if v { b"t".to_vec() } else { b"f".to_vec() }),
                Type::INT2 => row
                    .try_get::<_, Option<i16>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| v.to_string().into_bytes()),
                Type::INT4 => row
                    .try_get::<_, Option<i32>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| v.to_string().into_bytes()),
                Type::INT8 => row
                    .try_get::<_, Option<i64>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| v.to_string().into_bytes()),
                Type::FLOAT4 => row
                    .try_get::<_, Option<f32>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| v.to_string().into_bytes()),
                Type::FLOAT8 => row
                    .try_get::<_, Option<f64>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| v.to_string().into_bytes()),
                Type::NUMERIC => row
                    .try_get::<_, Option<rust_decimal::Decimal>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| v.to_string().into_bytes()),
                Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).ok().flatten().map(
                    |raw| {
                        if decode_binary {
                            raw
                        } else {
                            // keep the backend's hex escape form
                            let mut esc = b"\\x".to_vec();
                            for b in &raw {
                                esc.extend_from_slice(format!("{b:02x}").as_bytes());
                            }
                            esc
                        }
                    },
                ),
                _ => row
                    .try_get::<_, Option<String>>(idx)
                    .ok()
                    .flatten()
                    .map(String::into_bytes),
            };
            cells.push(cell);
        }
        out.rows.push(cells);
    }
    out
}

#[cfg(feature = "postgres")]
fn pg_error_triple(e: &postgres::Error) -> (i32, String, String) {
    let state = e
        .as_db_error()
        .map(|d| d.code().code().to_string())
        .unwrap_or_else(|| SQLSTATE_GENERAL.to_string());
    (DBERR_SQL_ERROR, state, e.to_string())
}

fn first_word(query: &str) -> String {
    query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase()
}

fn is_tx_termination(query: &str) -> bool {
    matches!(first_word(query).as_str(), "COMMIT" | "ROLLBACK")
}

fn is_dml_statement(query: &str) -> bool {
    matches!(first_word(query).as_str(), "INSERT" | "UPDATE" | "DELETE")
}

#[cfg(feature = "postgres")]
fn is_query_statement(query: &str) -> bool {
    matches!(
        first_word(query).as_str(),
        "SELECT" | "WITH" | "VALUES" | "TABLE" | "SHOW" | "FETCH"
    )
}

/// Rewrite `?` and `:name` markers to `$n` in order, preserving quoted
/// strings.
pub fn fixup_parameters(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut n = 1;
    let mut in_single = false;
    let mut in_double = false;
    let mut in_param_id = false;

    for c in sql.chars() {
        if in_param_id && c.is_alphanumeric() {
            continue;
        }
        in_param_id = false;

        match c {
            '"' => {
                out.push(c);
                if !in_single {
                    in_double = !in_double;
                }
            }
            '\'' => {
                out.push(c);
                if !in_double {
                    in_single = !in_single;
                }
            }
            '?' | ':' => {
                if !in_single && !in_double {
                    out.push('$');
                    out.push_str(&n.to_string());
                    n += 1;
                    in_param_id = true;
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_driver(autocommit: AutoCommitMode) -> PgsqlDriver {
        let mut d = PgsqlDriver::new();
        d.init();
        let info = DataSourceInfo::parse("pgsql://u.p@localhost:5432/testdb").unwrap();
        let opts = ConnectionOptions {
            autocommit,
            ..Default::default()
        };
        assert_eq!(d.connect(&info, &opts), DBERR_NO_ERROR);
        d
    }

    fn text_rows(values: &[&[&str]]) -> Vec<Vec<Option<String>>> {
        values
            .iter()
            .map(|r| r.iter().map(|c| Some(c.to_string())).collect())
            .collect()
    }

    #[test]
    fn fixup_rewrites_question_and_colon_markers() {
        assert_eq!(
            fixup_parameters("UPDATE T SET A=? WHERE K=?"),
            "UPDATE T SET A=$1 WHERE K=$2"
        );
        assert_eq!(
            fixup_parameters("UPDATE T SET A=:V1 WHERE K=:K1"),
            "UPDATE T SET A=$1 WHERE K=$2"
        );
    }

    #[test]
    fn fixup_preserves_quoted_strings() {
        assert_eq!(
            fixup_parameters("SELECT '?' FROM T WHERE A = ?"),
            "SELECT '?' FROM T WHERE A = $1"
        );
        assert_eq!(
            fixup_parameters("SELECT \":x\" FROM T"),
            "SELECT \":x\" FROM T"
        );
    }

    #[test]
    fn exec_before_connect_fails() {
        let mut d = PgsqlDriver::new();
        d.init();
        assert_eq!(d.exec("SELECT 1"), DBERR_SQL_ERROR);
    }

    #[test]
    fn prepare_lowercases_and_rejects_duplicates() {
        let mut d = connected_driver(AutoCommitMode::On);
        assert_eq!(d.prepare("P1", "SELECT 1"), DBERR_NO_ERROR);
        assert_eq!(d.prepare("p1", "SELECT 2"), DBERR_PREPARE_FAILED);
        assert_eq!(d.get_error_code(), DBERR_PREPARE_FAILED);
    }

    #[test]
    fn prepared_fixup_and_case_insensitive_execution() {
        let mut d = PgsqlDriver::new();
        d.init();
        let info = DataSourceInfo::parse("pgsql://u.p@h/db").unwrap();
        let opts = ConnectionOptions {
            fixup_parameters: true,
            ..Default::default()
        };
        d.connect(&info, &opts);

        assert_eq!(
            d.prepare("p1", "UPDATE T SET A=? WHERE K=?"),
            DBERR_NO_ERROR
        );
        // the stored text carries positional placeholders
        assert!(d
            .statement_log()
            .iter()
            .any(|s| s.contains("UPDATE T SET A=$1 WHERE K=$2")));

        // parameter shape: two text params
        let types = vec![CobolVarType::Alphanumeric; 2];
        let values = vec![b"x".to_vec(), b"1".to_vec()];
        let lengths = vec![1u64, 1];
        let flags = vec![0u32, 0];
        d.push_mock_result(MockResult::affected(1));
        // upper-cased name resolves to the same statement
        assert_eq!(
            d.exec_prepared("P1", &types, &values, &lengths, &flags),
            DBERR_NO_ERROR
        );
    }

    #[test]
    fn exec_prepared_unknown_statement() {
        let mut d = connected_driver(AutoCommitMode::On);
        assert_eq!(d.exec_prepared("nope", &[], &[], &[], &[]), DBERR_SQL_ERROR);
    }

    #[test]
    fn exec_prepared_after_terminate_fails() {
        let mut d = connected_driver(AutoCommitMode::On);
        assert_eq!(d.prepare("s1", "SELECT 1"), DBERR_NO_ERROR);
        d.terminate_connection();
        assert_eq!(d.exec_prepared("s1", &[], &[], &[], &[]), DBERR_SQL_ERROR);
    }

    #[test]
    fn param_shape_mismatch_is_internal_error() {
        let mut d = connected_driver(AutoCommitMode::On);
        let types = vec![CobolVarType::Alphanumeric];
        let values: Vec<Vec<u8>> = vec![];
        assert_eq!(
            d.exec_params("SELECT $1", &types, &values, &[], &[]),
            DBERR_INTERNAL_ERR
        );
        assert_eq!(d.get_error_code(), DBERR_INTERNAL_ERR);
    }

    #[test]
    fn null_sentinel_binds_sql_null() {
        let mut d = connected_driver(AutoCommitMode::On);
        let types = vec![CobolVarType::Alphanumeric];
        let values = vec![b"ignored".to_vec()];
        let lengths = vec![DB_NULL];
        let flags = vec![0u32];
        d.push_mock_result(MockResult::affected(1));
        assert_eq!(
            d.exec_params("UPDATE T SET A=$1", &types, &values, &lengths, &flags),
            DBERR_NO_ERROR
        );
        assert_eq!(d.last_bound_params(), &[ParamValue::Null]);
    }

    #[test]
    fn zero_row_dml_reports_no_data() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.push_mock_result(MockResult::affected(0));
        assert_eq!(d.exec("DELETE FROM T WHERE 1=0"), DBERR_NO_DATA);
        assert_eq!(d.get_error_code(), 100);
        assert_eq!(d.get_state(), "02000");
    }

    #[test]
    fn autocommit_off_opens_initial_transaction() {
        let d = connected_driver(AutoCommitMode::Off);
        assert_eq!(d.statement_log(), &["BEGIN TRANSACTION".to_string()]);
    }

    #[test]
    fn commit_restarts_transaction_when_autocommit_off() {
        let mut d = connected_driver(AutoCommitMode::Off);
        assert_eq!(d.exec("COMMIT"), DBERR_NO_ERROR);
        assert_eq!(d.get_error_code(), 0);
        assert_eq!(
            d.statement_log(),
            &[
                "BEGIN TRANSACTION".to_string(),
                "COMMIT".to_string(),
                "START TRANSACTION".to_string(),
            ]
        );
    }

    #[test]
    fn rollback_also_restarts_transaction() {
        let mut d = connected_driver(AutoCommitMode::Off);
        assert_eq!(d.exec("ROLLBACK"), DBERR_NO_ERROR);
        assert!(d
            .statement_log()
            .last()
            .unwrap()
            .contains("START TRANSACTION"));
    }

    #[test]
    fn commit_without_autocommit_off_is_passthrough() {
        let mut d = connected_driver(AutoCommitMode::On);
        assert_eq!(d.exec("COMMIT"), DBERR_NO_ERROR);
        assert_eq!(d.statement_log(), &["COMMIT".to_string()]);
    }

    #[test]
    fn cursor_fetch_walks_rows_then_no_data() {
        let mut d = connected_driver(AutoCommitMode::On);
        let cursor = Cursor::new("CUR1", "SELECT K FROM T WHERE G = $1").with_param(
            CobolVarType::Alphanumeric,
            b"A".to_vec(),
            1,
            0,
        );
        assert_eq!(d.cursor_declare(cursor), DBERR_NO_ERROR);

        d.push_mock_result(MockResult::rows(text_rows(&[&["r1"], &["r2"]])));
        assert_eq!(d.cursor_open("CUR1"), DBERR_NO_ERROR);

        assert_eq!(d.cursor_fetch_one("CUR1", FetchMode::Next), DBERR_NO_ERROR);
        assert_eq!(d.cursor_fetch_one("CUR1", FetchMode::Next), DBERR_NO_ERROR);
        assert_eq!(d.cursor_fetch_one("CUR1", FetchMode::Next), DBERR_NO_DATA);
        assert_eq!(d.get_error_code(), 100);
        assert_eq!(d.get_state(), "02000");
    }

    #[test]
    fn cursor_fetch_prev_and_current() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.cursor_declare(Cursor::new("C", "SELECT K FROM T"));
        d.push_mock_result(MockResult::rows(text_rows(&[&["a"], &["b"]])));
        d.cursor_open("C");

        assert_eq!(d.cursor_fetch_one("C", FetchMode::Next), DBERR_NO_ERROR);
        assert_eq!(d.cursor_fetch_one("C", FetchMode::Next), DBERR_NO_ERROR);
        assert_eq!(d.cursor_fetch_one("C", FetchMode::Prev), DBERR_NO_ERROR);
        assert_eq!(d.cursor_fetch_one("C", FetchMode::Current), DBERR_NO_ERROR);

        let mut bfr = [0u8; 8];
        let v = d
            .get_resultset_value(&ResultSetContext::Cursor("C".into()), 0, 0, &mut bfr)
            .unwrap();
        assert_eq!(&bfr[..v.length], b"a");
    }

    #[test]
    fn cursor_open_undeclared_fails() {
        let mut d = connected_driver(AutoCommitMode::On);
        assert_eq!(d.cursor_open("NOPE"), DBERR_OPEN_CURSOR_FAILED);
    }

    #[test]
    fn cursor_fetch_before_open_fails() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.cursor_declare(Cursor::new("C", "SELECT 1"));
        assert_eq!(
            d.cursor_fetch_one("C", FetchMode::Next),
            DBERR_FETCH_ROW_FAILED
        );
    }

    #[test]
    fn cursor_close_clears_result_and_allows_reopen() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.cursor_declare(Cursor::new("C", "SELECT K FROM T"));
        d.push_mock_result(MockResult::rows(text_rows(&[&["a"]])));
        d.cursor_open("C");
        assert_eq!(d.cursor_close("C"), DBERR_NO_ERROR);
        assert_eq!(
            d.cursor_fetch_one("C", FetchMode::Next),
            DBERR_FETCH_ROW_FAILED
        );

        d.push_mock_result(MockResult::rows(text_rows(&[&["b"]])));
        assert_eq!(d.cursor_open("C"), DBERR_NO_ERROR);
        assert_eq!(d.cursor_fetch_one("C", FetchMode::Next), DBERR_NO_ERROR);
    }

    #[test]
    fn at_reference_resolves_prepared_statement_text() {
        let mut d = connected_driver(AutoCommitMode::On);
        assert_eq!(d.prepare("QRY1", "SELECT K FROM T"), DBERR_NO_ERROR);

        d.cursor_declare(Cursor::new("C", "@QRY1"));
        d.push_mock_result(MockResult::rows(text_rows(&[&["x"]])));
        assert_eq!(d.cursor_open("C"), DBERR_NO_ERROR);
        // the cursor executed the prepared statement's source text
        assert!(d
            .statement_log()
            .last()
            .unwrap()
            .contains("SELECT K FROM T"));
    }

    #[test]
    fn at_reference_unknown_statement_sets_undefined_state() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.cursor_declare(Cursor::new("C", "@GHOST"));
        assert_eq!(d.cursor_open("C"), DBERR_OPEN_CURSOR_FAILED);
        assert_eq!(d.get_state(), "42704");
    }

    #[test]
    fn get_resultset_value_truncation_is_an_error() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.push_mock_result(MockResult::rows(text_rows(&[&["0123456789"]])));
        assert_eq!(d.exec("SELECT V FROM T"), DBERR_NO_ERROR);

        let mut small = [0xAAu8; 4];
        let r = d.get_resultset_value(
            &ResultSetContext::CurrentResultSet,
            0,
            0,
            &mut small,
        );
        assert!(r.is_none());
        // nothing was written
        assert_eq!(small, [0xAAu8; 4]);
    }

    #[test]
    fn get_resultset_value_null_and_text() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.push_mock_result(MockResult {
            rows: vec![vec![Some("abc".to_string()), None]],
            affected: 0,
        });
        d.exec("SELECT A, B FROM T");

        let mut bfr = [0u8; 16];
        let v = d
            .get_resultset_value(&ResultSetContext::CurrentResultSet, 0, 0, &mut bfr)
            .unwrap();
        assert_eq!(v.length, 3);
        assert!(!v.is_null);
        assert_eq!(&bfr[..3], b"abc");

        let v = d
            .get_resultset_value(&ResultSetContext::CurrentResultSet, 0, 1, &mut bfr)
            .unwrap();
        assert!(v.is_null);
        assert_eq!(v.length, 0);
    }

    #[test]
    fn move_to_first_record_paths() {
        let mut d = connected_driver(AutoCommitMode::On);

        // no current result set at all
        assert!(!d.move_to_first_record(""));
        assert_eq!(d.get_error_code(), DBERR_MOVE_TO_FIRST_FAILED);

        // empty result set
        d.push_mock_result(MockResult::rows(vec![]));
        d.exec("SELECT K FROM T WHERE 1=0");
        assert!(!d.move_to_first_record(""));
        assert_eq!(d.get_error_code(), 100);
        assert_eq!(d.get_state(), "02000");

        // prepared statement with a row
        d.prepare("q", "SELECT K FROM T");
        d.push_mock_result(MockResult::rows(text_rows(&[&["1"]])));
        d.exec_prepared("Q", &[], &[], &[], &[]);
        assert!(d.move_to_first_record("Q"));
    }

    #[test]
    fn num_rows_and_fields() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.push_mock_result(MockResult::rows(text_rows(&[&["a", "b"], &["c", "d"]])));
        d.exec("SELECT A, B FROM T");
        let ctx = ResultSetContext::CurrentResultSet;
        assert_eq!(d.get_num_rows(&ctx), 2);
        assert_eq!(d.get_num_fields(&ctx), 2);
    }

    #[test]
    fn reset_tears_down_and_allows_reconnect() {
        let mut d = connected_driver(AutoCommitMode::On);
        d.prepare("p", "SELECT 1");
        assert_eq!(d.reset(), DBERR_NO_ERROR);
        assert_eq!(d.exec("SELECT 1"), DBERR_SQL_ERROR);

        let info = DataSourceInfo::parse("pgsql://u.p@h/db").unwrap();
        assert_eq!(
            d.connect(&info, &ConnectionOptions::default()),
            DBERR_NO_ERROR
        );
        // the statement table was cleared: the name is free again
        assert_eq!(d.prepare("p", "SELECT 1"), DBERR_NO_ERROR);
    }

    #[test]
    fn native_features_reports_row_counts() {
        let d = PgsqlDriver::new();
        assert_eq!(
            d.get_native_features() & native_features::RESULTSET_ROW_COUNT,
            native_features::RESULTSET_ROW_COUNT
        );
    }

    #[test]
    fn varlen_param_binds_trimmed_payload() {
        let mut d = connected_driver(AutoCommitMode::On);
        let field = crate::marshal::make_varlen(b"AB ", 10);
        let types = vec![CobolVarType::Alphanumeric];
        let lengths = vec![field.len() as u64];
        let flags = vec![crate::types::field_flags::VARLEN | crate::types::field_flags::AUTOTRIM];
        d.push_mock_result(MockResult::affected(1));
        assert_eq!(
            d.exec_params("UPDATE T SET A=$1", &types, &[field], &lengths, &flags),
            DBERR_NO_ERROR
        );
        assert_eq!(
            d.last_bound_params(),
            &[ParamValue::Text("AB".to_string())]
        );
    }
}
