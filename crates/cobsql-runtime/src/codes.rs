//! Status codes shared by every driver.
//!
//! Operations return 0 on success, 100 for "no data", and a negative
//! code on failure. The last observed `(code, message, sqlstate)` triple
//! stays readable on the driver until the next operation.

pub const DBERR_NO_ERROR: i32 = 0;
/// Conventional "no data" code (SQLSTATE `02000`).
pub const DBERR_NO_DATA: i32 = 100;

pub const DBERR_CONNECTION_FAILED: i32 = -100;
pub const DBERR_CONN_RESET_FAILED: i32 = -101;
pub const DBERR_EMPTY_QUERY: i32 = -102;
pub const DBERR_SQL_ERROR: i32 = -103;
pub const DBERR_TOO_MUCH_DATA: i32 = -104;
pub const DBERR_PREPARE_FAILED: i32 = -105;
pub const DBERR_DECLARE_CURSOR_FAILED: i32 = -106;
pub const DBERR_OPEN_CURSOR_FAILED: i32 = -107;
pub const DBERR_CLOSE_CURSOR_FAILED: i32 = -108;
pub const DBERR_FETCH_ROW_FAILED: i32 = -109;
pub const DBERR_MOVE_TO_FIRST_FAILED: i32 = -110;
/// Parameter array shape mismatch or similar caller error.
pub const DBERR_INTERNAL_ERR: i32 = -111;
pub const DBERR_NOT_IMPL: i32 = -112;

/// Sentinel parameter length: bind SQL NULL instead of the value bytes.
pub const DB_NULL: u64 = u64::MAX;

/// SQLSTATE for success.
pub const SQLSTATE_OK: &str = "00000";
/// SQLSTATE for "no data".
pub const SQLSTATE_NO_DATA: &str = "02000";
/// SQLSTATE for an undefined object (unknown prepared statement).
pub const SQLSTATE_UNDEFINED: &str = "42704";
/// General driver-detected error.
pub const SQLSTATE_GENERAL: &str = "HY000";
