//! Intermediate representation shared between the parser and the
//! code generator.

/// COBOL host-variable storage classes.
///
/// The discriminants are the wire type codes emitted into generated
/// runtime calls; the runtime decodes them with the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CobolVarType {
    /// `PIC 9(n)` display
    UnsignedNumber = 1,
    /// `PIC S9(n)` display, trailing combined sign
    SignedNumberTc = 2,
    /// `PIC S9(n) SIGN TRAILING SEPARATE`
    SignedNumberTs = 3,
    /// `PIC S9(n) SIGN LEADING`
    SignedNumberLc = 4,
    /// `PIC S9(n) SIGN LEADING SEPARATE`
    SignedNumberLs = 5,
    /// `PIC 9(n) COMP-3`
    UnsignedNumberPd = 6,
    /// `PIC S9(n) COMP-3`
    SignedNumberPd = 7,
    /// `PIC 9(n) COMP` / `COMP-5` / `BINARY`
    UnsignedBinary = 8,
    /// `PIC S9(n) COMP` / `COMP-5` / `BINARY`
    SignedBinary = 9,
    /// `PIC X(n)` / `PIC A(n)`
    Alphanumeric = 16,
    /// `PIC N(n)` national
    Japanese = 24,
}

impl CobolVarType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, CobolVarType::Alphanumeric | CobolVarType::Japanese)
    }

    pub fn is_packed(self) -> bool {
        matches!(
            self,
            CobolVarType::UnsignedNumberPd | CobolVarType::SignedNumberPd
        )
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            CobolVarType::UnsignedBinary | CobolVarType::SignedBinary
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            CobolVarType::SignedNumberTc
                | CobolVarType::SignedNumberTs
                | CobolVarType::SignedNumberLc
                | CobolVarType::SignedNumberLs
                | CobolVarType::SignedNumberPd
                | CobolVarType::SignedBinary
        )
    }
}

/// Flag bits carried in the flag word of generated parameter calls.
pub mod field_flags {
    pub const NONE: u32 = 0;
    /// Bind the field in binary parameter format.
    pub const BINARY: u32 = 0x01;
    /// The field has a length-prefixed variable-length layout.
    pub const VARLEN: u32 = 0x02;
    /// Trailing spaces are trimmed before binding.
    pub const AUTOTRIM: u32 = 0x04;
    /// A null-indicator variable follows the data item.
    pub const NULL_IND: u32 = 0x08;
}

/// Original position of a construct, reconstructed from consolidation
/// markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

/// A host-variable declaration from a declare section.
#[derive(Debug, Clone)]
pub struct HostVarDecl {
    pub level: u8,
    pub name: String,
    pub var_type: CobolVarType,
    /// Digit count for numerics, character count for text.
    pub length: u32,
    /// Digits after the implied decimal point.
    pub scale: u32,
    /// Variable-length layout (length prefix + payload).
    pub varlen: bool,
    pub location: SourceLocation,
    /// Line span of the declaration in the consolidated buffer
    /// (1-based, inclusive).
    pub start_line: usize,
    pub end_line: usize,
}

impl HostVarDecl {
    /// Bytes the item occupies in storage.
    pub fn storage_size(&self) -> u32 {
        match self.var_type {
            CobolVarType::UnsignedNumber
            | CobolVarType::SignedNumberTc
            | CobolVarType::SignedNumberLc => self.length,
            CobolVarType::SignedNumberTs | CobolVarType::SignedNumberLs => self.length + 1,
            CobolVarType::UnsignedNumberPd | CobolVarType::SignedNumberPd => self.length / 2 + 1,
            CobolVarType::UnsignedBinary | CobolVarType::SignedBinary => match self.length {
                0..=4 => 2,
                5..=9 => 4,
                _ => 8,
            },
            CobolVarType::Alphanumeric => self.length,
            CobolVarType::Japanese => self.length * 2,
        }
    }

    /// Flag word for generated calls.
    pub fn flags(&self) -> u32 {
        let mut f = field_flags::NONE;
        if self.var_type.is_binary() {
            f |= field_flags::BINARY;
        }
        if self.varlen {
            f |= field_flags::VARLEN | field_flags::AUTOTRIM;
        }
        f
    }
}

/// Where a cursor's query text comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorSource {
    /// Literal SQL, with parameter markers already rewritten.
    Sql(String),
    /// A host variable holding the SQL (or an `@stmt` reference) at run
    /// time.
    HostVar(String),
}

/// A cursor declaration.
#[derive(Debug, Clone)]
pub struct CursorDecl {
    pub name: String,
    pub source: CursorSource,
    pub with_hold: bool,
    /// Ordered host-variable references bound when the cursor opens.
    pub params: Vec<HostRef>,
    pub location: SourceLocation,
}

/// Embedded statement kinds the generator knows how to lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtKind {
    Connect,
    Disconnect,
    BeginDeclareSection,
    EndDeclareSection,
    DeclareCursor,
    Open,
    Fetch,
    Close,
    Prepare,
    Execute,
    ExecuteImmediate,
    Commit,
    Rollback,
    SelectInto,
    Dml,
    Other,
}

impl StmtKind {
    /// Classify a statement from its (whitespace-normalised) SQL text.
    pub fn classify(sql: &str) -> Self {
        let upper = sql.trim().to_uppercase();
        let mut words = upper.split_whitespace();
        let first = words.next().unwrap_or("");
        let second = words.next().unwrap_or("");

        match first {
            "CONNECT" => {
                if second == "RESET" {
                    StmtKind::Disconnect
                } else {
                    StmtKind::Connect
                }
            }
            "DISCONNECT" => StmtKind::Disconnect,
            "BEGIN" => StmtKind::BeginDeclareSection,
            "END" => StmtKind::EndDeclareSection,
            "DECLARE" => StmtKind::DeclareCursor,
            "OPEN" => StmtKind::Open,
            "FETCH" => StmtKind::Fetch,
            "CLOSE" => StmtKind::Close,
            "PREPARE" => StmtKind::Prepare,
            "EXECUTE" => {
                if second == "IMMEDIATE" {
                    StmtKind::ExecuteImmediate
                } else {
                    StmtKind::Execute
                }
            }
            "COMMIT" => StmtKind::Commit,
            "ROLLBACK" => StmtKind::Rollback,
            "SELECT" => {
                if upper.contains(" INTO ") {
                    StmtKind::SelectInto
                } else {
                    StmtKind::Dml
                }
            }
            "INSERT" | "UPDATE" | "DELETE" => StmtKind::Dml,
            _ => StmtKind::Other,
        }
    }

    /// Mnemonic used in map-file rows.
    pub fn verb(self) -> &'static str {
        match self {
            StmtKind::Connect => "CONNECT",
            StmtKind::Disconnect => "DISCONNECT",
            StmtKind::BeginDeclareSection => "BEGIN-DECLARE",
            StmtKind::EndDeclareSection => "END-DECLARE",
            StmtKind::DeclareCursor => "DECLARE",
            StmtKind::Open => "OPEN",
            StmtKind::Fetch => "FETCH",
            StmtKind::Close => "CLOSE",
            StmtKind::Prepare => "PREPARE",
            StmtKind::Execute => "EXECUTE",
            StmtKind::ExecuteImmediate => "EXECUTE-IMMEDIATE",
            StmtKind::Commit => "COMMIT",
            StmtKind::Rollback => "ROLLBACK",
            StmtKind::SelectInto => "SELECT-INTO",
            StmtKind::Dml => "EXEC",
            StmtKind::Other => "EXEC",
        }
    }
}

/// A host-variable reference inside a statement, with its optional null
/// indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct HostRef {
    pub name: String,
    pub indicator: Option<String>,
}

impl HostRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indicator: None,
        }
    }
}

/// One embedded statement.
#[derive(Debug, Clone)]
pub struct EsqlStmt {
    pub kind: StmtKind,
    /// SQL text with host references rewritten to `$1, $2, …`.
    pub sql: String,
    /// Input references in placeholder order (`params[k]` backs `$k+1`).
    pub params: Vec<HostRef>,
    /// INTO targets, in order.
    pub into_vars: Vec<HostRef>,
    /// Cursor or prepared-statement name, for verbs that take one.
    pub operand: Option<String>,
    pub location: SourceLocation,
    /// Line span of the block in the consolidated buffer (1-based,
    /// inclusive).
    pub start_line: usize,
    pub end_line: usize,
}

/// Everything the parser hands to the generator.
#[derive(Debug, Clone, Default)]
pub struct EsqlProgram {
    pub host_vars: Vec<HostVarDecl>,
    pub cursors: Vec<CursorDecl>,
    pub statements: Vec<EsqlStmt>,
}

impl EsqlProgram {
    pub fn find_host_var(&self, name: &str) -> Option<&HostVarDecl> {
        self.host_vars
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
    }

    pub fn find_cursor(&self, name: &str) -> Option<&CursorDecl> {
        self.cursors
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}
