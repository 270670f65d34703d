//! Host-variable type codes and field flags.
//!
//! The preprocessor emits these numeric codes into generated calls; the
//! runtime decodes them here. The two sides never share source, only
//! the wire values.

/// COBOL host-variable storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CobolVarType {
    UnsignedNumber = 1,
    SignedNumberTc = 2,
    SignedNumberTs = 3,
    SignedNumberLc = 4,
    SignedNumberLs = 5,
    UnsignedNumberPd = 6,
    SignedNumberPd = 7,
    UnsignedBinary = 8,
    SignedBinary = 9,
    Alphanumeric = 16,
    Japanese = 24,
}

impl CobolVarType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => CobolVarType::UnsignedNumber,
            2 => CobolVarType::SignedNumberTc,
            3 => CobolVarType::SignedNumberTs,
            4 => CobolVarType::SignedNumberLc,
            5 => CobolVarType::SignedNumberLs,
            6 => CobolVarType::UnsignedNumberPd,
            7 => CobolVarType::SignedNumberPd,
            8 => CobolVarType::UnsignedBinary,
            9 => CobolVarType::SignedBinary,
            16 => CobolVarType::Alphanumeric,
            24 => CobolVarType::Japanese,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, CobolVarType::Alphanumeric | CobolVarType::Japanese)
    }
}

/// Flag bits of the per-parameter flag word.
pub mod field_flags {
    pub const NONE: u32 = 0;
    /// Bind in binary parameter format.
    pub const BINARY: u32 = 0x01;
    /// Length-prefixed variable-length layout.
    pub const VARLEN: u32 = 0x02;
    /// Trim trailing spaces before binding.
    pub const AUTOTRIM: u32 = 0x04;
    /// A null-indicator variable is attached.
    pub const NULL_IND: u32 = 0x08;

    pub fn is_binary(flags: u32) -> bool {
        flags & BINARY != 0
    }

    pub fn is_varlen(flags: u32) -> bool {
        flags & VARLEN != 0
    }

    pub fn is_autotrim(flags: u32) -> bool {
        flags & AUTOTRIM != 0
    }
}
