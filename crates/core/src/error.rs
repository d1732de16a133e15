//! Interpreter Error Codes
//!
//! Every fault the interpreter can raise is an [`ErrorCode`]. The codes fall
//! into four groups, and the recovery driver treats each group differently:
//!
//! | Group        | Examples                                      | Handling                          |
//! |--------------|-----------------------------------------------|-----------------------------------|
//! | structural   | `stackoverflow`, `execstackoverflow`, ...     | block growth / block pop, retry   |
//! | pseudo-error | `VMreclaim`, `TimeSlice`, `ExecStackUnderflow`| absorbed by the driver            |
//! | language     | `typecheck`, `undefined`, `rangecheck`, ...   | named handler in `errordict`      |
//! | fatal        | `Fatal`, `Quit`                               | returned to the caller            |
//!
//! Language errors carry a canonical PostScript name (`/typecheck`), which is
//! the key used to look up handlers.

use std::fmt;

/// A fault or scheduling request raised while interpreting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Language errors (Level 1)
    UnknownError,
    DictFull,
    DictStackOverflow,
    DictStackUnderflow,
    ExecStackOverflow,
    Interrupt,
    InvalidAccess,
    InvalidExit,
    InvalidFileAccess,
    InvalidFont,
    InvalidRestore,
    IoError,
    LimitCheck,
    NoCurrentPoint,
    RangeCheck,
    StackOverflow,
    StackUnderflow,
    SyntaxError,
    Timeout,
    TypeCheck,
    Undefined,
    UndefinedFileName,
    UndefinedResult,
    UnmatchedMark,
    VmError,
    // Language errors (Level 2)
    ConfigurationError,
    UndefinedResource,
    Unregistered,
    InvalidContext,
    InvalidId,

    // Pseudo-errors
    /// Unrecoverable condition; terminate the run.
    Fatal,
    /// Orderly termination requested by `quit` or an unmatched `stop`.
    Quit,
    /// The run's base sentinel executed: clean completion.
    InterpreterExit,
    /// An operator needs its color remapped before it can complete.
    RemapColor,
    /// The execution stack ran into its bottom guard.
    ExecStackUnderflow,
    /// Garbage collection requested before continuing.
    VmReclaim,
    /// A token source cannot supply more data right now.
    NeedInput,
    /// The time-slice quantum is exhausted.
    TimeSlice,
}

/// Every language-level error, in canonical order.
pub const LANGUAGE_ERRORS: &[ErrorCode] = &[
    ErrorCode::UnknownError,
    ErrorCode::DictFull,
    ErrorCode::DictStackOverflow,
    ErrorCode::DictStackUnderflow,
    ErrorCode::ExecStackOverflow,
    ErrorCode::Interrupt,
    ErrorCode::InvalidAccess,
    ErrorCode::InvalidExit,
    ErrorCode::InvalidFileAccess,
    ErrorCode::InvalidFont,
    ErrorCode::InvalidRestore,
    ErrorCode::IoError,
    ErrorCode::LimitCheck,
    ErrorCode::NoCurrentPoint,
    ErrorCode::RangeCheck,
    ErrorCode::StackOverflow,
    ErrorCode::StackUnderflow,
    ErrorCode::SyntaxError,
    ErrorCode::Timeout,
    ErrorCode::TypeCheck,
    ErrorCode::Undefined,
    ErrorCode::UndefinedFileName,
    ErrorCode::UndefinedResult,
    ErrorCode::UnmatchedMark,
    ErrorCode::VmError,
    ErrorCode::ConfigurationError,
    ErrorCode::UndefinedResource,
    ErrorCode::Unregistered,
    ErrorCode::InvalidContext,
    ErrorCode::InvalidId,
];

impl ErrorCode {
    /// Canonical name, used as the key into `errordict`.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::UnknownError => "unknownerror",
            ErrorCode::DictFull => "dictfull",
            ErrorCode::DictStackOverflow => "dictstackoverflow",
            ErrorCode::DictStackUnderflow => "dictstackunderflow",
            ErrorCode::ExecStackOverflow => "execstackoverflow",
            ErrorCode::Interrupt => "interrupt",
            ErrorCode::InvalidAccess => "invalidaccess",
            ErrorCode::InvalidExit => "invalidexit",
            ErrorCode::InvalidFileAccess => "invalidfileaccess",
            ErrorCode::InvalidFont => "invalidfont",
            ErrorCode::InvalidRestore => "invalidrestore",
            ErrorCode::IoError => "ioerror",
            ErrorCode::LimitCheck => "limitcheck",
            ErrorCode::NoCurrentPoint => "nocurrentpoint",
            ErrorCode::RangeCheck => "rangecheck",
            ErrorCode::StackOverflow => "stackoverflow",
            ErrorCode::StackUnderflow => "stackunderflow",
            ErrorCode::SyntaxError => "syntaxerror",
            ErrorCode::Timeout => "timeout",
            ErrorCode::TypeCheck => "typecheck",
            ErrorCode::Undefined => "undefined",
            ErrorCode::UndefinedFileName => "undefinedfilename",
            ErrorCode::UndefinedResult => "undefinedresult",
            ErrorCode::UnmatchedMark => "unmatchedmark",
            ErrorCode::VmError => "VMerror",
            ErrorCode::ConfigurationError => "configurationerror",
            ErrorCode::UndefinedResource => "undefinedresource",
            ErrorCode::Unregistered => "unregistered",
            ErrorCode::InvalidContext => "invalidcontext",
            ErrorCode::InvalidId => "invalidid",
            ErrorCode::Fatal => "Fatal",
            ErrorCode::Quit => "Quit",
            ErrorCode::InterpreterExit => "InterpreterExit",
            ErrorCode::RemapColor => "Remap_Color",
            ErrorCode::ExecStackUnderflow => "ExecStackUnderflow",
            ErrorCode::VmReclaim => "VMreclaim",
            ErrorCode::NeedInput => "NeedInput",
            ErrorCode::TimeSlice => "TimeSlice",
        }
    }

    /// Look up a language error by its canonical name.
    pub fn from_name(name: &str) -> Option<ErrorCode> {
        LANGUAGE_ERRORS.iter().copied().find(|c| c.name() == name)
    }

    /// True for errors dispatched to a named handler.
    pub fn is_language_error(self) -> bool {
        !matches!(
            self,
            ErrorCode::Fatal
                | ErrorCode::Quit
                | ErrorCode::InterpreterExit
                | ErrorCode::RemapColor
                | ErrorCode::ExecStackUnderflow
                | ErrorCode::VmReclaim
                | ErrorCode::NeedInput
                | ErrorCode::TimeSlice
        )
    }

    /// Numeric code, negative like every interpreter status.
    pub fn code(self) -> i32 {
        match LANGUAGE_ERRORS.iter().position(|&c| c == self) {
            Some(pos) => -(pos as i32) - 1,
            None => match self {
                ErrorCode::Fatal => -100,
                ErrorCode::Quit => -101,
                ErrorCode::InterpreterExit => -102,
                ErrorCode::RemapColor => -103,
                ErrorCode::ExecStackUnderflow => -104,
                ErrorCode::VmReclaim => -105,
                ErrorCode::NeedInput => -106,
                _ => -107,
            },
        }
    }

    /// Process exit status for a run terminated by this code.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCode::Fatal => 255,
            ErrorCode::InterpreterExit => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::error::Error for ErrorCode {}
