//! Error taxonomy and debug reporting.
//!
//! Every failure in the compilation pipeline is classified into one of seven
//! categories. A process-global debug flag additionally prints a
//! source-location tag to stderr at the site where an error is constructed,
//! which is invaluable when a generated module fails deep inside the
//! pipeline.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// A specialized `Result` for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Enable or disable tagged stderr diagnostics for every error raised.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

/// Whether tagged stderr diagnostics are enabled.
pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// The error taxonomy of the compiler.
#[derive(Debug, Error)]
pub enum Error {
    /// Allocation failure.
    #[error("out of memory: {0}")]
    Memory(String),

    /// An OS primitive failed (spawn, wait, loader).
    #[error("system error: {0}")]
    System(String),

    /// Caller API misuse.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// An unsupported configuration reached the back end. Broken internal
    /// invariants (missing opcode, capacity overflow) panic instead.
    #[error("unsupported: {0}")]
    Software(String),

    /// The DSL was rejected.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// I/O failure on a temporary or output file.
    #[error("file error: {0}")]
    File(String),

    /// The native toolchain exited nonzero or produced an unloadable
    /// artifact.
    #[error("jit compile error: {0}")]
    Jitc(String),
}

impl Error {
    /// Short classification tag used by the stderr diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            Error::Memory(_) => "ERR_MEMORY",
            Error::System(_) => "ERR_SYSTEM",
            Error::Argument(_) => "ERR_ARGUMENT",
            Error::Software(_) => "ERR_SOFTWARE",
            Error::Syntax(_) => "ERR_SYNTAX",
            Error::File(_) => "ERR_FILE",
            Error::Jitc(_) => "ERR_JITC",
        }
    }
}

/// Construct an [`Error`] variant from a format string, reporting the
/// construction site to stderr when debug diagnostics are enabled.
macro_rules! err {
    ($kind:ident, $($arg:tt)*) => {{
        let e = $crate::error::Error::$kind(format!($($arg)*));
        if $crate::error::debug_enabled() {
            eprintln!("error: {}:{}: {}", file!(), line!(), e.tag());
        }
        e
    }};
}

pub(crate) use err;
