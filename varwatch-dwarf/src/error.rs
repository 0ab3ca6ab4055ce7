//! Error types for debug-info extraction

/// Errors surfaced while reading the target's debug information
#[derive(thiserror::Error, Debug)]
pub enum DwarfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object file error: {0}")]
    Object(#[from] object::Error),
    #[error("DWARF parsing error: {0}")]
    Gimli(#[from] gimli::Error),
    #[error("position-independent executable; rebuild with -no-pie")]
    PieExecutable,
    #[error("function '{0}' not found in the debug information")]
    FunctionNotFound(String),
    #[error(
        "no frame-base register entry for the target function; \
         rebuild with -O0 -gdwarf-2 -fno-omit-frame-pointer"
    )]
    NoFramePointer,
    #[error("unsupported source language; only C (C89/C99/C11) is supported")]
    UnsupportedLanguage,
    #[error("invalid debug information: {0}")]
    InvalidDwarf(&'static str),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, DwarfError>;
