//! Debug-info extraction for the varwatch debugger
//!
//! Reads the target ELF's DWARF sections once and produces an owned,
//! immutable [`DebugFacts`]: the target function's instruction range and
//! frame convention, the table of watchable variables, the statement line
//! table, the compilation unit's source path and language.

mod error;
mod facts;
mod loader;
mod types;
mod variables;

pub use error::{DwarfError, Result};
pub use types::{
    ArrayShape, DebugFacts, Encoding, FunctionSpan, Language, LineRow, ScopeFilter, TypeClass,
    VarDescriptor, VarLocation, VarScope, WatchFilter, MAX_DIMENSIONS, POINTER_WIDTH,
};
