//! Fact types produced by the debug-info pass

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Pointer width of the debugged ABI, in bytes.
///
/// Used as the fallback size for pointer variables whose type DIE omits
/// `DW_AT_byte_size` (clang does this).
#[cfg(target_arch = "x86_64")]
pub const POINTER_WIDTH: u64 = 8;
#[cfg(target_arch = "x86")]
pub const POINTER_WIDTH: u64 = 4;

/// DWARF register number of the frame-base register (RBP on x86-64, EBP on x86)
#[cfg(target_arch = "x86_64")]
pub(crate) const FRAME_BASE_REG: u16 = 6;
#[cfg(target_arch = "x86")]
pub(crate) const FRAME_BASE_REG: u16 = 5;

/// Arrays are bounded to this many dimensions
pub const MAX_DIMENSIONS: usize = 8;

/// Instruction range and frame convention of the target function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpan {
    /// First byte of the function in the loaded image
    pub low_pc: u64,
    /// Last byte of the function (inclusive)
    pub high_pc: u64,
    /// Signed offset added to the live base pointer to reach locals
    pub frame_base_offset: i64,
}

impl FunctionSpan {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.low_pc && addr <= self.high_pc
    }
}

/// One row of the statement line table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow {
    /// Instruction address
    pub addr: u64,
    /// 1-based source line (0 when the row carries no line)
    pub line: u32,
    /// First instruction of a source statement
    pub is_stmt: bool,
    /// One past the end of a machine-code sequence
    pub end_sequence: bool,
    /// First instruction of a basic block
    pub basic_block: bool,
}

/// Storage class of a watched variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    Global,
    Local,
}

/// Where a variable lives at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLocation {
    /// Absolute address (static storage)
    Address(u64),
    /// Signed offset from the live base pointer (stack storage)
    FrameOffset(i64),
}

/// Resolved type class after chasing typedef chains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Scalar,
    Array,
    Pointer,
    Enum,
    Struct,
    Union,
}

/// Value interpretation of a scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Signed,
    Unsigned,
    Float,
    Pointer,
}

/// Element layout of an array variable, row-major (last index fastest)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayShape {
    pub element_size: u64,
    pub element_class: TypeClass,
    /// Extent of each dimension, outermost first
    pub extents: Vec<u64>,
}

impl ArrayShape {
    /// Total number of elements across all dimensions
    pub fn element_count(&self) -> u64 {
        self.extents.iter().product()
    }
}

/// Immutable description of one watchable variable.
///
/// Descriptors are parsed once and shared across recursion contexts; the
/// mutable value slots live with each context.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDescriptor {
    pub name: String,
    pub scope: VarScope,
    pub location: VarLocation,
    pub byte_size: u64,
    pub type_class: TypeClass,
    pub encoding: Encoding,
    /// Present iff `type_class == TypeClass::Array`
    pub array: Option<ArrayShape>,
}

/// Source language of the compilation unit holding the target function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    C89,
    C99,
    C11,
    Other,
}

impl Language {
    pub fn is_supported(&self) -> bool {
        !matches!(self, Language::Other)
    }
}

/// Which storage classes to collect
#[derive(Debug, Clone, Copy)]
pub struct ScopeFilter {
    pub globals: bool,
    pub locals: bool,
}

impl Default for ScopeFilter {
    fn default() -> Self {
        Self {
            globals: true,
            locals: true,
        }
    }
}

/// Name-based watch or ignore filter; the two modes are mutually exclusive
#[derive(Debug, Clone, Default)]
pub enum WatchFilter {
    /// Track everything
    #[default]
    All,
    /// Track only the named variables
    Watch(HashSet<String>),
    /// Track everything except the named variables
    Ignore(HashSet<String>),
}

impl WatchFilter {
    pub fn allows(&self, name: &str) -> bool {
        match self {
            WatchFilter::All => true,
            WatchFilter::Watch(names) => names.contains(name),
            WatchFilter::Ignore(names) => !names.contains(name),
        }
    }
}

/// Owned, immutable product of one debug-info pass over the target ELF
#[derive(Debug)]
pub struct DebugFacts {
    pub function_name: String,
    pub function: FunctionSpan,
    pub variables: Vec<Arc<VarDescriptor>>,
    /// Line rows within the function range, ordered by address
    pub lines: Vec<LineRow>,
    /// DW_AT_comp_dir joined with DW_AT_name of the compilation unit
    pub source_path: Option<PathBuf>,
    pub language: Language,
}
