//! One-pass extraction of the facts the watch loop needs
//!
//! Everything is resolved up front — function range, frame convention,
//! variables, line table, source path, language — into an owned
//! [`DebugFacts`] value. Nothing here keeps the DWARF sections alive past
//! the pass.

use std::path::{Path, PathBuf};

use gimli::{AttributeValue, Operation, UnitOffset};
use gimli::Reader as _;
use tracing::{debug, warn};

use crate::loader::{self, Reader};
use crate::types::FRAME_BASE_REG;
use crate::variables;
use crate::{
    DebugFacts, DwarfError, FunctionSpan, Language, LineRow, Result, ScopeFilter, WatchFilter,
};

type Unit = gimli::Unit<Reader>;
type Dwarf = gimli::Dwarf<Reader>;

impl DebugFacts {
    /// Resolve every static fact about `function` inside the executable at
    /// `path`.
    ///
    /// Fails with `FunctionNotFound` when no subprogram DIE carries the
    /// name, `NoFramePointer` when the function has no usable frame-base
    /// convention, and `PieExecutable` before any DWARF work when the image
    /// is position-independent.
    pub fn analyze(
        path: &Path,
        function: &str,
        scope: ScopeFilter,
        filter: &WatchFilter,
    ) -> Result<DebugFacts> {
        let image = loader::load(path)?;
        let dwarf = &image.dwarf;

        let (unit, fn_offset, span) = find_function(dwarf, function)?;
        debug!(
            "function '{}' at 0x{:x}..=0x{:x}",
            function, span.low_pc, span.high_pc
        );

        let frame_base_offset = frame_base_offset(dwarf, &unit, fn_offset)?;
        let span = FunctionSpan {
            frame_base_offset,
            ..span
        };
        debug!("frame base offset {}", frame_base_offset);

        let language = unit_language(&unit)?;
        let source_path = source_path(&unit);

        let mut vars = Vec::new();
        if scope.globals {
            variables::collect_globals(dwarf, filter, &mut vars)?;
        }
        if scope.locals {
            variables::collect_locals(dwarf, &unit, fn_offset, frame_base_offset, filter, &mut vars)?;
        }
        debug!("{} watchable variables", vars.len());

        let lines = function_lines(&unit, &span)?;
        debug!("{} line rows inside the function range", lines.len());

        Ok(DebugFacts {
            function_name: function.to_string(),
            function: span,
            variables: vars,
            lines,
            source_path,
            language,
        })
    }
}

/// Scan every compilation unit for a subprogram DIE named `function` and
/// return its unit, DIE offset and instruction range.
///
/// `DW_AT_high_pc` is accepted in both the address form and the DWARF-4
/// data form (offset from `low_pc`); the stored `high_pc` is made inclusive
/// by subtracting one.
fn find_function(dwarf: &Dwarf, function: &str) -> Result<(Unit, UnitOffset, FunctionSpan)> {
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;

        let mut found: Option<(UnitOffset, FunctionSpan)> = None;
        {
            let mut tree = unit.entries_tree(None)?;
            let root = tree.root()?;
            let mut children = root.children();
            while let Some(node) = children.next()? {
                let entry = node.entry();
                if entry.tag() != gimli::DW_TAG_subprogram {
                    continue;
                }

                let name = match entry.attr_value(gimli::DW_AT_name)? {
                    Some(value) => {
                        dwarf.attr_string(&unit, value)?.to_string_lossy()?.into_owned()
                    }
                    None => continue,
                };
                if name != function {
                    continue;
                }

                let mut low_pc = None;
                let mut high_pc = None;
                let mut high_pc_offset = None;
                let mut attrs = entry.attrs();
                while let Some(attr) = attrs.next()? {
                    match attr.name() {
                        gimli::DW_AT_low_pc => {
                            if let AttributeValue::Addr(addr) = attr.value() {
                                low_pc = Some(addr);
                            }
                        }
                        gimli::DW_AT_high_pc => match attr.value() {
                            AttributeValue::Addr(addr) => high_pc = Some(addr),
                            AttributeValue::Udata(offset) => high_pc_offset = Some(offset),
                            AttributeValue::Data1(offset) => high_pc_offset = Some(offset as u64),
                            AttributeValue::Data2(offset) => high_pc_offset = Some(offset as u64),
                            AttributeValue::Data4(offset) => high_pc_offset = Some(offset as u64),
                            AttributeValue::Data8(offset) => high_pc_offset = Some(offset),
                            _ => {}
                        },
                        _ => {}
                    }
                }

                let low = match low_pc {
                    Some(low) => low,
                    None => continue,
                };
                let high = match (high_pc, high_pc_offset) {
                    (Some(high), _) => high,
                    (None, Some(offset)) => low + offset,
                    (None, None) => continue,
                };
                if high <= low {
                    continue;
                }

                found = Some((
                    entry.offset(),
                    FunctionSpan {
                        low_pc: low,
                        high_pc: high - 1,
                        frame_base_offset: 0,
                    },
                ));
                break;
            }
        }

        if let Some((offset, span)) = found {
            return Ok((unit, offset, span));
        }
    }

    Err(DwarfError::FunctionNotFound(function.to_string()))
}

/// Read the function's `DW_AT_frame_base` and derive the base-pointer
/// offset for locals.
///
/// Two compiler conventions are accepted: a location list whose entries
/// relate address ranges to expressions, where the `DW_OP_breg<bp>` entry
/// carries the offset (gcc with -gdwarf-2), and a single direct
/// `DW_OP_reg<bp>` expression meaning offset zero (clang).
fn frame_base_offset(dwarf: &Dwarf, unit: &Unit, fn_offset: UnitOffset) -> Result<i64> {
    let entry = unit.entry(fn_offset)?;
    let attr = match entry.attr_value(gimli::DW_AT_frame_base)? {
        Some(attr) => attr,
        None => return Err(DwarfError::NoFramePointer),
    };

    if let Some(mut locations) = dwarf.attr_locations(unit, attr.clone())? {
        while let Some(location) = locations.next()? {
            match first_operation(unit, &location.data)? {
                Some(Operation::Register { register }) if register.0 == FRAME_BASE_REG => {
                    return Ok(0);
                }
                Some(Operation::RegisterOffset { register, offset, .. })
                    if register.0 == FRAME_BASE_REG =>
                {
                    return Ok(offset);
                }
                _ => {}
            }
        }
        return Err(DwarfError::NoFramePointer);
    }

    if let AttributeValue::Exprloc(expression) = attr {
        match first_operation(unit, &expression)? {
            Some(Operation::Register { register }) if register.0 == FRAME_BASE_REG => {
                return Ok(0);
            }
            Some(Operation::RegisterOffset { register, offset, .. })
                if register.0 == FRAME_BASE_REG =>
            {
                return Ok(offset);
            }
            _ => {}
        }
    }

    Err(DwarfError::NoFramePointer)
}

/// Decode the first operation of a DWARF expression
pub(crate) fn first_operation(
    unit: &Unit,
    expression: &gimli::Expression<Reader>,
) -> Result<Option<Operation<Reader>>> {
    let mut operations = expression.clone().operations(unit.encoding());
    Ok(operations.next()?)
}

/// Map the compilation unit's `DW_AT_language` to the supported set
fn unit_language(unit: &Unit) -> Result<Language> {
    let mut cursor = unit.entries();
    let root = match cursor.next_dfs()? {
        Some((_, root)) => root,
        None => return Err(DwarfError::InvalidDwarf("compilation unit has no root DIE")),
    };

    let language = match root.attr_value(gimli::DW_AT_language)? {
        Some(AttributeValue::Language(language)) => language,
        _ => return Ok(Language::Other),
    };

    Ok(match language {
        gimli::DW_LANG_C | gimli::DW_LANG_C89 => Language::C89,
        gimli::DW_LANG_C99 => Language::C99,
        gimli::DW_LANG_C11 => Language::C11,
        other => {
            warn!("compilation unit language {:?} is not C", other);
            Language::Other
        }
    })
}

/// `DW_AT_comp_dir` joined with the unit's `DW_AT_name`
fn source_path(unit: &Unit) -> Option<PathBuf> {
    let name = unit.name.as_ref()?.to_string_lossy().ok()?.into_owned();
    match unit.comp_dir.as_ref() {
        Some(dir) => {
            let dir = dir.to_string_lossy().ok()?.into_owned();
            Some(PathBuf::from(dir).join(name))
        }
        None => Some(PathBuf::from(name)),
    }
}

/// Run the unit's line program and keep the rows inside the function range,
/// ordered by address
fn function_lines(unit: &Unit, span: &FunctionSpan) -> Result<Vec<LineRow>> {
    let program = match unit.line_program.clone() {
        Some(program) => program,
        None => return Err(DwarfError::InvalidDwarf("compilation unit has no line program")),
    };

    let mut lines = Vec::new();
    let mut rows = program.rows();
    while let Some((_, row)) = rows.next_row()? {
        if !span.contains(row.address()) {
            continue;
        }
        lines.push(LineRow {
            addr: row.address(),
            line: row.line().map(|l| l.get() as u32).unwrap_or(0),
            is_stmt: row.is_stmt(),
            end_sequence: row.end_sequence(),
            basic_block: row.basic_block(),
        });
    }

    lines.sort_by_key(|row| row.addr);
    Ok(lines)
}
