//! Variable discovery and type resolution
//!
//! Globals are `DW_TAG_variable` DIEs at the top level of any compilation
//! unit whose location is a single absolute address; locals and parameters
//! are direct children of the target subprogram whose location is a single
//! frame-base offset. A variable whose location or type cannot be expressed
//! this way is dropped with a diagnostic, never a session failure.

use std::sync::Arc;

use gimli::{AttributeValue, Operation, UnitOffset};
use gimli::Reader as _;
use tracing::{debug, warn};

use crate::facts::first_operation;
use crate::loader::Reader;
use crate::types::{MAX_DIMENSIONS, POINTER_WIDTH};
use crate::{
    ArrayShape, Encoding, Result, TypeClass, VarDescriptor, VarLocation, VarScope, WatchFilter,
};

type Unit = gimli::Unit<Reader>;
type Dwarf = gimli::Dwarf<Reader>;
type Die<'abbrev, 'unit> = gimli::DebuggingInformationEntry<'abbrev, 'unit, Reader>;

/// Collect static-storage variables from every compilation unit
pub(crate) fn collect_globals(
    dwarf: &Dwarf,
    filter: &WatchFilter,
    out: &mut Vec<Arc<VarDescriptor>>,
) -> Result<()> {
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;

        let mut tree = unit.entries_tree(None)?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(node) = children.next()? {
            let entry = node.entry();
            if entry.tag() != gimli::DW_TAG_variable {
                continue;
            }
            if let Some(var) = parse_variable(dwarf, &unit, entry, 0, filter)? {
                out.push(Arc::new(var));
            }
        }
    }
    Ok(())
}

/// Collect locals and parameters declared directly under the target
/// subprogram.
///
/// `frame_base` is folded into each frame-relative offset here, so the
/// stored location is plain base-pointer-relative at runtime. Statics
/// declared inside the function carry an absolute address and classify as
/// globals.
pub(crate) fn collect_locals(
    dwarf: &Dwarf,
    unit: &Unit,
    fn_offset: UnitOffset,
    frame_base: i64,
    filter: &WatchFilter,
    out: &mut Vec<Arc<VarDescriptor>>,
) -> Result<()> {
    let mut tree = unit.entries_tree(Some(fn_offset))?;
    let root = tree.root()?;
    let mut children = root.children();
    while let Some(node) = children.next()? {
        let entry = node.entry();
        if entry.tag() != gimli::DW_TAG_variable
            && entry.tag() != gimli::DW_TAG_formal_parameter
        {
            continue;
        }
        if let Some(var) = parse_variable(dwarf, unit, entry, frame_base, filter)? {
            out.push(Arc::new(var));
        }
    }
    Ok(())
}

/// Parse one variable DIE into a descriptor, or None when it is filtered
/// out or not expressible
fn parse_variable(
    dwarf: &Dwarf,
    unit: &Unit,
    entry: &Die,
    frame_base: i64,
    filter: &WatchFilter,
) -> Result<Option<VarDescriptor>> {
    let name = match entry.attr_value(gimli::DW_AT_name)? {
        Some(value) => dwarf.attr_string(unit, value)?.to_string_lossy()?.into_owned(),
        None => return Ok(None),
    };
    if !filter.allows(&name) {
        return Ok(None);
    }

    let (scope, location) = match parse_location(unit, entry, frame_base)? {
        Some(parsed) => parsed,
        None => {
            debug!("variable '{}' has no single-entry location, skipping", name);
            return Ok(None);
        }
    };

    let resolved = match resolve_type(unit, entry)? {
        Some(resolved) => resolved,
        None => {
            debug!("variable '{}' has an unsupported type, skipping", name);
            return Ok(None);
        }
    };

    // Aggregates are recognised but never live-watched.
    if matches!(resolved.class, TypeClass::Struct | TypeClass::Union) {
        debug!("variable '{}' is an aggregate, not watched", name);
        return Ok(None);
    }

    if resolved.class == TypeClass::Array {
        let shape = match array_shape(unit, resolved.offset)? {
            Some(shape) => shape,
            None => {
                debug!("array '{}' has an unsupported element or shape, skipping", name);
                return Ok(None);
            }
        };
        let byte_size = shape.element_size * shape.element_count();
        return Ok(Some(VarDescriptor {
            name,
            scope,
            location,
            byte_size,
            type_class: TypeClass::Array,
            encoding: shape_encoding(unit, resolved.offset)?,
            array: Some(shape),
        }));
    }

    let encoding = match resolved.encoding {
        Some(encoding) => encoding,
        None => {
            debug!("variable '{}' has an unsupported encoding, skipping", name);
            return Ok(None);
        }
    };

    Ok(Some(VarDescriptor {
        name,
        scope,
        location,
        byte_size: resolved.byte_size,
        type_class: resolved.class,
        encoding,
        array: None,
    }))
}

/// Decode a single-entry `DW_AT_location`.
///
/// `DW_OP_addr` means static storage, `DW_OP_fbreg` means stack storage
/// relative to the frame base. Anything else (location lists, register
/// residency) is rejected; the caller drops the variable.
fn parse_location(
    unit: &Unit,
    entry: &Die,
    frame_base: i64,
) -> Result<Option<(VarScope, VarLocation)>> {
    let expression = match entry.attr_value(gimli::DW_AT_location)? {
        Some(AttributeValue::Exprloc(expression)) => expression,
        Some(_) => {
            warn!("multi-entry location list; build the target with -O0");
            return Ok(None);
        }
        None => return Ok(None),
    };

    match first_operation(unit, &expression)? {
        Some(Operation::Address { address }) => {
            Ok(Some((VarScope::Global, VarLocation::Address(address))))
        }
        Some(Operation::FrameOffset { offset }) => Ok(Some((
            VarScope::Local,
            VarLocation::FrameOffset(offset + frame_base),
        ))),
        _ => {
            warn!("unsupported location operation; build the target with -O0");
            Ok(None)
        }
    }
}

/// Outcome of chasing a variable's type reference to its underlying DIE
struct ResolvedType {
    class: TypeClass,
    byte_size: u64,
    encoding: Option<Encoding>,
    /// Offset of the underlying (post-typedef) type DIE
    offset: UnitOffset,
}

/// Follow `DW_AT_type` through typedef links until a concrete type DIE and
/// classify it
fn resolve_type(unit: &Unit, entry: &Die) -> Result<Option<ResolvedType>> {
    let mut offset = match type_ref(unit, entry)? {
        Some(offset) => offset,
        None => return Ok(None),
    };

    let tag = loop {
        let die = unit.entry(offset)?;
        if die.tag() != gimli::DW_TAG_typedef {
            break die.tag();
        }
        offset = match type_ref(unit, &die)? {
            Some(next) => next,
            None => return Ok(None),
        };
    };

    let die = unit.entry(offset)?;
    match tag {
        gimli::DW_TAG_base_type => {
            let byte_size = match attr_udata(&die, gimli::DW_AT_byte_size)? {
                Some(size) => size,
                None => return Ok(None),
            };
            Ok(Some(ResolvedType {
                class: TypeClass::Scalar,
                byte_size,
                encoding: base_encoding(&die)?,
                offset,
            }))
        }
        gimli::DW_TAG_enumeration_type => {
            // Byte size is the only attribute both gcc and clang agree on
            // for enumerations; the value displays as unsigned.
            let byte_size = match attr_udata(&die, gimli::DW_AT_byte_size)? {
                Some(size) => size,
                None => return Ok(None),
            };
            Ok(Some(ResolvedType {
                class: TypeClass::Enum,
                byte_size,
                encoding: Some(Encoding::Unsigned),
                offset,
            }))
        }
        gimli::DW_TAG_structure_type | gimli::DW_TAG_union_type => {
            let class = if tag == gimli::DW_TAG_structure_type {
                TypeClass::Struct
            } else {
                TypeClass::Union
            };
            Ok(Some(ResolvedType {
                class,
                byte_size: attr_udata(&die, gimli::DW_AT_byte_size)?.unwrap_or(0),
                encoding: None,
                offset,
            }))
        }
        gimli::DW_TAG_pointer_type => {
            // Only the held address is watched, never the referent. clang
            // omits DW_AT_byte_size on pointers; fall back to the ABI width.
            let byte_size = attr_udata(&die, gimli::DW_AT_byte_size)?.unwrap_or(POINTER_WIDTH);
            Ok(Some(ResolvedType {
                class: TypeClass::Pointer,
                byte_size,
                encoding: Some(Encoding::Pointer),
                offset,
            }))
        }
        gimli::DW_TAG_array_type => Ok(Some(ResolvedType {
            class: TypeClass::Array,
            byte_size: 0,
            encoding: None,
            offset,
        })),
        _ => Ok(None),
    }
}

/// Resolve element type and per-dimension extents of an array type DIE.
///
/// Subrange children carry either `DW_AT_upper_bound` (gcc, offset by one
/// from the extent) or `DW_AT_count` (clang).
fn array_shape(unit: &Unit, array_offset: UnitOffset) -> Result<Option<ArrayShape>> {
    let array_die = unit.entry(array_offset)?;
    let element = match resolve_type(unit, &array_die)? {
        Some(element) => element,
        None => return Ok(None),
    };
    if !matches!(element.class, TypeClass::Scalar | TypeClass::Enum) {
        return Ok(None);
    }

    let mut extents = Vec::new();
    let mut tree = unit.entries_tree(Some(array_offset))?;
    let root = tree.root()?;
    let mut children = root.children();
    while let Some(node) = children.next()? {
        let child = node.entry();
        if child.tag() != gimli::DW_TAG_subrange_type {
            continue;
        }

        let extent = if let Some(bound) = attr_udata(child, gimli::DW_AT_upper_bound)? {
            bound + 1
        } else if let Some(count) = attr_udata(child, gimli::DW_AT_count)? {
            count
        } else {
            return Ok(None);
        };

        if extents.len() == MAX_DIMENSIONS {
            warn!("array exceeds {} dimensions", MAX_DIMENSIONS);
            return Ok(None);
        }
        extents.push(extent);
    }

    if extents.is_empty() {
        return Ok(None);
    }

    Ok(Some(ArrayShape {
        element_size: element.byte_size,
        element_class: element.class,
        extents,
    }))
}

/// Encoding of the array elements (the array DIE's own underlying type)
fn shape_encoding(unit: &Unit, array_offset: UnitOffset) -> Result<Encoding> {
    let array_die = unit.entry(array_offset)?;
    if let Some(element) = resolve_type(unit, &array_die)? {
        if let Some(encoding) = element.encoding {
            return Ok(encoding);
        }
    }
    Ok(Encoding::Unsigned)
}

/// Map `DW_AT_encoding` of a base type to the supported interpretations
fn base_encoding(die: &Die) -> Result<Option<Encoding>> {
    let ate = match die.attr_value(gimli::DW_AT_encoding)? {
        Some(AttributeValue::Encoding(ate)) => ate,
        _ => return Ok(None),
    };

    Ok(match ate {
        gimli::DW_ATE_signed | gimli::DW_ATE_signed_char => Some(Encoding::Signed),
        gimli::DW_ATE_unsigned | gimli::DW_ATE_unsigned_char | gimli::DW_ATE_boolean => {
            Some(Encoding::Unsigned)
        }
        gimli::DW_ATE_float => Some(Encoding::Float),
        _ => None,
    })
}

/// `DW_AT_type` reference of a DIE, resolved to an offset within the same
/// unit when possible
fn type_ref(unit: &Unit, entry: &Die) -> Result<Option<UnitOffset>> {
    match entry.attr_value(gimli::DW_AT_type)? {
        Some(AttributeValue::UnitRef(offset)) => Ok(Some(offset)),
        Some(AttributeValue::DebugInfoRef(offset)) => Ok(offset.to_unit_offset(&unit.header)),
        _ => Ok(None),
    }
}

/// Helper: an attribute decoded as unsigned data
fn attr_udata(entry: &Die, name: gimli::DwAt) -> Result<Option<u64>> {
    Ok(entry.attr_value(name)?.and_then(|value| value.udata_value()))
}
