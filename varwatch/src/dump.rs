//! One-shot summary of the gathered debug information
//!
//! Backs `--dump-all`: prints the facts and the computed breakpoint list,
//! without spawning the target.

use std::io::Write;

use varwatch_dwarf::{DebugFacts, TypeClass, VarLocation};

use crate::breakpoints::BreakpointSet;

pub fn write_summary(
    out: &mut dyn Write,
    facts: &DebugFacts,
    breakpoints: &BreakpointSet,
) -> std::io::Result<()> {
    match &facts.source_path {
        Some(path) => writeln!(out, "Filename: {}", path.display())?,
        None => writeln!(out, "Filename: (unknown)")?,
    }
    writeln!(
        out,
        "Function: {} at 0x{:x}..=0x{:x} (frame base offset {})",
        facts.function_name,
        facts.function.low_pc,
        facts.function.high_pc,
        facts.function.frame_base_offset
    )?;

    writeln!(out, "\nVariables:")?;
    for var in &facts.variables {
        writeln!(out, "Variable found: {}", var.name)?;
        writeln!(out, "  Scope: {:?}", var.scope)?;
        match var.location {
            VarLocation::Address(addr) => writeln!(out, "  Location: 0x{:x}", addr)?,
            VarLocation::FrameOffset(offset) => writeln!(out, "  Location: {}", offset)?,
        }
        writeln!(out, "  Size (bytes): {}", var.byte_size)?;
        writeln!(out, "  Type: {:?} / {:?}", var.type_class, var.encoding)?;
        if var.type_class == TypeClass::Array {
            if let Some(shape) = &var.array {
                let dims: Vec<String> =
                    shape.extents.iter().map(|e| format!("[{}]", e)).collect();
                writeln!(
                    out,
                    "  Array ({} dimensions) (size per element: {}): {}",
                    shape.extents.len(),
                    shape.element_size,
                    dims.join("")
                )?;
            }
        }
    }

    writeln!(out, "\nLines:")?;
    for row in &facts.lines {
        let mut kind = String::new();
        if row.is_stmt {
            kind.push_str(" stmt");
        }
        if row.end_sequence {
            kind.push_str(" end-seq");
        }
        if row.basic_block {
            kind.push_str(" block");
        }
        writeln!(
            out,
            "    line: {:03} / address: 0x{:x} /{}",
            row.line, row.addr, kind
        )?;
    }

    writeln!(out, "\nBreakpoint list:")?;
    for (index, bp) in breakpoints.sorted().iter().enumerate() {
        writeln!(
            out,
            "    Breakpoint #{:03}, line: {:03} / addr: 0x{:x}",
            index, bp.line, bp.addr
        )?;
    }

    Ok(())
}
