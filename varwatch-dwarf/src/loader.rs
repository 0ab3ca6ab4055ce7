//! ELF loading and DWARF section access

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use object::{Object, ObjectKind, ObjectSection};
use tracing::debug;

use crate::{DwarfError, Result};

/// Reader over Arc-backed copies of the DWARF sections
pub(crate) type Reader = gimli::EndianArcSlice<gimli::LittleEndian>;

/// Mapped target file with its parsed DWARF sections
pub(crate) struct LoadedImage {
    pub dwarf: gimli::Dwarf<Reader>,
}

/// Map the target executable and load its DWARF sections.
///
/// Position-independent executables are refused up front: every address in
/// the debug information would need a runtime relocation this debugger does
/// not perform.
pub(crate) fn load(path: &Path) -> Result<LoadedImage> {
    let file = std::fs::File::open(path)?;
    let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
    let object = object::File::parse(&mmap[..])?;

    if object.kind() == ObjectKind::Dynamic {
        return Err(DwarfError::PieExecutable);
    }
    if !object.is_little_endian() {
        return Err(DwarfError::InvalidDwarf("big-endian images are not supported"));
    }

    let load_section = |id: gimli::SectionId| -> std::result::Result<Reader, gimli::Error> {
        let data = object
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(Cow::Borrowed(&[][..]));
        Ok(gimli::EndianArcSlice::new(
            Arc::from(data.as_ref()),
            gimli::LittleEndian,
        ))
    };

    let dwarf = gimli::Dwarf::load(load_section)?;
    debug!("loaded DWARF sections from {}", path.display());

    Ok(LoadedImage { dwarf })
}
