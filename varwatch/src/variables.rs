//! Live variable state: typed reads, first-touch detection and diffing
//!
//! Descriptors come from the debug-info pass and are shared across
//! recursion contexts; only the value slots here are per-context. A local's
//! stack slot holds garbage until its first real assignment, so the first
//! post-prologue read lands in a scratch value and comparisons run against
//! it until a difference proves the variable was initialised — reported
//! with a canonical zero as the "before".

use std::sync::Arc;

use tracing::{debug, warn};
use varwatch_dwarf::{Encoding, TypeClass, VarDescriptor, VarLocation};
use varwatch_tracer::{Result, Tracee};

use crate::compare::offmemcmp;
use crate::output::{Reporter, Transition};

/// Scalar storage: 16 bytes cover every supported width, long double
/// included
pub type ScalarBytes = [u8; 16];

/// Mutable per-context state of one watched variable
#[derive(Debug, Clone)]
pub struct WatchedVar {
    pub desc: Arc<VarDescriptor>,
    pub slot: Slot,
}

/// Value slot variants; arrays keep a whole byte image, scalars a pair of
/// last-known and scratch values
#[derive(Debug, Clone)]
pub enum Slot {
    Scalar {
        value: ScalarBytes,
        scratch: ScalarBytes,
        initialized: bool,
    },
    Buffer {
        data: Vec<u8>,
        initialized: bool,
    },
}

impl WatchedVar {
    fn fresh(desc: Arc<VarDescriptor>) -> Self {
        let slot = match desc.type_class {
            TypeClass::Array => Slot::Buffer {
                data: Vec::new(),
                initialized: false,
            },
            _ => Slot::Scalar {
                value: [0; 16],
                scratch: [0; 16],
                initialized: false,
            },
        };
        Self { desc, slot }
    }

    /// Drop the array image, keeping the descriptor (used when the
    /// outermost context is retired on function return)
    pub fn release_buffer(&mut self) {
        if let Slot::Buffer { data, initialized } = &mut self.slot {
            *data = Vec::new();
            *initialized = false;
        }
    }
}

/// Widths a scalar read supports
const SUPPORTED_WIDTHS: [u64; 5] = [1, 2, 4, 8, 16];

/// Build the mutable watch list for one function context.
///
/// Variables whose width cannot be read in one or two words are dropped
/// here with a diagnostic; the session continues without them.
pub fn build_watch_list(descriptors: &[Arc<VarDescriptor>]) -> Vec<WatchedVar> {
    let mut vars = Vec::with_capacity(descriptors.len());
    for desc in descriptors {
        let width = match &desc.array {
            Some(shape) => shape.element_size,
            None => desc.byte_size,
        };
        if !SUPPORTED_WIDTHS.contains(&width) {
            warn!(
                "variable '{}' has unsupported width {}, not watched",
                desc.name, width
            );
            continue;
        }
        vars.push(WatchedVar::fresh(Arc::clone(desc)));
    }
    vars
}

/// Runtime address of a variable: absolute for static storage, base-pointer
/// relative for stack storage
fn runtime_address(desc: &VarDescriptor, tracee: &Tracee) -> Result<u64> {
    match desc.location {
        VarLocation::Address(addr) => Ok(addr),
        VarLocation::FrameOffset(offset) => {
            let frame = tracee.read_frame_pointer()?;
            Ok((frame as i64 + offset) as u64)
        }
    }
}

/// Read a scalar of 1..=8 bytes in one word, 16 bytes in two
pub fn read_scalar(desc: &VarDescriptor, tracee: &Tracee) -> Result<ScalarBytes> {
    let addr = runtime_address(desc, tracee)?;
    let mut bytes = [0u8; 16];

    bytes[..8].copy_from_slice(&tracee.read_word(addr)?.to_le_bytes());
    if desc.byte_size == 16 {
        bytes[8..].copy_from_slice(&tracee.read_word(addr + 8)?.to_le_bytes());
    }

    Ok(bytes)
}

/// Read an array's whole byte image
pub fn read_buffer(desc: &VarDescriptor, tracee: &Tracee) -> Result<Vec<u8>> {
    let addr = runtime_address(desc, tracee)?;
    tracee.read_bytes(addr, desc.byte_size as usize)
}

/// First read after the function prologue.
///
/// Globals and arrays are considered initialised immediately; a local's
/// read lands in its scratch value because the stack slot may still hold
/// garbage.
pub fn initialize(vars: &mut [WatchedVar], tracee: &Tracee) {
    for var in vars.iter_mut() {
        match &mut var.slot {
            Slot::Scalar {
                value,
                scratch,
                initialized,
            } => match read_scalar(&var.desc, tracee) {
                Ok(bytes) => {
                    if var.desc.scope == varwatch_dwarf::VarScope::Global {
                        *value = bytes;
                        *initialized = true;
                    } else {
                        *scratch = bytes;
                        *initialized = false;
                    }
                }
                Err(error) => debug!("cannot initialise '{}': {}", var.desc.name, error),
            },
            Slot::Buffer { data, initialized } => match read_buffer(&var.desc, tracee) {
                Ok(bytes) => {
                    *data = bytes;
                    *initialized = true;
                }
                Err(error) => debug!("cannot initialise '{}': {}", var.desc.name, error),
            },
        }
    }
}

/// Compare every watched variable against its stored state and report the
/// differences at `line`.
///
/// A variable whose storage cannot be read right now is skipped for this
/// hit only.
pub fn check_changes(
    vars: &mut [WatchedVar],
    tracee: &Tracee,
    line: u32,
    depth: usize,
    reporter: &mut Reporter,
) {
    for var in vars.iter_mut() {
        match &mut var.slot {
            Slot::Scalar {
                value,
                scratch,
                initialized,
            } => {
                let current = match read_scalar(&var.desc, tracee) {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        debug!("skipping '{}' on this hit: {}", var.desc.name, error);
                        continue;
                    }
                };
                let width = var.desc.byte_size as usize;

                if !*initialized {
                    if current[..width] != scratch[..width] {
                        *initialized = true;
                        *value = current;
                        // The garbage scratch is replaced by a canonical
                        // zero so the report reads "before: 0".
                        *scratch = [0; 16];
                        reporter.scalar_change(
                            depth,
                            line,
                            &var.desc,
                            Transition::Initialized,
                            &format_value(&scratch[..width], var.desc.encoding),
                            &format_value(&current[..width], var.desc.encoding),
                        );
                    }
                    continue;
                }

                if current[..width] != value[..width] {
                    reporter.scalar_change(
                        depth,
                        line,
                        &var.desc,
                        Transition::Changed,
                        &format_value(&value[..width], var.desc.encoding),
                        &format_value(&current[..width], var.desc.encoding),
                    );
                    *value = current;
                }
            }
            Slot::Buffer { data, initialized } => {
                let shape = match &var.desc.array {
                    Some(shape) => shape,
                    None => continue,
                };
                let fresh = match read_buffer(&var.desc, tracee) {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        debug!("skipping '{}' on this hit: {}", var.desc.name, error);
                        continue;
                    }
                };

                if !*initialized || data.len() != fresh.len() {
                    *data = fresh;
                    *initialized = true;
                    continue;
                }

                let element = shape.element_size as usize;
                let mut base = 0usize;
                while let Some(relative) = offmemcmp(&data[base..], &fresh[base..], element) {
                    let offset = base + relative;
                    let linear = (offset / element) as u64;
                    let indices = element_indices(linear, &shape.extents);
                    reporter.array_change(
                        depth,
                        line,
                        &var.desc,
                        &indices,
                        &format_value(&data[offset..offset + element], var.desc.encoding),
                        &format_value(&fresh[offset..offset + element], var.desc.encoding),
                    );
                    base = offset + element;
                }

                *data = fresh;
            }
        }
    }
}

/// Map a linear element index back to row-major N-dimensional indices
/// (last index fastest, matching C layout)
pub fn element_indices(linear: u64, extents: &[u64]) -> Vec<u64> {
    let mut indices = vec![0u64; extents.len()];
    let mut remaining = linear;
    for i in (0..extents.len()).rev() {
        indices[i] = remaining % extents[i];
        remaining /= extents[i];
    }
    indices
}

/// Render a value per its encoding and width.
///
/// Signed/unsigned in decimal, floats per width (the 16-byte case is the
/// x87 80-bit extended format), pointers in hex. Printable single bytes
/// also show the character.
pub fn format_value(bytes: &[u8], encoding: Encoding) -> String {
    let width = bytes.len();
    match encoding {
        Encoding::Signed => match width {
            1 => {
                let v = bytes[0] as i8;
                format_byte(v as i64, bytes[0])
            }
            2 => i16::from_le_bytes(bytes.try_into().unwrap()).to_string(),
            4 => i32::from_le_bytes(bytes.try_into().unwrap()).to_string(),
            8 => i64::from_le_bytes(bytes.try_into().unwrap()).to_string(),
            _ => "?".to_string(),
        },
        Encoding::Unsigned => match width {
            1 => format_byte(bytes[0] as i64, bytes[0]),
            2 => u16::from_le_bytes(bytes.try_into().unwrap()).to_string(),
            4 => u32::from_le_bytes(bytes.try_into().unwrap()).to_string(),
            8 => u64::from_le_bytes(bytes.try_into().unwrap()).to_string(),
            _ => "?".to_string(),
        },
        Encoding::Float => match width {
            4 => format!("{:?}", f32::from_le_bytes(bytes.try_into().unwrap())),
            8 => format!("{:?}", f64::from_le_bytes(bytes.try_into().unwrap())),
            16 => format!("{:?}", extended_to_f64(bytes)),
            _ => "?".to_string(),
        },
        Encoding::Pointer => match width {
            4 => format!("0x{:x}", u32::from_le_bytes(bytes.try_into().unwrap())),
            8 => format!("0x{:x}", u64::from_le_bytes(bytes.try_into().unwrap())),
            _ => "?".to_string(),
        },
    }
}

fn format_byte(value: i64, raw: u8) -> String {
    if raw.is_ascii_graphic() || raw == b' ' {
        format!("{} ('{}')", value, raw as char)
    } else {
        value.to_string()
    }
}

/// Convert an x87 80-bit extended double (stored little-endian in 16
/// bytes) to the nearest f64 for display.
///
/// Layout: 64-bit significand with an explicit integer bit, then a 15-bit
/// biased exponent and the sign.
fn extended_to_f64(bytes: &[u8]) -> f64 {
    let mantissa = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let sign_exponent = u16::from_le_bytes(bytes[8..10].try_into().unwrap());

    let sign = if sign_exponent & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = (sign_exponent & 0x7FFF) as i32;

    if exponent == 0 && mantissa == 0 {
        return sign * 0.0;
    }
    if exponent == 0x7FFF {
        return if mantissa << 1 == 0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        };
    }

    // value = mantissa * 2^(exponent - 16383 - 63)
    sign * mantissa as f64 * 2f64.powi(exponent - 16383 - 63)
}
