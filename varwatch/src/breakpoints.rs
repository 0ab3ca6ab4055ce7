//! Breakpoint set management
//!
//! Breakpoints are one-byte `0xCC` traps keyed by address. Arming saves the
//! displaced byte; stepping over restores it, rewinds the program counter,
//! executes exactly the original instruction and re-plants the trap.

use std::collections::HashMap;

use tracing::{debug, trace};
use varwatch_analysis::PlannedBreakpoint;
use varwatch_dwarf::LineRow;
use varwatch_tracer::{Event, Result, Tracee, TRAP_OPCODE};

/// One armed (or to-be-armed) trap location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub addr: u64,
    /// Byte displaced by the trap opcode; 0 until first armed
    pub original_byte: u8,
    /// Source line of the statement, 0 for synthetic breakpoints
    pub line: u32,
}

/// The session's trap locations, unique by address
#[derive(Debug, Default)]
pub struct BreakpointSet {
    map: HashMap<u64, Breakpoint>,
}

impl BreakpointSet {
    /// Seed from every statement-start row of the line table.
    ///
    /// With `avoid_equal` (unsafe: a repeated source line may then report a
    /// neighbouring line number) only the first row of each distinct line
    /// number survives.
    pub fn from_lines(lines: &[LineRow], avoid_equal: bool) -> Self {
        let mut set = Self::default();
        let mut seen_lines = std::collections::HashSet::new();

        for row in lines {
            if !row.is_stmt {
                continue;
            }
            if avoid_equal && !seen_lines.insert(row.line) {
                continue;
            }
            set.insert(row.addr, row.line);
        }

        debug!("{} line breakpoints", set.len());
        set
    }

    /// Seed from a statically analysed breakpoint plan
    pub fn from_planned(planned: &[PlannedBreakpoint]) -> Self {
        let mut set = Self::default();
        for bp in planned {
            set.insert(bp.addr, bp.line);
        }
        debug!("{} planned breakpoints", set.len());
        set
    }

    /// Record a breakpoint without touching the tracee (armed later by
    /// `arm_all`)
    pub fn insert(&mut self, addr: u64, line: u32) {
        self.map.entry(addr).or_insert(Breakpoint {
            addr,
            original_byte: 0,
            line,
        });
    }

    /// Plant every recorded trap, saving the displaced bytes.
    ///
    /// A failure here is fatal for the session: an unarmed breakpoint means
    /// silently missed statements.
    pub fn arm_all(&mut self, tracee: &Tracee) -> Result<()> {
        for bp in self.map.values_mut() {
            let word = tracee.read_word(bp.addr)?;
            bp.original_byte = (word & 0xFF) as u8;
            let patched = (word & !0xFF) | TRAP_OPCODE as u64;
            tracee.write_word(bp.addr, patched)?;
            trace!("armed breakpoint at 0x{:x} (line {})", bp.addr, bp.line);
        }
        Ok(())
    }

    /// Idempotent insert-and-arm of a synthetic breakpoint (function entry,
    /// return address)
    pub fn ensure_at(&mut self, addr: u64, tracee: &Tracee) -> Result<()> {
        if self.map.contains_key(&addr) {
            return Ok(());
        }

        let word = tracee.read_word(addr)?;
        let bp = Breakpoint {
            addr,
            original_byte: (word & 0xFF) as u8,
            line: 0,
        };
        tracee.write_word(addr, (word & !0xFF) | TRAP_OPCODE as u64)?;
        self.map.insert(addr, bp);
        trace!("armed synthetic breakpoint at 0x{:x}", addr);
        Ok(())
    }

    /// Constant-time lookup; callers pass `pc - 1` because the trap leaves
    /// the program counter one past the trap byte. A miss is a normal
    /// outcome (signal unrelated to our traps).
    pub fn get(&self, addr: u64) -> Option<Breakpoint> {
        self.map.get(&addr).copied()
    }

    /// Execute the displaced instruction at `bp` and re-arm the trap.
    ///
    /// Restores the original byte, rewinds the program counter to the trap
    /// address, single-steps, waits for the stop and re-plants the trap.
    /// Returns `Event::Exited` when the tracee died on that instruction.
    pub fn step_over(&self, bp: &Breakpoint, tracee: &Tracee) -> Result<Event> {
        tracee.write_pc(bp.addr)?;

        let word = tracee.read_word(bp.addr)?;
        let restored = (word & !0xFF) | bp.original_byte as u64;
        tracee.write_word(bp.addr, restored)?;

        tracee.single_step()?;
        if tracee.wait()? == Event::Exited {
            return Ok(Event::Exited);
        }

        tracee.write_word(bp.addr, (restored & !0xFF) | TRAP_OPCODE as u64)?;
        Ok(Event::Stopped)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Breakpoints ordered by address, for the dump listing
    pub fn sorted(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self.map.values().copied().collect();
        all.sort_by_key(|bp| bp.addr);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(addr: u64, line: u32, is_stmt: bool) -> LineRow {
        LineRow {
            addr,
            line,
            is_stmt,
            end_sequence: false,
            basic_block: false,
        }
    }

    #[test]
    fn seeds_only_statement_rows() {
        let set = BreakpointSet::from_lines(
            &[row(0x10, 5, true), row(0x14, 5, false), row(0x18, 6, true)],
            false,
        );
        assert_eq!(set.len(), 2);
        assert!(set.get(0x10).is_some());
        assert!(set.get(0x14).is_none());
        assert!(set.get(0x18).is_some());
    }

    #[test]
    fn avoid_equal_keeps_first_per_line() {
        let set = BreakpointSet::from_lines(
            &[row(0x10, 5, true), row(0x20, 5, true), row(0x30, 6, true)],
            true,
        );
        assert_eq!(set.len(), 2);
        assert!(set.get(0x10).is_some());
        assert!(set.get(0x20).is_none());
        assert!(set.get(0x30).is_some());
    }

    #[test]
    fn duplicate_lines_kept_without_the_flag() {
        let set = BreakpointSet::from_lines(&[row(0x10, 5, true), row(0x20, 5, true)], false);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn insert_is_idempotent_by_address() {
        let mut set = BreakpointSet::default();
        set.insert(0x10, 5);
        set.insert(0x10, 9);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0x10).unwrap().line, 5);
    }

    #[test]
    fn lookup_misses_return_none() {
        let set = BreakpointSet::from_lines(&[row(0x10, 5, true)], false);
        assert!(set.get(0x11).is_none());
        assert!(set.get(0).is_none());
    }

    #[test]
    fn sorted_orders_by_address() {
        let set =
            BreakpointSet::from_lines(&[row(0x30, 7, true), row(0x10, 5, true)], false);
        let sorted = set.sorted();
        assert_eq!(sorted[0].addr, 0x10);
        assert_eq!(sorted[1].addr, 0x30);
    }
}
