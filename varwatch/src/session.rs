//! The watch session: one traced run of the target
//!
//! Drives the tracee from breakpoint to breakpoint. Function entry plants a
//! synthetic breakpoint on the caller's return address and, on recursive
//! re-entry, pushes a fresh variable context; the return address pops it
//! again. Every other hit diffs the watched variables against their stored
//! state and reports transitions under the previously executed line.

use anyhow::Context as _;
use tracing::{debug, info};
use varwatch_dwarf::DebugFacts;
use varwatch_tracer::{Event, TraceError, Tracee};

use crate::breakpoints::BreakpointSet;
use crate::output::Reporter;
use crate::variables::{self, WatchedVar};

/// One live invocation frame of the watched function
struct FunctionContext {
    vars: Vec<WatchedVar>,
    return_addr: u64,
}

impl FunctionContext {
    fn fresh(facts: &DebugFacts) -> Self {
        Self {
            vars: variables::build_watch_list(&facts.variables),
            return_addr: 0,
        }
    }
}

/// Session state owned by the watch loop
pub struct Session {
    facts: DebugFacts,
    breakpoints: BreakpointSet,
    reporter: Reporter,
    contexts: Vec<FunctionContext>,
    /// Number of entered-but-not-returned activations of the function
    live_depth: usize,
    /// Initialise variables on the next statement hit
    init_pending: bool,
    /// Line of the previously executed statement; changes observed now
    /// happened there
    prev_line: Option<u32>,
}

impl Session {
    pub fn new(facts: DebugFacts, breakpoints: BreakpointSet, reporter: Reporter) -> Self {
        let first = FunctionContext::fresh(&facts);
        Self {
            facts,
            breakpoints,
            reporter,
            contexts: vec![first],
            live_depth: 0,
            init_pending: false,
            prev_line: None,
        }
    }

    /// Spawn the target and run it to completion under the breakpoint set.
    ///
    /// Returns Ok however the tracee terminated; only setup failures (spawn,
    /// initial stop, arming) are errors.
    pub fn run(mut self, path: &str, argv: &[String]) -> anyhow::Result<()> {
        let tracee = Tracee::spawn(path, argv).context("failed to spawn the target")?;
        if tracee.wait().context("waiting for the initial stop")? == Event::Exited {
            anyhow::bail!("target exited before reaching its first instruction");
        }

        // The loop relies on seeing the function's first instruction.
        self.breakpoints.insert(self.facts.function.low_pc, 0);
        self.breakpoints
            .arm_all(&tracee)
            .context("failed to arm breakpoints")?;
        info!("{} breakpoints armed", self.breakpoints.len());

        self.reporter.banner(&self.facts.function_name);
        tracee.cont()?;

        while tracee.wait()? == Event::Stopped {
            match self.handle_stop(&tracee) {
                Ok(Event::Stopped) => tracee.cont()?,
                Ok(Event::Exited) => break,
                // Killed from outside between the stop and our next ptrace
                // call: a graceful end, not a failure.
                Err(error) if error.is_tracee_gone() => {
                    debug!("tracee vanished mid-session");
                    break;
                }
                Err(error) => return Err(error).context("watch loop failed"),
            }
        }

        debug!("tracee finished; tearing down");
        self.reporter.finished();
        Ok(())
    }

    /// Dispatch one observed stop; returns the tracee state afterwards
    fn handle_stop(&mut self, tracee: &Tracee) -> Result<Event, TraceError> {
        // The trap leaves the program counter one past the trap byte.
        let pc = tracee.read_pc()?.wrapping_sub(1);
        let Some(bp) = self.breakpoints.get(pc) else {
            // A stop we did not cause; not ours to handle.
            return Ok(Event::Stopped);
        };

        if pc == self.facts.function.low_pc {
            self.on_entry(tracee, pc)
        } else if pc == self.top().return_addr {
            self.on_return(tracee, pc)
        } else {
            self.on_statement(tracee, pc, bp.line)
        }
    }

    fn top(&self) -> &FunctionContext {
        self.contexts.last().expect("context stack is never empty")
    }

    /// First instruction of the function: bookkeeping only, nothing to diff
    /// yet
    fn on_entry(&mut self, tracee: &Tracee, pc: u64) -> Result<Event, TraceError> {
        if self.live_depth > 0 {
            // Recursive re-entry: fresh value slots over the shared
            // descriptors.
            debug!("recursive entry at depth {}", self.contexts.len() + 1);
            self.contexts.push(FunctionContext::fresh(&self.facts));
        }

        // The return address is still the word on top of the stack; a
        // breakpoint there tells entries and exits apart, which recursion
        // needs.
        let return_addr = tracee.read_return_address()?;
        self.contexts
            .last_mut()
            .expect("context stack is never empty")
            .return_addr = return_addr;
        self.breakpoints.ensure_at(return_addr, tracee)?;

        let bp = self.breakpoints.get(pc).expect("entry breakpoint exists");
        let outcome = self.breakpoints.step_over(&bp, tracee)?;

        self.live_depth += 1;
        self.init_pending = true;
        self.prev_line = Some(bp.line);
        Ok(outcome)
    }

    /// The caller's instruction right after the call: this activation is
    /// done
    fn on_return(&mut self, tracee: &Tracee, pc: u64) -> Result<Event, TraceError> {
        let depth = self.contexts.len();
        self.reporter.returning(depth);

        if self.contexts.len() > 1 {
            self.contexts.pop();
        } else {
            // The outermost context stays for a possible later call; its
            // array images are re-read on re-entry.
            for var in &mut self.contexts[0].vars {
                var.release_buffer();
            }
        }
        self.live_depth = self.live_depth.saturating_sub(1);

        let bp = self.breakpoints.get(pc).expect("return breakpoint exists");
        self.breakpoints.step_over(&bp, tracee)
    }

    /// An ordinary statement boundary inside the function
    fn on_statement(&mut self, tracee: &Tracee, pc: u64, line: u32) -> Result<Event, TraceError> {
        let depth = self.contexts.len();

        if self.init_pending {
            // First statement after the prologue: capture reference values,
            // nothing to compare against yet.
            self.init_pending = false;
            self.reporter.entering(depth);
            let context = self.contexts.last_mut().expect("context stack is never empty");
            variables::initialize(&mut context.vars, tracee);
        } else if let Some(prev_line) = self.prev_line {
            let context = self.contexts.last_mut().expect("context stack is never empty");
            variables::check_changes(
                &mut context.vars,
                tracee,
                prev_line,
                depth,
                &mut self.reporter,
            );
        }

        self.prev_line = Some(line);
        let bp = self.breakpoints.get(pc).expect("statement breakpoint exists");
        self.breakpoints.step_over(&bp, tracee)
    }
}
