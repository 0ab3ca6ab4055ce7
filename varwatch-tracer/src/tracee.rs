//! A child process driven under ptrace
//!
//! The tracee is spawned with `fork` + `PTRACE_TRACEME` + `execv` and owned
//! by exactly one thread for its whole life. Every operation here is
//! synchronous; between two stops nothing else observes the child's address
//! space, so read-modify-write patching of trap bytes behaves atomically.

use std::ffi::CString;
use std::io::IoSliceMut;

use nix::sys::ptrace::{self, AddressType};
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execv, fork, ForkResult, Pid};
use tracing::{debug, trace, warn};

use crate::arch::RegisterFile;
use crate::{Result, TraceError};

/// Observed state change of the tracee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Stopped by a signal (breakpoint trap included)
    Stopped,
    /// Terminated, normally or by signal
    Exited,
}

/// Handle to a process being traced
#[derive(Debug)]
pub struct Tracee {
    pid: Pid,
}

impl Tracee {
    /// Fork and exec `path` with `argv` under tracing.
    ///
    /// The child stops on the first instruction after `execve`; callers must
    /// `wait()` for that stop before touching its memory.
    pub fn spawn(path: &str, argv: &[String]) -> Result<Self> {
        let c_path = CString::new(path).map_err(|_| TraceError::Spawn {
            path: path.to_string(),
            source: nix::errno::Errno::EINVAL,
        })?;
        let c_argv: Vec<CString> = argv
            .iter()
            .filter_map(|a| CString::new(a.as_str()).ok())
            .collect();

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!("spawned tracee pid {}", child);
                Ok(Self { pid: child })
            }
            Ok(ForkResult::Child) => {
                // In the child: request tracing and become the target image.
                // Nothing here may return; on failure the child must die.
                if ptrace::traceme().is_err() {
                    unsafe { libc::_exit(127) };
                }
                let _ = execv(&c_path, &c_argv);
                unsafe { libc::_exit(127) };
            }
            Err(errno) => Err(TraceError::Spawn {
                path: path.to_string(),
                source: errno,
            }),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the next state change of the tracee
    pub fn wait(&self) -> Result<Event> {
        match waitpid(self.pid, None).map_err(TraceError::Wait)? {
            WaitStatus::Exited(_, code) => {
                debug!("tracee exited with status {}", code);
                Ok(Event::Exited)
            }
            WaitStatus::Signaled(_, signal, _) => {
                debug!("tracee killed by {:?}", signal);
                Ok(Event::Exited)
            }
            status => {
                trace!("tracee stopped: {:?}", status);
                Ok(Event::Stopped)
            }
        }
    }

    /// Resume the tracee until the next signal
    pub fn cont(&self) -> Result<()> {
        ptrace::cont(self.pid, None).map_err(|e| TraceError::Ptrace {
            op: "PTRACE_CONT",
            source: e,
        })
    }

    /// Execute exactly one instruction
    pub fn single_step(&self) -> Result<()> {
        ptrace::step(self.pid, None).map_err(|e| TraceError::Ptrace {
            op: "PTRACE_SINGLESTEP",
            source: e,
        })
    }

    /// Deliver SIGKILL; the next `wait` observes `Exited`
    pub fn kill(&self) -> Result<()> {
        warn!("killing tracee pid {}", self.pid);
        ptrace::kill(self.pid).map_err(|e| TraceError::Ptrace {
            op: "PTRACE_KILL",
            source: e,
        })
    }

    fn registers(&self) -> Result<libc::user_regs_struct> {
        ptrace::getregs(self.pid).map_err(|e| TraceError::Ptrace {
            op: "PTRACE_GETREGS",
            source: e,
        })
    }

    /// Current program counter
    pub fn read_pc(&self) -> Result<u64> {
        Ok(self.registers()?.program_counter())
    }

    /// Rewrite the program counter, leaving every other register untouched
    pub fn write_pc(&self, value: u64) -> Result<()> {
        let mut regs = self.registers()?;
        regs.set_program_counter(value);
        ptrace::setregs(self.pid, regs).map_err(|e| TraceError::Ptrace {
            op: "PTRACE_SETREGS",
            source: e,
        })
    }

    /// Current base pointer (RBP/EBP)
    pub fn read_frame_pointer(&self) -> Result<u64> {
        Ok(self.registers()?.frame_pointer())
    }

    /// Return address of the function just entered.
    ///
    /// Valid only immediately after the function's first instruction, while
    /// the return address is still the word at the top of the stack.
    pub fn read_return_address(&self) -> Result<u64> {
        let sp = self.registers()?.stack_pointer();
        self.read_word(sp)
    }

    /// Read one 64-bit word of tracee memory
    #[cfg(target_pointer_width = "64")]
    pub fn read_word(&self, addr: u64) -> Result<u64> {
        let word = ptrace::read(self.pid, addr as AddressType).map_err(|e| TraceError::Memory {
            op: "peek",
            addr,
            source: e,
        })?;
        Ok(word as u64)
    }

    /// Read one 64-bit word of tracee memory (two 32-bit peeks, little-endian)
    #[cfg(target_pointer_width = "32")]
    pub fn read_word(&self, addr: u64) -> Result<u64> {
        let lo = ptrace::read(self.pid, addr as AddressType).map_err(|e| TraceError::Memory {
            op: "peek",
            addr,
            source: e,
        })? as u32;
        let hi = ptrace::read(self.pid, (addr + 4) as AddressType).map_err(|e| {
            TraceError::Memory {
                op: "peek",
                addr: addr + 4,
                source: e,
            }
        })? as u32;
        Ok((lo as u64) | ((hi as u64) << 32))
    }

    /// Write one 64-bit word of tracee memory
    #[cfg(target_pointer_width = "64")]
    pub fn write_word(&self, addr: u64, value: u64) -> Result<()> {
        ptrace::write(self.pid, addr as AddressType, value as libc::c_long).map_err(|e| {
            TraceError::Memory {
                op: "poke",
                addr,
                source: e,
            }
        })
    }

    /// Write one 64-bit word of tracee memory (two 32-bit pokes, little-endian)
    #[cfg(target_pointer_width = "32")]
    pub fn write_word(&self, addr: u64, value: u64) -> Result<()> {
        ptrace::write(
            self.pid,
            addr as AddressType,
            (value & 0xFFFF_FFFF) as libc::c_long,
        )
        .map_err(|e| TraceError::Memory {
            op: "poke",
            addr,
            source: e,
        })?;
        ptrace::write(
            self.pid,
            (addr + 4) as AddressType,
            ((value >> 32) & 0xFFFF_FFFF) as libc::c_long,
        )
        .map_err(|e| TraceError::Memory {
            op: "poke",
            addr: addr + 4,
            source: e,
        })
    }

    /// Read an arbitrary span of tracee memory.
    ///
    /// Prefers `process_vm_readv`, which moves the whole span in one
    /// syscall; falls back to a word-at-a-time peek loop when the kernel or
    /// the address range refuses the fast path.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];

        let remote = [RemoteIoVec {
            base: addr as usize,
            len,
        }];
        let mut local = [IoSliceMut::new(&mut buf)];
        match process_vm_readv(self.pid, &mut local, &remote) {
            Ok(n) if n == len => return Ok(buf),
            Ok(n) => {
                trace!("short process_vm_readv ({} of {} bytes), using peeks", n, len);
            }
            Err(e) => {
                trace!("process_vm_readv failed ({}), using peeks", e);
            }
        }

        self.read_bytes_slow(addr, &mut buf)?;
        Ok(buf)
    }

    /// Word-at-a-time fallback for `read_bytes`
    fn read_bytes_slow(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        const WORD: usize = std::mem::size_of::<libc::c_long>();

        let mut offset = 0usize;
        while offset + WORD <= buf.len() {
            let word = ptrace::read(self.pid, (addr + offset as u64) as AddressType).map_err(
                |e| TraceError::Memory {
                    op: "peek",
                    addr: addr + offset as u64,
                    source: e,
                },
            )?;
            buf[offset..offset + WORD].copy_from_slice(&word.to_le_bytes());
            offset += WORD;
        }

        let tail = buf.len() - offset;
        if tail != 0 {
            let word = ptrace::read(self.pid, (addr + offset as u64) as AddressType).map_err(
                |e| TraceError::Memory {
                    op: "peek",
                    addr: addr + offset as u64,
                    source: e,
                },
            )?;
            buf[offset..].copy_from_slice(&word.to_le_bytes()[..tail]);
        }

        Ok(())
    }
}
