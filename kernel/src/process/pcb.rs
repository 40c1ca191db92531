//! Process control block placement and lookup.
//!
//! Each of the six slots owns an 8 KiB kernel stack carved out of the top
//! of the kernel 4 MiB page; the PCB sits at the base of that region and
//! the stack grows down toward it from the top. Because the regions are
//! 8 KiB-aligned, masking any kernel stack address with `PCB_MASK` yields
//! the owning PCB, which makes "current process" implicit in the
//! executing stack and survives any nested kernel call. That alignment is
//! a placement invariant, not a convenience.

use crate::arch::context::Context;
use crate::fs::file::FdTable;
use crate::mm::layout::{KERNEL_STACK_SIZE, KERNEL_TOP, PCB_MASK};

/// Capacity of the PCB's argument buffer.
pub const MAX_ARGS: usize = 100;

/// Fixed-size argument string stored in the PCB by execute and copied out
/// by getargs.
#[derive(Debug, Clone, Copy)]
pub struct ArgBuffer {
    bytes: [u8; MAX_ARGS],
    len: usize,
}

impl ArgBuffer {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; MAX_ARGS],
            len: 0,
        }
    }

    /// Store the argument string, truncating at the buffer's capacity.
    pub fn set(&mut self, args: &[u8]) {
        let len = args.len().min(MAX_ARGS);
        self.bytes[..len].copy_from_slice(&args[..len]);
        self.len = len;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Per-process kernel state, resident at the base of the process's 8 KiB
/// kernel stack region.
pub struct Pcb {
    /// The eight-entry file descriptor table.
    pub fds: FdTable,
    /// This process's slot (0..=5).
    pub slot: usize,
    /// Parent's slot; equal to `slot` for a terminal's root process.
    pub parent_slot: usize,
    /// Owning terminal (0..=2).
    pub terminal: usize,
    /// Arguments parsed from the execute command.
    pub args: ArgBuffer,
    /// The parent's suspended execute frame; halt resumes it with the
    /// exit status.
    pub exec_resume: Context,
    /// Saved registers for scheduler-driven switches.
    pub sched_ctx: Context,
}

impl Pcb {
    /// A freshly initialized PCB for `slot`, owned by `terminal`.
    pub fn fresh(slot: usize, parent_slot: usize, terminal: usize) -> Self {
        let mut fds = FdTable::new();
        fds.open_standard_streams();
        Self {
            fds,
            slot,
            parent_slot,
            terminal,
            args: ArgBuffer::empty(),
            exec_resume: Context::zeroed(),
            sched_ctx: Context::zeroed(),
        }
    }
}

/// Base address of slot's PCB: `8 MiB - (slot + 1) * 8 KiB`.
pub const fn pcb_address(slot: usize) -> usize {
    KERNEL_TOP - (slot + 1) * KERNEL_STACK_SIZE
}

/// Initial kernel stack pointer for a slot, just under the region top.
pub const fn kernel_stack_top(slot: usize) -> usize {
    KERNEL_TOP - slot * KERNEL_STACK_SIZE - 4
}

/// Owning PCB of any address inside a process kernel stack.
pub const fn pcb_from_stack(stack_address: usize) -> usize {
    stack_address & PCB_MASK
}

/// The PCB of slot, by fixed placement.
///
/// Returns a raw pointer: PCBs live outside Rust's allocation world and
/// are aliased by design (the current process reaches its own PCB through
/// the stack mask while the scheduler reaches it by slot).
pub fn for_slot(slot: usize) -> *mut Pcb {
    pcb_address(slot) as *mut Pcb
}

/// The PCB owning the currently executing kernel stack.
#[cfg(target_arch = "x86")]
pub fn current() -> *mut Pcb {
    pcb_from_stack(crate::arch::x86::read_esp() as usize) as *mut Pcb
}

#[cfg(not(target_arch = "x86"))]
pub fn current() -> *mut Pcb {
    unreachable!("no process context on the host")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcbs_sit_at_the_top_of_the_kernel_page() {
        assert_eq!(pcb_address(0), 0x80_0000 - 0x2000);
        assert_eq!(pcb_address(5), 0x80_0000 - 6 * 0x2000);
    }

    #[test]
    fn stack_tops_leave_room_for_the_first_push() {
        assert_eq!(kernel_stack_top(0), 0x80_0000 - 4);
        assert_eq!(kernel_stack_top(1), 0x80_0000 - 0x2000 - 4);
    }

    #[test]
    fn any_stack_address_masks_to_its_pcb() {
        for slot in 0..crate::process::MAX_PROCESSES {
            let base = pcb_address(slot);
            for probe in [base, base + 1, base + 0x1000, kernel_stack_top(slot)] {
                assert_eq!(pcb_from_stack(probe), base);
            }
        }
    }

    #[test]
    fn arg_buffer_truncates_at_capacity() {
        let mut args = ArgBuffer::empty();
        args.set(b"frame0.txt");
        assert_eq!(args.as_bytes(), b"frame0.txt");

        let long = [b'a'; MAX_ARGS + 20];
        args.set(&long);
        assert_eq!(args.len(), MAX_ARGS);
    }

    #[test]
    fn fresh_pcbs_have_the_standard_streams_open() {
        let pcb = Pcb::fresh(2, 0, 1);
        assert_eq!(pcb.fds.open_count(), 2);
        assert_eq!(pcb.slot, 2);
        assert_eq!(pcb.parent_slot, 0);
        assert_eq!(pcb.terminal, 1);
    }
}
