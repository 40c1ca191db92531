//! Round-robin scheduler over the three terminals.
//!
//! The PIT tick (about 20 Hz) rotates the CPU across the terminals that
//! have a process: pick the next running terminal after the one executing
//! now, bank the current process's registers in its PCB, rewire the user
//! 4 MiB window and the 136 MiB video alias for the winner, aim the TSS
//! at its kernel stack, and load its registers. The interrupt epilogue
//! then unwinds on the winner's stack.
//!
//! Until a second terminal starts a process there is nothing to rotate;
//! terminal 0 runs cooperatively through boot.

use core::ptr::{addr_of, addr_of_mut};

use crate::arch::{self, context::Context};
use crate::drivers::{console, terminal};
use crate::mm::layout::{user_phys_base, USER_VIRT_BASE, VIDEO_PHYS, VIDMAP_VIRT};
use crate::mm::paging;
use crate::process::pcb;

use crate::drivers::terminal::TERMINAL_COUNT;

/// The terminal that runs next: the first running terminal after
/// `current`, scanning round-robin; `current` itself when nothing else
/// runs.
pub fn select_next(current: usize, running: [bool; TERMINAL_COUNT]) -> usize {
    let mut candidate = current;
    for _ in 0..TERMINAL_COUNT {
        candidate = (candidate + 1) % TERMINAL_COUNT;
        if running[candidate] {
            return candidate;
        }
    }
    current
}

/// Timer-tick entry, called from the PIT interrupt after its EOI.
pub fn timer_tick() {
    if !terminal::is_running(1) && !terminal::is_running(2) {
        return;
    }

    let current = terminal::executing();
    let running = [
        terminal::is_running(0),
        terminal::is_running(1),
        terminal::is_running(2),
    ];
    let next = select_next(current, running);

    let (Some(current_slot), Some(next_slot)) =
        (terminal::active_slot(current), terminal::active_slot(next))
    else {
        return;
    };

    let parked = pcb::for_slot(current_slot);
    let winner = pcb::for_slot(next_slot);

    terminal::set_executing(next);
    paging::remap(USER_VIRT_BASE, user_phys_base(next_slot));

    // The user-visible video alias tracks the executing terminal:
    // physical video (through the user page table, as vidmap maps it)
    // when it is also the foreground, its shadow page (through the video
    // page table) otherwise.
    if next == terminal::foreground() {
        paging::remap_with_user_table(VIDMAP_VIRT, VIDEO_PHYS);
    } else {
        paging::remap_video_with_table(VIDMAP_VIRT, console::shadow_page_addr(next));
    }

    arch::set_kernel_stack(pcb::kernel_stack_top(next_slot) as u32);

    // SAFETY: Both slots hold live PCBs; when next == current the
    // pointers alias and the switch degrades to a self-save/self-load.
    unsafe {
        Context::switch(
            addr_of_mut!((*parked).sched_ctx),
            addr_of!((*winner).sched_ctx),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_starts_one_past_the_current_terminal() {
        let all = [true, true, true];
        assert_eq!(select_next(0, all), 1);
        assert_eq!(select_next(1, all), 2);
        assert_eq!(select_next(2, all), 0);
    }

    #[test]
    fn stopped_terminals_are_skipped() {
        assert_eq!(select_next(0, [true, false, true]), 2);
        assert_eq!(select_next(2, [false, true, true]), 1);
    }

    #[test]
    fn a_lone_running_terminal_keeps_the_cpu() {
        assert_eq!(select_next(1, [false, true, false]), 1);
    }

    #[test]
    fn nothing_running_leaves_the_selection_unchanged() {
        assert_eq!(select_next(1, [false, false, false]), 1);
    }

    #[test]
    fn rotation_is_fair_over_any_window() {
        let all = [true, true, true];
        let mut current = 0;
        let mut visits = [0usize; TERMINAL_COUNT];
        for _ in 0..99 {
            current = select_next(current, all);
            visits[current] += 1;
        }
        assert_eq!(visits, [33, 33, 33]);
    }
}
