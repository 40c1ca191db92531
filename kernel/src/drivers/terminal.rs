//! The three text terminals.
//!
//! Each terminal owns a line buffer filled by the keyboard, an enter
//! latch that completes blocking reads, a cursor, and (through the
//! console) a 4 KiB shadow video page. Exactly one terminal is the
//! *foreground* terminal: it receives keystrokes and owns the physical
//! video page. Which terminal is *executing* on the CPU is a separate
//! axis, advanced by the scheduler.

use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use spin::Mutex;

use super::console;
use crate::arch::{self, context::Context};
use crate::error::KernelError;
use crate::mm::layout::{VIDEO_PHYS, VIDMAP_VIRT};
use crate::mm::paging;
use crate::process::{lifecycle, pcb};

pub const TERMINAL_COUNT: usize = 3;

/// Keystrokes per line; one extra byte holds the closing newline.
pub const LINE_BUFFER_SIZE: usize = 127;

/// A terminal's line of pending input.
#[derive(Debug, Clone, Copy)]
pub struct LineBuffer {
    bytes: [u8; LINE_BUFFER_SIZE + 1],
    len: usize,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0; LINE_BUFFER_SIZE + 1],
            len: 0,
        }
    }

    /// Append a printable byte. Fails once the line is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len < LINE_BUFFER_SIZE {
            self.bytes[self.len] = byte;
            self.len += 1;
            true
        } else {
            false
        }
    }

    /// Append the closing newline; always fits in the reserved byte.
    pub fn push_newline(&mut self) {
        if self.len <= LINE_BUFFER_SIZE {
            self.bytes[self.len] = b'\n';
            self.len += 1;
        }
    }

    /// Remove the last byte. Fails on an empty line.
    pub fn pop(&mut self) -> bool {
        if self.len > 0 {
            self.len -= 1;
            self.bytes[self.len] = 0;
            true
        } else {
            false
        }
    }

    /// Copy the line out (as much as `buf` holds) and reset it.
    pub fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let count = self.len.min(buf.len());
        buf[..count].copy_from_slice(&self.bytes[..count]);
        self.bytes = [0; LINE_BUFFER_SIZE + 1];
        self.len = 0;
        count
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable terminal state guarded by its lock.
pub struct TermState {
    pub cursor_x: usize,
    pub cursor_y: usize,
    pub line: LineBuffer,
}

/// One terminal record.
pub struct Terminal {
    pub id: usize,
    running: AtomicBool,
    enter_pending: AtomicBool,
    /// Active process slot, -1 while idle.
    active_slot: AtomicI32,
    pub state: Mutex<TermState>,
}

impl Terminal {
    const fn new(id: usize) -> Self {
        Self {
            id,
            running: AtomicBool::new(false),
            enter_pending: AtomicBool::new(false),
            active_slot: AtomicI32::new(-1),
            state: Mutex::new(TermState {
                cursor_x: 0,
                cursor_y: 0,
                line: LineBuffer::new(),
            }),
        }
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn active_slot(&self) -> Option<usize> {
        let slot = self.active_slot.load(Ordering::Acquire);
        (slot >= 0).then_some(slot as usize)
    }

    /// Raise the enter latch; a blocked read on this terminal completes.
    pub fn signal_enter(&self) {
        self.enter_pending.store(true, Ordering::Release);
    }
}

pub static TERMINALS: [Terminal; TERMINAL_COUNT] =
    [Terminal::new(0), Terminal::new(1), Terminal::new(2)];

static FOREGROUND: AtomicUsize = AtomicUsize::new(0);
static EXECUTING: AtomicUsize = AtomicUsize::new(0);

/// The terminal whose content is on the physical video page and whose
/// buffer receives keystrokes.
pub fn foreground() -> usize {
    FOREGROUND.load(Ordering::Acquire)
}

/// The terminal whose process is on the CPU right now.
pub fn executing() -> usize {
    EXECUTING.load(Ordering::Acquire)
}

pub fn set_executing(term: usize) {
    EXECUTING.store(term, Ordering::Release);
}

pub fn is_running(term: usize) -> bool {
    TERMINALS[term].running()
}

pub fn set_running(term: usize, running: bool) {
    TERMINALS[term].running.store(running, Ordering::Release);
}

pub fn active_slot(term: usize) -> Option<usize> {
    TERMINALS[term].active_slot()
}

pub fn set_active_slot(term: usize, slot: Option<usize>) {
    let value = match slot {
        Some(slot) => slot as i32,
        None => -1,
    };
    TERMINALS[term].active_slot.store(value, Ordering::Release);
}

/// Prepare the console pages; terminal 0 starts in the foreground.
pub fn init() {
    console::init();
    FOREGROUND.store(0, Ordering::Release);
    EXECUTING.store(0, Ordering::Release);
    log::info!("{} terminals ready", TERMINAL_COUNT);
}

/// Blocking line read for stdin.
///
/// Waits for the owning terminal's enter latch, then hands the buffered
/// line over and clears it.
pub fn read_line(term: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
    let terminal = &TERMINALS[term];

    // The latch is raised from the keyboard interrupt, so spin with
    // interrupts on; the timer keeps the other terminals running.
    arch::enable_interrupts();
    while !terminal.enter_pending.load(Ordering::Acquire) {
        core::hint::spin_loop();
    }
    terminal.enter_pending.store(false, Ordering::Release);

    Ok(arch::without_interrupts(|| {
        terminal.state.lock().line.drain_into(buf)
    }))
}

/// Write bytes to a terminal's screen (its shadow page while it is in
/// the background). Returns the number of bytes written.
pub fn write(term: usize, bytes: &[u8]) -> usize {
    console::write_bytes(term, bytes);
    bytes.len()
}

/// Make `target` the foreground terminal (alt+F1..F3).
///
/// Runs in the keyboard interrupt with interrupts disabled. Swaps the
/// physical video page with the shadow pages, re-aims the user-visible
/// video alias, and, for a terminal with no shell yet, suspends the
/// interrupted process and spawns one.
pub fn launch(target: usize) {
    if target >= TERMINAL_COUNT || target == foreground() {
        return;
    }

    let previous = FOREGROUND.swap(target, Ordering::AcqRel);
    console::swap_foreground(previous, target);

    if TERMINALS[target].running() {
        // Keep the executing terminal's user-visible video alias honest:
        // physical video only if it is the new foreground.
        let exec = executing();
        if exec == target {
            paging::remap_with_user_table(VIDMAP_VIRT, VIDEO_PHYS);
        } else {
            paging::remap_video_with_table(VIDMAP_VIRT, console::shadow_page_addr(exec));
        }
        return;
    }

    // Fresh terminal: park the interrupted process so the scheduler can
    // resume it, then give the CPU to a new shell.
    if let Some(active) = active_slot(executing()) {
        let parked = pcb::for_slot(active);
        // SAFETY: The active slot's PCB is live; the saved context is
        // resumed by the scheduler, which unwinds this interrupt.
        let resumed = Context::save(unsafe { addr_of_mut!((*parked).sched_ctx) });
        if resumed != 0 {
            return;
        }
    }
    if let Err(error) = lifecycle::execute(lifecycle::SHELL) {
        log::error!("cannot start shell on terminal {}: {}", target, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_caps_at_127_plus_newline() {
        let mut line = LineBuffer::new();
        for _ in 0..LINE_BUFFER_SIZE {
            assert!(line.push(b'a'));
        }
        assert!(!line.push(b'b'));
        assert_eq!(line.len(), LINE_BUFFER_SIZE);

        line.push_newline();
        assert_eq!(line.len(), LINE_BUFFER_SIZE + 1);
    }

    #[test]
    fn backspace_removes_the_last_byte() {
        let mut line = LineBuffer::new();
        line.push(b'l');
        line.push(b's');
        assert!(line.pop());
        assert_eq!(line.len(), 1);
        assert!(line.pop());
        assert!(!line.pop());
    }

    #[test]
    fn drain_copies_the_line_and_clears_it() {
        let mut line = LineBuffer::new();
        for &b in b"ls" {
            line.push(b);
        }
        line.push_newline();

        let mut buf = [0u8; 16];
        let n = line.drain_into(&mut buf);
        assert_eq!(&buf[..n], b"ls\n");
        assert!(line.is_empty());

        // A short caller buffer bounds the copy.
        for &b in b"history" {
            line.push(b);
        }
        let mut short = [0u8; 3];
        assert_eq!(line.drain_into(&mut short), 3);
        assert_eq!(&short, b"his");
    }

    #[test]
    fn active_slot_round_trips_through_the_sentinel() {
        set_active_slot(1, Some(4));
        assert_eq!(active_slot(1), Some(4));
        set_active_slot(1, None);
        assert_eq!(active_slot(1), None);
    }
}
