//! Programmable interval timer (8253/8254), channel 0.
//!
//! Drives the scheduler at roughly 20 Hz: 1193180 / 11932.

use core::sync::atomic::{AtomicU64, Ordering};

use super::{outb, pic};

pub const PIT_IRQ: u8 = 0;

const COMMAND_PORT: u16 = 0x43;
const CHANNEL_0_PORT: u16 = 0x40;

/// Channel 0, lobyte/hibyte access, mode 3 (square wave).
const SQUARE_WAVE_MODE_3: u8 = 0x36;

/// 1193180 Hz / 11932 ~= 20 Hz.
const DIVISOR_20HZ: u16 = 11932;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Get current timer ticks
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Increment timer ticks (called from the PIT interrupt, after EOI)
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);

    crate::sched::timer_tick();
}

/// Program channel 0 for the scheduler rate and unmask IRQ 0.
pub fn init() {
    // SAFETY: Mode command then divisor low/high bytes, the 8254
    // programming sequence for channel 0.
    unsafe {
        outb(COMMAND_PORT, SQUARE_WAVE_MODE_3);
        outb(CHANNEL_0_PORT, (DIVISOR_20HZ & 0xFF) as u8);
        outb(CHANNEL_0_PORT, (DIVISOR_20HZ >> 8) as u8);
    }

    pic::enable_irq(PIT_IRQ);
    log::info!("pit channel 0 at ~20 Hz (divisor {})", DIVISOR_20HZ);
}
