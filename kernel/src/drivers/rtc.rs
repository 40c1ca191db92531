//! CMOS real-time clock (MC146818-compatible).
//!
//! Accessed through the index/data port pair 0x70/0x71, with the NMI
//! disable bit kept set in the index. Register B bit 6 turns on the
//! periodic interrupt; the rate is the low nibble of register A, mapping
//! power-of-two frequencies from 2 Hz (rate 0x0F) to 1024 Hz (0x06).
//!
//! Every tick latches all three terminals' "interrupt occurred" flags;
//! each terminal's reader consumes its own latch independently, so three
//! processes can pace themselves off one clock.

use core::sync::atomic::{AtomicBool, Ordering};

use super::terminal::TERMINAL_COUNT;
use crate::arch;
use crate::error::KernelError;

pub const RTC_IRQ: u8 = 8;

/// Frequency programmed at open/close.
pub const DEFAULT_FREQUENCY: u32 = 2;

#[cfg(target_arch = "x86")]
mod ports {
    /// Index port; bit 7 set keeps NMI disabled while we poke registers.
    pub const INDEX: u16 = 0x70;
    pub const DATA: u16 = 0x71;

    pub const REGISTER_A: u8 = 0x8A;
    pub const REGISTER_B: u8 = 0x8B;
    /// Read (without NMI disable) to acknowledge a periodic interrupt.
    pub const REGISTER_C: u8 = 0x0C;

    /// Register B bit 6: periodic interrupt enable.
    pub const PERIODIC_ENABLE: u8 = 0x40;
}

static TICK_PENDING: [AtomicBool; TERMINAL_COUNT] = [
    AtomicBool::new(false),
    AtomicBool::new(false),
    AtomicBool::new(false),
];

/// Enable the periodic interrupt and unmask IRQ 8.
pub fn init() {
    #[cfg(target_arch = "x86")]
    {
        use crate::arch::x86::{inb, outb, pic};

        // SAFETY: Index/data protocol from the RTC datasheet; a write to
        // the index port must precede every data access.
        unsafe {
            outb(ports::INDEX, ports::REGISTER_B);
            let previous = inb(ports::DATA);
            outb(ports::INDEX, ports::REGISTER_B);
            outb(ports::DATA, previous | ports::PERIODIC_ENABLE);
        }
        pic::enable_irq(RTC_IRQ);
    }
    let _ = set_frequency(DEFAULT_FREQUENCY);
    log::info!("rtc periodic interrupt on irq {}", RTC_IRQ);
}

/// IRQ 8 entry: acknowledge, latch every terminal, rearm register C.
#[cfg(target_arch = "x86")]
pub fn handle_interrupt() {
    use crate::arch::x86::{inb, outb, pic};

    pic::end_of_interrupt(RTC_IRQ);

    for latch in TICK_PENDING.iter() {
        latch.store(true, Ordering::Release);
    }

    // SAFETY: Register C must be read after each interrupt or the RTC
    // stops generating them.
    unsafe {
        outb(ports::INDEX, ports::REGISTER_C);
        let _ = inb(ports::DATA);
    }
}

/// Register A rate for a requested frequency: powers of two in 2..=1024.
pub fn rate_for_frequency(frequency: u32) -> Option<u8> {
    if !frequency.is_power_of_two() || !(2..=1024).contains(&frequency) {
        return None;
    }
    // 2 Hz -> 0x0F down to 1024 Hz -> 0x06.
    Some((16 - frequency.trailing_zeros()) as u8)
}

/// Program the periodic rate, rejecting unsupported frequencies.
pub fn set_frequency(frequency: u32) -> Result<(), KernelError> {
    let rate = rate_for_frequency(frequency).ok_or(KernelError::UnsupportedRate { frequency })?;
    program_rate(rate);
    Ok(())
}

/// Back to the 2 Hz default (descriptor open and close).
pub fn reset() {
    let _ = set_frequency(DEFAULT_FREQUENCY);
}

#[cfg(target_arch = "x86")]
fn program_rate(rate: u8) {
    use crate::arch::x86::{inb, outb};

    arch::without_interrupts(|| {
        // SAFETY: Read-modify-write of register A's low nibble, index
        // port written before each data access.
        unsafe {
            outb(ports::INDEX, ports::REGISTER_A);
            let previous = inb(ports::DATA);
            outb(ports::INDEX, ports::REGISTER_A);
            outb(ports::DATA, (previous & 0xF0) | rate);
        }
    });
}

#[cfg(not(target_arch = "x86"))]
fn program_rate(_rate: u8) {}

/// Block until the next RTC tick reaches `term`'s latch, then clear it.
pub fn wait_for_tick(term: usize) {
    let latch = &TICK_PENDING[term];

    // The latch is set from the RTC interrupt, so spin with interrupts
    // enabled; the scheduler keeps rotating meanwhile.
    arch::enable_interrupts();
    while !latch.load(Ordering::Acquire) {
        core::hint::spin_loop();
    }
    latch.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_cover_the_powers_of_two() {
        assert_eq!(rate_for_frequency(2), Some(0x0F));
        assert_eq!(rate_for_frequency(4), Some(0x0E));
        assert_eq!(rate_for_frequency(64), Some(0x0A));
        assert_eq!(rate_for_frequency(512), Some(0x07));
        assert_eq!(rate_for_frequency(1024), Some(0x06));
    }

    #[test]
    fn out_of_range_and_non_power_frequencies_are_rejected() {
        assert_eq!(rate_for_frequency(0), None);
        assert_eq!(rate_for_frequency(1), None);
        assert_eq!(rate_for_frequency(3), None);
        assert_eq!(rate_for_frequency(1000), None);
        assert_eq!(rate_for_frequency(2048), None);
        assert_eq!(rate_for_frequency(8192), None);
    }

    #[test]
    fn set_frequency_surfaces_the_rejection() {
        assert_eq!(
            set_frequency(24),
            Err(KernelError::UnsupportedRate { frequency: 24 })
        );
        assert_eq!(set_frequency(256), Ok(()));
    }
}
