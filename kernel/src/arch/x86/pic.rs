//! Cascaded 8259 programmable interrupt controllers.
//!
//! The master sits at ports 0x20/0x21, the slave at 0xA0/0xA1, wired to the
//! master's IRQ 2. Initialization remaps the vector bases to 0x20 and 0x28
//! so IRQs stay clear of the CPU exceptions, then masks every line except
//! the cascade. Drivers unmask their own lines.

use core::sync::atomic::{AtomicU8, Ordering};

use super::outb;

const MASTER_COMMAND: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_COMMAND: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

/// ICW1: edge-triggered, cascade mode, ICW4 follows.
const ICW1_INIT: u8 = 0x11;
/// ICW2: vector base of each controller.
const ICW2_MASTER: u8 = 0x20;
const ICW2_SLAVE: u8 = 0x28;
/// ICW3: slave on master line 2 / slave identity 2.
const ICW3_MASTER: u8 = 0x04;
const ICW3_SLAVE: u8 = 0x02;
/// ICW4: 8086 mode.
const ICW4_8086: u8 = 0x01;

/// Specific end-of-interrupt command base.
const EOI_SPECIFIC: u8 = 0x60;

/// IRQ line the slave controller cascades through.
const CASCADE_IRQ: u8 = 2;

// Shadow copies of the mask registers; the hardware registers are
// write-only in the direction we use them.
static MASTER_MASK: AtomicU8 = AtomicU8::new(0xFF);
static SLAVE_MASK: AtomicU8 = AtomicU8::new(0xFF);

/// Send ICW1..ICW4 to both controllers and mask every line but the cascade.
pub fn init() {
    // SAFETY: The ICW sequence is the 8259 initialization protocol; each
    // write targets the controller's command or data port in the order the
    // datasheet requires. Interrupts are disabled during arch::init.
    unsafe {
        outb(MASTER_COMMAND, ICW1_INIT);
        outb(SLAVE_COMMAND, ICW1_INIT);

        outb(MASTER_DATA, ICW2_MASTER);
        outb(SLAVE_DATA, ICW2_SLAVE);

        outb(MASTER_DATA, ICW3_MASTER);
        outb(SLAVE_DATA, ICW3_SLAVE);

        outb(MASTER_DATA, ICW4_8086);
        outb(SLAVE_DATA, ICW4_8086);

        outb(MASTER_DATA, MASTER_MASK.load(Ordering::Relaxed));
        outb(SLAVE_DATA, SLAVE_MASK.load(Ordering::Relaxed));
    }

    enable_irq(CASCADE_IRQ);
}

/// Unmask an IRQ line (0..=15).
pub fn enable_irq(irq: u8) {
    if irq > 15 {
        return;
    }
    if irq < 8 {
        let mask = MASTER_MASK.fetch_and(!(1 << irq), Ordering::Relaxed) & !(1 << irq);
        // SAFETY: Writing the data port outside an ICW sequence sets OCW1,
        // the interrupt mask register.
        unsafe {
            outb(MASTER_DATA, mask);
        }
    } else {
        let line = irq - 8;
        let mask = SLAVE_MASK.fetch_and(!(1 << line), Ordering::Relaxed) & !(1 << line);
        // SAFETY: As above, for the slave controller.
        unsafe {
            outb(SLAVE_DATA, mask);
        }
    }
}

/// Mask an IRQ line (0..=15).
pub fn disable_irq(irq: u8) {
    if irq > 15 {
        return;
    }
    if irq < 8 {
        let mask = MASTER_MASK.fetch_or(1 << irq, Ordering::Relaxed) | (1 << irq);
        // SAFETY: OCW1 write, as in enable_irq.
        unsafe {
            outb(MASTER_DATA, mask);
        }
    } else {
        let line = irq - 8;
        let mask = SLAVE_MASK.fetch_or(1 << line, Ordering::Relaxed) | (1 << line);
        // SAFETY: OCW1 write, as in enable_irq.
        unsafe {
            outb(SLAVE_DATA, mask);
        }
    }
}

/// Acknowledge an IRQ. Slave lines acknowledge both controllers.
pub fn end_of_interrupt(irq: u8) {
    if irq > 15 {
        return;
    }
    // SAFETY: Specific-EOI commands to the command ports; a slave line
    // also acknowledges the cascade on the master.
    unsafe {
        if irq < 8 {
            outb(MASTER_COMMAND, EOI_SPECIFIC | irq);
        } else {
            outb(SLAVE_COMMAND, EOI_SPECIFIC | (irq - 8));
            outb(MASTER_COMMAND, EOI_SPECIFIC | CASCADE_IRQ);
        }
    }
}

