//! VGA text-mode hardware: the physical buffer address and the CRT cursor.
//!
//! Cell rendering lives in `drivers::console`; this module only knows where
//! the hardware buffer is and how to move the blinking cursor.

use super::outb;

/// Physical address of the 80x25 text buffer.
pub const VIDEO_PHYS: usize = 0xB8000;

const CRT_INDEX_PORT: u16 = 0x3D4;
const CRT_DATA_PORT: u16 = 0x3D5;

const CURSOR_LOCATION_HIGH: u8 = 0x0E;
const CURSOR_LOCATION_LOW: u8 = 0x0F;

/// Move the hardware cursor to a cell offset (row * 80 + column).
pub fn set_cursor(offset: u16) {
    // SAFETY: Standard CRT controller index/data protocol for the cursor
    // location registers.
    unsafe {
        outb(CRT_INDEX_PORT, CURSOR_LOCATION_LOW);
        outb(CRT_DATA_PORT, (offset & 0xFF) as u8);
        outb(CRT_INDEX_PORT, CURSOR_LOCATION_HIGH);
        outb(CRT_DATA_PORT, (offset >> 8) as u8);
    }
}
