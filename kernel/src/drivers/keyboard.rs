//! PS/2 keyboard driver and foreground-terminal input glue.
//!
//! Scancode set 1 from port 0x60, translated through a four-row matrix
//! (plain / shift / caps / both). Printable keys land in the foreground
//! terminal's line buffer and echo to its screen; Enter raises the
//! terminal's enter latch, Backspace edits the line, ctrl+L clears the
//! screen, and alt+F1/F2/F3 switch the foreground terminal.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use super::{console, terminal};
use crate::arch;

pub const KEYBOARD_IRQ: u8 = 1;

#[cfg(target_arch = "x86")]
const DATA_PORT: u16 = 0x60;

/// Scancodes handled outside the printable matrix.
const BACKSPACE: u8 = 0x0E;
const ENTER: u8 = 0x1C;
const CTRL_DOWN: u8 = 0x1D;
const LSHIFT_DOWN: u8 = 0x2A;
const RSHIFT_DOWN: u8 = 0x36;
const ALT_DOWN: u8 = 0x38;
const CAPS_LOCK: u8 = 0x3A;
const F1_KEY: u8 = 0x3B;
const F2_KEY: u8 = 0x3C;
const F3_KEY: u8 = 0x3D;
const CTRL_UP: u8 = 0x9D;
const LSHIFT_UP: u8 = 0xAA;
const RSHIFT_UP: u8 = 0xB6;
const ALT_UP: u8 = 0xB8;

/// Rows of the translation matrix.
const MODE_PLAIN: u8 = 0;
const MODE_SHIFT: u8 = 1;
const MODE_CAPS: u8 = 2;

pub const KEY_COUNT: usize = 60;

/// Scancode-set-1 to ASCII, indexed by [shift | caps << 1][scancode].
/// Zero marks keys with no printable glyph.
static SCANCODE_MAP: [[u8; KEY_COUNT]; 4] = [
    // plain
    *b"\0\x001234567890-=\0\0qwertyuiop[]\0\0asdfghjkl;'`\0\\zxcvbnm,./\0*\0 \0\0",
    // shift
    *b"\0\x00!@#$%^&*()_+\0\0QWERTYUIOP{}\0\0ASDFGHJKL:\"~\0|ZXCVBNM<>?\0*\0 \0\0",
    // caps
    *b"\0\x001234567890-=\0\0QWERTYUIOP[]\0\0ASDFGHJKL;'`\0\\ZXCVBNM,./\0*\0 \0\0",
    // caps + shift
    *b"\0\x00!@#$%^&*()_+\0\0qwertyuiop{}\0\0asdfghjkl:\"~\0\\zxcvbnm<>?\0*\0 \0\0",
];

/// Shift in bit 0, caps in bit 1; together they select the matrix row.
static KEY_MODE: AtomicU8 = AtomicU8::new(MODE_PLAIN);
static CTRL_HELD: AtomicBool = AtomicBool::new(false);
static ALT_HELD: AtomicBool = AtomicBool::new(false);

/// Cleared by the blue screen so a dead machine stops accepting input.
static ENABLED: AtomicBool = AtomicBool::new(true);

/// Unmask the keyboard line.
pub fn init() {
    #[cfg(target_arch = "x86")]
    crate::arch::x86::pic::enable_irq(KEYBOARD_IRQ);
    log::info!("keyboard on irq {}", KEYBOARD_IRQ);
}

/// Stop feeding keystrokes into the terminals.
pub fn disable() {
    ENABLED.store(false, Ordering::Release);
}

/// IRQ 1 entry: fetch the scancode, acknowledge, process. EOI is sent
/// before processing because a foreground switch may not return.
#[cfg(target_arch = "x86")]
pub fn handle_interrupt() {
    use crate::arch::x86::{inb, pic};

    // SAFETY: Port 0x60 holds the scancode that raised IRQ 1.
    let scancode = unsafe { inb(DATA_PORT) };
    pic::end_of_interrupt(KEYBOARD_IRQ);
    process_scancode(scancode);
}

/// Look a scancode up in the matrix for the given mode row.
pub fn translate(mode: u8, scancode: u8) -> Option<u8> {
    if scancode as usize >= KEY_COUNT {
        return None;
    }
    match SCANCODE_MAP[(mode & 3) as usize][scancode as usize] {
        0 => None,
        key => Some(key),
    }
}

/// Advance the modifier state machine and route the key.
pub fn process_scancode(scancode: u8) {
    match scancode {
        LSHIFT_DOWN | RSHIFT_DOWN => {
            KEY_MODE.fetch_or(MODE_SHIFT, Ordering::Relaxed);
        }
        LSHIFT_UP | RSHIFT_UP => {
            KEY_MODE.fetch_and(!MODE_SHIFT, Ordering::Relaxed);
        }
        CAPS_LOCK => {
            KEY_MODE.fetch_xor(MODE_CAPS, Ordering::Relaxed);
        }
        CTRL_DOWN => CTRL_HELD.store(true, Ordering::Relaxed),
        CTRL_UP => CTRL_HELD.store(false, Ordering::Relaxed),
        ALT_DOWN => ALT_HELD.store(true, Ordering::Relaxed),
        ALT_UP => ALT_HELD.store(false, Ordering::Relaxed),
        BACKSPACE => handle_backspace(),
        ENTER => handle_enter(),
        F1_KEY if ALT_HELD.load(Ordering::Relaxed) => terminal::launch(0),
        F2_KEY if ALT_HELD.load(Ordering::Relaxed) => terminal::launch(1),
        F3_KEY if ALT_HELD.load(Ordering::Relaxed) => terminal::launch(2),
        _ => handle_key(scancode),
    }
}

fn handle_key(scancode: u8) {
    let Some(key) = translate(KEY_MODE.load(Ordering::Relaxed), scancode) else {
        return;
    };

    if CTRL_HELD.load(Ordering::Relaxed) {
        if key == b'l' {
            console::clear(terminal::foreground());
        }
        return;
    }

    if !ENABLED.load(Ordering::Acquire) {
        return;
    }

    let fg = terminal::foreground();
    let accepted = arch::without_interrupts(|| {
        terminal::TERMINALS[fg].state.lock().line.push(key)
    });
    if accepted {
        console::write_bytes(fg, &[key]);
    }
}

fn handle_enter() {
    let fg = terminal::foreground();
    arch::without_interrupts(|| {
        terminal::TERMINALS[fg].state.lock().line.push_newline();
    });
    console::write_bytes(fg, b"\n");
    terminal::TERMINALS[fg].signal_enter();
}

fn handle_backspace() {
    let fg = terminal::foreground();
    let removed = arch::without_interrupts(|| {
        terminal::TERMINALS[fg].state.lock().line.pop()
    });
    if removed {
        console::backspace(fg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_row_maps_letters_and_digits() {
        assert_eq!(translate(MODE_PLAIN, 0x10), Some(b'q'));
        assert_eq!(translate(MODE_PLAIN, 0x1E), Some(b'a'));
        assert_eq!(translate(MODE_PLAIN, 0x2C), Some(b'z'));
        assert_eq!(translate(MODE_PLAIN, 0x02), Some(b'1'));
        assert_eq!(translate(MODE_PLAIN, 0x39), Some(b' '));
    }

    #[test]
    fn shift_row_maps_symbols_and_uppercase() {
        assert_eq!(translate(MODE_SHIFT, 0x02), Some(b'!'));
        assert_eq!(translate(MODE_SHIFT, 0x10), Some(b'Q'));
        assert_eq!(translate(MODE_SHIFT, 0x27), Some(b':'));
        assert_eq!(translate(MODE_SHIFT, 0x35), Some(b'?'));
    }

    #[test]
    fn caps_uppercases_letters_but_not_digits() {
        assert_eq!(translate(MODE_CAPS, 0x10), Some(b'Q'));
        assert_eq!(translate(MODE_CAPS, 0x02), Some(b'1'));
        assert_eq!(translate(MODE_CAPS, 0x33), Some(b','));
    }

    #[test]
    fn caps_with_shift_lowercases_letters_again() {
        let both = MODE_SHIFT | MODE_CAPS;
        assert_eq!(translate(both, 0x10), Some(b'q'));
        assert_eq!(translate(both, 0x02), Some(b'!'));
    }

    #[test]
    fn non_printable_scancodes_translate_to_none() {
        assert_eq!(translate(MODE_PLAIN, 0x00), None);
        assert_eq!(translate(MODE_PLAIN, 0x0E), None);
        assert_eq!(translate(MODE_PLAIN, 0x1C), None);
        assert_eq!(translate(MODE_PLAIN, KEY_COUNT as u8), None);
        assert_eq!(translate(MODE_PLAIN, 0xFF), None);
    }
}
