//! VGA text console with per-terminal rendering.
//!
//! 80x25 cells of {glyph, attribute}. The foreground terminal renders
//! straight into the physical buffer at 0xB8000; the other two render
//! into their 4 KiB shadow pages, which also back the user-visible video
//! alias while their processes execute in the background. A foreground
//! switch swaps the physical page with the shadow pages wholesale, so
//! returning to a terminal restores its contents verbatim.
//!
//! Per-terminal attributes: white, red, and green on black.

use core::fmt;
use core::ptr::{read_volatile, write_volatile};

use super::terminal::{self, TermState, TERMINAL_COUNT, TERMINALS};
use crate::arch;
use crate::mm::layout::PAGE_SIZE;

pub const WIDTH: usize = 80;
pub const HEIGHT: usize = 25;
const CELL_COUNT: usize = WIDTH * HEIGHT;

/// Attribute byte per terminal: white, red, green on black.
pub const ATTRIBUTES: [u8; TERMINAL_COUNT] = [0x0F, 0x04, 0x02];

/// White on blue, for the fatal-exception screen.
const BLUE_SCREEN_ATTRIBUTE: u8 = 0x1F;

/// One terminal's worth of off-screen video memory. Page-aligned and
/// page-sized so it can back the 136 MiB user alias directly.
#[repr(C, align(4096))]
struct VideoPage {
    cells: [u16; CELL_COUNT],
}

impl VideoPage {
    const fn blank() -> Self {
        Self {
            cells: [0; CELL_COUNT],
        }
    }
}

const _: () = assert!(core::mem::size_of::<VideoPage>() == PAGE_SIZE);

// Written only with interrupts disabled on the single CPU; the raw
// pointer accessors below are the sole way in.
static mut SHADOW_PAGES: [VideoPage; TERMINAL_COUNT] =
    [VideoPage::blank(), VideoPage::blank(), VideoPage::blank()];

const fn cell(byte: u8, attribute: u8) -> u16 {
    ((attribute as u16) << 8) | byte as u16
}

fn shadow_ptr(term: usize) -> *mut u16 {
    // SAFETY: Only the address is taken here; all stores through it
    // happen in interrupt-disabled sections on the single CPU.
    unsafe { core::ptr::addr_of_mut!(SHADOW_PAGES[term]) }.cast()
}

/// Physical address of a terminal's shadow page (the kernel image is
/// identity-mapped, so the static's address is its physical address).
pub fn shadow_page_addr(term: usize) -> usize {
    shadow_ptr(term) as usize
}

/// Where a terminal's output lands right now.
fn render_target(term: usize) -> *mut u16 {
    #[cfg(target_arch = "x86")]
    if terminal::foreground() == term {
        return crate::arch::x86::vga::VIDEO_PHYS as *mut u16;
    }
    shadow_ptr(term)
}

fn sync_hardware_cursor(term: usize, state: &TermState) {
    if terminal::foreground() == term {
        #[cfg(target_arch = "x86")]
        crate::arch::x86::vga::set_cursor((state.cursor_y * WIDTH + state.cursor_x) as u16);
    }
    #[cfg(not(target_arch = "x86"))]
    let _ = state;
}

fn scroll(target: *mut u16, attribute: u8) {
    for row in 1..HEIGHT {
        for col in 0..WIDTH {
            // SAFETY: Offsets stay below CELL_COUNT; volatile because the
            // target may be memory-mapped video.
            unsafe {
                let glyph = read_volatile(target.add(row * WIDTH + col));
                write_volatile(target.add((row - 1) * WIDTH + col), glyph);
            }
        }
    }
    for col in 0..WIDTH {
        // SAFETY: Last row, in bounds.
        unsafe {
            write_volatile(
                target.add((HEIGHT - 1) * WIDTH + col),
                cell(b' ', attribute),
            );
        }
    }
}

fn new_line(target: *mut u16, attribute: u8, state: &mut TermState) {
    state.cursor_x = 0;
    if state.cursor_y + 1 == HEIGHT {
        scroll(target, attribute);
    } else {
        state.cursor_y += 1;
    }
}

fn put_byte(target: *mut u16, attribute: u8, state: &mut TermState, byte: u8) {
    match byte {
        b'\n' => new_line(target, attribute, state),
        byte => {
            if state.cursor_x >= WIDTH {
                new_line(target, attribute, state);
            }
            // SAFETY: cursor_y < HEIGHT and cursor_x < WIDTH hold after
            // the wrap above, so the offset is inside the page.
            unsafe {
                write_volatile(
                    target.add(state.cursor_y * WIDTH + state.cursor_x),
                    cell(byte, attribute),
                );
            }
            state.cursor_x += 1;
        }
    }
}

/// Render bytes at a terminal's cursor, scrolling as needed.
pub fn write_bytes(term: usize, bytes: &[u8]) {
    arch::without_interrupts(|| {
        let mut state = TERMINALS[term].state.lock();
        let target = render_target(term);
        for &byte in bytes {
            put_byte(target, ATTRIBUTES[term], &mut state, byte);
        }
        sync_hardware_cursor(term, &state);
    });
}

/// Undo the last keystroke's glyph.
pub fn backspace(term: usize) {
    arch::without_interrupts(|| {
        let mut state = TERMINALS[term].state.lock();
        if state.cursor_x > 0 {
            state.cursor_x -= 1;
        } else if state.cursor_y > 0 {
            state.cursor_y -= 1;
            state.cursor_x = WIDTH - 1;
        } else {
            return;
        }
        let target = render_target(term);
        // SAFETY: The cursor was just stepped back inside the page.
        unsafe {
            write_volatile(
                target.add(state.cursor_y * WIDTH + state.cursor_x),
                cell(b' ', ATTRIBUTES[term]),
            );
        }
        sync_hardware_cursor(term, &state);
    });
}

/// Blank a terminal and home its cursor (ctrl+L).
pub fn clear(term: usize) {
    arch::without_interrupts(|| {
        let mut state = TERMINALS[term].state.lock();
        let target = render_target(term);
        for offset in 0..CELL_COUNT {
            // SAFETY: offset < CELL_COUNT.
            unsafe {
                write_volatile(target.add(offset), cell(b' ', ATTRIBUTES[term]));
            }
        }
        state.cursor_x = 0;
        state.cursor_y = 0;
        sync_hardware_cursor(term, &state);
    });
}

/// Swap screens on a foreground switch: bank the physical page into the
/// old terminal's shadow, unveil the new terminal's shadow, and move the
/// hardware cursor. Call after the foreground index has been updated.
pub fn swap_foreground(old: usize, new: usize) {
    arch::without_interrupts(|| {
        #[cfg(target_arch = "x86")]
        {
            let video = crate::arch::x86::vga::VIDEO_PHYS as *mut u16;
            let old_shadow = shadow_ptr(old);
            let new_shadow = shadow_ptr(new);
            for offset in 0..CELL_COUNT {
                // SAFETY: All three pages are CELL_COUNT cells long.
                unsafe {
                    write_volatile(old_shadow.add(offset), read_volatile(video.add(offset)));
                    write_volatile(video.add(offset), read_volatile(new_shadow.add(offset)));
                }
            }
        }
        #[cfg(not(target_arch = "x86"))]
        let _ = old;

        let state = TERMINALS[new].state.lock();
        sync_hardware_cursor(new, &state);
    });
}

/// Paint every shadow page blank in its terminal's colors.
pub fn init() {
    for term in 0..TERMINAL_COUNT {
        let shadow = shadow_ptr(term);
        for offset in 0..CELL_COUNT {
            // SAFETY: Boot path, interrupts off, offset in bounds.
            unsafe {
                write_volatile(shadow.add(offset), cell(b' ', ATTRIBUTES[term]));
            }
        }
    }

    #[cfg(target_arch = "x86")]
    {
        let video = crate::arch::x86::vga::VIDEO_PHYS as *mut u16;
        for offset in 0..CELL_COUNT {
            // SAFETY: The VGA page is mapped by paging::init.
            unsafe {
                write_volatile(video.add(offset), cell(b' ', ATTRIBUTES[0]));
            }
        }
    }
}

/// Fatal-exception screen: keyboard off, page painted blue, exception
/// name printed, CPU parked until reset.
pub fn blue_screen(name: &str) -> ! {
    super::keyboard::disable();
    log::error!("fatal exception: {}", name);

    #[cfg(target_arch = "x86")]
    {
        let video = crate::arch::x86::vga::VIDEO_PHYS as *mut u16;
        for offset in 0..CELL_COUNT {
            // SAFETY: Painting the mapped VGA page; offset in bounds.
            unsafe {
                write_volatile(video.add(offset), cell(b' ', BLUE_SCREEN_ATTRIBUTE));
            }
        }
        let row = HEIGHT / 2;
        let col = (WIDTH.saturating_sub(name.len())) / 2;
        for (i, byte) in name.bytes().enumerate().take(WIDTH - col) {
            // SAFETY: Bounded to the row by the take above.
            unsafe {
                write_volatile(
                    video.add(row * WIDTH + col + i),
                    cell(byte, BLUE_SCREEN_ATTRIBUTE),
                );
            }
        }
    }

    arch::halt()
}

struct ConsoleWriter(usize);

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_bytes(self.0, s.as_bytes());
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    let _ = ConsoleWriter(terminal::foreground()).write_fmt(args);
}

#[cfg(test)]
mod tests {
    use super::*;

    // On the host every terminal renders into its shadow page, so each
    // test owns one terminal outright and they can run in parallel.
    fn init_once() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(init);
    }

    fn shadow_cells(term: usize) -> std::vec::Vec<u16> {
        let ptr = shadow_ptr(term);
        (0..CELL_COUNT)
            // SAFETY: Test-only read of the whole page.
            .map(|i| unsafe { read_volatile(ptr.add(i)) })
            .collect()
    }

    #[test]
    fn writes_land_at_the_cursor_with_the_terminal_attribute() {
        init_once();
        clear(2);
        write_bytes(2, b"ok");
        let cells = shadow_cells(2);
        assert_eq!(cells[0], cell(b'o', ATTRIBUTES[2]));
        assert_eq!(cells[1], cell(b'k', ATTRIBUTES[2]));
        assert_eq!(cells[2], cell(b' ', ATTRIBUTES[2]));
    }

    #[test]
    fn newline_moves_to_the_next_row() {
        init_once();
        clear(1);
        write_bytes(1, b"a\nb");
        let cells = shadow_cells(1);
        assert_eq!(cells[0], cell(b'a', ATTRIBUTES[1]));
        assert_eq!(cells[WIDTH], cell(b'b', ATTRIBUTES[1]));
    }

    #[test]
    fn backspace_blanks_the_previous_cell() {
        init_once();
        clear(0);
        write_bytes(0, b"xy");
        backspace(0);
        let cells = shadow_cells(0);
        assert_eq!(cells[0], cell(b'x', ATTRIBUTES[0]));
        assert_eq!(cells[1], cell(b' ', ATTRIBUTES[0]));
    }
}
