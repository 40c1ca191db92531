//! The execute/halt lifecycle.
//!
//! `execute` parses the command, checks the ELF magic, claims a slot,
//! maps and loads the program image, builds the PCB, aims the TSS at the
//! slot's kernel stack, and enters ring 3 through a synthetic interrupt
//! return. Before the transition it suspends its own frame into the
//! child's PCB; `halt` resumes that frame with the widened exit status,
//! so the whole child lifetime looks like one blocking call from the
//! parent's side.

use core::ptr::{addr_of, addr_of_mut};

use super::pcb::{self, Pcb};
use crate::arch::{self, context::Context};
use crate::drivers::terminal;
use crate::error::KernelError;
use crate::fs;
use crate::mm::layout::{user_phys_base, USER_IMAGE_VIRT, USER_STACK_TOP, USER_VIRT_BASE};
use crate::mm::paging;

/// First bytes of every loadable program.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// File offset of the 32-bit entry point.
pub const ENTRY_POINT_OFFSET: usize = 24;

/// The program respawned whenever a terminal's root process halts.
pub const SHELL: &[u8] = b"shell";

fn token_end(command: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < command.len()
        && command[end] != b' '
        && command[end] != b'\n'
        && command[end] != 0
    {
        end += 1;
    }
    end
}

/// Split a command into the program name and its argument token.
///
/// Leading spaces are skipped; both tokens end at a space, newline, or
/// NUL.
pub fn parse_command(command: &[u8]) -> (&[u8], &[u8]) {
    let mut start = 0;
    while start < command.len() && command[start] == b' ' {
        start += 1;
    }
    let name_end = token_end(command, start);
    let name = &command[start..name_end];

    let arg_start = (name_end + 1).min(command.len());
    let arg_end = token_end(command, arg_start);
    (name, &command[arg_start..arg_end])
}

/// Run a program to completion; returns its exit status (0..=256).
///
/// The special name "exit" halts the caller instead of starting anything.
pub fn execute(command: &[u8]) -> Result<i32, KernelError> {
    arch::disable_interrupts();

    let (name, args) = parse_command(command);
    if name == b"exit" {
        halt(0);
    }

    let image = fs::image()?;
    let entry = image.lookup(name)?;

    let mut header = [0u8; 4];
    image.read_data(entry.inode, 0, &mut header)?;
    if header != ELF_MAGIC {
        return Err(KernelError::BadExecutable);
    }

    let mut entry_bytes = [0u8; 4];
    image.read_data(entry.inode, ENTRY_POINT_OFFSET, &mut entry_bytes)?;
    let entry_point = u32::from_le_bytes(entry_bytes);

    let slot = crate::process::allocate_slot()?;

    paging::remap(USER_VIRT_BASE, user_phys_base(slot));
    if let Err(error) = load_image(image, entry.inode) {
        crate::process::release_slot(slot);
        // Put the user window back on whoever was mapped before.
        if let Some(active) = terminal::active_slot(terminal::executing()) {
            paging::remap(USER_VIRT_BASE, user_phys_base(active));
        }
        return Err(error);
    }

    let term_id = terminal::foreground();
    let parent_slot = if !terminal::is_running(term_id) {
        // First program of this terminal: it becomes its own parent and
        // the terminal joins the scheduler rotation.
        terminal::set_executing(term_id);
        terminal::set_running(term_id, true);
        slot
    } else {
        terminal::active_slot(term_id).unwrap_or(slot)
    };

    let pcb = pcb::for_slot(slot);
    // SAFETY: The slot was just allocated, so its 8 KiB region is ours;
    // nothing else holds a reference into it until the PCB is published
    // via set_active_slot below.
    unsafe {
        core::ptr::write(pcb, Pcb::fresh(slot, parent_slot, term_id));
        (*pcb).args.set(args);
    }
    terminal::set_active_slot(term_id, Some(slot));

    arch::set_kernel_stack(pcb::kernel_stack_top(slot) as u32);

    // SAFETY: The PCB was initialized above and stays resident for the
    // child's lifetime.
    let resumed = Context::save(unsafe { addr_of_mut!((*pcb).exec_resume) });
    if resumed == 0 {
        // SAFETY: Entry point and stack top lie in the user page mapped
        // above; the TSS names this slot's kernel stack.
        unsafe { arch::enter_user(entry_point, USER_STACK_TOP as u32) }
    }
    // halt() handed us status + 1 through the resume channel.
    Ok(resumed as i32 - 1)
}

/// Copy the whole program file to its fixed virtual load address.
fn load_image(image: &fs::FsImage<'_>, inode: u32) -> Result<(), KernelError> {
    let size = image.file_size(inode)?;
    // SAFETY: The 4 MiB user page is mapped and the load address plus the
    // image length stay inside it (file sizes are bounded by the image
    // geometry, far below 4 MiB).
    let destination =
        unsafe { core::slice::from_raw_parts_mut(USER_IMAGE_VIRT as *mut u8, size) };
    image.read_data(inode, 0, destination)?;
    Ok(())
}

/// Terminate the current process and resume its parent with `status`.
///
/// The root process of a terminal has no parent to resume; its terminal
/// is marked idle and a fresh shell is spawned in its place.
pub fn halt(status: u16) -> ! {
    arch::disable_interrupts();

    let exec_term = terminal::executing();
    let slot = terminal::active_slot(exec_term).unwrap_or(0);
    let pcb = pcb::for_slot(slot);
    // SAFETY: The executing terminal's active slot always holds a PCB
    // initialized by execute.
    let parent_slot = unsafe { (*pcb).parent_slot };

    crate::process::release_slot(slot);
    // SAFETY: As above; closing descriptors only touches this PCB and
    // device state.
    unsafe {
        (*pcb).fds.close_all();
    }

    terminal::set_active_slot(exec_term, Some(parent_slot));

    if parent_slot == slot {
        terminal::set_running(exec_term, false);
        loop {
            if let Err(error) = execute(SHELL) {
                panic!("cannot respawn shell: {}", error);
            }
        }
    }

    paging::remap(USER_VIRT_BASE, user_phys_base(parent_slot));
    arch::set_kernel_stack(pcb::kernel_stack_top(parent_slot) as u32);

    // Interrupts come back with the parent's IRET frame; the resume value
    // is offset by one so the saved side can recognize it.
    // SAFETY: exec_resume was filled by the parent's execute on a kernel
    // stack that is still intact.
    Context::load(
        unsafe { addr_of!((*pcb).exec_resume) },
        status as u32 + 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_name_and_argument() {
        assert_eq!(parse_command(b"cat frame0.txt"), (&b"cat"[..], &b"frame0.txt"[..]));
        assert_eq!(parse_command(b"shell"), (&b"shell"[..], &b""[..]));
    }

    #[test]
    fn parse_skips_leading_spaces() {
        assert_eq!(parse_command(b"   ls"), (&b"ls"[..], &b""[..]));
        assert_eq!(parse_command(b"  cat  x"), (&b"cat"[..], &b""[..]));
    }

    #[test]
    fn parse_stops_at_newline_and_nul() {
        assert_eq!(parse_command(b"ls\n"), (&b"ls"[..], &b""[..]));
        assert_eq!(parse_command(b"cat x\n"), (&b"cat"[..], &b"x"[..]));
        assert_eq!(parse_command(b"grep a\0garbage"), (&b"grep"[..], &b"a"[..]));
    }

    #[test]
    fn parse_takes_one_argument_token() {
        assert_eq!(parse_command(b"prog a b"), (&b"prog"[..], &b"a"[..]));
    }

    #[test]
    fn empty_commands_parse_to_empty_tokens() {
        assert_eq!(parse_command(b""), (&b""[..], &b""[..]));
        assert_eq!(parse_command(b"   "), (&b""[..], &b""[..]));
    }
}
