//! Ring 0 -> ring 3 transition.
//!
//! `enter_user` builds the synthetic interrupt-return frame on the current
//! kernel stack and executes `iretd`. The frame carries the user data
//! segment, the user stack pointer, EFLAGS with IF set (so the timer keeps
//! scheduling once user code runs), the user code segment, and the entry
//! point read from the program image.

use core::arch::asm;

use super::gdt::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};

/// EFLAGS bit 9: interrupts enabled.
const EFLAGS_IF: u32 = 1 << 9;

/// Drop to ring 3 at `entry` on `user_stack`. Never returns; the process
/// only re-enters the kernel through interrupts or `int 0x80`.
///
/// # Safety
///
/// - `entry` must point at mapped, user-accessible code.
/// - `user_stack` must point into the mapped user 4 MiB page.
/// - The TSS must already name this process's kernel stack, or the first
///   interrupt in user mode lands on a stale stack.
pub unsafe fn enter_user(entry: u32, user_stack: u32) -> ! {
    // SAFETY: iretd pops EIP, CS, EFLAGS, ESP, SS from the frame pushed
    // here, all named by the caller's contract. DS/ES are switched to the
    // user data selector before the transition; SS/CS come from the frame.
    unsafe {
        asm!(
            "mov ax, {uds}",
            "mov ds, ax",
            "mov es, ax",
            "push {uds}",
            "push ecx",
            "pushfd",
            "pop eax",
            "or eax, {flag_if}",
            "push eax",
            "push {ucs}",
            "push edx",
            "iretd",
            uds = const USER_DATA_SELECTOR as u32,
            ucs = const USER_CODE_SELECTOR as u32,
            flag_if = const EFLAGS_IF,
            in("ecx") user_stack,
            in("edx") entry,
            options(noreturn),
        )
    }
}
