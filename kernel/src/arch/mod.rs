//! Architecture support.
//!
//! Everything that touches hardware lives in the `x86` submodule, compiled
//! only for 32-bit x86. The wrappers here give the rest of the kernel one
//! arch-neutral surface; on other targets (the host test build) they are
//! no-op stubs, mirroring how the drivers stub out foreign architectures.

#[cfg(target_arch = "x86")]
pub mod x86;

pub mod context;

/// Bring up the descriptor tables and the interrupt controller.
pub fn init() {
    #[cfg(target_arch = "x86")]
    x86::init();
}

/// Run `f` with hardware interrupts disabled, restoring the previous
/// interrupt flag afterwards.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(target_arch = "x86")]
    {
        x86::without_interrupts(f)
    }
    #[cfg(not(target_arch = "x86"))]
    {
        f()
    }
}

pub fn enable_interrupts() {
    #[cfg(target_arch = "x86")]
    x86::enable_interrupts();
}

pub fn disable_interrupts() {
    #[cfg(target_arch = "x86")]
    x86::disable_interrupts();
}

/// Reload CR3, discarding every non-global TLB entry.
pub fn flush_tlb() {
    #[cfg(target_arch = "x86")]
    x86::flush_tlb();
}

/// Point the TSS at a process's kernel stack for ring 3 -> ring 0 entry.
pub fn set_kernel_stack(stack_top: u32) {
    #[cfg(target_arch = "x86")]
    x86::gdt::set_kernel_stack(stack_top);
    #[cfg(not(target_arch = "x86"))]
    let _ = stack_top;
}

/// Drop to ring 3 at `entry` with the given user stack. Never returns.
///
/// # Safety
///
/// `entry` and `user_stack` must lie inside the currently mapped user
/// 4 MiB page and the TSS must already name a valid kernel stack.
pub unsafe fn enter_user(entry: u32, user_stack: u32) -> ! {
    #[cfg(target_arch = "x86")]
    // SAFETY: Forwarded contract.
    unsafe {
        x86::usermode::enter_user(entry, user_stack)
    }
    #[cfg(not(target_arch = "x86"))]
    {
        let _ = (entry, user_stack);
        unreachable!("no user mode on the host")
    }
}

/// Stop the CPU for good.
pub fn halt() -> ! {
    #[cfg(target_arch = "x86")]
    x86::halt_loop();
    #[cfg(not(target_arch = "x86"))]
    loop {
        core::hint::spin_loop();
    }
}
