//! Kernel execution contexts and the switch primitives.
//!
//! A [`Context`] holds the callee-saved register state of a suspended kernel
//! execution: the stack pointer (aimed at a return address), the frame
//! pointer, and EBX/ESI/EDI. Three primitives operate on it:
//!
//! - [`Context::save`] captures the current point of execution and returns
//!   0. When some later `load` targets the same context, `save` appears to
//!   return a second time with the value passed to `load`.
//! - [`Context::load`] abandons the current stack and resumes a saved
//!   context, handing it a non-zero value.
//! - [`Context::switch`] saves into one context and resumes another in one
//!   step; the scheduler's tick handler lives on this.
//!
//! `execute` saves a context into the child's PCB before entering user mode
//! and `halt` loads it with the widened exit status, which replaces the
//! original jump-to-label unwind with an explicit per-process resume slot.

/// Callee-saved register state of a suspended kernel execution.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub esp: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub esi: u32,
    pub edi: u32,
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            esp: 0,
            ebp: 0,
            ebx: 0,
            esi: 0,
            edi: 0,
        }
    }

    /// Capture the current execution point into `ctx`.
    ///
    /// Returns 0 on the capturing path and the `load` value when resumed.
    #[inline]
    pub fn save(ctx: *mut Context) -> u32 {
        #[cfg(target_arch = "x86")]
        // SAFETY: `ctx` points to a live Context; the naked routine only
        // stores the callee-saved registers through it.
        unsafe {
            save_context(ctx)
        }
        #[cfg(not(target_arch = "x86"))]
        {
            let _ = ctx;
            0
        }
    }

    /// Resume `ctx`, making its `save` call return `value`. Never returns.
    ///
    /// `value` must be non-zero so the resumed path can tell itself apart
    /// from the original capture.
    #[inline]
    pub fn load(ctx: *const Context, value: u32) -> ! {
        debug_assert!(value != 0);
        #[cfg(target_arch = "x86")]
        // SAFETY: `ctx` was filled by `save` or `switch` on a kernel stack
        // that is still intact, per the PCB lifecycle.
        unsafe {
            load_context(ctx, value)
        }
        #[cfg(not(target_arch = "x86"))]
        {
            let _ = (ctx, value);
            unreachable!("no context switching on the host")
        }
    }

    /// Save into `save` and resume `load`. Returns when `save` is resumed.
    ///
    /// `save` and `load` may alias (the no-op context switch of a
    /// single-terminal tick), which is why this takes raw pointers.
    #[inline]
    pub fn switch(save: *mut Context, load: *const Context) {
        #[cfg(target_arch = "x86")]
        // SAFETY: Both pointers target live Contexts inside PCBs; the
        // naked routine stores through `save` before reading `load`, so
        // aliasing pointers degrade to a harmless self-switch.
        unsafe {
            switch_context(save, load)
        }
        #[cfg(not(target_arch = "x86"))]
        {
            let _ = (save, load);
        }
    }
}

#[cfg(target_arch = "x86")]
#[unsafe(naked)]
unsafe extern "C" fn save_context(_ctx: *mut Context) -> u32 {
    // At entry ESP points at the return address, which is exactly the
    // resume point load_context will ret to.
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov [eax], esp",
        "mov [eax + 4], ebp",
        "mov [eax + 8], ebx",
        "mov [eax + 12], esi",
        "mov [eax + 16], edi",
        "xor eax, eax",
        "ret",
    )
}

#[cfg(target_arch = "x86")]
#[unsafe(naked)]
unsafe extern "C" fn load_context(_ctx: *const Context, _value: u32) -> ! {
    core::arch::naked_asm!(
        "mov ecx, [esp + 4]",
        "mov eax, [esp + 8]",
        "mov esp, [ecx]",
        "mov ebp, [ecx + 4]",
        "mov ebx, [ecx + 8]",
        "mov esi, [ecx + 12]",
        "mov edi, [ecx + 16]",
        "ret",
    )
}

#[cfg(target_arch = "x86")]
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_save: *mut Context, _load: *const Context) {
    // EAX is forced non-zero so that a context captured by save_context and
    // resumed by a scheduler switch does not observe the just-saved value.
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov ecx, [esp + 8]",
        "mov [eax], esp",
        "mov [eax + 4], ebp",
        "mov [eax + 8], ebx",
        "mov [eax + 12], esi",
        "mov [eax + 16], edi",
        "mov esp, [ecx]",
        "mov ebp, [ecx + 4]",
        "mov ebx, [ecx + 8]",
        "mov esi, [ecx + 12]",
        "mov edi, [ecx + 16]",
        "mov eax, 1",
        "ret",
    )
}
