// Interrupt Descriptor Table
//
// 256 hand-rolled 32-bit gates. CPU exceptions route to the blue screen,
// the three device IRQs to their drivers, vector 0x80 (DPL 3) to the
// system-call dispatcher, and everything else to a logging stub.

use core::arch::asm;

use lazy_static::lazy_static;

use super::gdt::KERNEL_CODE_SELECTOR;
use super::{pic, timer};

/// IRQ vector bases programmed into the PIC.
pub const PIT_VECTOR: u8 = 0x20;
pub const KEYBOARD_VECTOR: u8 = 0x21;
pub const RTC_VECTOR: u8 = 0x28;
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Gate attribute bytes: present | DPL | 32-bit gate type.
const INTERRUPT_GATE: u8 = 0x8E;
const TRAP_GATE: u8 = 0x8F;
const USER_INTERRUPT_GATE: u8 = 0xEE;

/// What the CPU pushes for a same-privilege interrupt.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

type Handler = extern "x86-interrupt" fn(InterruptFrame);
type DivergingHandler = extern "x86-interrupt" fn(InterruptFrame) -> !;
type DivergingHandlerWithCode = extern "x86-interrupt" fn(InterruptFrame, u32) -> !;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    attributes: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            attributes: 0,
            offset_high: 0,
        }
    }

    fn new(handler: usize, attributes: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            attributes,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C)]
struct InterruptDescriptorTable {
    entries: [IdtEntry; 256],
}

impl InterruptDescriptorTable {
    fn new() -> Self {
        Self {
            entries: [IdtEntry::missing(); 256],
        }
    }

    fn set_interrupt(&mut self, vector: u8, handler: Handler) {
        self.entries[vector as usize] = IdtEntry::new(handler as usize, INTERRUPT_GATE);
    }

    fn set_exception(&mut self, vector: u8, handler: DivergingHandler) {
        self.entries[vector as usize] = IdtEntry::new(handler as usize, TRAP_GATE);
    }

    fn set_exception_with_code(&mut self, vector: u8, handler: DivergingHandlerWithCode) {
        self.entries[vector as usize] = IdtEntry::new(handler as usize, TRAP_GATE);
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

macro_rules! exception_handler {
    ($name:ident, $label:expr) => {
        extern "x86-interrupt" fn $name(_frame: InterruptFrame) -> ! {
            crate::drivers::console::blue_screen($label)
        }
    };
}

macro_rules! exception_handler_with_code {
    ($name:ident, $label:expr) => {
        extern "x86-interrupt" fn $name(_frame: InterruptFrame, _error_code: u32) -> ! {
            crate::drivers::console::blue_screen($label)
        }
    };
}

exception_handler!(divide_error, "Divide Error");
exception_handler!(debug_exception, "Debug Exception");
exception_handler!(nmi_interrupt, "Non-Maskable Interrupt");
exception_handler!(breakpoint, "Breakpoint Exception");
exception_handler!(overflow, "Overflow Exception");
exception_handler!(bound_range, "BOUND Range Exceeded");
exception_handler!(invalid_opcode, "Invalid Opcode");
exception_handler!(device_not_available, "Device Not Available");
exception_handler_with_code!(double_fault, "Double Fault");
exception_handler!(coprocessor_overrun, "Coprocessor Segment Overrun");
exception_handler_with_code!(invalid_tss, "Invalid TSS");
exception_handler_with_code!(segment_not_present, "Segment Not Present");
exception_handler_with_code!(stack_fault, "Stack Fault");
exception_handler_with_code!(general_protection, "General Protection Fault");
exception_handler_with_code!(page_fault, "Page Fault");
exception_handler!(fpu_error, "x87 Floating-Point Exception");
exception_handler_with_code!(alignment_check, "Alignment Check");
exception_handler!(machine_check, "Machine Check");

extern "x86-interrupt" fn unhandled_interrupt(_frame: InterruptFrame) {
    log::warn!("unhandled interrupt");
}

extern "x86-interrupt" fn pit_handler(_frame: InterruptFrame) {
    // EOI first so a fresh tick can fire as soon as the switched-to
    // process is running.
    pic::end_of_interrupt(timer::PIT_IRQ);
    timer::tick();
}

extern "x86-interrupt" fn keyboard_handler(_frame: InterruptFrame) {
    crate::drivers::keyboard::handle_interrupt();
}

extern "x86-interrupt" fn rtc_handler(_frame: InterruptFrame) {
    crate::drivers::rtc::handle_interrupt();
}

/// Vector 0x80 entry: full register save, cdecl call into the dispatcher
/// with (number, EBX, ECX, EDX), result patched into the saved EAX slot.
#[unsafe(naked)]
unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "pushad",
        "push edx",
        "push ecx",
        "push ebx",
        "push eax",
        "call {dispatch}",
        "add esp, 16",
        // pushad stores EAX highest; overwrite it with the return value
        // so popad hands it back to the user.
        "mov [esp + 28], eax",
        "popad",
        "iretd",
        dispatch = sym crate::syscall::dispatch,
    )
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        for vector in 0..=255u8 {
            idt.set_interrupt(vector, unhandled_interrupt);
        }

        idt.set_exception(0, divide_error);
        idt.set_exception(1, debug_exception);
        idt.set_exception(2, nmi_interrupt);
        idt.set_exception(3, breakpoint);
        idt.set_exception(4, overflow);
        idt.set_exception(5, bound_range);
        idt.set_exception(6, invalid_opcode);
        idt.set_exception(7, device_not_available);
        idt.set_exception_with_code(8, double_fault);
        idt.set_exception(9, coprocessor_overrun);
        idt.set_exception_with_code(10, invalid_tss);
        idt.set_exception_with_code(11, segment_not_present);
        idt.set_exception_with_code(12, stack_fault);
        idt.set_exception_with_code(13, general_protection);
        idt.set_exception_with_code(14, page_fault);
        // Vector 15 is reserved.
        idt.set_exception(16, fpu_error);
        idt.set_exception_with_code(17, alignment_check);
        idt.set_exception(18, machine_check);

        idt.set_interrupt(PIT_VECTOR, pit_handler);
        idt.set_interrupt(KEYBOARD_VECTOR, keyboard_handler);
        idt.set_interrupt(RTC_VECTOR, rtc_handler);

        idt.entries[SYSCALL_VECTOR as usize] = IdtEntry::new(
            syscall_entry as unsafe extern "C" fn() as usize,
            USER_INTERRUPT_GATE,
        );

        idt
    };
}

pub fn init() {
    let pointer = DescriptorTablePointer {
        limit: (core::mem::size_of::<InterruptDescriptorTable>() - 1) as u16,
        base: &*IDT as *const InterruptDescriptorTable as u32,
    };
    // SAFETY: The pointer names the live static IDT built above.
    unsafe {
        asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}
