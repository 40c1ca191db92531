// Global Descriptor Table and the 32-bit TSS

use core::arch::asm;

use lazy_static::lazy_static;
use spin::Mutex;

/// GDT layout:
/// - 0x00: Null descriptor
/// - 0x08: Kernel code segment (ring 0)
/// - 0x10: Kernel data segment (ring 0)
/// - 0x18: User code segment (ring 3, selector 0x1B with RPL)
/// - 0x20: User data segment (ring 3, selector 0x23 with RPL)
/// - 0x28: TSS
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18 | 3;
pub const USER_DATA_SELECTOR: u16 = 0x20 | 3;
pub const TSS_SELECTOR: u16 = 0x28;

const GDT_ENTRIES: usize = 6;

/// Access bytes: present | DPL | code/data | type bits.
const ACCESS_KERNEL_CODE: u8 = 0x9A;
const ACCESS_KERNEL_DATA: u8 = 0x92;
const ACCESS_USER_CODE: u8 = 0xFA;
const ACCESS_USER_DATA: u8 = 0xF2;
const ACCESS_TSS: u8 = 0x89;

/// Flag nibble: 4 KiB granularity, 32-bit operand size.
const FLAGS_FLAT_32: u8 = 0xC;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (flags << 4) | (((limit >> 16) & 0xF) as u8),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

/// 32-bit task-state segment. Only ss0/esp0 matter here: the CPU reads
/// them on every ring 3 -> ring 0 transition to find the kernel stack.
#[repr(C)]
pub struct TaskStateSegment {
    link: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            link: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SELECTOR as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            // No I/O permission bitmap: base past the segment limit.
            iomap_base: core::mem::size_of::<TaskStateSegment>() as u16,
        }
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());

lazy_static! {
    static ref GDT: [GdtEntry; GDT_ENTRIES] = {
        let tss_base = {
            let tss = TSS.lock();
            &*tss as *const TaskStateSegment as u32
        };
        let tss_limit = core::mem::size_of::<TaskStateSegment>() as u32 - 1;
        [
            GdtEntry::null(),
            GdtEntry::new(0, 0xFFFFF, ACCESS_KERNEL_CODE, FLAGS_FLAT_32),
            GdtEntry::new(0, 0xFFFFF, ACCESS_KERNEL_DATA, FLAGS_FLAT_32),
            GdtEntry::new(0, 0xFFFFF, ACCESS_USER_CODE, FLAGS_FLAT_32),
            GdtEntry::new(0, 0xFFFFF, ACCESS_USER_DATA, FLAGS_FLAT_32),
            GdtEntry::new(tss_base, tss_limit, ACCESS_TSS, 0),
        ]
    };
}

/// Load the GDT, reload every segment register, and load the task register.
pub fn init() {
    let pointer = DescriptorTablePointer {
        limit: (GDT_ENTRIES * core::mem::size_of::<GdtEntry>() - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    // SAFETY: The pointer names a live static GDT. CS is reloaded with a
    // far return through the new code descriptor; the data segments and
    // the task register use selectors from the same table.
    unsafe {
        asm!("lgdt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        asm!(
            "push {code}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            "mov ds, {data:x}",
            "mov es, {data:x}",
            "mov fs, {data:x}",
            "mov gs, {data:x}",
            "mov ss, {data:x}",
            code = in(reg) KERNEL_CODE_SELECTOR as u32,
            data = in(reg) KERNEL_DATA_SELECTOR as u32,
            tmp = out(reg) _,
        );
        asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nostack, preserves_flags));
    }
}

/// Rewrite ss0/esp0 so the next ring 3 -> ring 0 transition lands on the
/// given process kernel stack. Callers run with interrupts disabled.
pub fn set_kernel_stack(stack_top: u32) {
    let mut tss = TSS.lock();
    tss.ss0 = KERNEL_DATA_SELECTOR as u32;
    tss.esp0 = stack_top;
}
