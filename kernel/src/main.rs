//! TrionOS kernel binary: Multiboot entry and bring-up.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    trion_kernel::serial_println!("[KERNEL PANIC] {}", info);
    trion_kernel::println!("[KERNEL PANIC] {}", info);
    trion_kernel::arch::halt()
}

#[cfg(target_arch = "x86")]
mod boot_entry {
    use trion_kernel::arch::x86::boot;
    use trion_kernel::process::pcb::pcb_address;
    use trion_kernel::process::MAX_PROCESSES;
    use trion_kernel::{arch, drivers, fs, logger, mm, println, process, serial};

    /// Multiboot header, linked into the first bytes of the image.
    #[link_section = ".multiboot"]
    #[used]
    static MULTIBOOT_HEADER: [u32; 3] = boot::HEADER;

    const BOOT_STACK_SIZE: usize = 16 * 1024;

    #[repr(C, align(16))]
    struct BootStack([u8; BOOT_STACK_SIZE]);

    /// Stack for the boot path; processes get their own 8 KiB stacks.
    static mut BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

    core::arch::global_asm!(
        ".section .text._start",
        ".global _start",
        "_start:",
        "cli",
        "lea esp, [{stack} + {stack_size}]",
        "push ebx",
        "push eax",
        "call {kmain}",
        "2:",
        "hlt",
        "jmp 2b",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        kmain = sym kmain,
    );

    /// Rust-side boot entry, jumped to from `_start` with the Multiboot
    /// magic and info pointer.
    #[no_mangle]
    extern "C" fn kmain(magic: u32, info: *const boot::MultibootInfo) -> ! {
        serial::init();
        logger::init();
        log::info!("TrionOS v{}", env!("CARGO_PKG_VERSION"));

        arch::init();
        mm::paging::init();
        drivers::terminal::init();

        if magic != boot::LOADER_MAGIC {
            panic!("not loaded by a multiboot loader: magic {:#x}", magic);
        }
        // SAFETY: A compliant loader leaves a valid info record in EBX.
        let info = unsafe { &*info };
        let Some((addr, len)) = boot::filesystem_module(info) else {
            panic!("no filesystem module supplied by the loader");
        };
        // The loader drops the module just past the kernel image, inside
        // the kernel 4 MiB page; it must stay clear of the process
        // kernel stacks carved out of the top of that page.
        if addr + len > pcb_address(MAX_PROCESSES - 1) {
            panic!("filesystem module at {:#x}+{:#x} overruns the kernel page", addr, len);
        }
        // SAFETY: The module range stays mapped and untouched for the
        // kernel's lifetime.
        if let Err(error) = unsafe { fs::init(addr, len) } {
            panic!("bad filesystem image: {}", error);
        }

        drivers::keyboard::init();
        drivers::rtc::init();
        arch::x86::timer::init();

        println!("TrionOS {} terminals up", drivers::terminal::TERMINAL_COUNT);
        log::info!("spawning the first shell");

        loop {
            if let Err(error) = process::lifecycle::execute(process::lifecycle::SHELL) {
                panic!("cannot start shell: {}", error);
            }
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
