//! The fixed memory map.
//!
//! Physical layout: the kernel image occupies the 4 MiB page at
//! 4..8 MiB, whose top holds the six 8 KiB per-process kernel stacks;
//! process user images live in consecutive 4 MiB pages from 8 MiB.
//!
//! Virtual layout per process: the kernel page is identity-mapped at
//! 4 MiB, the process's 4 MiB physical page appears at 128 MiB, its stack
//! tops out just under 132 MiB, and video memory is aliased at 136 MiB
//! through the dedicated video page table.

/// Small page size (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Large page size (4 MiB), the unit of user mappings.
pub const LARGE_PAGE_SIZE: usize = 0x40_0000;

/// Entries per page directory or page table.
pub const TABLE_ENTRIES: usize = 1024;

/// Physical base of the kernel image and of its 4 MiB identity mapping.
pub const KERNEL_BASE: usize = 0x40_0000;

/// First byte past the kernel 4 MiB page (8 MiB).
pub const KERNEL_TOP: usize = 0x80_0000;

/// Physical address of the VGA text buffer.
pub const VIDEO_PHYS: usize = 0xB8000;

/// Virtual base of every process's 4 MiB user page (128 MiB).
pub const USER_VIRT_BASE: usize = 0x800_0000;

/// Initial user stack pointer (132 MiB - 4).
pub const USER_STACK_TOP: usize = 0x840_0000 - 4;

/// Virtual address at which video memory is aliased for user code
/// (136 MiB).
pub const VIDMAP_VIRT: usize = 0x880_0000;

/// Virtual load address of program images inside the user page.
pub const USER_IMAGE_VIRT: usize = 0x0804_8000;

/// Size of one per-process kernel stack; also the PCB alignment grain.
pub const KERNEL_STACK_SIZE: usize = 8 * 1024;

/// Mask that turns any address inside a kernel stack into its PCB base.
pub const PCB_MASK: usize = !(KERNEL_STACK_SIZE - 1);

/// Physical base of a process slot's 4 MiB user page.
pub const fn user_phys_base(slot: usize) -> usize {
    KERNEL_TOP + slot * LARGE_PAGE_SIZE
}

/// Page-directory index covering a virtual address.
pub const fn directory_index(virt: usize) -> usize {
    virt / LARGE_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_line_up() {
        assert_eq!(USER_VIRT_BASE, 128 * 1024 * 1024);
        assert_eq!(VIDMAP_VIRT, 136 * 1024 * 1024);
        assert_eq!(USER_STACK_TOP, 132 * 1024 * 1024 - 4);
        assert_eq!(PCB_MASK, 0xFFFF_E000);
    }

    #[test]
    fn user_pages_are_consecutive_from_8mib() {
        assert_eq!(user_phys_base(0), 0x80_0000);
        assert_eq!(user_phys_base(1), 0xC0_0000);
        assert_eq!(user_phys_base(5), 0x80_0000 + 5 * LARGE_PAGE_SIZE);
    }

    #[test]
    fn directory_index_splits_on_4mib() {
        assert_eq!(directory_index(0), 0);
        assert_eq!(directory_index(KERNEL_BASE), 1);
        assert_eq!(directory_index(USER_VIRT_BASE), 32);
        assert_eq!(directory_index(VIDMAP_VIRT), 34);
    }
}
