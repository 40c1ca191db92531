//! Paging manager.
//!
//! One page directory and three page tables, all statically allocated:
//! the kernel low-memory table (identity entries for the first 4 MiB, only
//! the VGA page present), the user page table (4 KiB-granularity mappings
//! inside one 4 MiB region), and the video-alias table (exposes physical
//! video or a terminal's shadow page at a 4 MiB-aligned user address).
//!
//! The kernel itself is mapped once at init: a single 4 MiB page at
//! virtual = physical 4 MiB. User code always lives at virtual 128 MiB and
//! is retargeted by rewriting one directory entry. Every rewrite runs with
//! interrupts disabled and ends with a TLB flush, so a flush is never
//! observed against a half-written entry.

use bitflags::bitflags;
use spin::Mutex;

use super::layout::{
    directory_index, KERNEL_BASE, PAGE_SIZE, TABLE_ENTRIES, VIDEO_PHYS,
};
use crate::arch;

bitflags! {
    /// Page directory / page table entry bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        /// 4 MiB page (directory entries only; requires CR4.PSE).
        const LARGE = 1 << 7;
    }
}

/// A single page directory or page table entry.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Not present, marked writable for when it is later enabled.
    pub const fn absent() -> Self {
        PageEntry(PageFlags::WRITABLE.bits())
    }

    pub fn new(phys: u32, flags: PageFlags) -> Self {
        PageEntry((phys & !0xFFF) | flags.bits())
    }

    pub fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    pub fn address(self) -> u32 {
        self.0 & !0xFFF
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// 1024 entries, one hardware page.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; TABLE_ENTRIES],
}

impl PageTable {
    pub const fn empty() -> Self {
        Self {
            entries: [PageEntry::absent(); TABLE_ENTRIES],
        }
    }
}

/// The process-wide singleton: directory plus the three tables.
pub struct AddressSpace {
    directory: PageTable,
    kernel_table: PageTable,
    user_table: PageTable,
    video_table: PageTable,
}

impl AddressSpace {
    pub const fn new() -> Self {
        Self {
            directory: PageTable::empty(),
            kernel_table: PageTable::empty(),
            user_table: PageTable::empty(),
            video_table: PageTable::empty(),
        }
    }

    /// Build the boot mapping: all directory entries absent, the first
    /// 4 MiB identity-entered as 4 KiB pages with only the VGA page
    /// present, and the kernel 4 MiB page at virtual 4 MiB.
    pub fn initialize(&mut self) {
        for i in 0..TABLE_ENTRIES {
            self.directory.entries[i] = PageEntry::absent();
            self.kernel_table.entries[i] =
                PageEntry::new((i * PAGE_SIZE) as u32, PageFlags::WRITABLE);
        }

        self.kernel_table.entries[VIDEO_PHYS / PAGE_SIZE] = PageEntry::new(
            VIDEO_PHYS as u32,
            PageFlags::PRESENT | PageFlags::WRITABLE,
        );

        let kernel_table_addr = &self.kernel_table as *const PageTable as u32;
        self.directory.entries[0] = PageEntry::new(
            kernel_table_addr,
            PageFlags::PRESENT | PageFlags::WRITABLE,
        );
        self.directory.entries[directory_index(KERNEL_BASE)] = PageEntry::new(
            KERNEL_BASE as u32,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::LARGE,
        );
    }

    /// Point the 4 MiB region at `virt` to the 4 MiB physical page at
    /// `phys`, user-accessible and writable.
    pub fn map_large(&mut self, virt: usize, phys: usize) {
        self.directory.entries[directory_index(virt)] = PageEntry::new(
            phys as u32,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER | PageFlags::LARGE,
        );
    }

    /// Install the user page table over the region at `virt` and enter
    /// `phys` at its `page_index`th 4 KiB slot.
    pub fn map_through_user_table(&mut self, virt: usize, phys: usize, page_index: usize) {
        let user_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
        let table_addr = &self.user_table as *const PageTable as u32;
        self.directory.entries[directory_index(virt)] = PageEntry::new(table_addr, user_flags);
        self.user_table.entries[page_index] = PageEntry::new(phys as u32, user_flags);
    }

    /// Install the video-alias page table over the region at `virt` with
    /// `phys` at its first slot.
    pub fn map_through_video_table(&mut self, virt: usize, phys: usize) {
        let user_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
        let table_addr = &self.video_table as *const PageTable as u32;
        self.directory.entries[directory_index(virt)] = PageEntry::new(table_addr, user_flags);
        self.video_table.entries[0] = PageEntry::new(phys as u32, user_flags);
    }

    /// Directory entry covering `virt`.
    pub fn directory_entry(&self, virt: usize) -> PageEntry {
        self.directory.entries[directory_index(virt)]
    }
}

static SPACE: Mutex<AddressSpace> = Mutex::new(AddressSpace::new());

/// Build the boot mapping and turn translation on: CR3, then CR4.PSE,
/// then CR0.PG, as on any PSE-era x86.
pub fn init() {
    arch::without_interrupts(|| {
        let mut space = SPACE.lock();
        space.initialize();

        #[cfg(target_arch = "x86")]
        // SAFETY: The directory identity-maps the kernel page the CPU is
        // executing from, so enabling translation does not move the
        // ground from under us.
        unsafe {
            let directory = &space.directory as *const PageTable as u32;
            arch::x86::load_page_directory(directory);
            arch::x86::enable_large_pages();
            arch::x86::enable_paging();
        }
    });
    log::info!("paging enabled, kernel 4 MiB page at {:#x}", KERNEL_BASE);
}

/// Map the 4 MiB region at `virt` to the physical page at `phys`.
pub fn remap(virt: usize, phys: usize) {
    arch::without_interrupts(|| {
        SPACE.lock().map_large(virt, phys);
        arch::flush_tlb();
    });
}

/// Map `phys` at `virt` through the user page table's first slot.
pub fn remap_with_user_table(virt: usize, phys: usize) {
    remap_with_user_table_page(virt, phys, 0);
}

/// Map `phys` at `virt` + `page_index` * 4 KiB through the user page
/// table.
pub fn remap_with_user_table_page(virt: usize, phys: usize, page_index: usize) {
    arch::without_interrupts(|| {
        SPACE.lock().map_through_user_table(virt, phys, page_index);
        arch::flush_tlb();
    });
}

/// Alias `phys` at `virt` through the dedicated video page table.
pub fn remap_video_with_table(virt: usize, phys: usize) {
    arch::without_interrupts(|| {
        SPACE.lock().map_through_video_table(virt, phys);
        arch::flush_tlb();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::layout::{user_phys_base, USER_VIRT_BASE, VIDMAP_VIRT};

    #[test]
    fn initialize_builds_the_boot_mapping() {
        let mut space = AddressSpace::new();
        space.initialize();

        let low = space.directory_entry(0);
        assert!(low.is_present());
        assert_eq!(low.address(), &space.kernel_table as *const _ as u32);

        let kernel = space.directory_entry(KERNEL_BASE);
        assert_eq!(kernel.raw(), KERNEL_BASE as u32 | 0x83);

        let present: usize = space
            .kernel_table
            .entries
            .iter()
            .filter(|e| e.is_present())
            .count();
        assert_eq!(present, 1, "only the VGA page is present in low memory");
        assert!(space.kernel_table.entries[VIDEO_PHYS / PAGE_SIZE].is_present());
    }

    #[test]
    fn map_large_builds_a_user_4mib_entry() {
        let mut space = AddressSpace::new();
        space.initialize();
        space.map_large(USER_VIRT_BASE, user_phys_base(2));

        let entry = space.directory_entry(USER_VIRT_BASE);
        assert_eq!(entry.raw(), user_phys_base(2) as u32 | 0x87);
    }

    #[test]
    fn map_large_is_idempotent() {
        let mut space = AddressSpace::new();
        space.initialize();
        space.map_large(USER_VIRT_BASE, user_phys_base(0));
        let first = space.directory_entry(USER_VIRT_BASE);
        space.map_large(USER_VIRT_BASE, user_phys_base(0));
        assert_eq!(space.directory_entry(USER_VIRT_BASE), first);
    }

    #[test]
    fn video_alias_goes_through_the_video_table() {
        let mut space = AddressSpace::new();
        space.initialize();
        space.map_through_video_table(VIDMAP_VIRT, VIDEO_PHYS);

        let pde = space.directory_entry(VIDMAP_VIRT);
        assert!(pde.is_present());
        assert_eq!(pde.address(), &space.video_table as *const _ as u32);
        assert_eq!(space.video_table.entries[0].raw(), VIDEO_PHYS as u32 | 0x7);
    }

    #[test]
    fn user_table_page_index_selects_the_slot() {
        let mut space = AddressSpace::new();
        space.initialize();
        space.map_through_user_table(USER_VIRT_BASE, 0xB000, 3);
        assert_eq!(space.user_table.entries[3].raw(), 0xB000 | 0x7);
        assert!(!space.user_table.entries[0].is_present());
    }
}
