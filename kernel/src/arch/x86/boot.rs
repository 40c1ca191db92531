//! Multiboot v1 boot contract.
//!
//! The kernel is loaded at physical 4 MiB by any Multiboot loader, which
//! leaves the loader magic in EAX and a pointer to the info record in EBX.
//! The filesystem image is handed over as the first boot module. The entry
//! stub itself lives in `main.rs` next to `kmain`.

/// Magic in the header the loader scans for.
pub const HEADER_MAGIC: u32 = 0x1BAD_B002;

/// Header flags: page-align modules, supply memory information.
pub const HEADER_FLAGS: u32 = 0x0000_0003;

/// Value a compliant loader leaves in EAX.
pub const LOADER_MAGIC: u32 = 0x2BAD_B002;

/// The three-word header, checksummed so the words sum to zero.
pub const HEADER: [u32; 3] = [
    HEADER_MAGIC,
    HEADER_FLAGS,
    0u32.wrapping_sub(HEADER_MAGIC).wrapping_sub(HEADER_FLAGS),
];

/// Leading fields of the Multiboot information record. Only the module
/// list is consumed; the rest is kept for layout fidelity.
#[repr(C)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
}

/// One entry of the boot module list.
#[repr(C)]
pub struct MultibootModule {
    pub start: u32,
    pub end: u32,
    pub string: u32,
    pub reserved: u32,
}

/// Locate the filesystem image: the first boot module.
///
/// Returns its physical address and length.
pub fn filesystem_module(info: &MultibootInfo) -> Option<(usize, usize)> {
    const FLAG_MODS: u32 = 1 << 3;

    if info.flags & FLAG_MODS == 0 || info.mods_count == 0 {
        return None;
    }
    // SAFETY: With FLAG_MODS set the loader placed `mods_count` module
    // records at `mods_addr`, identity-accessible this early in boot.
    let module = unsafe { &*(info.mods_addr as *const MultibootModule) };
    if module.end <= module.start {
        return None;
    }
    Some((module.start as usize, (module.end - module.start) as usize))
}
