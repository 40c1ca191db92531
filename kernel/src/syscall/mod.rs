//! System-call interface.
//!
//! Vector 0x80, DPL 3. The call number arrives in EAX, arguments in EBX,
//! ECX, EDX, and the result goes back in EAX. Kernel code works in
//! `Result`s; this layer validates the raw arguments and folds every
//! error into the architectural -1.

use crate::arch;
use crate::drivers::rtc;
use crate::error::KernelError;
use crate::fs::{self, file::FileKind, FileType};
use crate::mm::layout::{KERNEL_BASE, KERNEL_TOP, VIDEO_PHYS, VIDMAP_VIRT};
use crate::mm::paging;
use crate::process::{lifecycle, pcb};

/// System call numbers
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt = 1,
    Execute = 2,
    Read = 3,
    Write = 4,
    Open = 5,
    Close = 6,
    GetArgs = 7,
    VidMap = 8,
    SetHandler = 9,
    SigReturn = 10,
}

impl TryFrom<u32> for Syscall {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            1 => Ok(Syscall::Halt),
            2 => Ok(Syscall::Execute),
            3 => Ok(Syscall::Read),
            4 => Ok(Syscall::Write),
            5 => Ok(Syscall::Open),
            6 => Ok(Syscall::Close),
            7 => Ok(Syscall::GetArgs),
            8 => Ok(Syscall::VidMap),
            9 => Ok(Syscall::SetHandler),
            10 => Ok(Syscall::SigReturn),
            _ => Err(()),
        }
    }
}

/// Entry from the vector-0x80 stub.
///
/// The gate cleared IF; turn interrupts back on so blocking reads keep
/// the scheduler rotating (halt and execute disable them again first
/// thing).
#[no_mangle]
pub extern "C" fn dispatch(number: u32, arg1: u32, arg2: u32, arg3: u32) -> i32 {
    arch::enable_interrupts();

    let Ok(syscall) = Syscall::try_from(number) else {
        return -1;
    };
    match handle(syscall, arg1, arg2, arg3) {
        Ok(value) => value,
        Err(_) => -1,
    }
}

fn handle(syscall: Syscall, arg1: u32, arg2: u32, arg3: u32) -> Result<i32, KernelError> {
    match syscall {
        Syscall::Halt => lifecycle::halt((arg1 & 0xFF) as u16),
        Syscall::Execute => sys_execute(arg1),
        Syscall::Read => sys_read(arg1 as usize, arg2, arg3),
        Syscall::Write => sys_write(arg1 as usize, arg2, arg3),
        Syscall::Open => sys_open(arg1),
        Syscall::Close => sys_close(arg1 as usize),
        Syscall::GetArgs => sys_getargs(arg1, arg2),
        Syscall::VidMap => sys_vidmap(arg1),
        // Signal delivery is out of scope; the numbers stay reserved.
        Syscall::SetHandler | Syscall::SigReturn => Err(KernelError::UnsupportedOperation {
            operation: "signals",
        }),
    }
}

/// A user transfer buffer: non-null, with a non-negative length.
fn user_slice(ptr: u32, len: u32) -> Result<&'static mut [u8], KernelError> {
    if ptr == 0 {
        return Err(KernelError::NullPointer);
    }
    if len & 0x8000_0000 != 0 {
        return Err(KernelError::UnsupportedOperation {
            operation: "negative transfer length",
        });
    }
    // SAFETY: Non-null user pointer; the user page is mapped and
    // user-writable, and faults on a wild pointer land in the page-fault
    // handler rather than corrupting kernel state.
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize) })
}

/// Copy a NUL-terminated user string into `storage`, returning the bytes
/// before the terminator (all of `storage` if none fits).
fn copy_user_string(ptr: usize, storage: &mut [u8]) -> Result<&[u8], KernelError> {
    if ptr == 0 {
        return Err(KernelError::NullPointer);
    }
    let mut length = 0;
    while length < storage.len() {
        // SAFETY: Byte-wise read of the user string; see user_slice.
        let byte = unsafe { core::ptr::read((ptr + length) as *const u8) };
        if byte == 0 {
            break;
        }
        storage[length] = byte;
        length += 1;
    }
    Ok(&storage[..length])
}

fn sys_execute(command_ptr: u32) -> Result<i32, KernelError> {
    let mut storage = [0u8; 128];
    let command = copy_user_string(command_ptr as usize, &mut storage)?;
    lifecycle::execute(command)
}

fn sys_read(fd: usize, buf: u32, len: u32) -> Result<i32, KernelError> {
    let buf = user_slice(buf, len)?;
    // SAFETY: The current kernel stack belongs to a live process, so the
    // masked PCB pointer is valid.
    let process = unsafe { &mut *pcb::current() };
    let terminal = process.terminal;
    let count = process.fds.get_mut(fd)?.read(terminal, buf)?;
    Ok(count as i32)
}

fn sys_write(fd: usize, buf: u32, len: u32) -> Result<i32, KernelError> {
    let buf = user_slice(buf, len)?;
    // SAFETY: As in sys_read.
    let process = unsafe { &mut *pcb::current() };
    let terminal = process.terminal;
    let count = process.fds.get_mut(fd)?.write(terminal, buf)?;
    Ok(count as i32)
}

fn sys_open(name_ptr: u32) -> Result<i32, KernelError> {
    // One byte beyond the name limit so an overlong name is detected as
    // such rather than silently truncated into a valid one.
    let mut storage = [0u8; crate::fs::NAME_LEN + 1];
    let name = copy_user_string(name_ptr as usize, &mut storage)?;
    let entry = fs::image()?.lookup(name)?;

    // SAFETY: As in sys_read.
    let process = unsafe { &mut *pcb::current() };
    let fd = match entry.file_type {
        FileType::Rtc => {
            let fd = process.fds.allocate(FileKind::Rtc, None)?;
            rtc::reset();
            fd
        }
        FileType::Directory => process.fds.allocate(FileKind::Directory, None)?,
        FileType::Regular => process.fds.allocate(FileKind::File, Some(entry.inode))?,
    };
    Ok(fd as i32)
}

fn sys_close(fd: usize) -> Result<i32, KernelError> {
    // SAFETY: As in sys_read.
    let process = unsafe { &mut *pcb::current() };
    process.fds.close(fd)?;
    Ok(0)
}

fn sys_getargs(buf: u32, len: u32) -> Result<i32, KernelError> {
    let buf = user_slice(buf, len)?;
    // SAFETY: As in sys_read.
    let process = unsafe { &mut *pcb::current() };
    let args = process.args.as_bytes();

    // The caller gets the arguments plus a terminating NUL, or nothing.
    let needed = args.len() + 1;
    if buf.len() < needed {
        return Err(KernelError::BufferTooSmall {
            needed,
            provided: buf.len(),
        });
    }
    buf[..args.len()].copy_from_slice(args);
    buf[args.len()] = 0;
    Ok(0)
}

fn sys_vidmap(screen_start: u32) -> Result<i32, KernelError> {
    let addr = screen_start as usize;
    if screen_start == 0 {
        return Err(KernelError::NullPointer);
    }
    if (KERNEL_BASE..KERNEL_TOP).contains(&addr) {
        return Err(KernelError::KernelAddress { addr });
    }

    paging::remap_with_user_table(VIDMAP_VIRT, VIDEO_PHYS);
    // SAFETY: Validated non-null, non-kernel out-pointer; a wild user
    // pointer faults in user context.
    unsafe {
        core::ptr::write(addr as *mut u32, VIDMAP_VIRT as u32);
    }
    Ok(VIDMAP_VIRT as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_numbers_match_the_gate_contract() {
        assert_eq!(Syscall::try_from(1), Ok(Syscall::Halt));
        assert_eq!(Syscall::try_from(2), Ok(Syscall::Execute));
        assert_eq!(Syscall::try_from(8), Ok(Syscall::VidMap));
        assert_eq!(Syscall::try_from(10), Ok(Syscall::SigReturn));
        assert_eq!(Syscall::try_from(0), Err(()));
        assert_eq!(Syscall::try_from(11), Err(()));
    }

    #[test]
    fn user_slices_reject_null_and_negative_lengths() {
        assert_eq!(user_slice(0, 16).map(|_| ()), Err(KernelError::NullPointer));
        assert!(user_slice(0x0804_8000, 0x8000_0000).is_err());
    }

    #[test]
    fn user_strings_stop_at_the_terminator() {
        let source = b"shell\0garbage";
        let mut storage = [0u8; 32];
        let copied = copy_user_string(source.as_ptr() as usize, &mut storage).unwrap();
        assert_eq!(copied, b"shell");
    }

    #[test]
    fn unterminated_user_strings_fill_the_storage() {
        let source = [b'a'; 64];
        let mut storage = [0u8; 33];
        let copied = copy_user_string(source.as_ptr() as usize, &mut storage).unwrap();
        assert_eq!(copied.len(), 33);
    }
}
