//! Kernel error types
//!
//! Every failure a system call can surface has a variant here. Kernel code
//! propagates these with `?`; the system-call boundary folds any `Err` into
//! the architectural `-1` return value (reads at or past EOF are not errors
//! and return 0).

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// All six process slots are taken.
    ProcessTableFull,
    /// No free file descriptor at index 2..=7.
    DescriptorTableFull,
    /// File descriptor out of range or not open.
    BadDescriptor { fd: usize },
    /// No directory entry with the requested name.
    NotFound,
    /// Filenames are at most 32 bytes.
    NameTooLong { len: usize },
    /// Inode index not below the boot block's inode count.
    InvalidInode { inode: u32 },
    /// An inode references a data block index not below the block count.
    CorruptBlockIndex { index: u32 },
    /// The filesystem image is smaller than its boot block claims.
    TruncatedImage { expected: usize, actual: usize },
    /// No filesystem image has been registered.
    FilesystemMissing,
    /// Missing ELF magic in a program file.
    BadExecutable,
    /// The descriptor's kind does not support the requested direction.
    UnsupportedOperation { operation: &'static str },
    /// RTC frequencies are powers of two in 2..=1024 Hz.
    UnsupportedRate { frequency: u32 },
    /// RTC writes carry exactly a 4-byte frequency.
    InvalidTransferSize { expected: usize, actual: usize },
    /// Null user pointer passed to a call that requires a buffer.
    NullPointer,
    /// User pointer aimed into the kernel 4 MiB region.
    KernelAddress { addr: usize },
    /// Caller-supplied buffer cannot hold the result.
    BufferTooSmall { needed: usize, provided: usize },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::ProcessTableFull => write!(f, "no free process slot"),
            KernelError::DescriptorTableFull => write!(f, "no free file descriptor"),
            KernelError::BadDescriptor { fd } => write!(f, "bad file descriptor {}", fd),
            KernelError::NotFound => write!(f, "no such file"),
            KernelError::NameTooLong { len } => {
                write!(f, "filename of {} bytes exceeds 32", len)
            }
            KernelError::InvalidInode { inode } => write!(f, "invalid inode {}", inode),
            KernelError::CorruptBlockIndex { index } => {
                write!(f, "data block index {} out of range", index)
            }
            KernelError::TruncatedImage { expected, actual } => {
                write!(f, "image of {} bytes, geometry needs {}", actual, expected)
            }
            KernelError::FilesystemMissing => write!(f, "filesystem not mounted"),
            KernelError::BadExecutable => write!(f, "missing ELF magic"),
            KernelError::UnsupportedOperation { operation } => {
                write!(f, "operation not supported: {}", operation)
            }
            KernelError::UnsupportedRate { frequency } => {
                write!(f, "unsupported rtc frequency {} Hz", frequency)
            }
            KernelError::InvalidTransferSize { expected, actual } => {
                write!(f, "transfer of {} bytes, expected {}", actual, expected)
            }
            KernelError::NullPointer => write!(f, "null user pointer"),
            KernelError::KernelAddress { addr } => {
                write!(f, "user pointer {:#x} aims into kernel memory", addr)
            }
            KernelError::BufferTooSmall { needed, provided } => {
                write!(f, "buffer of {} bytes, {} needed", provided, needed)
            }
        }
    }
}
