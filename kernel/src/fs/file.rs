//! File descriptors and per-process descriptor tables.
//!
//! A descriptor is a kind plus a little state; dispatch is a single match
//! on the kind. Wrong-direction calls (write to stdin, read from stdout)
//! fail right here, before any device is touched. Descriptors 0 and 1 are
//! the standard streams of every freshly executed process; 2..=7 are
//! allocated lowest-first by `open`.

use crate::drivers::{rtc, terminal};
use crate::error::KernelError;

/// Descriptors per process.
pub const MAX_OPEN_FILES: usize = 8;

/// First descriptor `open` may hand out; 0 and 1 are the streams.
pub const FIRST_USER_FD: usize = 2;

pub const STDIN_FD: usize = 0;
pub const STDOUT_FD: usize = 1;

/// What a descriptor is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Stdin,
    Stdout,
    Rtc,
    Directory,
    File,
    /// Closed slot; every operation fails.
    Null,
}

/// One slot of the descriptor table.
#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
    pub kind: FileKind,
    /// Inode number for regular files, none otherwise.
    pub inode: Option<u32>,
    /// Byte offset for files, entry cursor for directories.
    pub position: usize,
    pub in_use: bool,
}

impl FileDescriptor {
    const fn closed() -> Self {
        Self {
            kind: FileKind::Null,
            inode: None,
            position: 0,
            in_use: false,
        }
    }

    /// Read through the descriptor. `terminal` is the calling process's
    /// owning terminal, which stdin and the RTC latch key off.
    pub fn read(&mut self, terminal: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        match self.kind {
            FileKind::Stdin => terminal::read_line(terminal, buf),
            FileKind::Stdout => Err(KernelError::UnsupportedOperation {
                operation: "read from stdout",
            }),
            FileKind::Rtc => {
                rtc::wait_for_tick(terminal);
                Ok(0)
            }
            FileKind::Directory => {
                let image = crate::fs::image()?;
                match image.entry_at(self.position) {
                    Ok(entry) => {
                        let name = entry.name();
                        let count = name.len().min(buf.len());
                        buf[..count].copy_from_slice(&name[..count]);
                        self.position += 1;
                        Ok(count)
                    }
                    // Cursor ran off the end of the directory.
                    Err(KernelError::NotFound) => Ok(0),
                    Err(error) => Err(error),
                }
            }
            FileKind::File => {
                let inode = self.inode.ok_or(KernelError::UnsupportedOperation {
                    operation: "file read without an inode",
                })?;
                let image = crate::fs::image()?;
                let count = image.read_data(inode, self.position, buf)?;
                self.position += count;
                Ok(count)
            }
            FileKind::Null => Err(KernelError::BadDescriptor { fd: 0 }),
        }
    }

    /// Write through the descriptor.
    pub fn write(&mut self, terminal: usize, buf: &[u8]) -> Result<usize, KernelError> {
        match self.kind {
            FileKind::Stdout => Ok(terminal::write(terminal, buf)),
            FileKind::Rtc => {
                if buf.len() != 4 {
                    return Err(KernelError::InvalidTransferSize {
                        expected: 4,
                        actual: buf.len(),
                    });
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(buf);
                rtc::set_frequency(u32::from_le_bytes(bytes))?;
                Ok(4)
            }
            FileKind::Stdin => Err(KernelError::UnsupportedOperation {
                operation: "write to stdin",
            }),
            FileKind::Directory | FileKind::File => Err(KernelError::UnsupportedOperation {
                operation: "write to a read-only filesystem",
            }),
            FileKind::Null => Err(KernelError::BadDescriptor { fd: 0 }),
        }
    }

    /// Release the slot, undoing any per-kind device state.
    fn close(&mut self) {
        if self.kind == FileKind::Rtc {
            rtc::reset();
        }
        *self = Self::closed();
    }
}

/// Per-process descriptor table.
#[derive(Debug, Clone, Copy)]
pub struct FdTable {
    slots: [FileDescriptor; MAX_OPEN_FILES],
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            slots: [FileDescriptor::closed(); MAX_OPEN_FILES],
        }
    }

    /// Attach descriptors 0 and 1 to the terminal streams.
    pub fn open_standard_streams(&mut self) {
        self.slots[STDIN_FD] = FileDescriptor {
            kind: FileKind::Stdin,
            inode: None,
            position: 0,
            in_use: true,
        };
        self.slots[STDOUT_FD] = FileDescriptor {
            kind: FileKind::Stdout,
            inode: None,
            position: 0,
            in_use: true,
        };
    }

    /// Claim the lowest free descriptor at index 2 or above.
    pub fn allocate(&mut self, kind: FileKind, inode: Option<u32>) -> Result<usize, KernelError> {
        for fd in FIRST_USER_FD..MAX_OPEN_FILES {
            if !self.slots[fd].in_use {
                self.slots[fd] = FileDescriptor {
                    kind,
                    inode,
                    position: 0,
                    in_use: true,
                };
                return Ok(fd);
            }
        }
        Err(KernelError::DescriptorTableFull)
    }

    /// An in-use descriptor, or `BadDescriptor` for anything else.
    pub fn get_mut(&mut self, fd: usize) -> Result<&mut FileDescriptor, KernelError> {
        if fd >= MAX_OPEN_FILES || !self.slots[fd].in_use {
            return Err(KernelError::BadDescriptor { fd });
        }
        Ok(&mut self.slots[fd])
    }

    /// Close a user descriptor. The streams at 0 and 1 cannot be closed.
    pub fn close(&mut self, fd: usize) -> Result<(), KernelError> {
        if !(FIRST_USER_FD..MAX_OPEN_FILES).contains(&fd) || !self.slots[fd].in_use {
            return Err(KernelError::BadDescriptor { fd });
        }
        self.slots[fd].close();
        Ok(())
    }

    /// Close everything that is open, streams included. Used by halt.
    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.in_use {
                slot.close();
            }
        }
    }

    /// Number of in-use descriptors.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_streams() -> FdTable {
        let mut table = FdTable::new();
        table.open_standard_streams();
        table
    }

    #[test]
    fn fresh_tables_have_stdin_and_stdout_only() {
        let mut table = table_with_streams();
        assert_eq!(table.get_mut(STDIN_FD).unwrap().kind, FileKind::Stdin);
        assert_eq!(table.get_mut(STDOUT_FD).unwrap().kind, FileKind::Stdout);
        for fd in FIRST_USER_FD..MAX_OPEN_FILES {
            assert!(table.get_mut(fd).is_err());
        }
    }

    #[test]
    fn allocate_hands_out_lowest_free_from_two() {
        let mut table = table_with_streams();
        for expected in FIRST_USER_FD..MAX_OPEN_FILES {
            assert_eq!(
                table.allocate(FileKind::File, Some(0)).unwrap(),
                expected
            );
        }
        // Two stream descriptors plus six opens fill the table; the next
        // open is the ninth and fails.
        assert_eq!(
            table.allocate(FileKind::File, Some(0)),
            Err(KernelError::DescriptorTableFull)
        );
    }

    #[test]
    fn closed_slots_are_reused_lowest_first() {
        let mut table = table_with_streams();
        for _ in FIRST_USER_FD..MAX_OPEN_FILES {
            table.allocate(FileKind::File, Some(0)).unwrap();
        }
        table.close(4).unwrap();
        table.close(2).unwrap();
        assert_eq!(table.allocate(FileKind::File, Some(0)).unwrap(), 2);
        assert_eq!(table.allocate(FileKind::File, Some(0)).unwrap(), 4);
    }

    #[test]
    fn close_rejects_streams_and_bad_descriptors() {
        let mut table = table_with_streams();
        assert!(table.close(STDIN_FD).is_err());
        assert!(table.close(STDOUT_FD).is_err());
        assert!(table.close(5).is_err());
        assert!(table.close(MAX_OPEN_FILES).is_err());
        let fd = table.allocate(FileKind::File, Some(0)).unwrap();
        assert!(table.close(fd).is_ok());
        assert!(table.close(fd).is_err());
    }

    #[test]
    fn close_all_empties_the_table() {
        let mut table = table_with_streams();
        table.allocate(FileKind::File, Some(0)).unwrap();
        table.allocate(FileKind::Directory, None).unwrap();
        assert_eq!(table.open_count(), 4);
        table.close_all();
        assert_eq!(table.open_count(), 0);
    }

    #[test]
    fn wrong_direction_calls_fail_at_dispatch() {
        let mut stdin = FileDescriptor {
            kind: FileKind::Stdin,
            inode: None,
            position: 0,
            in_use: true,
        };
        assert!(stdin.write(0, b"x").is_err());

        let mut stdout = FileDescriptor {
            kind: FileKind::Stdout,
            inode: None,
            position: 0,
            in_use: true,
        };
        let mut buf = [0u8; 4];
        assert!(stdout.read(0, &mut buf).is_err());

        let mut null = FileDescriptor::closed();
        assert!(null.read(0, &mut buf).is_err());
        assert!(null.write(0, b"x").is_err());
    }

    #[test]
    fn filesystem_descriptors_reject_writes() {
        let mut file = FileDescriptor {
            kind: FileKind::File,
            inode: Some(0),
            position: 0,
            in_use: true,
        };
        assert!(file.write(0, b"x").is_err());

        let mut dir = FileDescriptor {
            kind: FileKind::Directory,
            inode: None,
            position: 0,
            in_use: true,
        };
        assert!(dir.write(0, b"x").is_err());
    }

    #[test]
    fn rtc_writes_take_exactly_four_bytes_of_valid_rate() {
        let mut rtc = FileDescriptor {
            kind: FileKind::Rtc,
            inode: None,
            position: 0,
            in_use: true,
        };
        assert_eq!(
            rtc.write(0, b"xx"),
            Err(KernelError::InvalidTransferSize {
                expected: 4,
                actual: 2
            })
        );
        assert_eq!(
            rtc.write(0, &3u32.to_le_bytes()),
            Err(KernelError::UnsupportedRate { frequency: 3 })
        );
        assert_eq!(
            rtc.write(0, &2048u32.to_le_bytes()),
            Err(KernelError::UnsupportedRate { frequency: 2048 })
        );
        assert_eq!(rtc.write(0, &512u32.to_le_bytes()), Ok(4));
    }

    #[test]
    fn directory_reads_walk_the_entry_list_per_descriptor() {
        crate::fs::testing::install_shared_image();

        let mut first = FileDescriptor {
            kind: FileKind::Directory,
            inode: None,
            position: 0,
            in_use: true,
        };
        let mut second = first;

        let mut buf = [0u8; 32];
        let n = first.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b".");
        let n = first.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"rtc");

        // A second open keeps its own cursor.
        let n = second.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b".");

        let n = first.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"frame0.txt");
        let n = first.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"big.dat");
        assert_eq!(first.read(0, &mut buf).unwrap(), 0);
    }

    #[test]
    fn file_reads_advance_the_position() {
        crate::fs::testing::install_shared_image();

        let mut file = FileDescriptor {
            kind: FileKind::File,
            inode: Some(2),
            position: 0,
            in_use: true,
        };
        let mut buf = [0u8; 5];
        assert_eq!(file.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"fish ");
        assert_eq!(file.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"frame");
        assert_eq!(file.position, 10);
    }
}
