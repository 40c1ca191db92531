//! Read-only flat filesystem.
//!
//! The image is one contiguous byte range handed over by the bootloader:
//! a boot block (directory entry count, inode count, data block count,
//! then 64-byte directory entries), the inode blocks, and 4 KiB data
//! blocks. Little-endian throughout. Nothing here writes.

pub mod file;

use spin::Once;

use crate::error::KernelError;

/// Size of every block in the image.
pub const BLOCK_SIZE: usize = 4096;

/// Size of one directory entry in the boot block.
pub const DIR_ENTRY_SIZE: usize = 64;

/// Maximum filename length. Names are NUL-padded and not guaranteed
/// NUL-terminated at full length.
pub const NAME_LEN: usize = 32;

/// Directory entry file types.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Rtc = 0,
    Directory = 1,
    Regular = 2,
}

impl TryFrom<u32> for FileType {
    type Error = KernelError;

    fn try_from(value: u32) -> Result<Self, KernelError> {
        match value {
            0 => Ok(FileType::Rtc),
            1 => Ok(FileType::Directory),
            2 => Ok(FileType::Regular),
            _ => Err(KernelError::NotFound),
        }
    }
}

/// In-memory copy of one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; NAME_LEN],
    pub file_type: FileType,
    pub inode: u32,
}

impl DirEntry {
    /// The name bytes up to the first NUL.
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        &self.name[..len]
    }
}

/// A parsed view over the raw image bytes.
pub struct FsImage<'a> {
    data: &'a [u8],
}

impl<'a> FsImage<'a> {
    /// Validate the geometry the boot block claims against the actual
    /// image length.
    pub fn new(data: &'a [u8]) -> Result<Self, KernelError> {
        if data.len() < BLOCK_SIZE {
            return Err(KernelError::TruncatedImage {
                expected: BLOCK_SIZE,
                actual: data.len(),
            });
        }
        let image = Self { data };

        let dentry_area = (image.dir_entry_count() as usize + 1) * DIR_ENTRY_SIZE;
        if dentry_area > BLOCK_SIZE {
            return Err(KernelError::TruncatedImage {
                expected: dentry_area,
                actual: BLOCK_SIZE,
            });
        }

        let needed =
            (1 + image.inode_count() as usize + image.data_block_count() as usize) * BLOCK_SIZE;
        if data.len() < needed {
            return Err(KernelError::TruncatedImage {
                expected: needed,
                actual: data.len(),
            });
        }
        Ok(image)
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    }

    pub fn dir_entry_count(&self) -> u32 {
        self.read_u32(0)
    }

    pub fn inode_count(&self) -> u32 {
        self.read_u32(4)
    }

    pub fn data_block_count(&self) -> u32 {
        self.read_u32(8)
    }

    /// Directory entry by index, or `NotFound` past the end.
    pub fn entry_at(&self, index: usize) -> Result<DirEntry, KernelError> {
        if index >= self.dir_entry_count() as usize {
            return Err(KernelError::NotFound);
        }
        let offset = (index + 1) * DIR_ENTRY_SIZE;
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&self.data[offset..offset + NAME_LEN]);
        Ok(DirEntry {
            name,
            file_type: FileType::try_from(self.read_u32(offset + NAME_LEN))?,
            inode: self.read_u32(offset + NAME_LEN + 4),
        })
    }

    /// Directory entry by name: length-bounded compare, exact-length
    /// match. Names longer than 32 bytes match nothing.
    pub fn lookup(&self, name: &[u8]) -> Result<DirEntry, KernelError> {
        if name.len() > NAME_LEN {
            return Err(KernelError::NameTooLong { len: name.len() });
        }
        for index in 0..self.dir_entry_count() as usize {
            let entry = self.entry_at(index)?;
            if entry.name() == name {
                return Ok(entry);
            }
        }
        Err(KernelError::NotFound)
    }

    /// Length in bytes of the file behind `inode`.
    pub fn file_size(&self, inode: u32) -> Result<usize, KernelError> {
        if inode >= self.inode_count() {
            return Err(KernelError::InvalidInode { inode });
        }
        Ok(self.read_u32(self.inode_offset(inode)) as usize)
    }

    fn inode_offset(&self, inode: u32) -> usize {
        BLOCK_SIZE * (1 + inode as usize)
    }

    /// Copy file bytes starting at `offset` into `buf`.
    ///
    /// The read is clamped to `file_size - offset`; a read at or past EOF
    /// copies nothing and returns 0. Every data-block index walked is
    /// checked against the image's block count. Returns the number of
    /// bytes copied.
    pub fn read_data(
        &self,
        inode: u32,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, KernelError> {
        let size = self.file_size(inode)?;
        if offset >= size {
            return Ok(0);
        }

        let inode_offset = self.inode_offset(inode);
        let data_base = BLOCK_SIZE * (1 + self.inode_count() as usize);
        let length = buf.len().min(size - offset);

        let mut copied = 0;
        while copied < length {
            let position = offset + copied;
            let index_slot = position / BLOCK_SIZE;
            // An inode block holds one length word and 1023 indices; a
            // length that needs more is corrupt.
            if index_slot >= BLOCK_SIZE / 4 - 1 {
                return Err(KernelError::CorruptBlockIndex {
                    index: index_slot as u32,
                });
            }
            let block_index = self.read_u32(inode_offset + 4 * (1 + index_slot));
            if block_index >= self.data_block_count() {
                return Err(KernelError::CorruptBlockIndex { index: block_index });
            }

            let within = position % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(length - copied);
            let source = data_base + BLOCK_SIZE * block_index as usize + within;
            buf[copied..copied + chunk].copy_from_slice(&self.data[source..source + chunk]);
            copied += chunk;
        }
        Ok(copied)
    }
}

static IMAGE: Once<FsImage<'static>> = Once::new();

/// Register the boot module as the filesystem image.
///
/// # Safety
///
/// `addr..addr + len` must stay mapped, initialized, and unwritten for the
/// kernel's lifetime.
pub unsafe fn init(addr: usize, len: usize) -> Result<(), KernelError> {
    // SAFETY: Caller contract; the bootloader hands over the module range.
    let data = unsafe { core::slice::from_raw_parts(addr as *const u8, len) };
    let image = FsImage::new(data)?;
    log::info!(
        "filesystem: {} entries, {} inodes, {} data blocks",
        image.dir_entry_count(),
        image.inode_count(),
        image.data_block_count()
    );
    IMAGE.call_once(|| image);
    Ok(())
}

/// The registered image, or `FilesystemMissing` before `init`.
pub fn image() -> Result<&'static FsImage<'static>, KernelError> {
    IMAGE.get().ok_or(KernelError::FilesystemMissing)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::vec;
    use std::vec::Vec;

    use super::*;

    /// Assemble an image from (name, type, content) triples; file `i` gets
    /// inode `i` and consecutive data blocks.
    pub fn build_image(files: &[(&[u8], u32, &[u8])]) -> Vec<u8> {
        let inode_count = files.len();
        let block_counts: Vec<usize> = files.iter().map(|f| f.2.len().div_ceil(BLOCK_SIZE)).collect();
        let data_blocks: usize = block_counts.iter().sum();

        let mut image = vec![0u8; (1 + inode_count + data_blocks) * BLOCK_SIZE];
        image[0..4].copy_from_slice(&(files.len() as u32).to_le_bytes());
        image[4..8].copy_from_slice(&(inode_count as u32).to_le_bytes());
        image[8..12].copy_from_slice(&(data_blocks as u32).to_le_bytes());

        let mut next_block = 0u32;
        for (i, (name, file_type, content)) in files.iter().enumerate() {
            let dentry = (i + 1) * DIR_ENTRY_SIZE;
            image[dentry..dentry + name.len()].copy_from_slice(name);
            image[dentry + NAME_LEN..dentry + NAME_LEN + 4]
                .copy_from_slice(&file_type.to_le_bytes());
            image[dentry + NAME_LEN + 4..dentry + NAME_LEN + 8]
                .copy_from_slice(&(i as u32).to_le_bytes());

            let inode = BLOCK_SIZE * (1 + i);
            image[inode..inode + 4].copy_from_slice(&(content.len() as u32).to_le_bytes());
            for chunk_index in 0..block_counts[i] {
                let slot = inode + 4 * (1 + chunk_index);
                image[slot..slot + 4].copy_from_slice(&next_block.to_le_bytes());
                let data = BLOCK_SIZE * (1 + inode_count + next_block as usize);
                let chunk = &content[chunk_index * BLOCK_SIZE
                    ..content.len().min((chunk_index + 1) * BLOCK_SIZE)];
                image[data..data + chunk.len()].copy_from_slice(chunk);
                next_block += 1;
            }
        }
        image
    }

    /// A pattern byte stream long enough to span multiple blocks.
    pub fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// The shared image registered behind `fs::image()` for dispatch
    /// tests. Every caller gets the same layout:
    /// index 0 "." (directory), 1 "rtc", 2 "frame0.txt", 3 "big.dat".
    pub fn install_shared_image() -> &'static FsImage<'static> {
        let image = build_image(&[
            (b".", 1, b""),
            (b"rtc", 0, b""),
            (b"frame0.txt", 2, b"fish frame zero\n"),
            (b"big.dat", 2, &pattern(10_000)),
        ]);
        IMAGE.call_once(|| {
            FsImage::new(std::boxed::Box::leak(image.into_boxed_slice()))
                .expect("shared test image is well-formed")
        })
    }
}

#[cfg(test)]
mod tests {
    use std::vec;

    use super::testing::{build_image, pattern};
    use super::*;

    #[test]
    fn boot_block_counts() {
        let data = build_image(&[(b"a", 2, b"hello"), (b"big", 2, &pattern(9000))]);
        let image = FsImage::new(&data).unwrap();
        assert_eq!(image.dir_entry_count(), 2);
        assert_eq!(image.inode_count(), 2);
        assert_eq!(image.data_block_count(), 1 + 3);
    }

    #[test]
    fn lookup_matches_exact_names_only() {
        let data = build_image(&[(b"frame0.txt", 2, b"x"), (b"frame", 2, b"y")]);
        let image = FsImage::new(&data).unwrap();

        let entry = image.lookup(b"frame0.txt").unwrap();
        assert_eq!(entry.inode, 0);
        assert_eq!(entry.file_type, FileType::Regular);

        assert_eq!(image.lookup(b"frame").unwrap().inode, 1);
        assert_eq!(image.lookup(b"frame0"), Err(KernelError::NotFound));
        assert_eq!(image.lookup(b"frame0.txt.bak"), Err(KernelError::NotFound));
    }

    #[test]
    fn lookup_rejects_names_over_32_bytes() {
        let data = build_image(&[(b"a", 2, b"x")]);
        let image = FsImage::new(&data).unwrap();
        let long = [b'a'; 33];
        assert_eq!(
            image.lookup(&long),
            Err(KernelError::NameTooLong { len: 33 })
        );
    }

    #[test]
    fn full_length_names_are_not_nul_terminated() {
        let name = [b'n'; 32];
        let data = build_image(&[(&name, 2, b"x")]);
        let image = FsImage::new(&data).unwrap();
        assert_eq!(image.lookup(&name).unwrap().name(), &name);
    }

    #[test]
    fn entry_at_is_bounds_checked() {
        let data = build_image(&[(b"only", 1, b"")]);
        let image = FsImage::new(&data).unwrap();
        assert_eq!(image.entry_at(0).unwrap().file_type, FileType::Directory);
        assert_eq!(image.entry_at(1).map(|_| ()), Err(KernelError::NotFound));
    }

    #[test]
    fn read_data_round_trips_every_range() {
        let content = pattern(10_000);
        let data = build_image(&[(b"big", 2, &content)]);
        let image = FsImage::new(&data).unwrap();

        let mut buf = vec![0u8; content.len()];
        assert_eq!(image.read_data(0, 0, &mut buf).unwrap(), content.len());
        assert_eq!(buf, content);

        // A range crossing two block boundaries.
        let mut buf = vec![0u8; 5000];
        assert_eq!(image.read_data(0, 3000, &mut buf).unwrap(), 5000);
        assert_eq!(buf, content[3000..8000]);

        // Clamped at EOF.
        let mut buf = vec![0u8; 4096];
        assert_eq!(image.read_data(0, 9000, &mut buf).unwrap(), 1000);
        assert_eq!(buf[..1000], content[9000..]);
    }

    #[test]
    fn read_at_or_past_eof_returns_zero() {
        let data = build_image(&[(b"f", 2, b"abc")]);
        let image = FsImage::new(&data).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(image.read_data(0, 3, &mut buf).unwrap(), 0);
        assert_eq!(image.read_data(0, 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn invalid_inode_is_rejected() {
        let data = build_image(&[(b"f", 2, b"abc")]);
        let image = FsImage::new(&data).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            image.read_data(7, 0, &mut buf),
            Err(KernelError::InvalidInode { inode: 7 })
        );
    }

    #[test]
    fn corrupt_block_index_is_fatal_for_the_call() {
        let mut data = build_image(&[(b"f", 2, &pattern(100))]);
        // First data-block index of inode 0 now points past the image.
        let slot = BLOCK_SIZE + 4;
        data[slot..slot + 4].copy_from_slice(&99u32.to_le_bytes());
        let image = FsImage::new(&data).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(
            image.read_data(0, 0, &mut buf),
            Err(KernelError::CorruptBlockIndex { index: 99 })
        );
    }

    #[test]
    fn new_rejects_truncated_images() {
        let data = build_image(&[(b"f", 2, &pattern(100))]);
        assert!(FsImage::new(&data[..BLOCK_SIZE]).is_err());
        assert!(FsImage::new(&data[..2 * BLOCK_SIZE]).is_err());
        assert!(FsImage::new(&[0u8; 16]).is_err());
    }
}
