//! Pseudo filesystem engine: a classical inode/bitmap filesystem inside a
//! single host file.
//!
//! The layers, leaves first: positioned block device access, bitmap
//! allocation, the fixed-width on-disk records, the whole-file content
//! mapper with single and double indirection, the directory codec and the
//! path resolver. A front end (see `pseudo-fs-shell`) drives all of it
//! through [`PseudoFs`].

#![deny(missing_docs)]

pub mod bitmap;
pub mod block_dev;
pub mod config;
pub mod efs;
pub mod error;
pub mod layout;
pub mod path;
pub mod vfs;

pub use block_dev::BlockDevice;
pub use efs::PseudoFs;
pub use error::{FsError, FsResult};

#[cfg(test)]
pub(crate) mod test_util {
    use std::io;
    use std::sync::{Arc, Mutex};

    use crate::block_dev::BlockDevice;
    use crate::efs::PseudoFs;

    /// Growable in-memory volume for engine tests.
    pub struct MemDisk(Mutex<Vec<u8>>);

    impl MemDisk {
        pub fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }
    }

    impl BlockDevice for MemDisk {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            let data = self.0.lock().unwrap();
            let start = offset as usize;
            let end = start + buf.len();
            if end > data.len() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read past end of volume",
                ));
            }
            buf.copy_from_slice(&data[start..end]);
            Ok(())
        }

        fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
            let mut data = self.0.lock().unwrap();
            let start = offset as usize;
            let end = start + buf.len();
            if end > data.len() {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(buf);
            Ok(())
        }
    }

    /// A freshly formatted in-memory filesystem of `size` bytes.
    pub fn mem_fs(size: i64) -> PseudoFs {
        PseudoFs::format(MemDisk::new(), size).unwrap()
    }
}
