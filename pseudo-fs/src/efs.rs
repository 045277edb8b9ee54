//! Volume manager: owns the device, the superblock and both bitmaps.
//!
//! Everything here is single-threaded and synchronous; callers re-`reload`
//! at the top of every command instead of trusting cached state.

use std::sync::Arc;

use log::{debug, warn};

use crate::bitmap::Bitmap;
use crate::block_dev::BlockDevice;
use crate::config::{DEFAULT_CLUSTER_SIZE, ID_ITEM_FREE, ROOT_INODE_ID};
use crate::error::{FsError, FsResult};
use crate::layout::{Inode, Superblock, INODE_SIZE, SUPERBLOCK_SIZE};

/// A mounted pseudo filesystem over one backing volume.
pub struct PseudoFs {
    device: Arc<dyn BlockDevice>,
    superblock: Superblock,
    data_bitmap: Bitmap,
    inode_bitmap: Bitmap,
}

impl PseudoFs {
    /// Format `device` as a fresh volume of `disk_size` bytes and mount it.
    ///
    /// Writes, in order: the zero byte at `disk_size - 1` that realizes the
    /// file length, the superblock, both (all-free) bitmaps, and the root
    /// directory at inode 1 with itself as parent.
    pub fn format(device: Arc<dyn BlockDevice>, disk_size: i64) -> FsResult<Self> {
        let superblock = Superblock::new(disk_size, DEFAULT_CLUSTER_SIZE)?;
        device.write_at(disk_size as u64 - 1, &[0])?;
        device.write_at(0, &superblock.encode())?;

        let mut fs = Self {
            device,
            data_bitmap: Bitmap::new(superblock.bitmap_size as usize),
            inode_bitmap: Bitmap::new(superblock.bitmapi_size as usize),
            superblock,
        };
        fs.save_data_bitmap()?;
        fs.save_inode_bitmap()?;

        let payload = fs.directory_payload(ROOT_INODE_ID, ROOT_INODE_ID)?;
        let root_id = fs.write_file(&payload, true)?;
        debug_assert_eq!(root_id, ROOT_INODE_ID);
        let mut root = fs.load_inode(root_id)?;
        root.references = 1;
        fs.store_inode(&root)?;
        debug!("formatted volume: {} bytes, {} inodes", disk_size, fs.superblock.inode_count);
        Ok(fs)
    }

    /// Mount an existing volume.
    pub fn open(device: Arc<dyn BlockDevice>) -> FsResult<Self> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        device.read_at(0, &mut buf)?;
        let superblock = Superblock::decode(&buf);
        superblock.validate()?;
        if !superblock.has_valid_signature() {
            warn!("volume signature does not match, continuing anyway");
        }
        let mut fs = Self {
            device,
            data_bitmap: Bitmap::new(0),
            inode_bitmap: Bitmap::new(0),
            superblock,
        };
        fs.load_bitmaps()?;
        Ok(fs)
    }

    /// Re-read the superblock and both bitmaps from the volume.
    pub fn reload(&mut self) -> FsResult<()> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        self.device.read_at(0, &mut buf)?;
        let superblock = Superblock::decode(&buf);
        superblock.validate()?;
        self.superblock = superblock;
        self.load_bitmaps()
    }

    fn load_bitmaps(&mut self) -> FsResult<()> {
        let mut data = vec![0u8; self.superblock.bitmap_size as usize];
        self.device
            .read_at(self.superblock.bitmap_start_address as u64, &mut data)?;
        let mut inodes = vec![0u8; self.superblock.bitmapi_size as usize];
        self.device
            .read_at(self.superblock.bitmapi_start_address as u64, &mut inodes)?;
        self.data_bitmap = Bitmap::from_bytes(data);
        self.inode_bitmap = Bitmap::from_bytes(inodes);
        Ok(())
    }

    /// The mounted volume header.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Read `buf.len()` bytes at byte `offset` of the volume.
    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<()> {
        Ok(self.device.read_at(offset, buf)?)
    }

    /// Write `buf` at byte `offset` of the volume.
    pub(crate) fn write_at(&self, offset: u64, buf: &[u8]) -> FsResult<()> {
        Ok(self.device.write_at(offset, buf)?)
    }

    // ---- inode table ----

    /// Load inode table row `node_id`.
    pub fn load_inode(&self, node_id: i32) -> FsResult<Inode> {
        if node_id == ID_ITEM_FREE || node_id < 0 || node_id > self.superblock.inode_count {
            return Err(FsError::NotFound);
        }
        let mut buf = [0u8; INODE_SIZE];
        self.read_at(self.superblock.inode_offset(node_id), &mut buf)?;
        let inode = Inode::decode(&buf);
        if inode.node_id == ID_ITEM_FREE {
            return Err(FsError::NotFound);
        }
        Ok(inode)
    }

    /// Persist `inode` at its table row.
    pub fn store_inode(&self, inode: &Inode) -> FsResult<()> {
        self.write_at(self.superblock.inode_offset(inode.node_id), &inode.encode())
    }

    /// Persist an inode record at the row of `slot_id`, used when the
    /// record's own id has been cleared during deletion.
    pub(crate) fn store_inode_at(&self, slot_id: i32, inode: &Inode) -> FsResult<()> {
        self.write_at(self.superblock.inode_offset(slot_id), &inode.encode())
    }

    // ---- allocation ----

    /// First free inode id without allocating it.
    pub fn peek_free_inode(&self) -> FsResult<i32> {
        self.inode_bitmap
            .peek_free(self.superblock.inode_count as usize)
            .map(|index| index as i32 + 1)
            .ok_or(FsError::NoInodes)
    }

    /// Allocate one inode id in the in-memory bitmap.
    pub(crate) fn alloc_inode(&mut self) -> FsResult<i32> {
        self.inode_bitmap
            .alloc(self.superblock.inode_count as usize)
            .map(|index| index as i32 + 1)
            .ok_or(FsError::NoInodes)
    }

    /// Allocate `count` data clusters in the in-memory bitmap, first-fit,
    /// returning their byte addresses in scan order.
    pub(crate) fn alloc_clusters(&mut self, count: usize) -> FsResult<Vec<i32>> {
        let indices = self
            .data_bitmap
            .alloc_many(count, self.superblock.usable_clusters())
            .ok_or(FsError::OutOfSpace)?;
        Ok(indices
            .into_iter()
            .map(|index| self.superblock.cluster_address(index))
            .collect())
    }

    /// Clear the data bit behind cluster byte address `address`.
    pub(crate) fn free_cluster(&mut self, address: i32) -> FsResult<()> {
        if address < self.superblock.data_start_address {
            return Err(FsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("cluster address {address} below the data area"),
            )));
        }
        self.data_bitmap
            .set(self.superblock.cluster_index(address), false);
        Ok(())
    }

    /// Clear the inode bit behind `node_id`.
    pub(crate) fn free_inode_bit(&mut self, node_id: i32) {
        self.inode_bitmap.set(node_id as usize - 1, false);
    }

    /// Persist the data bitmap.
    pub(crate) fn save_data_bitmap(&self) -> FsResult<()> {
        self.write_at(
            self.superblock.bitmap_start_address as u64,
            self.data_bitmap.as_bytes(),
        )
    }

    /// Persist the inode bitmap.
    pub(crate) fn save_inode_bitmap(&self) -> FsResult<()> {
        self.write_at(
            self.superblock.bitmapi_start_address as u64,
            self.inode_bitmap.as_bytes(),
        )
    }

    /// Whether data bit `index` is allocated; used by invariants in tests.
    pub(crate) fn data_bit(&self, index: usize) -> bool {
        self.data_bitmap.get(index)
    }

    /// Whether inode bit `index` is allocated; used by invariants in tests.
    pub(crate) fn inode_bit(&self, index: usize) -> bool {
        self.inode_bitmap.get(index)
    }
}
