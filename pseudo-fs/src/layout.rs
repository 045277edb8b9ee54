//! On-disk data structures.
//!
//! Volume layout, all addresses absolute byte offsets, all integers
//! little-endian, records packed with no padding:
//!
//! ```text
//! superblock | data bitmap | inode bitmap | inode table | data area
//! ```
//!
//! The signed 32-bit address fields cap usable volumes at 2 GiB.

use crate::config::{
    ADDRESS_SIZE, BYTES_PER_INODE, DESCRIPTOR_LEN, DIRECT_COUNT, ID_ITEM_FREE, INDIRECT_COUNT,
    NAME_LENGTH_LIMIT, SIGNATURE, SIGNATURE_LEN, VOLUME_DESCRIPTOR,
};
use crate::error::{FsError, FsResult};

/// Packed byte width of the superblock; the data bitmap starts right after.
pub const SUPERBLOCK_SIZE: usize = SIGNATURE_LEN + DESCRIPTOR_LEN + 8 + 9 * 4;
/// Packed byte width of one inode table row.
pub const INODE_SIZE: usize = 4 + 1 + 1 + 4 + DIRECT_COUNT * 4 + INDIRECT_COUNT * 4;
/// Packed byte width of one directory slot.
pub const DIR_ENTRY_SIZE: usize = 4 + NAME_LENGTH_LIMIT;

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Volume header at offset zero.
#[derive(Debug, Clone)]
pub struct Superblock {
    /// Volume signature, ASCII, zero-padded.
    pub signature: [u8; SIGNATURE_LEN],
    /// Free-form description, ASCII, zero-padded.
    pub volume_descriptor: [u8; DESCRIPTOR_LEN],
    /// Total byte size of the volume.
    pub disk_size: i64,
    /// Data block size in bytes.
    pub cluster_size: i32,
    /// `disk_size / cluster_size`, rounded down.
    pub cluster_count: i32,
    /// `disk_size / BYTES_PER_INODE`, rounded down.
    pub inode_count: i32,
    /// Byte offset of the inode bitmap.
    pub bitmapi_start_address: i32,
    /// Inode bitmap size in bytes.
    pub bitmapi_size: i32,
    /// Data bitmap size in bytes.
    pub bitmap_size: i32,
    /// Byte offset of the data bitmap.
    pub bitmap_start_address: i32,
    /// Byte offset of the inode table.
    pub inode_start_address: i32,
    /// Byte offset of the first data cluster.
    pub data_start_address: i32,
}

impl Superblock {
    /// Lay out a fresh volume of `disk_size` bytes.
    ///
    /// Fails with `InvalidArgument` when the size cannot hold the header
    /// regions plus at least one usable cluster and one inode.
    pub fn new(disk_size: i64, cluster_size: i32) -> FsResult<Self> {
        if disk_size <= 0 || disk_size > i64::from(i32::MAX) {
            return Err(FsError::InvalidArgument(format!(
                "volume size {disk_size} outside the supported 1 B .. 2 GiB range"
            )));
        }
        let cluster_count = (disk_size / i64::from(cluster_size)) as i32;
        let inode_count = (disk_size / BYTES_PER_INODE) as i32;
        let bitmap_size = (cluster_count + 7) / 8;
        let bitmapi_size = (inode_count + 7) / 8;

        let bitmap_start_address = SUPERBLOCK_SIZE as i32;
        let bitmapi_start_address = bitmap_start_address + bitmap_size;
        let inode_start_address = bitmapi_start_address + bitmapi_size;
        let data_start_address = inode_start_address + inode_count * INODE_SIZE as i32;

        let mut signature = [0u8; SIGNATURE_LEN];
        signature[..SIGNATURE.len()].copy_from_slice(SIGNATURE);
        let mut volume_descriptor = [0u8; DESCRIPTOR_LEN];
        volume_descriptor[..VOLUME_DESCRIPTOR.len()].copy_from_slice(VOLUME_DESCRIPTOR);

        let superblock = Self {
            signature,
            volume_descriptor,
            disk_size,
            cluster_size,
            cluster_count,
            inode_count,
            bitmapi_start_address,
            bitmapi_size,
            bitmap_size,
            bitmap_start_address,
            inode_start_address,
            data_start_address,
        };
        if inode_count < 1 || superblock.usable_clusters() < 1 {
            return Err(FsError::InvalidArgument(format!(
                "volume size {disk_size} leaves no room behind the filesystem header"
            )));
        }
        Ok(superblock)
    }

    /// Serialize into the packed on-disk form.
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[..SIGNATURE_LEN].copy_from_slice(&self.signature);
        buf[SIGNATURE_LEN..SIGNATURE_LEN + DESCRIPTOR_LEN].copy_from_slice(&self.volume_descriptor);
        let base = SIGNATURE_LEN + DESCRIPTOR_LEN;
        buf[base..base + 8].copy_from_slice(&self.disk_size.to_le_bytes());
        let fields = [
            self.cluster_size,
            self.cluster_count,
            self.inode_count,
            self.bitmapi_start_address,
            self.bitmapi_size,
            self.bitmap_size,
            self.bitmap_start_address,
            self.inode_start_address,
            self.data_start_address,
        ];
        for (i, field) in fields.iter().enumerate() {
            write_i32(&mut buf, base + 8 + i * 4, *field);
        }
        buf
    }

    /// Deserialize from the packed on-disk form.
    pub fn decode(buf: &[u8; SUPERBLOCK_SIZE]) -> Self {
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&buf[..SIGNATURE_LEN]);
        let mut volume_descriptor = [0u8; DESCRIPTOR_LEN];
        volume_descriptor.copy_from_slice(&buf[SIGNATURE_LEN..SIGNATURE_LEN + DESCRIPTOR_LEN]);
        let base = SIGNATURE_LEN + DESCRIPTOR_LEN;
        let disk_size = i64::from_le_bytes(buf[base..base + 8].try_into().unwrap());
        let field = |i: usize| read_i32(buf, base + 8 + i * 4);
        Self {
            signature,
            volume_descriptor,
            disk_size,
            cluster_size: field(0),
            cluster_count: field(1),
            inode_count: field(2),
            bitmapi_start_address: field(3),
            bitmapi_size: field(4),
            bitmap_size: field(5),
            bitmap_start_address: field(6),
            inode_start_address: field(7),
            data_start_address: field(8),
        }
    }

    /// Whether the signature matches what `format` writes.
    pub fn has_valid_signature(&self) -> bool {
        self.signature[..SIGNATURE.len()] == *SIGNATURE
            && self.signature[SIGNATURE.len()..].iter().all(|&b| b == 0)
    }

    /// Sanity-check a decoded header before trusting its addresses.
    pub fn validate(&self) -> FsResult<()> {
        let ordered = self.cluster_size > 0
            && self.cluster_count >= 0
            && self.inode_count > 0
            && self.bitmap_start_address == SUPERBLOCK_SIZE as i32
            && self.bitmapi_start_address >= self.bitmap_start_address
            && self.inode_start_address >= self.bitmapi_start_address
            && self.data_start_address >= self.inode_start_address
            && i64::from(self.data_start_address) <= self.disk_size;
        if ordered {
            Ok(())
        } else {
            Err(FsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "superblock region addresses are inconsistent",
            )))
        }
    }

    /// Addresses held by one indirection block.
    pub fn addresses_per_cluster(&self) -> usize {
        self.cluster_size as usize / ADDRESS_SIZE
    }

    /// Clusters the allocator may actually hand out.
    ///
    /// `cluster_count` follows the on-disk formula and may name clusters
    /// whose bytes extend past `disk_size`; those bits stay unallocatable
    /// so the engine never writes beyond the pre-sized volume file.
    pub fn usable_clusters(&self) -> usize {
        let fitting = (self.disk_size - i64::from(self.data_start_address))
            / i64::from(self.cluster_size);
        fitting.clamp(0, i64::from(self.cluster_count.max(0))) as usize
    }

    /// Byte address of the cluster behind data bit `index`.
    pub fn cluster_address(&self, index: usize) -> i32 {
        self.data_start_address + index as i32 * self.cluster_size
    }

    /// Data bit index of the cluster at byte address `address`.
    pub fn cluster_index(&self, address: i32) -> usize {
        ((address - self.data_start_address) / self.cluster_size) as usize
    }

    /// Byte offset of inode table row `node_id - 1`.
    pub fn inode_offset(&self, node_id: i32) -> u64 {
        self.inode_start_address as u64 + (node_id as u64 - 1) * INODE_SIZE as u64
    }
}

/// One fixed-width row of the inode table.
#[derive(Debug, Clone)]
pub struct Inode {
    /// 1-based identifier; `ID_ITEM_FREE` marks a free row.
    pub node_id: i32,
    /// Directory flag.
    pub is_directory: bool,
    /// Hard-link count; the entity is deleted when it reaches zero.
    pub references: i8,
    /// Payload size in bytes.
    pub file_size: i32,
    /// Direct cluster addresses; zero means unused.
    pub direct: [i32; DIRECT_COUNT],
    /// Single-indirect, double-indirect and one reserved block address.
    pub indirect: [i32; INDIRECT_COUNT],
}

impl Inode {
    /// A fresh record with every pointer cleared.
    pub fn new(node_id: i32, is_directory: bool, file_size: i32) -> Self {
        Self {
            node_id,
            is_directory,
            references: 0,
            file_size,
            direct: [0; DIRECT_COUNT],
            indirect: [0; INDIRECT_COUNT],
        }
    }

    /// Payload clusters covered by `file_size`.
    pub fn data_cluster_count(&self, cluster_size: i32) -> usize {
        (self.file_size as usize).div_ceil(cluster_size as usize)
    }

    /// Serialize into the packed on-disk form.
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        write_i32(&mut buf, 0, self.node_id);
        buf[4] = u8::from(self.is_directory);
        buf[5] = self.references as u8;
        write_i32(&mut buf, 6, self.file_size);
        for (i, addr) in self.direct.iter().enumerate() {
            write_i32(&mut buf, 10 + i * 4, *addr);
        }
        for (i, addr) in self.indirect.iter().enumerate() {
            write_i32(&mut buf, 10 + (DIRECT_COUNT + i) * 4, *addr);
        }
        buf
    }

    /// Deserialize from the packed on-disk form.
    pub fn decode(buf: &[u8; INODE_SIZE]) -> Self {
        let mut direct = [0i32; DIRECT_COUNT];
        let mut indirect = [0i32; INDIRECT_COUNT];
        for (i, addr) in direct.iter_mut().enumerate() {
            *addr = read_i32(buf, 10 + i * 4);
        }
        for (i, addr) in indirect.iter_mut().enumerate() {
            *addr = read_i32(buf, 10 + (DIRECT_COUNT + i) * 4);
        }
        Self {
            node_id: read_i32(buf, 0),
            is_directory: buf[4] != 0,
            references: buf[5] as i8,
            file_size: read_i32(buf, 6),
            direct,
            indirect,
        }
    }
}

/// One directory slot binding a name to an inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Target inode id; `ID_ITEM_FREE` marks a free slot.
    pub inode: i32,
    /// Entry name, NUL-padded, no terminator required at full length.
    pub name: [u8; NAME_LENGTH_LIMIT],
}

impl DirEntry {
    /// Bind `name` to `inode`, rejecting empty and over-long names.
    pub fn new(name: &str, inode: i32) -> FsResult<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > NAME_LENGTH_LIMIT {
            return Err(FsError::InvalidName);
        }
        let mut padded = [0u8; NAME_LENGTH_LIMIT];
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            inode,
            name: padded,
        })
    }

    /// A free slot.
    pub fn empty() -> Self {
        Self {
            inode: ID_ITEM_FREE,
            name: [0u8; NAME_LENGTH_LIMIT],
        }
    }

    /// Whether the slot is free.
    pub fn is_free(&self) -> bool {
        self.inode == ID_ITEM_FREE
    }

    /// The stored name with NUL padding stripped.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LENGTH_LIMIT);
        &self.name[..len]
    }

    /// The stored name for display.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    /// Serialize into the packed on-disk form.
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        write_i32(&mut buf, 0, self.inode);
        buf[4..].copy_from_slice(&self.name);
        buf
    }

    /// Deserialize from the packed on-disk form.
    pub fn decode(buf: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut name = [0u8; NAME_LENGTH_LIMIT];
        name.copy_from_slice(&buf[4..]);
        Self {
            inode: read_i32(buf, 0),
            name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_widths_are_packed() {
        assert_eq!(SUPERBLOCK_SIZE, 304);
        assert_eq!(INODE_SIZE, 70);
        assert_eq!(DIR_ENTRY_SIZE, 16);
    }

    #[test]
    fn superblock_layout_for_one_mebibyte() {
        let sb = Superblock::new(1 << 20, 512).unwrap();
        assert_eq!(sb.cluster_count, 2048);
        assert_eq!(sb.inode_count, 512);
        assert_eq!(sb.bitmap_size, 256);
        assert_eq!(sb.bitmapi_size, 64);
        assert_eq!(sb.bitmap_start_address, 304);
        assert_eq!(sb.bitmapi_start_address, 560);
        assert_eq!(sb.inode_start_address, 624);
        assert_eq!(sb.data_start_address, 624 + 512 * 70);
        assert!(sb.usable_clusters() < 2048);
        assert!(sb.has_valid_signature());
        sb.validate().unwrap();
    }

    #[test]
    fn superblock_round_trip() {
        let sb = Superblock::new(64 << 10, 512).unwrap();
        let decoded = Superblock::decode(&sb.encode());
        assert_eq!(decoded.disk_size, sb.disk_size);
        assert_eq!(decoded.cluster_count, sb.cluster_count);
        assert_eq!(decoded.data_start_address, sb.data_start_address);
        assert_eq!(decoded.signature, sb.signature);
        decoded.validate().unwrap();
    }

    #[test]
    fn undersized_volume_is_rejected() {
        assert!(matches!(
            Superblock::new(300, 512),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            Superblock::new(0, 512),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn inode_round_trip() {
        let mut inode = Inode::new(7, true, 512);
        inode.references = 2;
        inode.direct[0] = 36464;
        inode.direct[11] = 99999;
        inode.indirect[0] = 40000;
        let decoded = Inode::decode(&inode.encode());
        assert_eq!(decoded.node_id, 7);
        assert!(decoded.is_directory);
        assert_eq!(decoded.references, 2);
        assert_eq!(decoded.file_size, 512);
        assert_eq!(decoded.direct, inode.direct);
        assert_eq!(decoded.indirect, inode.indirect);
    }

    #[test]
    fn dir_entry_name_is_nul_stripped() {
        let entry = DirEntry::new("greet", 2).unwrap();
        assert_eq!(entry.name_bytes(), b"greet");
        assert_eq!(DirEntry::decode(&entry.encode()), entry);

        // a full-width name carries no terminator
        let full = DirEntry::new("exactly12byt", 3).unwrap();
        assert_eq!(full.name_bytes(), b"exactly12byt");

        assert!(matches!(DirEntry::new("", 1), Err(FsError::InvalidName)));
        assert!(matches!(
            DirEntry::new("longerthan12b", 1),
            Err(FsError::InvalidName)
        ));
    }

    #[test]
    fn cluster_address_maps_both_ways() {
        let sb = Superblock::new(1 << 20, 512).unwrap();
        let addr = sb.cluster_address(5);
        assert_eq!(addr, sb.data_start_address + 5 * 512);
        assert_eq!(sb.cluster_index(addr), 5);
    }
}
