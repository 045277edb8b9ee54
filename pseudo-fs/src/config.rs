//! Fixed parameters of the on-disk format.

/// Data cluster size in bytes used by `format`.
pub const DEFAULT_CLUSTER_SIZE: i32 = 512;
/// One inode is provisioned per this many bytes of volume.
pub const BYTES_PER_INODE: i64 = 2048;

/// Number of direct cluster pointers in an inode.
pub const DIRECT_COUNT: usize = 12;
/// Number of indirect pointer fields in an inode (the third is reserved).
pub const INDIRECT_COUNT: usize = 3;
/// Width of one on-disk cluster address in bytes.
pub const ADDRESS_SIZE: usize = 4;

/// Volume signature written by `format` and checked on open.
pub const SIGNATURE: &[u8] = b"user";
/// Width of the signature field in the superblock.
pub const SIGNATURE_LEN: usize = 9;
/// Free-form volume description written by `format`.
pub const VOLUME_DESCRIPTOR: &[u8] = b"pseudo-fs volume";
/// Width of the volume descriptor field in the superblock.
pub const DESCRIPTOR_LEN: usize = 251;

/// Maximum length of a directory entry name in bytes.
pub const NAME_LENGTH_LIMIT: usize = 12;

/// The root directory always occupies this inode id.
pub const ROOT_INODE_ID: i32 = 1;
/// An inode record or directory slot with this id is free.
pub const ID_ITEM_FREE: i32 = 0;
