//! File content mapping and the directory codec.
//!
//! Files are written and read whole: the engine has no partial-write API,
//! so every mutation reads the full payload, rewrites it under a new inode
//! and relinks the directory entry. This keeps the allocator simple at the
//! cost of re-copying data.

use log::debug;

use crate::config::{ADDRESS_SIZE, DIRECT_COUNT, ID_ITEM_FREE};
use crate::efs::PseudoFs;
use crate::error::{FsError, FsResult};
use crate::layout::{DirEntry, Inode, DIR_ENTRY_SIZE};

impl PseudoFs {
    // ---- file content mapper ----

    /// Write `payload` as a brand-new file or directory and return the
    /// allocated inode id.
    ///
    /// Persists in order: payload clusters, indirection blocks, the inode,
    /// the data bitmap, the inode bitmap. The new inode starts with zero
    /// references; linking it into a directory is the caller's move.
    pub fn write_file(&mut self, payload: &[u8], is_directory: bool) -> FsResult<i32> {
        let cluster_size = self.superblock().cluster_size as usize;
        let per_block = self.superblock().addresses_per_cluster();
        let cluster_count = payload.len().div_ceil(cluster_size);
        if payload.len() > i32::MAX as usize
            || cluster_count > DIRECT_COUNT + per_block + per_block * per_block
        {
            return Err(FsError::FileTooLarge);
        }

        let node_id = self.alloc_inode()?;
        let clusters = self.alloc_clusters(cluster_count)?;
        self.write_payload_clusters(&clusters, payload)?;

        let mut inode = Inode::new(node_id, is_directory, payload.len() as i32);
        for (slot, address) in inode.direct.iter_mut().zip(&clusters) {
            *slot = *address;
        }
        if cluster_count > DIRECT_COUNT {
            let rest = &clusters[DIRECT_COUNT..];
            let singles = rest.len().div_ceil(per_block);
            let pointer_blocks = self.alloc_clusters(singles + usize::from(singles > 1))?;
            for (block, chunk) in pointer_blocks.iter().zip(rest.chunks(per_block)) {
                self.write_pointer_block(*block, chunk)?;
            }
            inode.indirect[0] = pointer_blocks[0];
            if singles > 1 {
                let double = pointer_blocks[singles];
                self.write_pointer_block(double, &pointer_blocks[1..singles])?;
                inode.indirect[1] = double;
            }
        }

        self.store_inode(&inode)?;
        self.save_data_bitmap()?;
        self.save_inode_bitmap()?;
        debug!(
            "wrote inode {node_id}: {} bytes over {cluster_count} clusters",
            payload.len()
        );
        Ok(node_id)
    }

    /// Read the whole payload of `inode`.
    pub fn read_file(&self, inode: &Inode) -> FsResult<Vec<u8>> {
        let (clusters, _) = self.clusters_of(inode)?;
        let cluster_size = self.superblock().cluster_size as usize;
        let size = inode.file_size as usize;
        let mut payload = Vec::with_capacity(size);
        for (i, &address) in clusters.iter().enumerate() {
            let chunk = if i == clusters.len() - 1 {
                size - i * cluster_size
            } else {
                cluster_size
            };
            let mut buf = vec![0u8; chunk];
            self.read_at(address as u64, &mut buf)?;
            payload.extend_from_slice(&buf);
        }
        Ok(payload)
    }

    /// Enumerate the cluster addresses of `inode` without reading content:
    /// payload clusters in logical order, then the indirection blocks.
    pub fn clusters_of(&self, inode: &Inode) -> FsResult<(Vec<i32>, Vec<i32>)> {
        let wanted = inode.data_cluster_count(self.superblock().cluster_size);
        let mut data = Vec::with_capacity(wanted);
        let mut indirection = Vec::new();

        for &address in &inode.direct {
            if data.len() == wanted {
                break;
            }
            if address != 0 {
                data.push(address);
            }
        }
        if inode.indirect[0] != 0 {
            indirection.push(inode.indirect[0]);
            for address in self.read_pointer_block(inode.indirect[0])? {
                if data.len() == wanted {
                    break;
                }
                if address != 0 {
                    data.push(address);
                }
            }
        }
        if inode.indirect[1] != 0 {
            indirection.push(inode.indirect[1]);
            for single in self.read_pointer_block(inode.indirect[1])? {
                if single == 0 {
                    continue;
                }
                indirection.push(single);
                for address in self.read_pointer_block(single)? {
                    if data.len() == wanted {
                        break;
                    }
                    if address != 0 {
                        data.push(address);
                    }
                }
            }
        }
        Ok((data, indirection))
    }

    /// Release every cluster of `inode`, clear its bitmap bit and blank its
    /// table row. Persists the inode record first, then both bitmaps.
    pub fn delete_file(&mut self, inode: &Inode) -> FsResult<()> {
        let (data, indirection) = self.clusters_of(inode)?;
        for &address in data.iter().chain(&indirection) {
            self.free_cluster(address)?;
        }
        self.free_inode_bit(inode.node_id);

        let mut record = inode.clone();
        record.node_id = ID_ITEM_FREE;
        self.store_inode_at(inode.node_id, &record)?;
        self.save_data_bitmap()?;
        self.save_inode_bitmap()?;
        debug!("deleted inode {}, freed {} clusters", inode.node_id, data.len() + indirection.len());
        Ok(())
    }

    /// Chunk `payload` over `clusters`; the final chunk is written at its
    /// natural length so trailing cluster bytes keep whatever they held.
    fn write_payload_clusters(&self, clusters: &[i32], payload: &[u8]) -> FsResult<()> {
        let cluster_size = self.superblock().cluster_size as usize;
        for (i, &address) in clusters.iter().enumerate() {
            let start = i * cluster_size;
            let end = (start + cluster_size).min(payload.len());
            self.write_at(address as u64, &payload[start..end])?;
        }
        Ok(())
    }

    /// Write a full cluster of little-endian addresses; unused slots zero.
    fn write_pointer_block(&self, block_address: i32, pointers: &[i32]) -> FsResult<()> {
        let mut buf = vec![0u8; self.superblock().cluster_size as usize];
        for (i, pointer) in pointers.iter().enumerate() {
            buf[i * ADDRESS_SIZE..(i + 1) * ADDRESS_SIZE]
                .copy_from_slice(&pointer.to_le_bytes());
        }
        self.write_at(block_address as u64, &buf)
    }

    /// Read a full cluster of little-endian addresses.
    fn read_pointer_block(&self, block_address: i32) -> FsResult<Vec<i32>> {
        let mut buf = vec![0u8; self.superblock().cluster_size as usize];
        self.read_at(block_address as u64, &mut buf)?;
        Ok(buf
            .chunks_exact(ADDRESS_SIZE)
            .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
            .collect())
    }

    // ---- directory codec ----

    /// Decode the single-cluster payload of a directory inode into its
    /// fixed slot array.
    pub fn load_dir(&self, inode: &Inode) -> FsResult<Vec<DirEntry>> {
        let payload = self.read_file(inode)?;
        Ok(payload
            .chunks_exact(DIR_ENTRY_SIZE)
            .map(|chunk| DirEntry::decode(chunk.try_into().unwrap()))
            .collect())
    }

    /// Slot index of `name` inside `entries`, comparing NUL-stripped names.
    pub fn dir_lookup(&self, entries: &[DirEntry], name: &str) -> Option<usize> {
        entries
            .iter()
            .position(|entry| !entry.is_free() && entry.name_bytes() == name.as_bytes())
    }

    /// A directory is full when every slot past the two reserved ones is
    /// taken.
    pub fn is_dir_full(&self, entries: &[DirEntry]) -> bool {
        entries.iter().skip(2).all(|entry| !entry.is_free())
    }

    /// One-cluster directory payload: slot 0 is `".."`, slot 1 is `"."`,
    /// the rest free.
    pub fn directory_payload(&self, self_id: i32, parent_id: i32) -> FsResult<Vec<u8>> {
        let slots = self.superblock().cluster_size as usize / DIR_ENTRY_SIZE;
        let mut entries = vec![DirEntry::empty(); slots];
        entries[0] = DirEntry::new("..", parent_id)?;
        entries[1] = DirEntry::new(".", self_id)?;
        Ok(Self::encode_dir(&entries))
    }

    /// Create an empty directory under `parent_id` and return its inode id.
    /// The entry in the parent is the caller's move.
    pub fn create_directory(&mut self, parent_id: i32) -> FsResult<i32> {
        let self_id = self.peek_free_inode()?;
        let payload = self.directory_payload(self_id, parent_id)?;
        let node_id = self.write_file(&payload, true)?;
        debug_assert_eq!(node_id, self_id);
        Ok(node_id)
    }

    /// Link `child_id` into directory `parent_id` under `name`.
    ///
    /// Bumps the child's reference count. On a name collision the bump is
    /// undone and a child left with no references at all is deleted, so a
    /// freshly written file whose naming failed does not leak.
    pub fn add_entry(&mut self, parent_id: i32, child_id: i32, name: &str) -> FsResult<()> {
        let entry = DirEntry::new(name, child_id)?;
        let parent = self.load_inode(parent_id)?;
        let mut child = self.load_inode(child_id)?;
        child.references += 1;

        let mut entries = self.load_dir(&parent)?;
        if self.dir_lookup(&entries, name).is_some() {
            child.references -= 1;
            if child.references <= 0 {
                self.delete_file(&child)?;
            }
            return Err(FsError::AlreadyExists);
        }
        if self.is_dir_full(&entries) {
            return Err(FsError::DirectoryFull);
        }

        let slot = entries
            .iter()
            .skip(2)
            .position(DirEntry::is_free)
            .map(|i| i + 2)
            .ok_or(FsError::DirectoryFull)?;
        entries[slot] = entry;

        self.rewrite_dir(&parent, &entries)?;
        self.store_inode(&parent)?;
        self.store_inode(&child)
    }

    /// Unlink `name` from directory `parent_id`.
    ///
    /// Drops the child's reference count; when it reaches zero and
    /// `delete_on_zero` is set the child's clusters and inode are freed,
    /// otherwise the child record is persisted with the lower count.
    pub fn remove_entry(
        &mut self,
        parent_id: i32,
        name: &str,
        delete_on_zero: bool,
    ) -> FsResult<()> {
        let parent = self.load_inode(parent_id)?;
        let mut entries = self.load_dir(&parent)?;
        let slot = self.dir_lookup(&entries, name).ok_or(FsError::NotFound)?;
        let mut child = self.load_inode(entries[slot].inode)?;
        child.references -= 1;
        entries[slot] = DirEntry::empty();

        self.rewrite_dir(&parent, &entries)?;
        self.store_inode(&parent)?;
        if child.references <= 0 && delete_on_zero {
            self.delete_file(&child)
        } else {
            self.store_inode(&child)
        }
    }

    /// Point the `".."` slot of directory `dir_id` at `new_parent_id`,
    /// used when a move gives the directory a new parent.
    pub fn reparent_directory(&mut self, dir_id: i32, new_parent_id: i32) -> FsResult<()> {
        let dir = self.load_inode(dir_id)?;
        let mut entries = self.load_dir(&dir)?;
        entries[0] = DirEntry::new("..", new_parent_id)?;
        self.rewrite_dir(&dir, &entries)
    }

    /// Rewrite a directory's slot array over its existing clusters.
    fn rewrite_dir(&self, inode: &Inode, entries: &[DirEntry]) -> FsResult<()> {
        let (clusters, _) = self.clusters_of(inode)?;
        self.write_payload_clusters(&clusters, &Self::encode_dir(entries))
    }

    fn encode_dir(entries: &[DirEntry]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(entries.len() * DIR_ENTRY_SIZE);
        for entry in entries {
            payload.extend_from_slice(&entry.encode());
        }
        payload
    }
}
