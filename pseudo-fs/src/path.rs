//! Path resolution over the directory layer.
//!
//! Paths split on `/`; a leading slash anchors resolution at the root
//! inode, anything else at the caller's current directory. `"."` and
//! `".."` need no special casing here: every directory carries them as
//! ordinary reserved slots.

use crate::config::ROOT_INODE_ID;
use crate::efs::PseudoFs;
use crate::error::{FsError, FsResult};
use crate::layout::Inode;

impl PseudoFs {
    /// Walk `path` starting from `cwd_id` and return `(target, parent)`.
    ///
    /// The final component must exist. A path with a trailing slash (or
    /// `"/"` itself) resolves to the last directory reached, returned as
    /// both target and parent.
    pub fn resolve_path(&self, path: &str, cwd_id: i32) -> FsResult<(Inode, Inode)> {
        let absolute = path.starts_with('/');
        let start_id = if absolute { ROOT_INODE_ID } else { cwd_id };
        let mut current = self.load_inode(start_id)?;
        let mut parent = current.clone();

        let components: Vec<&str> = path.split('/').collect();
        let mut index = usize::from(absolute);
        while index < components.len() {
            let component = components[index];
            let last = index == components.len() - 1;
            if component.is_empty() {
                if last {
                    // trailing slash: the directory itself
                    return Ok((current.clone(), current));
                }
                index += 1;
                continue;
            }
            if !current.is_directory {
                return Err(FsError::NotADirectory);
            }
            if component.trim().is_empty() {
                return Err(FsError::InvalidName);
            }
            let entries = self.load_dir(&current)?;
            let slot = self
                .dir_lookup(&entries, component)
                .ok_or(FsError::NotFound)?;
            parent = current;
            current = self.load_inode(entries[slot].inode)?;
            index += 1;
        }
        Ok((current, parent))
    }
}

/// Lexical directory part of `path`, in the manner of `dirname(1)`:
/// `"a/b"` gives `"a"`, `"/a"` gives `"/"`, a bare name gives `"."`.
pub fn dir_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        None => ".",
        Some(0) => "/",
        Some(i) => &trimmed[..i],
    }
}

/// Lexical final component of `path`, in the manner of `basename(1)`:
/// `"a/b/"` gives `"b"`, `"/"` gives `"/"`.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        None => trimmed,
        Some(i) => &trimmed[i + 1..],
    }
}

/// Fold `"."`, `".."` and empty components out of an absolute path string.
/// Purely lexical; used for the shell's cached working-directory path.
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ROOT_INODE_ID;
    use crate::test_util::mem_fs;

    #[test]
    fn dir_and_base_names() {
        for (path, dir, base) in [
            ("a", ".", "a"),
            ("a/b", "a", "b"),
            ("a/b/", "a", "b"),
            ("/a", "/", "a"),
            ("/a/b/c", "/a/b", "c"),
            ("/", "/", "/"),
        ] {
            assert_eq!(dir_name(path), dir, "dir_name({path:?})");
            assert_eq!(base_name(path), base, "base_name({path:?})");
        }
    }

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/a/b"), "/a/b");
        assert_eq!(normalize("/a/./b/.."), "/a");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize("/a//b/"), "/a/b");
    }

    #[test]
    fn resolves_absolute_relative_and_dotted_paths() {
        let mut fs = mem_fs(1 << 20);
        let dir_a = fs.create_directory(ROOT_INODE_ID).unwrap();
        fs.add_entry(ROOT_INODE_ID, dir_a, "a").unwrap();
        let dir_b = fs.create_directory(dir_a).unwrap();
        fs.add_entry(dir_a, dir_b, "b").unwrap();
        let file = fs.write_file(b"hi", false).unwrap();
        fs.add_entry(dir_b, file, "f").unwrap();

        let (target, parent) = fs.resolve_path("/a/b/f", ROOT_INODE_ID).unwrap();
        assert_eq!(target.node_id, file);
        assert_eq!(parent.node_id, dir_b);

        // relative from /a
        let (target, parent) = fs.resolve_path("b/f", dir_a).unwrap();
        assert_eq!(target.node_id, file);
        assert_eq!(parent.node_id, dir_b);

        // dot components resolve through the reserved slots
        let (target, _) = fs.resolve_path("./b/../b/f", dir_a).unwrap();
        assert_eq!(target.node_id, file);
        let (target, _) = fs.resolve_path("..", dir_b).unwrap();
        assert_eq!(target.node_id, dir_a);

        // root's parent is root
        let (target, _) = fs.resolve_path("/..", ROOT_INODE_ID).unwrap();
        assert_eq!(target.node_id, ROOT_INODE_ID);
    }

    #[test]
    fn trailing_slash_yields_the_directory_twice() {
        let mut fs = mem_fs(1 << 20);
        let dir_a = fs.create_directory(ROOT_INODE_ID).unwrap();
        fs.add_entry(ROOT_INODE_ID, dir_a, "a").unwrap();

        let (target, parent) = fs.resolve_path("/a/", ROOT_INODE_ID).unwrap();
        assert_eq!(target.node_id, dir_a);
        assert_eq!(parent.node_id, dir_a);

        let (target, parent) = fs.resolve_path("/", ROOT_INODE_ID).unwrap();
        assert_eq!(target.node_id, ROOT_INODE_ID);
        assert_eq!(parent.node_id, ROOT_INODE_ID);
    }

    #[test]
    fn resolution_failures() {
        let mut fs = mem_fs(1 << 20);
        let file = fs.write_file(b"hi", false).unwrap();
        fs.add_entry(ROOT_INODE_ID, file, "f").unwrap();

        assert!(matches!(
            fs.resolve_path("/missing", ROOT_INODE_ID),
            Err(FsError::NotFound)
        ));
        assert!(matches!(
            fs.resolve_path("/f/deeper", ROOT_INODE_ID),
            Err(FsError::NotADirectory)
        ));
        assert!(matches!(
            fs.resolve_path("/missing/deeper", ROOT_INODE_ID),
            Err(FsError::NotFound)
        ));
    }
}
