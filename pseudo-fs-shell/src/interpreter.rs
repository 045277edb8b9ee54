//! Command dispatch over the filesystem engine.
//!
//! Each shell verb maps onto one to three engine operations. The engine's
//! in-memory snapshots (superblock, bitmaps, current directory inode) are
//! reloaded at the top of every command; nothing is cached across
//! commands.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::warn;

use pseudo_fs::config::{DEFAULT_CLUSTER_SIZE, ROOT_INODE_ID};
use pseudo_fs::layout::Superblock;
use pseudo_fs::path::{base_name, dir_name, normalize};
use pseudo_fs::{FsError, FsResult, PseudoFs};

use crate::block_file::BlockFile;

/// `short` trims payloads to this many bytes.
const SHORT_LENGTH: usize = 3000;

/// What a successfully executed command hands back for printing.
pub enum Reply {
    /// Mutating command: print `OK`.
    Ok,
    /// Listing-style output, printed with a trailing newline.
    Text(String),
    /// Raw payload bytes (`cat`), emitted unmodified.
    Bytes(Vec<u8>),
}

/// The interactive session state.
pub struct Interpreter {
    volume_path: PathBuf,
    fs: Option<PseudoFs>,
    cwd_id: i32,
    cwd_path: String,
}

impl Interpreter {
    /// Attach to `volume_path`, mounting it when it already exists.
    pub fn new(volume_path: PathBuf) -> Self {
        let fs = match OpenOptions::new().read(true).write(true).open(&volume_path) {
            Ok(file) => match PseudoFs::open(Arc::new(BlockFile(Mutex::new(file)))) {
                Ok(fs) => Some(fs),
                Err(err) => {
                    warn!("cannot mount {}: {err}", volume_path.display());
                    None
                }
            },
            Err(_) => None,
        };
        Self {
            volume_path,
            fs,
            cwd_id: ROOT_INODE_ID,
            cwd_path: "/".to_string(),
        }
    }

    /// Tokenize and execute one input line, printing the outcome.
    pub fn run_line(&mut self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return;
        }
        match self.dispatch(&tokens) {
            Ok(reply) => print_reply(&reply),
            Err(err) => println!("{}", error_label(&err)),
        }
    }

    /// Execute one tokenized command.
    fn dispatch(&mut self, args: &[&str]) -> FsResult<Reply> {
        let verb = args[0].to_ascii_lowercase();
        if verb == "format" {
            return self.format(args);
        }

        let fs = self.fs.as_mut().ok_or(FsError::NoFilesystem)?;
        fs.reload()?;
        if fs.load_inode(self.cwd_id).is_err() {
            warn!("current directory vanished, falling back to /");
            self.cwd_id = ROOT_INODE_ID;
            self.cwd_path = "/".to_string();
        }

        match verb.as_str() {
            "incp" => self.incp(args),
            "outcp" => self.outcp(args),
            "cat" => self.cat(args),
            "ls" => self.ls(args),
            "mkdir" => self.mkdir(args),
            "cd" => self.cd(args),
            "rm" => self.rm(args),
            "rmdir" => self.rmdir(args),
            "cp" => self.cp(args),
            "mv" => self.mv(args),
            "info" => self.info(args),
            "xcp" => self.xcp(args),
            "short" => self.short(args),
            "load" => self.load(args),
            "pwd" => self.pwd(args),
            other => Err(FsError::InvalidArgument(format!("unknown command {other}"))),
        }
    }

    fn fs_mut(&mut self) -> FsResult<&mut PseudoFs> {
        self.fs.as_mut().ok_or(FsError::NoFilesystem)
    }

    // ---- commands ----

    fn format(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("format <size>"));
        }
        let size = parse_size(args[1])?;
        // reject sizes the layout cannot hold before touching the volume
        Superblock::new(size, DEFAULT_CLUSTER_SIZE)?;

        // drop the old handle before truncating the backing file
        self.fs = None;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.volume_path)?;
        self.fs = Some(PseudoFs::format(Arc::new(BlockFile(Mutex::new(file))), size)?);
        self.cwd_id = ROOT_INODE_ID;
        self.cwd_path = "/".to_string();
        Ok(Reply::Ok)
    }

    fn incp(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 3 {
            return Err(invalid_args("incp <host-file> <fs-path>"));
        }
        let data = std::fs::read(args[1]).map_err(host_err)?;
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (parent, _) = fs.resolve_path(dir_name(args[2]), cwd)?;
        if !parent.is_directory {
            return Err(FsError::NotADirectory);
        }
        let node_id = fs.write_file(&data, false)?;
        fs.add_entry(parent.node_id, node_id, base_name(args[2]))?;
        Ok(Reply::Ok)
    }

    fn outcp(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 3 {
            return Err(invalid_args("outcp <fs-path> <host-file>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (source, _) = fs.resolve_path(args[1], cwd)?;
        if source.is_directory {
            return Err(FsError::IsADirectory);
        }
        let data = fs.read_file(&source)?;
        std::fs::write(args[2], data).map_err(host_err)?;
        Ok(Reply::Ok)
    }

    fn cat(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("cat <fs-path>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (source, _) = fs.resolve_path(args[1], cwd)?;
        if source.is_directory {
            return Err(FsError::IsADirectory);
        }
        Ok(Reply::Bytes(fs.read_file(&source)?))
    }

    fn ls(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() > 2 {
            return Err(invalid_args("ls [fs-path]"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let target = if args.len() == 2 {
            fs.resolve_path(args[1], cwd)?.0
        } else {
            fs.load_inode(cwd)?
        };
        if !target.is_directory {
            return Err(FsError::NotADirectory);
        }

        let mut lines = Vec::new();
        for entry in fs.load_dir(&target)?.iter().filter(|e| !e.is_free()) {
            let inode = fs.load_inode(entry.inode)?;
            let marker = if inode.is_directory { '+' } else { '-' };
            lines.push(format!(
                "{marker}{}\t{}\t{}\t{}",
                entry.name(),
                entry.inode,
                inode.file_size,
                inode.references
            ));
        }
        Ok(Reply::Text(lines.join("\n")))
    }

    fn mkdir(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("mkdir <fs-path>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (parent, _) = fs.resolve_path(dir_name(args[1]), cwd)?;
        if !parent.is_directory {
            return Err(FsError::NotADirectory);
        }
        let node_id = fs.create_directory(parent.node_id)?;
        fs.add_entry(parent.node_id, node_id, base_name(args[1]))?;
        Ok(Reply::Ok)
    }

    fn cd(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("cd <fs-path>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (target, _) = fs.resolve_path(args[1], cwd)?;
        if !target.is_directory {
            return Err(FsError::NotADirectory);
        }
        self.cwd_id = target.node_id;
        self.cwd_path = if args[1].starts_with('/') {
            normalize(args[1])
        } else {
            normalize(&format!("{}/{}", self.cwd_path, args[1]))
        };
        Ok(Reply::Ok)
    }

    fn rm(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("rm <fs-path>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (target, parent) = fs.resolve_path(args[1], cwd)?;
        if target.is_directory {
            return Err(FsError::IsADirectory);
        }
        fs.remove_entry(parent.node_id, base_name(args[1]), true)?;
        Ok(Reply::Ok)
    }

    fn rmdir(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("rmdir <fs-path>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (target, parent) = fs.resolve_path(args[1], cwd)?;
        if !target.is_directory {
            return Err(FsError::NotADirectory);
        }
        let occupied = fs
            .load_dir(&target)?
            .iter()
            .filter(|e| !e.is_free())
            .count();
        if occupied > 2 {
            return Err(FsError::DirectoryNotEmpty);
        }
        fs.remove_entry(parent.node_id, base_name(args[1]), true)?;
        Ok(Reply::Ok)
    }

    fn cp(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 3 {
            return Err(invalid_args("cp <fs-source> <fs-dest>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (source, _) = fs.resolve_path(args[1], cwd)?;
        if source.is_directory {
            return Err(FsError::IsADirectory);
        }
        let data = fs.read_file(&source)?;
        let (dest_parent, _) = fs.resolve_path(dir_name(args[2]), cwd)?;
        if !dest_parent.is_directory {
            return Err(FsError::NotADirectory);
        }
        let node_id = fs.write_file(&data, false)?;
        fs.add_entry(dest_parent.node_id, node_id, base_name(args[2]))?;
        Ok(Reply::Ok)
    }

    /// Move or rename. An existing file target is overwritten; an existing
    /// directory target receives the source under its own name; otherwise
    /// the source is re-linked under the destination base name. A target
    /// that resolves to the source itself is left alone. On a failed
    /// re-link the source entry is restored, so the inode never orphans.
    fn mv(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 3 {
            return Err(invalid_args("mv <fs-source> <fs-dest>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let src_name = base_name(args[1]).to_string();
        let (source, src_parent) = fs.resolve_path(args[1], cwd)?;
        let (dest_parent, _) = fs.resolve_path(dir_name(args[2]), cwd)?;
        if !dest_parent.is_directory {
            return Err(FsError::NotADirectory);
        }

        let dest_name = base_name(args[2]);
        let dest_entries = fs.load_dir(&dest_parent)?;
        let (final_parent_id, link_name) = match fs.dir_lookup(&dest_entries, dest_name) {
            Some(slot) => {
                let existing = fs.load_inode(dest_entries[slot].inode)?;
                if existing.node_id == source.node_id {
                    // moving something onto itself changes nothing
                    return Ok(Reply::Ok);
                }
                if existing.is_directory {
                    (existing.node_id, src_name.clone())
                } else {
                    fs.remove_entry(dest_parent.node_id, dest_name, true)?;
                    (dest_parent.node_id, dest_name.to_string())
                }
            }
            None => (dest_parent.node_id, dest_name.to_string()),
        };

        fs.remove_entry(src_parent.node_id, &src_name, false)?;
        if let Err(err) = fs.add_entry(final_parent_id, source.node_id, &link_name) {
            fs.add_entry(src_parent.node_id, source.node_id, &src_name)?;
            return Err(err);
        }
        if source.is_directory && final_parent_id != src_parent.node_id {
            fs.reparent_directory(source.node_id, final_parent_id)?;
        }
        Ok(Reply::Ok)
    }

    fn info(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("info <fs-path>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (target, _) = fs.resolve_path(args[1], cwd)?;
        let (_, indirection) = fs.clusters_of(&target)?;
        let mut out = format!(
            "{} - {} - {} - direct {:?} - indirect {:?}",
            args[1], target.file_size, target.node_id, target.direct, target.indirect
        );
        if !indirection.is_empty() {
            out.push_str(&format!("\nindirection blocks {indirection:?}"));
        }
        Ok(Reply::Text(out))
    }

    /// Concatenate two files into a brand-new third one.
    fn xcp(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 4 {
            return Err(invalid_args("xcp <fs-a> <fs-b> <fs-dest>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (first, _) = fs.resolve_path(args[1], cwd)?;
        let (second, _) = fs.resolve_path(args[2], cwd)?;
        if first.is_directory || second.is_directory {
            return Err(FsError::IsADirectory);
        }
        let mut data = fs.read_file(&first)?;
        data.extend(fs.read_file(&second)?);

        let (dest_parent, _) = fs.resolve_path(dir_name(args[3]), cwd)?;
        if !dest_parent.is_directory {
            return Err(FsError::NotADirectory);
        }
        let node_id = fs.write_file(&data, false)?;
        let dest_name = base_name(args[3]);
        match fs.remove_entry(dest_parent.node_id, dest_name, true) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => return Err(err),
        }
        fs.add_entry(dest_parent.node_id, node_id, dest_name)?;
        Ok(Reply::Ok)
    }

    /// Truncate a file to the first `SHORT_LENGTH` bytes by rewriting it
    /// under a fresh inode and relinking the old name.
    fn short(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("short <fs-path>"));
        }
        let cwd = self.cwd_id;
        let fs = self.fs_mut()?;
        let (target, parent) = fs.resolve_path(args[1], cwd)?;
        if target.is_directory {
            return Err(FsError::IsADirectory);
        }
        let mut data = fs.read_file(&target)?;
        data.truncate(SHORT_LENGTH);
        let node_id = fs.write_file(&data, false)?;
        let name = base_name(args[1]);
        fs.remove_entry(parent.node_id, name, true)?;
        fs.add_entry(parent.node_id, node_id, name)?;
        Ok(Reply::Ok)
    }

    /// Replay a host file of commands, one per line. Blank lines are
    /// skipped; the replay aborts on the first failing command.
    fn load(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 2 {
            return Err(invalid_args("load <host-file>"));
        }
        let script = std::fs::read_to_string(args[1]).map_err(host_err)?;
        for line in script.lines() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            print_reply(&self.dispatch(&tokens)?);
        }
        Ok(Reply::Ok)
    }

    fn pwd(&mut self, args: &[&str]) -> FsResult<Reply> {
        if args.len() != 1 {
            return Err(invalid_args("pwd"));
        }
        Ok(Reply::Text(self.cwd_path.clone()))
    }
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Ok => println!("OK"),
        Reply::Text(text) => println!("{text}"),
        Reply::Bytes(bytes) => {
            let mut stdout = io::stdout();
            let _ = stdout.write_all(bytes);
            println!();
        }
    }
}

/// Short uppercase label plus a parenthetical description, one line.
fn error_label(err: &FsError) -> String {
    let tag = match err {
        FsError::NoFilesystem => "NO FILESYSTEM",
        FsError::InvalidArgument(_) => "INVALID ARGUMENT",
        FsError::NotFound => "FILE NOT FOUND",
        FsError::NotADirectory => "NOT A DIRECTORY",
        FsError::IsADirectory => "IS A DIRECTORY",
        FsError::AlreadyExists => "EXIST",
        FsError::DirectoryNotEmpty => "NOT EMPTY",
        FsError::DirectoryFull => "DIRECTORY FULL",
        FsError::OutOfSpace => "OUT OF SPACE",
        FsError::NoInodes => "NO INODES",
        FsError::FileTooLarge => "FILE TOO LARGE",
        FsError::InvalidName => "INVALID NAME",
        FsError::Io(_) => "IO ERROR",
    };
    format!("{tag} ({err})")
}

fn invalid_args(usage: &str) -> FsError {
    FsError::InvalidArgument(format!("usage: {usage}"))
}

/// Missing host files surface as `NotFound`, anything else as plain IO.
fn host_err(err: io::Error) -> FsError {
    if err.kind() == io::ErrorKind::NotFound {
        FsError::NotFound
    } else {
        FsError::Io(err)
    }
}

/// Parse a `<decimal><suffix>` size literal; the suffix is mandatory,
/// case-insensitive, one of K, M, G, T. Characters after it are ignored,
/// so `64KB` reads as `64K`.
fn parse_size(literal: &str) -> FsResult<i64> {
    let upper = literal.to_ascii_uppercase();
    let index = upper
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| {
            FsError::InvalidArgument("size literal needs a K, M, G or T suffix".to_string())
        })?;
    let value: i64 = upper[..index]
        .parse()
        .map_err(|_| FsError::InvalidArgument(format!("cannot parse size literal {literal}")))?;
    let shift = match upper.as_bytes()[index] {
        b'K' => 10,
        b'M' => 20,
        b'G' => 30,
        b'T' => 40,
        _ => {
            return Err(FsError::InvalidArgument(format!(
                "invalid size suffix in {literal}"
            )))
        }
    };
    value
        .checked_mul(1 << shift)
        .ok_or_else(|| FsError::InvalidArgument(format!("size literal {literal} overflows")))
}
