//! Interposition shim: adapts `fuser`'s inode-oriented `Filesystem` trait onto the
//! path-oriented fault engine and backend.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use libc::{ENOENT, O_ACCMODE, O_RDONLY, O_RDWR, O_WRONLY};

use crate::backend::{Backend, R_OK, W_OK};
use crate::engine::{self, Decision};
use crate::ops::Op;
use crate::oracle::RandomSource;
use crate::plan::FaultPlan;
use crate::stats::Ledger;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Bidirectional inode<->path table. `fuser`'s classic API is inode-keyed; the engine and
/// backend are path-keyed, matching the grounding backend's own path-based contract, so this
/// table is the shim's entire adaptation burden.
struct InodeTable {
    paths: HashMap<u64, PathBuf>,
    inodes: HashMap<PathBuf, u64>,
    next_ino: AtomicU64,
}

impl InodeTable {
    fn new() -> InodeTable {
        let mut paths = HashMap::new();
        let mut inodes = HashMap::new();
        paths.insert(ROOT_INO, PathBuf::from("/"));
        inodes.insert(PathBuf::from("/"), ROOT_INO);
        InodeTable {
            paths,
            inodes,
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.paths.get(&ino).cloned()
    }

    fn ino_for(&mut self, path: &Path) -> u64 {
        if let Some(ino) = self.inodes.get(path) {
            return *ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        self.paths.insert(ino, path.to_path_buf());
        self.inodes.insert(path.to_path_buf(), ino);
        ino
    }

    fn forget(&mut self, ino: u64) {
        if ino == ROOT_INO {
            return;
        }
        if let Some(path) = self.paths.remove(&ino) {
            self.inodes.remove(&path);
        }
    }
}

/// The FUSE-facing filesystem: wires the inode table, the fault engine, and the pass-through
/// backend into `fuser`'s dispatch trait.
pub struct FaultInjectingFs {
    backend: Backend,
    plan: FaultPlan,
    ledger: Ledger,
    oracle: Box<dyn RandomSource>,
    inodes: Mutex<InodeTable>,
    handles: Mutex<HashMap<u64, fs::File>>,
    next_fh: AtomicU64,
}

impl FaultInjectingFs {
    pub fn new(backend: Backend, plan: FaultPlan, ledger: Ledger, oracle: Box<dyn RandomSource>) -> FaultInjectingFs {
        FaultInjectingFs {
            backend,
            plan,
            ledger,
            oracle,
            inodes: Mutex::new(InodeTable::new()),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.inodes.lock().expect("inode table poisoned").path_of(ino)
    }

    fn ino_for(&self, path: &Path) -> u64 {
        self.inodes.lock().expect("inode table poisoned").ino_for(path)
    }

    fn store_handle(&self, file: fs::File) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().expect("handle table poisoned").insert(fh, file);
        fh
    }

    fn pre(&self, op: Op, write_buf: Option<&[u8]>, size: usize) -> Decision {
        engine::pre_phase(op, &self.plan, &self.ledger, self.oracle.as_ref(), write_buf, size)
    }

    fn post(&self, op: Op, result: i64, read_buf: Option<&mut [u8]>) {
        engine::post_phase(op, &self.plan, &self.ledger, self.oracle.as_ref(), result, read_buf);
    }

    fn attr_from_metadata(&self, ino: u64, meta: &fs::Metadata) -> FileAttr {
        use std::os::unix::fs::MetadataExt;
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.is_symlink() {
            FileType::Symlink
        } else {
            FileType::RegularFile
        };
        FileAttr {
            ino,
            size: meta.len(),
            blocks: meta.blocks(),
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: SystemTime::UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64),
            crtime: SystemTime::UNIX_EPOCH,
            kind,
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
            flags: 0,
        }
    }
}

impl Filesystem for FaultInjectingFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(ENOENT);
            return;
        };
        let path = parent_path.join(name);
        match self.backend.getattr(&path) {
            Ok(meta) => {
                let ino = self.ino_for(&path);
                reply.entry(&TTL, &self.attr_from_metadata(ino, &meta), 0);
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.pre(Op::Getattr, None, 0) {
            Decision::Fail(e) => reply.error(e.raw()),
            _ => match self.backend.getattr(&path) {
                Ok(meta) => {
                    self.post(Op::Getattr, 0, None);
                    reply.attr(&TTL, &self.attr_from_metadata(ino, &meta));
                }
                Err(e) => reply.error(e.abs()),
            },
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.pre(Op::Readdir, None, 0) {
            Decision::Fail(e) => {
                reply.error(e.raw());
                return;
            }
            _ => {}
        }
        let entries = match self.backend.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.abs());
                return;
            }
        };
        self.post(Op::Readdir, 0, None);

        let mut all = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
        ];
        for (name, file_type) in entries {
            let child_path = path.join(&name);
            let child_ino = self.ino_for(&child_path);
            let kind = if file_type.is_dir() {
                FileType::Directory
            } else if file_type.is_symlink() {
                FileType::Symlink
            } else {
                FileType::RegularFile
            };
            all.push((child_ino, kind, name));
        }

        for (i, (entry_ino, kind, name)) in all.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(ENOENT);
            return;
        };
        let path = parent_path.join(name);
        if let Decision::Fail(e) = self.pre(Op::Create, None, 0) {
            reply.error(e.raw());
            return;
        }
        match self.backend.create(&path, mode) {
            Ok(file) => {
                self.post(Op::Create, 0, None);
                let ino = self.ino_for(&path);
                let meta = file.metadata().expect("fresh file handle has metadata");
                let attr = self.attr_from_metadata(ino, &meta);
                let fh = self.store_handle(file);
                reply.created(&TTL, &attr, 0, fh, 0);
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(ENOENT);
            return;
        };
        let path = parent_path.join(name);
        if let Decision::Fail(e) = self.pre(Op::Mknod, None, 0) {
            reply.error(e.raw());
            return;
        }
        match self.backend.mknod(&path, mode) {
            Ok(()) => {
                self.post(Op::Mknod, 0, None);
                let ino = self.ino_for(&path);
                match self.backend.getattr(&path) {
                    Ok(meta) => reply.entry(&TTL, &self.attr_from_metadata(ino, &meta), 0),
                    Err(e) => reply.error(e.abs()),
                }
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        if let Decision::Fail(e) = self.pre(Op::Open, None, 0) {
            reply.error(e.raw());
            return;
        }
        let accmode = flags & O_ACCMODE;
        if accmode == O_RDONLY {
            if let Err(e) = self.backend.check_access(&path, R_OK) {
                reply.error(e.abs());
                return;
            }
        } else if accmode == O_WRONLY {
            if let Err(e) = self.backend.check_access(&path, W_OK) {
                reply.error(e.abs());
                return;
            }
        } else if accmode == O_RDWR {
            if let Err(e) = self.backend.check_access(&path, R_OK | W_OK) {
                reply.error(e.abs());
                return;
            }
        }
        match self.backend.open(&path, accmode != O_WRONLY, accmode != O_RDONLY) {
            Ok(file) => {
                self.post(Op::Open, 0, None);
                let fh = self.store_handle(file);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let requested = size as usize;
        let decision = self.pre(Op::Read, None, requested);
        let effective_size = match decision {
            Decision::Fail(e) => {
                reply.error(e.raw());
                return;
            }
            Decision::Mutate { size, .. } => size.unwrap_or(requested),
            Decision::Pass => requested,
        };

        let mut buf = vec![0u8; effective_size];
        let handles = self.handles.lock().expect("handle table poisoned");
        let file = handles.get(&fh);
        let n = match self.backend.read(&path, file, &mut buf, offset as u64) {
            Ok(n) => n,
            Err(e) => {
                reply.error(e.abs());
                return;
            }
        };
        drop(handles);
        buf.truncate(n);
        self.post(Op::Read, n as i64, Some(&mut buf));
        reply.data(&buf);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let decision = self.pre(Op::Write, Some(data), data.len());
        let (effective_size, corrupted) = match decision {
            Decision::Fail(e) => {
                reply.error(e.raw());
                return;
            }
            Decision::Mutate { size, corrupt_write } => (size.unwrap_or(data.len()), corrupt_write),
            Decision::Pass => (data.len(), None),
        };
        if let Err(e) = self.backend.check_access(&path, W_OK) {
            reply.error(e.abs());
            return;
        }

        let bound = effective_size.min(data.len());
        let to_write: &[u8] = match &corrupted {
            Some(buf) => buf,
            None => &data[..bound],
        };

        let handles = self.handles.lock().expect("handle table poisoned");
        let file = handles.get(&fh);
        let n = match self.backend.write(&path, file, to_write, offset as u64) {
            Ok(n) => n,
            Err(e) => {
                reply.error(e.abs());
                return;
            }
        };
        drop(handles);
        self.post(Op::Write, n as i64, None);
        reply.written(n as u32);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Decision::Fail(e) = self.pre(Op::Release, None, 0) {
            reply.error(e.raw());
            return;
        }
        let file = self.handles.lock().expect("handle table poisoned").remove(&fh);
        match file {
            Some(file) => match self.backend.release(file) {
                Ok(()) => {
                    self.post(Op::Release, 0, None);
                    reply.ok();
                }
                Err(e) => reply.error(e.abs()),
            },
            None => reply.ok(),
        }
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(ENOENT);
            return;
        };
        let path = parent_path.join(name);
        if let Decision::Fail(e) = self.pre(Op::Mkdir, None, 0) {
            reply.error(e.raw());
            return;
        }
        if let Err(e) = self.backend.check_access(&parent_path, W_OK) {
            reply.error(e.abs());
            return;
        }
        match self.backend.mkdir(&path, mode) {
            Ok(()) => {
                self.post(Op::Mkdir, 0, None);
                let ino = self.ino_for(&path);
                match self.backend.getattr(&path) {
                    Ok(meta) => reply.entry(&TTL, &self.attr_from_metadata(ino, &meta), 0),
                    Err(e) => reply.error(e.abs()),
                }
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(ENOENT);
            return;
        };
        let path = parent_path.join(name);
        if let Decision::Fail(e) = self.pre(Op::Rmdir, None, 0) {
            reply.error(e.raw());
            return;
        }
        if let Err(e) = self.backend.check_access(&parent_path, W_OK) {
            reply.error(e.abs());
            return;
        }
        match self.backend.rmdir(&path) {
            Ok(()) => {
                self.post(Op::Rmdir, 0, None);
                self.inodes.lock().expect("inode table poisoned").forget(self.ino_for(&path));
                reply.ok();
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(ENOENT);
            return;
        };
        let path = parent_path.join(name);
        if let Decision::Fail(e) = self.pre(Op::Unlink, None, 0) {
            reply.error(e.raw());
            return;
        }
        if let Err(e) = self.backend.check_access(&parent_path, W_OK) {
            reply.error(e.abs());
            return;
        }
        match self.backend.unlink(&path) {
            Ok(()) => {
                self.post(Op::Unlink, 0, None);
                self.inodes.lock().expect("inode table poisoned").forget(self.ino_for(&path));
                reply.ok();
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(parent_path), Some(newparent_path)) = (self.path_of(parent), self.path_of(newparent)) else {
            reply.error(ENOENT);
            return;
        };
        let from = parent_path.join(name);
        let to = newparent_path.join(newname);
        if let Decision::Fail(e) = self.pre(Op::Rename, None, 0) {
            reply.error(e.raw());
            return;
        }
        if let Err(e) = self.backend.check_access(&from, W_OK) {
            reply.error(e.abs());
            return;
        }
        match self.backend.rename(&from, &to) {
            Ok(()) => {
                self.post(Op::Rename, 0, None);
                let mut table = self.inodes.lock().expect("inode table poisoned");
                let ino = table.ino_for(&from);
                table.forget(ino);
                table.ino_for(&to);
                reply.ok();
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        if let Decision::Fail(e) = self.pre(Op::Access, None, 0) {
            reply.error(e.raw());
            return;
        }
        match self.backend.access(&path, mask) {
            Ok(()) => {
                self.post(Op::Access, 0, None);
                reply.ok();
            }
            Err(e) => reply.error(e.abs()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };

        if let Some(mode) = mode {
            if let Decision::Fail(e) = self.pre(Op::Chmod, None, 0) {
                reply.error(e.raw());
                return;
            }
            if let Err(e) = self.backend.check_access(&path, W_OK) {
                reply.error(e.abs());
                return;
            }
            if let Err(e) = self.backend.chmod(&path, mode) {
                reply.error(e.abs());
                return;
            }
            self.post(Op::Chmod, 0, None);
        }

        if uid.is_some() || gid.is_some() {
            if let Decision::Fail(e) = self.pre(Op::Chown, None, 0) {
                reply.error(e.raw());
                return;
            }
            if let Err(e) = self.backend.check_access(&path, W_OK) {
                reply.error(e.abs());
                return;
            }
            if let Err(e) = self.backend.chown(&path, uid, gid) {
                reply.error(e.abs());
                return;
            }
            self.post(Op::Chown, 0, None);
        }

        if let Some(size) = size {
            if let Decision::Fail(e) = self.pre(Op::Truncate, None, 0) {
                reply.error(e.raw());
                return;
            }
            if let Err(e) = self.backend.check_access(&path, W_OK) {
                reply.error(e.abs());
                return;
            }
            if let Err(e) = self.backend.truncate(&path, size) {
                reply.error(e.abs());
                return;
            }
            self.post(Op::Truncate, 0, None);
        }

        if atime.is_some() || mtime.is_some() {
            if let Decision::Fail(e) = self.pre(Op::Utimens, None, 0) {
                reply.error(e.raw());
                return;
            }
            if let Err(e) = self.backend.check_access(&path, W_OK) {
                reply.error(e.abs());
                return;
            }
            let now = SystemTime::now();
            let resolve = |t: Option<fuser::TimeOrNow>| match t {
                Some(fuser::TimeOrNow::SpecificTime(t)) => t,
                Some(fuser::TimeOrNow::Now) | None => now,
            };
            if let Err(e) = self.backend.utimens(&path, resolve(atime), resolve(mtime)) {
                reply.error(e.abs());
                return;
            }
            self.post(Op::Utimens, 0, None);
        }

        match self.backend.getattr(&path) {
            Ok(meta) => reply.attr(&TTL, &self.attr_from_metadata(ino, &meta)),
            Err(e) => reply.error(e.abs()),
        }
    }
}
