//! Pass-through backend: executes the un-faulted operation against a backing directory tree.
//!
//! Every function takes a path relative to the mount and resolves it under the configured
//! storage root. Failures are returned as negative POSIX errno values, mirroring the
//! grounding implementation's raw `-errno` return convention, so the shim can forward them to
//! `fuser` (after sign normalization) without an intermediate translation table.

use std::fs;
use std::io;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Owner-bit permission check, matching `R_OK`/`W_OK`/`X_OK` against `S_IRUSR`/`S_IWUSR`/`S_IXUSR`.
pub const R_OK: i32 = libc::R_OK;
pub const W_OK: i32 = libc::W_OK;
pub const X_OK: i32 = libc::X_OK;

/// Resolves paths under a storage root and performs POSIX-style operations against it.
pub struct Backend {
    storage_root: PathBuf,
}

impl Backend {
    pub fn new(storage_root: impl Into<PathBuf>) -> Backend {
        Backend {
            storage_root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Resolve a mount-relative path under the storage root.
    ///
    /// Rejects any `..` component that would escape the storage root — the original
    /// implementation concatenated the two strings unchecked, but a usable fault-injection
    /// harness must not let a misbehaving client walk out of its sandbox.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, i32> {
        for component in path.components() {
            if component == Component::ParentDir {
                return Err(-libc::EACCES);
            }
        }
        let relative = path.strip_prefix("/").unwrap_or(path);
        Ok(self.storage_root.join(relative))
    }

    fn check_perms(&self, path: &Path, mode: i32) -> Result<(), i32> {
        let full = self.resolve(path)?;
        let meta = match fs::symlink_metadata(&full) {
            Ok(m) => m,
            Err(e) => return Err(-io_errno(&e)),
        };
        let posix_mode = meta.permissions().mode();
        if mode & R_OK != 0 && posix_mode & libc::S_IRUSR == 0 {
            log::debug!("permission check failed: no read permission for {}", path.display());
            return Err(-libc::EACCES);
        }
        if mode & W_OK != 0 && posix_mode & libc::S_IWUSR == 0 {
            log::debug!("permission check failed: no write permission for {}", path.display());
            return Err(-libc::EACCES);
        }
        if mode & X_OK != 0 && posix_mode & libc::S_IXUSR == 0 {
            log::debug!("permission check failed: no execute permission for {}", path.display());
            return Err(-libc::EACCES);
        }
        Ok(())
    }

    /// Public entry point for the shim's unconditional state-modifying-operation check.
    pub fn check_access(&self, path: &Path, mode: i32) -> Result<(), i32> {
        self.check_perms(path, mode)
    }

    fn parent_of(path: &Path) -> PathBuf {
        path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"))
    }

    pub fn getattr(&self, path: &Path) -> Result<fs::Metadata, i32> {
        let full = self.resolve(path)?;
        fs::symlink_metadata(&full).map_err(|e| -io_errno(&e))
    }

    pub fn readdir(&self, path: &Path) -> Result<Vec<(String, fs::FileType)>, i32> {
        self.check_perms(path, R_OK | X_OK)?;
        let full = self.resolve(path)?;
        let entries = fs::read_dir(&full).map_err(|e| -io_errno(&e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| -io_errno(&e))?;
            let file_type = entry.file_type().map_err(|e| -io_errno(&e))?;
            out.push((entry.file_name().to_string_lossy().into_owned(), file_type));
        }
        Ok(out)
    }

    pub fn create(&self, path: &Path, mode: u32) -> Result<fs::File, i32> {
        let full = self.resolve(path)?;
        if full.exists() {
            self.check_perms(path, W_OK)?;
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
            .map_err(|e| -io_errno(&e))?;
        let mut perms = file.metadata().map_err(|e| -io_errno(&e))?.permissions();
        perms.set_mode(mode);
        let _ = file.set_permissions(perms);
        Ok(file)
    }

    pub fn mknod(&self, path: &Path, mode: u32) -> Result<(), i32> {
        self.check_perms(&Self::parent_of(path), W_OK)?;
        let full = self.resolve(path)?;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .map_err(|e| -io_errno(&e))?;
        let _ = fs::set_permissions(&full, fs::Permissions::from_mode(mode));
        Ok(())
    }

    pub fn read(&self, path: &Path, fh: Option<&fs::File>, buf: &mut [u8], offset: u64) -> Result<usize, i32> {
        if fh.is_none() {
            self.check_perms(path, R_OK)?;
        }
        let full = self.resolve(path)?;
        let n = match fh {
            Some(file) => file.read_at(buf, offset).map_err(|e| -io_errno(&e))?,
            None => {
                let file = fs::File::open(&full).map_err(|e| -io_errno(&e))?;
                file.read_at(buf, offset).map_err(|e| -io_errno(&e))?
            }
        };
        Ok(n)
    }

    pub fn write(&self, path: &Path, fh: Option<&fs::File>, data: &[u8], offset: u64) -> Result<usize, i32> {
        // Unconditional regardless of fh, matching the grounding source's corrected behavior.
        self.check_perms(path, W_OK)?;
        let full = self.resolve(path)?;
        let n = match fh {
            Some(file) => file.write_at(data, offset).map_err(|e| -io_errno(&e))?,
            None => {
                let file = fs::OpenOptions::new()
                    .write(true)
                    .open(&full)
                    .map_err(|e| -io_errno(&e))?;
                file.write_at(data, offset).map_err(|e| -io_errno(&e))?
            }
        };
        Ok(n)
    }

    pub fn open(&self, path: &Path, read: bool, write: bool) -> Result<fs::File, i32> {
        let mode = match (read, write) {
            (true, true) => R_OK | W_OK,
            (true, false) => R_OK,
            (false, true) => W_OK,
            (false, false) => 0,
        };
        if mode != 0 {
            self.check_perms(path, mode)?;
        }
        let full = self.resolve(path)?;
        fs::OpenOptions::new()
            .read(true)
            .write(write)
            .open(&full)
            .map_err(|e| -io_errno(&e))
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<(), i32> {
        self.check_perms(&Self::parent_of(path), W_OK)?;
        let full = self.resolve(path)?;
        fs::create_dir(&full).map_err(|e| -io_errno(&e))?;
        let _ = fs::set_permissions(&full, fs::Permissions::from_mode(mode));
        Ok(())
    }

    pub fn rmdir(&self, path: &Path) -> Result<(), i32> {
        self.check_perms(&Self::parent_of(path), W_OK)?;
        let full = self.resolve(path)?;
        fs::remove_dir(&full).map_err(|e| -io_errno(&e))
    }

    pub fn unlink(&self, path: &Path) -> Result<(), i32> {
        self.check_perms(&Self::parent_of(path), W_OK)?;
        let full = self.resolve(path)?;
        fs::remove_file(&full).map_err(|e| -io_errno(&e))
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<(), i32> {
        self.check_perms(from, W_OK)?;
        self.check_perms(&Self::parent_of(from), W_OK)?;
        self.check_perms(&Self::parent_of(to), W_OK)?;
        if self.resolve(to)?.exists() {
            self.check_perms(to, W_OK)?;
        }
        let full_from = self.resolve(from)?;
        let full_to = self.resolve(to)?;
        fs::rename(&full_from, &full_to).map_err(|e| -io_errno(&e))
    }

    pub fn access(&self, path: &Path, mode: i32) -> Result<(), i32> {
        self.check_perms(path, mode)
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> Result<(), i32> {
        self.check_perms(path, W_OK)?;
        let full = self.resolve(path)?;
        fs::set_permissions(&full, fs::Permissions::from_mode(mode)).map_err(|e| -io_errno(&e))
    }

    pub fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<(), i32> {
        self.check_perms(path, W_OK)?;
        let full = self.resolve(path)?;
        let c_path = std::ffi::CString::new(full.as_os_str().as_encoded_bytes()).map_err(|_| -libc::EINVAL)?;
        let ret = unsafe {
            libc::chown(
                c_path.as_ptr(),
                uid.unwrap_or(u32::MAX),
                gid.unwrap_or(u32::MAX),
            )
        };
        if ret == -1 {
            Err(-io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
        } else {
            Ok(())
        }
    }

    pub fn truncate(&self, path: &Path, size: u64) -> Result<(), i32> {
        self.check_perms(path, W_OK)?;
        let full = self.resolve(path)?;
        let file = fs::OpenOptions::new().write(true).open(&full).map_err(|e| -io_errno(&e))?;
        file.set_len(size).map_err(|e| -io_errno(&e))
    }

    pub fn utimens(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<(), i32> {
        self.check_perms(path, W_OK)?;
        let full = self.resolve(path)?;
        let c_path = std::ffi::CString::new(full.as_os_str().as_encoded_bytes()).map_err(|_| -libc::EINVAL)?;
        let times = [to_timeval(atime), to_timeval(mtime)];
        let ret = unsafe { libc::utimes(c_path.as_ptr(), times.as_ptr()) };
        if ret == -1 {
            Err(-io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
        } else {
            Ok(())
        }
    }

    pub fn release(&self, file: fs::File) -> Result<(), i32> {
        drop(file);
        Ok(())
    }
}

fn io_errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

fn to_timeval(time: SystemTime) -> libc::timeval {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => libc::timeval {
            tv_sec: d.as_secs() as libc::time_t,
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        },
        Err(_) => libc::timeval { tv_sec: 0, tv_usec: 0 },
    }
}
