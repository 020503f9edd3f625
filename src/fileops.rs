use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// Standard filename limit for most filesystems
const MAX_FILENAME_BYTES: usize = 255;

/// The two filesystem questions the triage core asks. Everything that
/// decides "where is this file now" goes through here so tests can swap
/// the disk for an in-memory double.
pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;

    /// Moves `from` to `to`, creating the destination directory. Never
    /// overwrites. Returns the path actually written, which differs from
    /// `to` only when the file name had to be truncated.
    fn relocate(&self, from: &Path, to: &Path) -> io::Result<PathBuf>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFs;

impl FileSystem for DiskFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn relocate(&self, from: &Path, to: &Path) -> io::Result<PathBuf> {
        if !from.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("File {} not found.", from.display()),
            ));
        }
        if let Some(parent) = to.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        perform_atomic_move(from, to)
    }
}

/// Renames without replacing an existing `to`. renameat2 where the kernel
/// has it, else a hard link, else a rename guarded by an existence check.
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use nix::fcntl::{RenameFlags, renameat2};
        use std::os::fd::BorrowedFd;

        // Safety: AT_FDCWD is a constant valid fd for CWD
        let cwd = unsafe { BorrowedFd::borrow_raw(libc::AT_FDCWD) };

        match renameat2(cwd, from, cwd, to, RenameFlags::RENAME_NOREPLACE) {
            Ok(_) => return Ok(()),
            // Link/rename fallbacks fail with EXDEV too.
            Err(nix::errno::Errno::EXDEV) => return Err(io::Error::from_raw_os_error(libc::EXDEV)),
            Err(nix::errno::Errno::EEXIST) => return Err(io::Error::from_raw_os_error(libc::EEXIST)),
            Err(e) => debug!(errno = e as i32, "renameat2 failed: {}, trying fallback", e),
        }
    }

    match fs::hard_link(from, to) {
        Ok(()) => {
            fs::remove_file(from)?;
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            debug!("hard link failed: {}, using plain rename", e);
            if to.exists() {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "destination exists"));
            }
            fs::rename(from, to)
        }
    }
}

/// Copy + delete for cross-device moves. O_EXCL on the destination so an
/// existing file is never replaced. Permissions, timestamps and extended
/// attributes are carried over on a best-effort basis.
fn atomic_copy_move(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = fs::File::open(src)?;
    let metadata = reader.metadata()?;

    let mut writer = fs::OpenOptions::new().write(true).create_new(true).open(dst)?;

    if let Err(e) = io::copy(&mut reader, &mut writer).and_then(|_| writer.sync_all()) {
        drop(writer);
        let _ = fs::remove_file(dst);
        return Err(e);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(metadata.permissions().mode());
        if let Err(e) = fs::set_permissions(dst, perms) {
            warn!(path = %dst.display(), "failed to restore permissions: {}", e);
        }
    }

    let mtime = FileTime::from_last_modification_time(&metadata);
    let atime = FileTime::from_last_access_time(&metadata);
    if let Err(e) = filetime::set_file_times(dst, atime, mtime) {
        warn!(path = %dst.display(), "failed to restore timestamps: {}", e);
    }

    #[cfg(unix)]
    {
        if let Ok(iter) = xattr::list(src) {
            for name in iter {
                if let Ok(Some(value)) = xattr::get(src, &name) {
                    let _ = xattr::set(dst, &name, &value);
                }
            }
        }
    }

    drop(writer);
    drop(reader);

    fs::remove_file(src)?;
    Ok(())
}

fn is_name_too_long(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENAMETOOLONG)
}

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV) || err.kind() == io::ErrorKind::CrossesDevices
}

fn is_already_exists(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::AlreadyExists || err.raw_os_error() == Some(libc::EEXIST)
}

/// Moves without overwriting, falling back to copy+delete across devices
/// and retrying once with a truncated name on ENAMETOOLONG.
pub fn perform_atomic_move(src: &Path, target: &Path) -> io::Result<PathBuf> {
    let try_move = |src: &Path, dst: &Path| -> io::Result<()> {
        match rename_noreplace(src, dst) {
            Err(e) if is_cross_device(&e) => atomic_copy_move(src, dst),
            other => other,
        }
    };

    match try_move(src, target) {
        Ok(_) => Ok(target.to_path_buf()),
        Err(e) if is_already_exists(&e) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", target.display()),
        )),
        Err(e) if is_name_too_long(&e) => {
            let truncated = resolve_output_path(target)?;
            if truncated == target {
                return Err(e);
            }
            debug!(path = %truncated.display(), "filename too long, retrying");

            match try_move(src, &truncated) {
                Ok(_) => Ok(truncated),
                Err(e) if is_already_exists(&e) => Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("Truncated filename '{}' already exists", truncated.display()),
                )),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Resolves the path, truncating the filename if it exceeds limits.
fn resolve_output_path(original_path: &Path) -> io::Result<PathBuf> {
    let filename = original_path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid filename in path"))?;

    if filename.len() <= MAX_FILENAME_BYTES {
        return Ok(original_path.to_path_buf());
    }

    let parent = original_path.parent().unwrap_or(Path::new("."));
    Ok(parent.join(truncate_filename_to_limit(filename)))
}

/// Truncate a filename to fit within MAX_FILENAME_BYTES, preserving extension if possible.
fn truncate_filename_to_limit(filename: &str) -> String {
    if filename.len() <= MAX_FILENAME_BYTES {
        return filename.to_string();
    }

    let (base, ext) = match filename.rfind('.') {
        Some(dot) if dot > 0 && filename.len() - dot <= 20 => (&filename[..dot], &filename[dot..]),
        _ => (filename, ""),
    };

    let max_base_bytes = MAX_FILENAME_BYTES.saturating_sub(ext.len());
    if max_base_bytes == 0 {
        return truncate_str_to_byte_limit(filename, MAX_FILENAME_BYTES).to_string();
    }

    format!("{}{}", truncate_str_to_byte_limit(base, max_base_bytes), ext)
}

/// Truncate a string to fit within a maximum byte limit, respecting UTF-8 boundaries.
fn truncate_str_to_byte_limit(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let next_end = idx + c.len_utf8();
        if next_end > max_bytes {
            break;
        }
        end = next_end;
    }
    &s[..end]
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocate_creates_destination_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        fs::write(&src, b"pixels").unwrap();
        let dst = dir.path().join("out").join("A").join("a.png");

        let written = DiskFs.relocate(&src, &dst).unwrap();
        assert_eq!(written, dst);
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"pixels");
    }

    #[test]
    fn test_relocate_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        let dst = dir.path().join("b.png");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();

        let err = DiskFs.relocate(&src, &dst).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&dst).unwrap(), b"old");
        assert!(src.exists());
    }

    #[test]
    fn test_relocate_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = DiskFs
            .relocate(&dir.path().join("gone.png"), &dir.path().join("x/gone.png"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn test_rename_noreplace() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let c = dir.path().join("c.png");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let err = rename_noreplace(&a, &b).unwrap_err();
        assert!(is_already_exists(&err));
        assert_eq!(fs::read(&b).unwrap(), b"b");

        rename_noreplace(&a, &c).unwrap();
        assert!(!a.exists());
        assert_eq!(fs::read(&c).unwrap(), b"a");
    }

    #[test]
    fn test_truncate_filename_keeps_extension() {
        let long = format!("{}.jpeg", "é".repeat(200));
        let out = truncate_filename_to_limit(&long);
        assert!(out.len() <= MAX_FILENAME_BYTES);
        assert!(out.ends_with(".jpeg"));
        assert!(out.is_char_boundary(out.len() - 5));
    }
}
