//! Publish-or-replace capability
//!
//! Moves a staged index entry onto its final location in one atomic step,
//! replacing whatever was there. Two implementations exist, one per
//! platform variant:
//!
//! - [`RenamePublisher`]: `rename(2)` of the staged entry onto the destination.
//! - [`DescriptorLinkPublisher`]: the staged entry is held open as a
//!   descriptor and that descriptor is linked onto the destination.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use log::{debug, warn};

use crate::error::{Result, StoreError};
use crate::store::config::PlatformVariant;

/// Atomic create-or-replace of a staged entry onto a destination path
pub trait PublishOrReplace: Send + Sync {
    /// Publish `staged` at `destination`, replacing any existing entry
    fn publish(&self, staged: &Path, destination: &Path) -> Result<()>;

    /// Platform variant this capability belongs to
    fn variant(&self) -> PlatformVariant;
}

/// Generic variant: rename is an atomic create-or-replace
pub struct RenamePublisher;

impl PublishOrReplace for RenamePublisher {
    fn publish(&self, staged: &Path, destination: &Path) -> Result<()> {
        fs::rename(staged, destination).map_err(|e| StoreError::io(destination, e))?;
        debug!("Renamed {} onto {}", staged.display(), destination.display());
        Ok(())
    }

    fn variant(&self) -> PlatformVariant {
        PlatformVariant::Generic
    }
}

/// Clustered variant: link the open staged descriptor onto the destination
pub struct DescriptorLinkPublisher;

impl PublishOrReplace for DescriptorLinkPublisher {
    fn publish(&self, staged: &Path, destination: &Path) -> Result<()> {
        // Closed on every exit path when `handle` drops
        let handle = StagedHandle::open(staged).map_err(|e| StoreError::io(staged, e))?;

        match handle.link_to(destination) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let scratch = scratch_path(staged);
                remove_ignore_missing(&scratch)?;
                handle.link_to(&scratch).map_err(|e| StoreError::io(&scratch, e))?;
                fs::rename(&scratch, destination).map_err(|e| StoreError::io(destination, e))?;
                debug!("Replaced existing entry at {}", destination.display());
            }
            Err(e) => return Err(StoreError::io(destination, e)),
        }
        drop(handle);

        // The staged name stays behind after a link; it is no longer needed
        remove_ignore_missing(staged)?;
        debug!("Linked {} onto {}", staged.display(), destination.display());
        Ok(())
    }

    fn variant(&self) -> PlatformVariant {
        PlatformVariant::Clustered
    }
}

/// Descriptor on the staged entry itself (not on what it points to)
struct StagedHandle {
    file: File,
}

impl StagedHandle {
    #[cfg(target_os = "linux")]
    fn open(staged: &Path) -> io::Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_PATH | libc::O_NOFOLLOW)
            .open(staged)?;
        Ok(Self { file })
    }

    #[cfg(not(target_os = "linux"))]
    fn open(_staged: &Path) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "linking by descriptor is only available on Linux",
        ))
    }

    /// Create `destination` as a new name for the open descriptor
    #[cfg(target_os = "linux")]
    fn link_to(&self, destination: &Path) -> io::Result<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;
        use std::os::unix::io::AsRawFd;

        let source = CString::new(format!("/proc/self/fd/{}", self.file.as_raw_fd()))?;
        let target = CString::new(destination.as_os_str().as_bytes())?;
        let rc = unsafe {
            libc::linkat(
                libc::AT_FDCWD,
                source.as_ptr(),
                libc::AT_FDCWD,
                target.as_ptr(),
                libc::AT_SYMLINK_FOLLOW,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn link_to(&self, _destination: &Path) -> io::Result<()> {
        let _ = &self.file;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "linking by descriptor is only available on Linux",
        ))
    }
}

/// Second name for the staged descriptor, inside the staging directory
fn scratch_path(staged: &Path) -> PathBuf {
    let file_name = staged
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    staged.with_file_name(format!(".{}.{}.link", file_name, std::process::id()))
}

fn remove_ignore_missing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("{} already removed, skipping", path.display());
            Ok(())
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn staged_reference(dir: &TempDir, name: &str, target: &str) -> PathBuf {
        let staged = dir.path().join(name);
        symlink(target, &staged).unwrap();
        staged
    }

    #[test]
    fn test_rename_publisher_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("K1");

        let staged = staged_reference(&dir, "staged-1", "../identities/A1/identity.json");
        RenamePublisher.publish(&staged, &destination).unwrap();
        assert_eq!(fs::read_link(&destination).unwrap(), PathBuf::from("../identities/A1/identity.json"));
        assert!(fs::symlink_metadata(&staged).is_err());

        let staged = staged_reference(&dir, "staged-2", "../identities/B1/identity.json");
        RenamePublisher.publish(&staged, &destination).unwrap();
        assert_eq!(fs::read_link(&destination).unwrap(), PathBuf::from("../identities/B1/identity.json"));
    }

    #[test]
    fn test_rename_publisher_missing_stage_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = RenamePublisher
            .publish(&dir.path().join("missing"), &dir.path().join("K1"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_descriptor_link_publisher_links_the_reference_itself() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("K1");

        // Dangling while staged, the publisher must not follow it
        let staged = staged_reference(&dir, "staged-1", "../identities/A1/identity.json");
        DescriptorLinkPublisher.publish(&staged, &destination).unwrap();

        assert_eq!(fs::read_link(&destination).unwrap(), PathBuf::from("../identities/A1/identity.json"));
        assert!(fs::symlink_metadata(&staged).is_err());
    }

    #[test]
    fn test_scratch_path_stays_in_staging_dir() {
        let staged = Path::new("/cfg/access_keys/.staging/0123abcd");
        let scratch = scratch_path(staged);
        assert_eq!(scratch.parent(), staged.parent());
        assert_ne!(scratch, staged);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_descriptor_link_publisher_replace_leaves_index_dir_clean() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join(".staging");
        fs::create_dir(&staging).unwrap();
        let destination = dir.path().join("K1");
        symlink("../identities/OLD/identity.json", &destination).unwrap();

        let staged = staging.join("stage-1");
        symlink("../identities/A1/identity.json", &staged).unwrap();
        // Leftover second name from an interrupted replace
        symlink("../identities/A1/identity.json", scratch_path(&staged)).unwrap();

        DescriptorLinkPublisher.publish(&staged, &destination).unwrap();

        assert_eq!(fs::read_link(&destination).unwrap(), PathBuf::from("../identities/A1/identity.json"));
        let mut index_entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        index_entries.sort();
        assert_eq!(index_entries, vec![".staging", "K1"]);
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_descriptor_link_publisher_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("K1");
        symlink("../identities/OLD/identity.json", &destination).unwrap();

        let staged = staged_reference(&dir, "staged-1", "../identities/A1/identity.json");
        DescriptorLinkPublisher.publish(&staged, &destination).unwrap();

        assert_eq!(fs::read_link(&destination).unwrap(), PathBuf::from("../identities/A1/identity.json"));
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
