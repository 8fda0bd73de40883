//! Recovery of overlay mounts orphaned by a crashed or killed process.
//!
//! An `OverlayMount` record lives in the memory of the process that created
//! it. If that process dies before unmounting, the kernel mount survives
//! with nobody left holding the record. This module reconstructs such
//! mounts from the live mount table and tears them down.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use weir_common::{WeirError, WeirResult};

use super::config::MOUNT_TAG;
use super::kernel::{UnmountMode, best_effort_remove, unmount_overlay};

/// Mount table consulted by default.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Unmount escalation ladder: plain, then lazy detach, then force.
const UNMOUNT_LADDER: [UnmountMode; 3] =
    [UnmountMode::Normal, UnmountMode::Detach, UnmountMode::Force];

/// An orphaned overlay mount, reconstructed from the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleMount {
    /// The union mount point.
    pub merged_dir: PathBuf,
    /// The read-only base directory.
    pub lower_dir: PathBuf,
    /// The writable overlay layer.
    pub upper_dir: PathBuf,
    /// The kernel scratch directory.
    pub work_dir: PathBuf,
}

/// Find orphaned Weir overlay mounts in `/proc/mounts`.
///
/// # Errors
///
/// Returns an error if the mount table cannot be opened or read.
pub fn detect_stale_mounts() -> WeirResult<Vec<StaleMount>> {
    detect_stale_mounts_in(PROC_MOUNTS)
}

/// Find orphaned Weir overlay mounts in the given mount table file.
///
/// A line is a candidate only if its filesystem type is `overlay` and its
/// mount point or option string carries [`MOUNT_TAG`]. Malformed lines are
/// skipped.
///
/// # Errors
///
/// Returns an error if the mount table cannot be opened or read.
pub fn detect_stale_mounts_in(table: impl AsRef<Path>) -> WeirResult<Vec<StaleMount>> {
    let table = table.as_ref();
    let file = File::open(table).map_err(|source| WeirError::MountTable {
        path: table.to_path_buf(),
        source,
    })?;

    let mut stale = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| WeirError::MountTable {
            path: table.to_path_buf(),
            source,
        })?;
        if let Some(mount) = parse_mount_line(&line) {
            stale.push(mount);
        }
    }

    tracing::debug!(table = %table.display(), count = stale.len(), "Stale mount scan finished");
    Ok(stale)
}

/// Parse one mount table line: `device mountpoint fstype options dump pass`.
fn parse_mount_line(line: &str) -> Option<StaleMount> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    let (mount_point, fstype, options) = (fields[1], fields[2], fields[3]);

    if fstype != "overlay" {
        return None;
    }
    if !mount_point.contains(MOUNT_TAG) && !options.contains(MOUNT_TAG) {
        return None;
    }

    let mut stale = StaleMount {
        merged_dir: PathBuf::from(mount_point),
        lower_dir: PathBuf::new(),
        upper_dir: PathBuf::new(),
        work_dir: PathBuf::new(),
    };
    for opt in options.split(',') {
        if let Some(dir) = opt.strip_prefix("lowerdir=") {
            stale.lower_dir = PathBuf::from(dir);
        } else if let Some(dir) = opt.strip_prefix("upperdir=") {
            stale.upper_dir = PathBuf::from(dir);
        } else if let Some(dir) = opt.strip_prefix("workdir=") {
            stale.work_dir = PathBuf::from(dir);
        }
    }
    Some(stale)
}

/// Unmount a stale mount and remove its directories.
///
/// # Errors
///
/// Returns an error only if every attempt in the escalation ladder fails;
/// directory removal afterwards is best effort.
pub fn cleanup_stale_mount(stale: &StaleMount) -> WeirResult<()> {
    cleanup_stale_mount_with(stale, unmount_overlay)
}

fn cleanup_stale_mount_with<F>(stale: &StaleMount, mut unmount: F) -> WeirResult<()>
where
    F: FnMut(&Path, UnmountMode) -> std::io::Result<()>,
{
    let mut last_err = None;
    let mut detached = false;
    for mode in UNMOUNT_LADDER {
        match unmount(&stale.merged_dir, mode) {
            Ok(()) => {
                detached = true;
                break;
            }
            Err(err) => {
                tracing::debug!(
                    merged = %stale.merged_dir.display(),
                    ?mode,
                    error = %err,
                    "Unmount attempt failed"
                );
                last_err = Some(err);
            }
        }
    }
    if !detached {
        return Err(WeirError::UnmountFailed {
            path: stale.merged_dir.clone(),
            source: last_err
                .unwrap_or_else(|| std::io::Error::other("no unmount attempts were made")),
        });
    }

    for dir in [&stale.merged_dir, &stale.upper_dir, &stale.work_dir] {
        if dir.as_os_str().is_empty() {
            continue;
        }
        best_effort_remove(dir);
    }

    tracing::info!(merged = %stale.merged_dir.display(), "Stale mount cleaned up");
    Ok(())
}

/// Detect and clean up all orphaned Weir mounts.
///
/// Every candidate gets an attempt; returns the number cleaned up and the
/// last error encountered, if any.
#[must_use]
pub fn cleanup_stale_mounts() -> (usize, Option<WeirError>) {
    let stale = match detect_stale_mounts() {
        Ok(stale) => stale,
        Err(err) => return (0, Some(err)),
    };
    cleanup_batch(&stale, cleanup_stale_mount)
}

fn cleanup_batch<F>(stale: &[StaleMount], mut cleanup: F) -> (usize, Option<WeirError>)
where
    F: FnMut(&StaleMount) -> WeirResult<()>,
{
    let mut cleaned = 0;
    let mut last_err = None;
    for mount in stale {
        match cleanup(mount) {
            Ok(()) => cleaned += 1,
            Err(err) => {
                tracing::warn!(
                    merged = %mount.merged_dir.display(),
                    error = %err,
                    "Failed to clean up stale mount"
                );
                last_err = Some(err);
            }
        }
    }
    (cleaned, last_err)
}

/// Whether a process with the given PID is running.
///
/// Probes with signal 0; a PID of zero or below is never considered
/// running. This is the primitive a liveness-gated staleness predicate
/// would use; detection itself matches on [`MOUNT_TAG`] alone.
#[must_use]
pub fn is_pid_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let Some(pid) = rustix::process::Pid::from_raw(pid) else {
        return false;
    };
    rustix::process::test_kill_process(pid).is_ok()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_mounts(tmp: &TempDir, content: &str) -> PathBuf {
        let path = tmp.path().join("mounts");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn detects_tagged_overlay_mounts_only() {
        let tmp = TempDir::new().unwrap();
        let table = write_mounts(
            &tmp,
            "/dev/sda1 / ext4 rw,relatime 0 0\n\
             overlay /tmp/weir-merged overlay rw,relatime,lowerdir=/home/test,upperdir=/tmp/weir-upper,workdir=/tmp/weir-work 0 0\n\
             overlay /var/lib/docker/overlay2/merged overlay rw,relatime,lowerdir=/l,upperdir=/u,workdir=/w 0 0\n\
             tmpfs /tmp tmpfs rw,nosuid,nodev,mode=1777 0 0\n",
        );

        let stale = detect_stale_mounts_in(&table).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].merged_dir, PathBuf::from("/tmp/weir-merged"));
        assert_eq!(stale[0].lower_dir, PathBuf::from("/home/test"));
        assert_eq!(stale[0].upper_dir, PathBuf::from("/tmp/weir-upper"));
        assert_eq!(stale[0].work_dir, PathBuf::from("/tmp/weir-work"));
    }

    #[test]
    fn detects_tag_in_options_only() {
        let tmp = TempDir::new().unwrap();
        let table = write_mounts(
            &tmp,
            "overlay /mnt/other overlay rw,lowerdir=/srv/weir/proj,upperdir=/srv/weir/u,workdir=/srv/weir/w 0 0\n",
        );

        let stale = detect_stale_mounts_in(&table).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].merged_dir, PathBuf::from("/mnt/other"));
    }

    #[test]
    fn detects_multiple_mounts() {
        let tmp = TempDir::new().unwrap();
        let table = write_mounts(
            &tmp,
            "overlay /tmp/weir-1-merged overlay rw,lowerdir=/a,upperdir=/tmp/weir-1-upper,workdir=/tmp/weir-1-work 0 0\n\
             overlay /tmp/weir-2-merged overlay rw,lowerdir=/b,upperdir=/tmp/weir-2-upper,workdir=/tmp/weir-2-work 0 0\n",
        );

        assert_eq!(detect_stale_mounts_in(&table).unwrap().len(), 2);
    }

    #[test]
    fn skips_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let table = write_mounts(
            &tmp,
            "\noverlay /tmp/weir-m\noverlay\n\
             overlay /tmp/weir-merged overlay rw,lowerdir=/l,upperdir=/u,workdir=/w 0 0\n",
        );

        let stale = detect_stale_mounts_in(&table).unwrap();
        assert_eq!(stale.len(), 1);
    }

    #[test]
    fn missing_table_is_an_error() {
        let err = detect_stale_mounts_in("/nonexistent/mounts").unwrap_err();
        assert!(matches!(err, WeirError::MountTable { .. }));
        assert!(err.to_string().contains("Failed to read mount table"));
    }

    #[test]
    fn cleanup_escalates_through_the_ladder() {
        let tmp = TempDir::new().unwrap();
        let stale = StaleMount {
            merged_dir: tmp.path().join("merged"),
            lower_dir: tmp.path().join("lower"),
            upper_dir: tmp.path().join("upper"),
            work_dir: tmp.path().join("work"),
        };
        fs::create_dir_all(&stale.merged_dir).unwrap();
        fs::create_dir_all(&stale.upper_dir).unwrap();
        fs::create_dir_all(&stale.work_dir).unwrap();

        let mut attempts = Vec::new();
        cleanup_stale_mount_with(&stale, |_, mode| {
            attempts.push(mode);
            if attempts.len() < 3 {
                Err(std::io::Error::other("busy"))
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(
            attempts,
            vec![UnmountMode::Normal, UnmountMode::Detach, UnmountMode::Force]
        );
        assert!(!stale.merged_dir.exists());
        assert!(!stale.upper_dir.exists());
        assert!(!stale.work_dir.exists());
        // The lower dir is the real project tree; never touched.
        // (It never existed here, which is the point.)
    }

    #[test]
    fn cleanup_fails_when_every_attempt_fails() {
        let stale = StaleMount {
            merged_dir: PathBuf::from("/tmp/weir-stuck"),
            lower_dir: PathBuf::new(),
            upper_dir: PathBuf::new(),
            work_dir: PathBuf::new(),
        };

        let mut calls = 0;
        let err = cleanup_stale_mount_with(&stale, |_, _| {
            calls += 1;
            Err(std::io::Error::other("busy"))
        })
        .unwrap_err();

        assert_eq!(calls, 3);
        assert!(matches!(err, WeirError::UnmountFailed { .. }));
        assert_eq!(err.to_string(), "Failed to unmount /tmp/weir-stuck");
    }

    #[test]
    fn cleanup_skips_empty_paths() {
        let tmp = TempDir::new().unwrap();
        let stale = StaleMount {
            merged_dir: tmp.path().join("merged"),
            lower_dir: PathBuf::new(),
            upper_dir: PathBuf::new(),
            work_dir: PathBuf::new(),
        };
        fs::create_dir_all(&stale.merged_dir).unwrap();

        cleanup_stale_mount_with(&stale, |_, _| Ok(())).unwrap();
        assert!(!stale.merged_dir.exists());
    }

    #[test]
    fn batch_cleanup_attempts_every_candidate() {
        let a = StaleMount {
            merged_dir: PathBuf::from("/tmp/weir-a"),
            lower_dir: PathBuf::new(),
            upper_dir: PathBuf::new(),
            work_dir: PathBuf::new(),
        };
        let b = a.clone();
        let c = a.clone();

        let mut seen = 0;
        let (cleaned, last_err) = cleanup_batch(&[a, b, c], |_| {
            seen += 1;
            if seen == 2 {
                Err(WeirError::UnmountFailed {
                    path: PathBuf::from("/tmp/weir-b"),
                    source: std::io::Error::other("busy"),
                })
            } else {
                Ok(())
            }
        });

        assert_eq!(seen, 3);
        assert_eq!(cleaned, 2);
        assert!(last_err.is_some());
    }

    #[test]
    fn pid_liveness() {
        assert!(is_pid_running(std::process::id() as i32));
        assert!(!is_pid_running(0));
        assert!(!is_pid_running(-1));
        // PID_MAX_LIMIT is 2^22; anything far above it cannot be running.
        assert!(!is_pid_running(i32::MAX));
    }
}
