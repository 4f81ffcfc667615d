//! Sync services
//!
//! A `SyncService` turns configuration into a ready `SyncServer`. It owns the
//! lifecycle around a session: checking that the location is usable before
//! it is saved, mounting before a session, and unmounting afterwards.
//!
//! - `LocalFolderService`: a directory that is always available
//! - `MountedFolderService`: a directory that must be mounted first, through
//!   a `Mounter` (for example `CommandMounter`, which runs shell commands)

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use super::directory::DirectorySyncServer;
use super::error::{SyncError, SyncResult};
use super::manager::CancelFlag;
use super::server::SyncServer;
use crate::config::Config;

/// Configured sync backend
pub trait SyncService: Send {
    /// Stable identifier, as stored in logs
    fn id(&self) -> &'static str;

    /// Display name
    fn name(&self) -> &'static str;

    /// Whether the service has everything it needs to run a session
    fn is_configured(&self) -> bool;

    /// Verify the location can be written to
    fn probe(&mut self) -> SyncResult<()>;

    /// Prepare the location and return a server for one session
    ///
    /// Any failure to reach the location is reported as `MountFailure`.
    fn create_sync_server(&mut self, cancel: &CancelFlag) -> SyncResult<Box<dyn SyncServer>>;

    /// Release whatever `create_sync_server` acquired
    fn post_sync_cleanup(&mut self) -> SyncResult<()>;
}

/// A sync directory on an always-available filesystem
#[derive(Debug, Clone)]
pub struct LocalFolderService {
    path: PathBuf,
}

impl LocalFolderService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SyncService for LocalFolderService {
    fn id(&self) -> &'static str {
        "local"
    }

    fn name(&self) -> &'static str {
        "Local Folder"
    }

    fn is_configured(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    fn probe(&mut self) -> SyncResult<()> {
        DirectorySyncServer::probe_writable(&self.path)
    }

    fn create_sync_server(&mut self, _cancel: &CancelFlag) -> SyncResult<Box<dyn SyncServer>> {
        fs::create_dir_all(&self.path).map_err(|e| SyncError::MountFailure {
            target: self.path.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(Box::new(DirectorySyncServer::new(&self.path)))
    }

    fn post_sync_cleanup(&mut self) -> SyncResult<()> {
        Ok(())
    }
}

/// Mounts and unmounts a remote filesystem
pub trait Mounter: Send {
    fn is_mounted(&self, path: &Path) -> bool;

    /// Block until `path` is mounted, mounting failed, or `cancel` is raised
    fn mount(&mut self, path: &Path, cancel: &CancelFlag) -> SyncResult<()>;

    fn unmount(&mut self, path: &Path) -> SyncResult<()>;
}

/// A sync directory that lives on a filesystem mounted on demand
pub struct MountedFolderService {
    path: PathBuf,
    mounter: Box<dyn Mounter>,
    mounted_here: bool,
}

impl MountedFolderService {
    pub fn new(path: impl Into<PathBuf>, mounter: Box<dyn Mounter>) -> Self {
        Self {
            path: path.into(),
            mounter,
            mounted_here: false,
        }
    }

    fn ensure_mounted(&mut self, cancel: &CancelFlag) -> SyncResult<()> {
        if self.mounter.is_mounted(&self.path) {
            debug!("{:?} already mounted", self.path);
            return Ok(());
        }

        info!("Mounting {:?}", self.path);
        self.mounter.mount(&self.path, cancel)?;
        self.mounted_here = true;

        if !self.path.is_dir() {
            return Err(SyncError::MountFailure {
                target: self.path.display().to_string(),
                details: "mount point is not a directory after mounting".to_string(),
            });
        }
        Ok(())
    }
}

impl SyncService for MountedFolderService {
    fn id(&self) -> &'static str {
        "mounted"
    }

    fn name(&self) -> &'static str {
        "Mounted Folder"
    }

    fn is_configured(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    fn probe(&mut self) -> SyncResult<()> {
        let result = self
            .ensure_mounted(&CancelFlag::new())
            .and_then(|()| DirectorySyncServer::probe_writable(&self.path));
        if let Err(e) = self.post_sync_cleanup() {
            warn!("Failed to unmount {:?} after probe: {}", self.path, e);
        }
        result
    }

    fn create_sync_server(&mut self, cancel: &CancelFlag) -> SyncResult<Box<dyn SyncServer>> {
        self.ensure_mounted(cancel)?;
        Ok(Box::new(DirectorySyncServer::new(&self.path)))
    }

    fn post_sync_cleanup(&mut self) -> SyncResult<()> {
        if !self.mounted_here {
            return Ok(());
        }
        self.mounted_here = false;
        info!("Unmounting {:?}", self.path);
        self.mounter.unmount(&self.path)
    }
}

/// Mounter that runs configured shell commands
///
/// `{path}` in a command is replaced with the mount point, which is also
/// passed as `QUIRE_MOUNT_PATH`.
#[derive(Debug, Clone)]
pub struct CommandMounter {
    mount_command: String,
    unmount_command: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
}

impl CommandMounter {
    pub fn new(mount_command: impl Into<String>, unmount_command: Option<String>, timeout: Duration) -> Self {
        Self {
            mount_command: mount_command.into(),
            unmount_command,
            timeout,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Run a command to completion, killing it on timeout or cancellation
    fn run(&self, command: &str, path: &Path, cancel: &CancelFlag) -> SyncResult<()> {
        let failure = |details: String| SyncError::MountFailure {
            target: path.display().to_string(),
            details,
        };

        debug!("Running '{}'", command);
        let mut child = shell(command, path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failure(format!("failed to start '{}': {}", command, e)))?;

        // Drain stderr while waiting; a full pipe blocks the helper
        let mut stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut output = String::new();
                let _ = pipe.read_to_string(&mut output);
                output
            })
        });

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    let stderr = stderr
                        .take()
                        .and_then(|reader| reader.join().ok())
                        .unwrap_or_default();
                    return Err(failure(format!(
                        "'{}' exited with {}: {}",
                        command,
                        status,
                        tail(stderr.trim(), STDERR_LIMIT)
                    )));
                }
                Ok(None) => {}
                Err(e) => return Err(failure(e.to_string())),
            }

            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SyncError::Cancelled);
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(failure(format!(
                    "'{}' timed out after {}s",
                    command,
                    self.timeout.as_secs_f32()
                )));
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl Mounter for CommandMounter {
    fn is_mounted(&self, path: &Path) -> bool {
        mount_table_contains(path)
    }

    fn mount(&mut self, path: &Path, cancel: &CancelFlag) -> SyncResult<()> {
        let command = self.mount_command.clone();
        self.run(&command, path, cancel)
    }

    fn unmount(&mut self, path: &Path) -> SyncResult<()> {
        match self.unmount_command.clone() {
            Some(command) => self.run(&command, path, &CancelFlag::new()),
            None => Ok(()),
        }
    }
}

/// Most of a helper's stderr kept in a mount error
const STDERR_LIMIT: usize = 2048;

/// Last `max` characters of `s`
fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((start, _)) => &s[start..],
        None => s,
    }
}

#[cfg(unix)]
fn shell(command: &str, path: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command.replace("{path}", &path.display().to_string()))
        .env("QUIRE_MOUNT_PATH", path);
    cmd
}

#[cfg(windows)]
fn shell(command: &str, path: &Path) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C")
        .arg(command.replace("{path}", &path.display().to_string()))
        .env("QUIRE_MOUNT_PATH", path);
    cmd
}

/// Check the kernel mount table for `path`
///
/// Returns `false` where no mount table is available.
fn mount_table_contains(path: &Path) -> bool {
    let Ok(table) = fs::read_to_string("/proc/mounts") else {
        return false;
    };
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| Path::new(&mount_point.replace("\\040", " ")) == target)
}

/// Build the sync service described by the configuration
pub fn service_from_config(config: &Config) -> Result<Box<dyn SyncService>> {
    let Some(ref path) = config.sync_path else {
        bail!("No sync location configured. Run 'quire sync setup <path>' first.");
    };

    let service: Box<dyn SyncService> = match config.mount_command {
        Some(ref mount_command) => Box::new(MountedFolderService::new(
            path,
            Box::new(CommandMounter::new(
                mount_command.clone(),
                config.unmount_command.clone(),
                config.mount_timeout(),
            )),
        )),
        None => Box::new(LocalFolderService::new(path)),
    };
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Calls {
        mounts: usize,
        unmounts: usize,
    }

    struct FakeMounter {
        calls: Arc<Mutex<Calls>>,
        already_mounted: bool,
        fail: bool,
    }

    impl Mounter for FakeMounter {
        fn is_mounted(&self, _path: &Path) -> bool {
            self.already_mounted
        }

        fn mount(&mut self, path: &Path, _cancel: &CancelFlag) -> SyncResult<()> {
            self.calls.lock().unwrap().mounts += 1;
            if self.fail {
                return Err(SyncError::MountFailure {
                    target: path.display().to_string(),
                    details: "host unreachable".to_string(),
                });
            }
            fs::create_dir_all(path).unwrap();
            Ok(())
        }

        fn unmount(&mut self, _path: &Path) -> SyncResult<()> {
            self.calls.lock().unwrap().unmounts += 1;
            Ok(())
        }
    }

    fn mounted_service(
        path: &Path,
        already_mounted: bool,
        fail: bool,
    ) -> (MountedFolderService, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mounter = FakeMounter {
            calls: calls.clone(),
            already_mounted,
            fail,
        };
        (MountedFolderService::new(path, Box::new(mounter)), calls)
    }

    #[test]
    fn test_local_folder_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync");
        let mut service = LocalFolderService::new(&path);

        assert!(service.is_configured());
        let server = service.create_sync_server(&CancelFlag::new()).unwrap();
        assert!(path.is_dir());
        assert_eq!(server.location(), path.display().to_string());
        service.post_sync_cleanup().unwrap();
    }

    #[test]
    fn test_local_folder_probe() {
        let temp_dir = TempDir::new().unwrap();
        let mut service = LocalFolderService::new(temp_dir.path().join("probe"));
        service.probe().unwrap();
    }

    #[test]
    fn test_mounted_folder_mounts_and_unmounts() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mnt");
        let (mut service, calls) = mounted_service(&path, false, false);

        service.create_sync_server(&CancelFlag::new()).unwrap();
        service.post_sync_cleanup().unwrap();
        service.post_sync_cleanup().unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.mounts, 1);
        assert_eq!(calls.unmounts, 1);
    }

    #[test]
    fn test_mounted_folder_leaves_existing_mount_alone() {
        let temp_dir = TempDir::new().unwrap();
        let (mut service, calls) = mounted_service(temp_dir.path(), true, false);

        service.create_sync_server(&CancelFlag::new()).unwrap();
        service.post_sync_cleanup().unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.mounts, 0);
        assert_eq!(calls.unmounts, 0);
    }

    #[test]
    fn test_mount_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let (mut service, _calls) = mounted_service(&temp_dir.path().join("mnt"), false, true);

        let err = service.create_sync_server(&CancelFlag::new()).err().unwrap();
        assert!(matches!(err, SyncError::MountFailure { .. }));
    }

    #[test]
    fn test_service_from_config() {
        let mut config = Config::default();
        assert!(service_from_config(&config).is_err());

        config.sync_path = Some(PathBuf::from("/srv/notes"));
        assert_eq!(service_from_config(&config).unwrap().id(), "local");

        config.mount_command = Some("mount {path}".to_string());
        assert_eq!(service_from_config(&config).unwrap().id(), "mounted");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_mounter_success_and_failure() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancelFlag::new();

        let mut ok = CommandMounter::new("mkdir -p {path}", None, Duration::from_secs(5));
        ok.mount(&temp_dir.path().join("m"), &cancel).unwrap();
        assert!(temp_dir.path().join("m").is_dir());

        let mut failing = CommandMounter::new("echo nope >&2; exit 3", None, Duration::from_secs(5));
        match failing.mount(temp_dir.path(), &cancel) {
            Err(SyncError::MountFailure { details, .. }) => assert!(details.contains("nope")),
            other => panic!("expected mount failure, got {:?}", other.err()),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_command_mounter_reports_large_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let mut mounter = CommandMounter::new(
            "yes 'permission denied' | head -c 360000 >&2; exit 2",
            None,
            Duration::from_secs(5),
        );

        match mounter.mount(temp_dir.path(), &CancelFlag::new()) {
            Err(SyncError::MountFailure { details, .. }) => {
                assert!(details.contains("exited with"));
                assert!(details.ends_with("permission denied"));
                assert!(details.len() < 4096);
            }
            other => panic!("expected mount failure, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ääää", 2), "ää");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_mounter_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let mut mounter = CommandMounter::new("sleep 5", None, Duration::from_millis(200));

        let err = mounter.mount(temp_dir.path(), &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, SyncError::MountFailure { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_mounter_cancel() {
        let temp_dir = TempDir::new().unwrap();
        let mut mounter = CommandMounter::new("sleep 5", None, Duration::from_secs(10));
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = mounter.mount(temp_dir.path(), &cancel).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
