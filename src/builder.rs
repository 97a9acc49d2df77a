//! `SystemBuilder`: collects configuration and opens pre-opens eagerly
//! (§4.9), mirroring the builder pattern `wasmtime_wasi::WasiCtxBuilder`
//! uses to assemble a `WasiCtx` before a guest ever runs.

use crate::clock::{EntropySource, OsEntropySource, ProcessControl};
use crate::poll::{Clocks, Waker};
use crate::system::BaseSystem;
use crate::table::{Descriptor, DescriptorTable, Entry};
use crate::types::{Filetype, HandleRights, Rights, RightsExt};
use anyhow::{Context, Result};
use rustix::fd::OwnedFd;
use rustix::fs::{Mode, OFlags};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

struct PreopenDir {
    guest_path: String,
    host_path: PathBuf,
    read_only: bool,
}

/// Collects the configuration a [`BaseSystem`] is built from. Every
/// fallible step (opening a pre-open, wiring stdio) happens in
/// [`SystemBuilder::build`], not here — field setters are infallible.
pub struct SystemBuilder {
    args: Vec<String>,
    env: Vec<(String, String)>,
    preopens: Vec<PreopenDir>,
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
    entropy: Box<dyn EntropySource>,
    realtime_clock: Box<dyn Fn() -> std::time::Duration + Send + Sync>,
    monotonic_clock: Box<dyn Fn() -> std::time::Duration + Send + Sync>,
    process_control: Option<Box<dyn ProcessControl>>,
}

impl Default for SystemBuilder {
    fn default() -> Self {
        SystemBuilder {
            args: Vec::new(),
            env: Vec::new(),
            preopens: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            entropy: Box::new(OsEntropySource),
            realtime_clock: Box::new(|| {
                SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
            }),
            monotonic_clock: Box::new(|| {
                static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
                START.get_or_init(std::time::Instant::now).elapsed()
            }),
            process_control: None,
        }
    }
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn args<I: IntoIterator<Item = String>>(mut self, args: I) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn env<I: IntoIterator<Item = (String, String)>>(mut self, env: I) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn inherit_env(mut self) -> Self {
        self.env = std::env::vars().collect();
        self
    }

    /// Register a pre-opened directory. `guest_path` is what the guest
    /// will see via `fd_prestat_dir_name`; `host_path` is resolved and
    /// opened (read-only or read-write) when [`Self::build`] runs.
    pub fn preopened_dir(
        mut self,
        host_path: impl AsRef<Path>,
        guest_path: impl Into<String>,
        read_only: bool,
    ) -> Self {
        self.preopens.push(PreopenDir {
            guest_path: guest_path.into(),
            host_path: host_path.as_ref().to_path_buf(),
            read_only,
        });
        self
    }

    pub fn stdin(mut self, fd: OwnedFd) -> Self {
        self.stdin = Some(fd);
        self
    }

    pub fn stdout(mut self, fd: OwnedFd) -> Self {
        self.stdout = Some(fd);
        self
    }

    pub fn stderr(mut self, fd: OwnedFd) -> Self {
        self.stderr = Some(fd);
        self
    }

    pub fn entropy_source(mut self, source: Box<dyn EntropySource>) -> Self {
        self.entropy = source;
        self
    }

    pub fn clocks(
        mut self,
        realtime: Box<dyn Fn() -> std::time::Duration + Send + Sync>,
        monotonic: Box<dyn Fn() -> std::time::Duration + Send + Sync>,
    ) -> Self {
        self.realtime_clock = realtime;
        self.monotonic_clock = monotonic;
        self
    }

    pub fn process_control(mut self, control: Box<dyn ProcessControl>) -> Self {
        self.process_control = Some(control);
        self
    }

    /// Open every pre-open eagerly (fail-fast) and assemble the table:
    /// stdio at fds 0/1/2, pre-opens starting at fd 3, matching the
    /// conventional WASI descriptor layout.
    pub fn build(self) -> Result<BaseSystem> {
        let mut table = DescriptorTable::new();

        let stdin = self.stdin.unwrap_or_else(|| duplicate_std(0));
        let stdout = self.stdout.unwrap_or_else(|| duplicate_std(1));
        let stderr = self.stderr.unwrap_or_else(|| duplicate_std(2));

        table.insert(Entry::new(
            Descriptor::Stdio(stdin),
            Filetype::CharacterDevice,
            HandleRights::new(Rights::tty_base() | Rights::FD_READ, Rights::empty()),
        ));
        table.insert(Entry::new(
            Descriptor::Stdio(stdout),
            Filetype::CharacterDevice,
            HandleRights::new(Rights::tty_base() | Rights::FD_WRITE, Rights::empty()),
        ));
        table.insert(Entry::new(
            Descriptor::Stdio(stderr),
            Filetype::CharacterDevice,
            HandleRights::new(Rights::tty_base() | Rights::FD_WRITE, Rights::empty()),
        ));

        for preopen in &self.preopens {
            let dir_fd = rustix::fs::open(
                &preopen.host_path,
                OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
                Mode::empty(),
            )
            .with_context(|| format!("opening preopen directory {}", preopen.host_path.display()))?;

            let mut base = Rights::directory_base();
            let mut inheriting = Rights::directory_inheriting() | Rights::regular_file_base();
            if preopen.read_only {
                base &= !(Rights::PATH_CREATE_DIRECTORY
                    | Rights::PATH_CREATE_FILE
                    | Rights::PATH_UNLINK_FILE
                    | Rights::PATH_REMOVE_DIRECTORY
                    | Rights::PATH_RENAME_SOURCE
                    | Rights::PATH_FILESTAT_SET_SIZE
                    | Rights::PATH_FILESTAT_SET_TIMES
                    | Rights::FD_FILESTAT_SET_SIZE
                    | Rights::FD_FILESTAT_SET_TIMES);
                inheriting &= !(Rights::FD_WRITE
                    | Rights::PATH_CREATE_DIRECTORY
                    | Rights::PATH_CREATE_FILE
                    | Rights::PATH_UNLINK_FILE
                    | Rights::PATH_REMOVE_DIRECTORY
                    | Rights::PATH_RENAME_SOURCE
                    | Rights::PATH_RENAME_TARGET
                    | Rights::PATH_FILESTAT_SET_SIZE
                    | Rights::PATH_FILESTAT_SET_TIMES
                    | Rights::FD_FILESTAT_SET_SIZE
                    | Rights::FD_FILESTAT_SET_TIMES
                    | Rights::FD_ALLOCATE);
            }

            let mut entry =
                Entry::new(Descriptor::Dir(dir_fd), Filetype::Directory, HandleRights::new(base, inheriting));
            entry.preopen_path = Some(preopen.guest_path.clone());
            table.insert(entry);
        }

        Ok(BaseSystem {
            table: Mutex::new(table),
            waker: Waker::new().context("creating the poll wake pipe")?,
            clocks: Clocks { realtime: self.realtime_clock, monotonic: self.monotonic_clock },
            args: self.args,
            env: self.env,
            entropy: self.entropy,
            process_control: self.process_control,
        })
    }
}

fn duplicate_std(fd: i32) -> OwnedFd {
    use rustix::fd::{BorrowedFd, FromRawFd, IntoRawFd};
    // SAFETY: 0/1/2 are valid for the lifetime of the process; `dup`
    // detaches a new owned fd so the original stays open.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    rustix::io::dup(borrowed).unwrap_or_else(|_| {
        // Should be unreachable (stdio is always open), but never panic a
        // host setup path over it: fall back to a closed-but-valid fd by
        // duplicating /dev/null.
        let null = rustix::fs::open("/dev/null", OFlags::RDWR, Mode::empty())
            .expect("opening /dev/null as a stdio fallback");
        unsafe { OwnedFd::from_raw_fd(null.into_raw_fd()) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_opens_preopen_and_assigns_fd_3() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();
        let system = SystemBuilder::new()
            .args(vec!["prog".to_string()])
            .preopened_dir(dir.path(), "/sandbox", false)
            .build()
            .unwrap();
        let table = system.table.lock().unwrap();
        let entry = table.get(3).expect("preopen lands at fd 3");
        assert_eq!(entry.preopen_path.as_deref(), Some("/sandbox"));
    }

    #[test]
    fn read_only_preopen_strips_write_rights() {
        let dir = tempfile::tempdir().unwrap();
        let system = SystemBuilder::new().preopened_dir(dir.path(), "/ro", true).build().unwrap();
        let table = system.table.lock().unwrap();
        let entry = table.get(3).unwrap();
        assert!(!entry.rights.base.contains(Rights::PATH_CREATE_FILE));
        assert!(!entry.rights.inheriting.contains(Rights::FD_WRITE));
    }

    #[test]
    fn missing_preopen_directory_fails_build_with_context() {
        let system = SystemBuilder::new().preopened_dir("/no/such/path", "/x", true).build();
        assert!(system.is_err());
        let message = format!("{:#}", system.unwrap_err());
        assert!(message.contains("/no/such/path"), "{message}");
    }
}
