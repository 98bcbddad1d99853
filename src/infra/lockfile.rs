use crate::domain::FleetError;
use anyhow::{Context, Result, bail};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Lockfile / PID-file manager which also allows probing the lock without
/// acquiring it. Linux only, as liveness checking relies on `/proc`.
///
/// The lock file holds a PID; a sibling `.cmdline` file holds that PID's
/// full command line, captured at acquisition time, to disambiguate PID
/// reuse. After locking, keep the value alive — dropping it releases the
/// OS lock.
#[derive(Debug)]
pub struct LockFile {
    lockfile: File,
    path: PathBuf,
    cmdline_path: PathBuf,
    old_pid: Option<u32>,
    old_cmdline: String,
}

impl LockFile {
    /// Open (and create if needed) the lock records. Does not lock yet.
    pub fn open(path: &Path) -> Result<Self> {
        let cmdline_path = path.with_extension("cmdline");
        let mut lockfile = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("cannot open lockfile {path:?}"))?;

        let mut contents = String::new();
        lockfile.read_to_string(&mut contents)?;
        let old_pid = match contents.trim() {
            "" => None,
            raw => match raw.parse::<u32>() {
                Ok(pid) => Some(pid),
                Err(_) => {
                    warn!("cannot parse lockfile contents - expected PID");
                    None
                }
            },
        };

        // the cmdline record only exists once a PID was ever written
        let old_cmdline = if old_pid.is_some() {
            fs::read_to_string(&cmdline_path)
                .with_context(|| format!("cannot open cmdline lockfile {cmdline_path:?}"))?
        } else {
            String::new()
        };

        Ok(Self {
            lockfile,
            path: path.to_path_buf(),
            cmdline_path,
            old_pid,
            old_cmdline,
        })
    }

    /// Whether the instance that last called [`LockFile::lock`] is still
    /// alive. A reused PID with a different command line counts as dead.
    pub fn another_instance_is_running(&self) -> bool {
        let Some(pid) = self.old_pid else {
            return false;
        };
        match fs::read_to_string(format!("/proc/{pid}/cmdline")) {
            Ok(cmdline) => cmdline == self.old_cmdline,
            Err(_) => false,
        }
    }

    /// Human-readable information about the locking instance. Only
    /// meaningful while [`LockFile::another_instance_is_running`] is true.
    pub fn holder_info(&self) -> String {
        format!(
            "PID {}: {}",
            self.old_pid.unwrap_or(0),
            self.old_cmdline.replace('\0', " ").trim_end()
        )
    }

    /// Acquire the lock, or fail with `AlreadyRunning`.
    ///
    /// The flock is taken non-blocking even after the liveness probe said
    /// the lock is free: this closes the race between probing and
    /// acquiring when two instances start simultaneously.
    pub fn lock(&mut self) -> Result<()> {
        if self.another_instance_is_running() {
            return Err(FleetError::AlreadyRunning(self.holder_info()).into());
        }
        let rc = unsafe { libc::flock(self.lockfile.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            bail!(
                "cannot lock {:?}, although it seems that no instance is already running",
                self.path
            );
        }

        self.lockfile.set_len(0)?;
        self.lockfile.seek(SeekFrom::Start(0))?;
        write!(self.lockfile, "{}", std::process::id())?;
        self.lockfile.sync_all()?;

        let cmdline = fs::read_to_string("/proc/self/cmdline")
            .context("reading own command line from /proc")?;
        let mut cmdline_file = File::create(&self.cmdline_path)
            .with_context(|| format!("writing cmdline record {:?}", self.cmdline_path))?;
        cmdline_file.write_all(cmdline.as_bytes())?;
        cmdline_file.sync_all()?;
        Ok(())
    }
}
