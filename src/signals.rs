//! Process signals as external triggers, and the pid file that lets
//! `x11-magnifier toggle` find the running daemon

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{error, info, warn};

use crate::constants::paths;
use crate::hotkeys::ZoomCommand;

/// Map a received signal to a command
fn command_for(signal: i32) -> Option<ZoomCommand> {
    match signal {
        SIGUSR1 => Some(ZoomCommand::Toggle),
        SIGTERM | SIGINT => Some(ZoomCommand::Quit),
        _ => None,
    }
}

/// Forward SIGUSR1 (toggle) and SIGTERM/SIGINT (quit) to the event loop
pub fn spawn_signal_listener<T>(sender: Sender<T>) -> Result<thread::JoinHandle<()>>
where
    T: From<ZoomCommand> + Send + 'static,
{
    let mut signals = Signals::new([SIGUSR1, SIGTERM, SIGINT])
        .context("Failed to register signal handlers")?;

    Ok(thread::spawn(move || {
        for signal in signals.forever() {
            let Some(command) = command_for(signal) else {
                continue;
            };
            info!(signal, command = ?command, "Received signal");
            if sender.send(command.into()).is_err() {
                break;
            }
        }
    }))
}

pub fn pid_file_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(paths::PID_FILE)
}

/// Pid file that is removed again on drop
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: PathBuf) -> Result<Self> {
        fs::write(&path, std::process::id().to_string())
            .context(format!("Failed to write pid file {}", path.display()))?;
        info!(path = %path.display(), "Wrote pid file");
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
        }
    }
}

fn read_pid(path: &Path) -> Result<i32> {
    let contents = fs::read_to_string(path)
        .context(format!("No running magnifier found (missing {})", path.display()))?;
    contents
        .trim()
        .parse::<i32>()
        .context(format!("Pid file {} is corrupt", path.display()))
}

/// Ask the running daemon to toggle magnification
pub fn send_toggle(path: &Path) -> Result<()> {
    let pid = read_pid(path)?;
    kill(Pid::from_raw(pid), Signal::SIGUSR1)
        .inspect_err(|e| error!(pid, error = %e, "Failed to signal magnifier"))
        .context(format!("Failed to send SIGUSR1 to pid {}", pid))?;
    info!(pid, "Sent toggle to running magnifier");
    Ok(())
}
