//! Default browser launch

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// How long the opener gets to report a failure before it is left running
const LAUNCH_CHECK: Duration = Duration::from_millis(1500);

/// Sends the user's browser to a URL
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

/// Opens URLs with the host's default-browser mechanism
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        let mut command = open_command(url).ok_or_else(|| "unsupported platform".to_string())?;
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| e.to_string())?;
        await_launch(child, LAUNCH_CHECK)
    }
}

/// Fail on a non-zero exit within `window`; an opener still running after that
/// is reaped on a background thread.
fn await_launch(mut child: Child, window: Duration) -> Result<(), String> {
    let deadline = Instant::now() + window;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Ok(()),
            Ok(Some(status)) => return Err(format!("browser opener exited with {}", status)),
            Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(50)),
            Ok(None) => {
                std::thread::spawn(move || {
                    if let Ok(status) = child.wait() {
                        tracing::debug!("Browser opener exited with {}", status);
                    }
                });
                return Ok(());
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

#[cfg(target_os = "windows")]
fn open_command(url: &str) -> Option<Command> {
    // `explorer <url>` opens File Explorer for some URL shapes; go through the protocol handler.
    let mut cmd = Command::new("rundll32.exe");
    cmd.arg("url.dll,FileProtocolHandler").arg(url);
    Some(cmd)
}

#[cfg(target_os = "macos")]
fn open_command(url: &str) -> Option<Command> {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    Some(cmd)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn open_command(url: &str) -> Option<Command> {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    Some(cmd)
}

#[cfg(not(any(unix, target_os = "windows")))]
fn open_command(_url: &str) -> Option<Command> {
    None
}
