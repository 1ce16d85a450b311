//! # Network Link
//!
//! The transmission client needs three things from the wireless link: is it up,
//! try to bring it back, and how strong is the signal. On Linux all three come
//! from the kernel's view of the interface:
//!
//! - **State**: `/sys/class/net/<iface>/operstate` (`up` means associated)
//! - **Signal**: `/proc/net/wireless`, the "level" column in dBm
//! - **Reconnect**: the configured supplicant front-end (`wpa_cli` or `nmcli`) is
//!   asked to reassociate, then the interface state is read again. The command
//!   is killed if it outlives the reconnect delay.
//!
//! Commands go through [`CommandRunner`] so tests can record them instead of
//! touching the host's network stack.

use crate::config::{NetworkConfig, Supplicant};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Connectivity operations used by the transmission client.
pub trait Link {
    /// Current link state
    fn is_up(&mut self) -> bool;

    /// One reconnect attempt; true if the link is up afterwards
    fn reconnect(&mut self) -> bool;

    /// Signal strength in dBm, 0 when unknown
    fn rssi(&mut self) -> i32;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn is_up(&mut self) -> bool {
        (**self).is_up()
    }

    fn reconnect(&mut self) -> bool {
        (**self).reconnect()
    }

    fn rssi(&mut self) -> i32 {
        (**self).rssi()
    }
}

/// Runs external commands on behalf of the link.
pub trait CommandRunner {
    /// Run `program` to completion. `Ok(true)` on a zero exit status; an error if
    /// it could not be started or was still running after `timeout`.
    fn run(&mut self, program: &str, args: &[String], timeout: Duration) -> io::Result<bool>;
}

/// [`CommandRunner`] that spawns real processes with their output discarded.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommand;

impl CommandRunner for SystemCommand {
    fn run(&mut self, program: &str, args: &[String], timeout: Duration) -> io::Result<bool> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status.success());
            }
            if Instant::now() >= deadline {
                // It may have exited since try_wait; wait() reaps it either way
                let _ = child.kill();
                child.wait()?;
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{program} still running after {} ms", timeout.as_millis()),
                ));
            }
            thread::sleep(EXIT_POLL);
        }
    }
}

/// The program and arguments that ask `config.supplicant` to bring the interface
/// back, or `None` when association is left to the OS.
///
/// `nmcli` is told not to wait for activation; the next attempt sees the result.
pub fn reassociate_command(config: &NetworkConfig) -> Option<(String, Vec<String>)> {
    let iface = config.interface.clone();
    match config.supplicant {
        Supplicant::WpaCli => Some((
            "wpa_cli".to_string(),
            vec!["-i".to_string(), iface, "reconnect".to_string()],
        )),
        Supplicant::Nmcli => {
            let mut args: Vec<String> = ["--wait", "0", "device", "wifi", "connect"]
                .into_iter()
                .map(String::from)
                .collect();
            args.push(config.ssid.clone());
            if !config.passphrase.is_empty() {
                args.push("password".to_string());
                args.push(config.passphrase.clone());
            }
            args.push("ifname".to_string());
            args.push(iface);
            Some(("nmcli".to_string(), args))
        }
        Supplicant::None => None,
    }
}

/// Wireless interface observed through sysfs and procfs and reassociated through
/// the supplicant.
pub struct WirelessLink {
    interface: String,
    root: PathBuf,
    reassociate: Option<(String, Vec<String>)>,
    command_timeout: Duration,
    runner: Box<dyn CommandRunner>,
}

impl WirelessLink {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            root: PathBuf::from("/"),
            reassociate: reassociate_command(config),
            command_timeout: config.reconnect_delay(),
            runner: Box::new(SystemCommand),
        }
    }

    /// Read sysfs/procfs relative to `root` instead of `/`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    fn operstate(&self) -> Option<String> {
        let path = self
            .root
            .join("sys/class/net")
            .join(&self.interface)
            .join("operstate");
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }
}

impl Link for WirelessLink {
    fn is_up(&mut self) -> bool {
        self.operstate().as_deref() == Some("up")
    }

    fn reconnect(&mut self) -> bool {
        // A previous attempt's request may have completed during the back-off
        if self.is_up() {
            return true;
        }

        if let Some((program, args)) = &self.reassociate {
            let interface = &self.interface;
            match self.runner.run(program, args, self.command_timeout) {
                Ok(true) => debug!(%interface, %program, "reassociation requested"),
                Ok(false) => warn!(%interface, %program, "supplicant refused reassociation"),
                Err(err) => warn!(%interface, %program, error = %err, "supplicant command failed"),
            }
        }

        let state = self.operstate();
        debug!(interface = %self.interface, state = ?state, "link state after reconnect");
        state.as_deref() == Some("up")
    }

    fn rssi(&mut self) -> i32 {
        fs::read_to_string(self.root.join("proc/net/wireless"))
            .ok()
            .and_then(|contents| parse_wireless_level(&contents, &self.interface))
            .unwrap_or(0)
    }
}

/// Extract the signal level for `interface` from `/proc/net/wireless` contents.
///
/// ```text
/// Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
///  face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
///  wlan0: 0000   54.  -56.  -256        0      0      0      0      0        0
/// ```
pub fn parse_wireless_level(contents: &str, interface: &str) -> Option<i32> {
    contents.lines().skip(2).find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != interface {
            return None;
        }
        // status, link quality, level, noise, ...
        let level = rest.split_whitespace().nth(2)?;
        level.trim_end_matches('.').parse::<f32>().ok().map(|v| v as i32)
    })
}

/// Link that is always up, for simulation and wired development hosts.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysUpLink;

impl Link for AlwaysUpLink {
    fn is_up(&mut self) -> bool {
        true
    }

    fn reconnect(&mut self) -> bool {
        true
    }

    fn rssi(&mut self) -> i32 {
        0
    }
}
