//! Device supervision: hotplug monitoring and per-device job lifecycles.
//!
//! The supervisor owns almost no state: a devnode → process-group map plus
//! the groups of its bare startup jobs. Everything else lives in the child
//! pipelines. Devices are matched as they appear (initial enumeration and
//! udev hotplug both feed the same path), the first matching rule launches
//! its commands in fresh process groups with `DEVNODE` as their entire
//! environment, and removal or shutdown tears those groups down with
//! SIGTERM. SIGCHLD is reaped non-blockingly so finished jobs never
//! linger as zombies; their exit status is not inspected and jobs are not
//! restarted.

use crate::device::DeviceProfile;
use crate::error::{Error, Result};
use crate::rules::{self, Rule};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvpe, fork, setpgid, ForkResult, Pid};
use signal_hook::consts::{SIGCHLD, SIGINT, SIGTERM};
use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const VIRTUAL_INPUT_SYSPATH: &str = "/sys/devices/virtual/input";
const EVENT_NODE_PREFIX: &str = "/dev/input/event";
const MONITOR_POLL_MS: i32 = 100;

/// Watches input devices and runs one job pipeline per matched devnode.
pub struct Supervisor {
    rules: Vec<Rule>,
    jobs: HashMap<PathBuf, Vec<Pid>>,
    bare: Vec<Pid>,
    shutdown: Arc<AtomicBool>,
    child_exited: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            jobs: HashMap::new(),
            bare: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            child_exited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until SIGINT/SIGTERM, then tear every tracked job down.
    pub fn run(&mut self) -> Result<()> {
        signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown))?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown))?;
        signal_hook::flag::register(SIGCHLD, Arc::clone(&self.child_exited))?;

        self.launch_bare_jobs();

        let mut monitor = udev::MonitorBuilder::new()?
            .match_subsystem("input")?
            .listen()?;
        set_nonblocking(monitor.as_raw_fd())?;

        self.initial_scan()?;

        let result = self.monitor_loop(&mut monitor);
        self.teardown();
        result
    }

    /// Enumerate devices already present and treat each as newly added.
    fn initial_scan(&mut self) -> Result<()> {
        let mut enumerator = udev::Enumerator::new()?;
        enumerator.match_subsystem("input")?;
        for device in enumerator.scan_devices()? {
            self.device_added(&device);
        }
        Ok(())
    }

    fn monitor_loop(&mut self, monitor: &mut udev::MonitorSocket) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            if self.child_exited.swap(false, Ordering::SeqCst) {
                reap_children();
            }

            // A short poll keeps the loop responsive to the signal flags.
            if wait_readable(monitor.as_raw_fd(), MONITOR_POLL_MS)? {
                for event in monitor.iter() {
                    match event.event_type() {
                        udev::EventType::Add => self.device_added(&event.device()),
                        udev::EventType::Remove => self.device_removed(&event.device()),
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn device_added(&mut self, device: &udev::Device) {
        let Some(devnode) = eligible_devnode(device) else {
            return;
        };
        // The initial scan and the hotplug monitor can both see a device;
        // the map is what makes exactly one pipeline win.
        if self.jobs.contains_key(&devnode) {
            return;
        }

        let links = device_links(device);
        let profile = match evdev::Device::open(&devnode) {
            Ok(opened) => DeviceProfile::from_device(devnode.clone(), links, &opened),
            Err(e) => {
                log::warn!("failed to open {}: {e}", devnode.display());
                return;
            }
        };

        let Some(rule) = rules::first_match(&self.rules, &profile) else {
            log::debug!("no rule matches {} ({})", devnode.display(), profile.name);
            return;
        };

        log::info!("launching job for {} ({})", devnode.display(), profile.name);
        let env = match devnode_env(&devnode) {
            Ok(env) => env,
            Err(e) => {
                log::error!("{e}");
                return;
            }
        };
        let pgids = launch_commands(rule.commands(), &env);
        if !pgids.is_empty() {
            self.jobs.insert(devnode, pgids);
        }
    }

    fn device_removed(&mut self, device: &udev::Device) {
        let Some(devnode) = device.devnode().map(Path::to_path_buf) else {
            return;
        };
        if let Some(pgids) = self.jobs.remove(&devnode) {
            log::info!("device {} removed, stopping its jobs", devnode.display());
            signal_groups(&pgids);
        }
    }

    fn launch_bare_jobs(&mut self) {
        let env: Vec<CString> = Vec::new();
        let mut launched = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.is_bare()) {
            launched.extend(launch_commands(rule.commands(), &env));
        }
        self.bare.extend(launched);
    }

    fn teardown(&mut self) {
        log::info!("shutting down, stopping {} job pipelines", self.jobs.len());
        for pgids in self.jobs.values() {
            signal_groups(pgids);
        }
        self.jobs.clear();
        signal_groups(&self.bare);
        self.bare.clear();
        reap_children();
    }
}

/// The devnode to supervise, or `None` for devices we must ignore: nodes
/// under the virtual input tree (our own uinput devices live there) and
/// anything that is not an event node.
fn eligible_devnode(device: &udev::Device) -> Option<PathBuf> {
    if is_virtual_syspath(device.syspath()) {
        return None;
    }
    let devnode = device.devnode()?;
    is_event_devnode(devnode).then(|| devnode.to_path_buf())
}

fn is_virtual_syspath(syspath: &Path) -> bool {
    syspath.starts_with(VIRTUAL_INPUT_SYSPATH)
}

fn is_event_devnode(devnode: &Path) -> bool {
    devnode
        .to_str()
        .is_some_and(|path| path.starts_with(EVENT_NODE_PREFIX))
}

/// Symlink names udev assigned to the devnode.
fn device_links(device: &udev::Device) -> Vec<String> {
    device
        .property_value("DEVLINKS")
        .map(|links| {
            links
                .to_string_lossy()
                .split_whitespace()
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// The entire environment a job sees: `DEVNODE=<path>`.
fn devnode_env(devnode: &Path) -> Result<Vec<CString>> {
    CString::new(format!("DEVNODE={}", devnode.display()))
        .map(|var| vec![var])
        .map_err(|_| Error::Spawn(format!("devnode contains NUL: {devnode:?}")))
}

/// Launch every command of a rule, staggering successive ones by 50 ms so a
/// multi-command job starts in a predictable order. Failures are logged;
/// whatever did launch keeps running.
fn launch_commands(commands: &[Vec<String>], env: &[CString]) -> Vec<Pid> {
    let mut pgids = Vec::new();
    for (index, argv) in commands.iter().enumerate() {
        match spawn_job(argv, env, index as u64 * 50) {
            Ok(pgid) => pgids.push(pgid),
            Err(e) => log::error!("{e}"),
        }
    }
    pgids
}

/// Fork one job into its own process group and exec it.
///
/// Argument and environment strings are converted before forking; the child
/// only calls async-signal-safe things plus the exec itself.
fn spawn_job(argv: &[String], env: &[CString], stagger_ms: u64) -> Result<Pid> {
    let argv_c = argv
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::Spawn(format!("command contains NUL: {argv:?}")))?;
    let program = argv_c
        .first()
        .cloned()
        .ok_or_else(|| Error::Spawn("empty command".into()))?;

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(child),
        Ok(ForkResult::Child) => {
            let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
            if stagger_ms > 0 {
                thread::sleep(Duration::from_millis(stagger_ms));
            }
            let _ = execvpe(&program, &argv_c, env);
            // Only reached when exec failed.
            eprintln!("exec failed for {argv:?}");
            unsafe { libc::_exit(127) }
        }
        Err(e) => Err(Error::Spawn(format!("fork failed for {argv:?}: {e}"))),
    }
}

fn signal_groups(pgids: &[Pid]) {
    for &pgid in pgids {
        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("failed to signal group {pgid}: {e}"),
        }
    }
}

/// Drain exited children without blocking.
fn reap_children() {
    loop {
        match waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn wait_readable(fd: RawFd, timeout_ms: i32) -> Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        // Signals wake the loop; the flags get checked on the way around.
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(Error::Io(err));
    }
    Ok(rc > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_syspaths_are_rejected() {
        assert!(is_virtual_syspath(Path::new(
            "/sys/devices/virtual/input/input23"
        )));
        assert!(!is_virtual_syspath(Path::new(
            "/sys/devices/pci0000:00/0000:00:14.0/usb1/1-3/input/input9"
        )));
    }

    #[test]
    fn test_only_event_nodes_are_supervised() {
        assert!(is_event_devnode(Path::new("/dev/input/event42")));
        assert!(!is_event_devnode(Path::new("/dev/input/mouse0")));
        assert!(!is_event_devnode(Path::new("/dev/input/js0")));
        assert!(!is_event_devnode(Path::new("/dev/tty0")));
    }

    #[test]
    fn test_devnode_env_is_the_whole_environment() {
        let env = devnode_env(Path::new("/dev/input/event42")).unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].to_str().unwrap(), "DEVNODE=/dev/input/event42");
    }
}
