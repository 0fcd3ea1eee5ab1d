//! Virtual device construction and event replay through uinput.
//!
//! A merged [`DeviceDescription`] is realized as a kernel uinput device:
//! every recognized capability bit is enabled, absolute axes get their
//! `absinfo`, identity goes in via `UI_DEV_SETUP`, and the device is
//! created. From then on, records read from the input stream are written
//! straight into the device until EOF; the kernel stamps timestamps on
//! injection. The device exists until this process exits.

use crate::describe::{DeviceDescription, RepeatSettings, TypeCapabilities};
use crate::error::{Error, Result};
use crate::event::{self, EventRecord};
use crate::names;
use std::fs::OpenOptions;
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;

// The uinput ioctl surface (linux/uinput.h), wrapped the same way the evdev
// ecosystem wraps it.
mod sys {
    use nix::{ioctl_none, ioctl_read_buf, ioctl_write_int, ioctl_write_ptr};

    ioctl_none!(ui_dev_create, b'U', 1);
    ioctl_none!(ui_dev_destroy, b'U', 2);
    ioctl_write_ptr!(ui_dev_setup, b'U', 3, libc::uinput_setup);
    ioctl_write_ptr!(ui_abs_setup, b'U', 4, libc::uinput_abs_setup);
    ioctl_write_int!(ui_set_evbit, b'U', 100);
    ioctl_write_int!(ui_set_keybit, b'U', 101);
    ioctl_write_int!(ui_set_relbit, b'U', 102);
    ioctl_write_int!(ui_set_absbit, b'U', 103);
    ioctl_write_int!(ui_set_mscbit, b'U', 104);
    ioctl_write_int!(ui_set_ledbit, b'U', 105);
    ioctl_write_int!(ui_set_sndbit, b'U', 106);
    ioctl_write_int!(ui_set_ffbit, b'U', 107);
    ioctl_write_int!(ui_set_swbit, b'U', 109);
    ioctl_write_int!(ui_set_propbit, b'U', 110);
    ioctl_read_buf!(ui_get_sysname, b'U', 44, u8);
}

/// A live uinput device. Destroyed when dropped.
pub struct VirtualDevice {
    file: std::fs::File,
}

impl VirtualDevice {
    /// Build a uinput device realizing `description`.
    ///
    /// Unknown event-type names are configuration errors; unknown property,
    /// code and axis names are logged and skipped, and an unrecognized
    /// `BUSTYPE` name falls back to zero. Auto-repeat timings are applied
    /// after creation by writing `EV_REP` events, the only path the kernel
    /// offers for them.
    pub fn create(description: &DeviceDescription) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/uinput")?;
        let fd = file.as_raw_fd();

        for property in &description.properties {
            match names::resolve_property(property) {
                Some(bit) => unsafe {
                    sys::ui_set_propbit(fd, bit as libc::c_ulong)?;
                },
                None => log::warn!("ignoring unknown property {property:?}"),
            }
        }

        let mut repeat = None;
        for (type_key, capabilities) in &description.events {
            let event_type = names::resolve_event_type(type_key)
                .ok_or_else(|| Error::Config(format!("invalid event type: {type_key}")))?;
            unsafe {
                sys::ui_set_evbit(fd, event_type as libc::c_ulong)?;
            }

            match (event_type, capabilities) {
                (event::EV_REP, TypeCapabilities::Repeat(settings)) => {
                    repeat = Some(settings.clone());
                }
                (event::EV_ABS, TypeCapabilities::Axes(axes)) => {
                    for (axis_key, axis) in axes {
                        let Some(code) = names::resolve_code(event::EV_ABS, axis_key) else {
                            log::warn!("ignoring unknown axis {axis_key:?}");
                            continue;
                        };
                        let setup = libc::uinput_abs_setup {
                            code,
                            absinfo: axis.to_absinfo(),
                        };
                        unsafe {
                            sys::ui_set_absbit(fd, code as libc::c_ulong)?;
                            sys::ui_abs_setup(fd, &setup)?;
                        }
                    }
                }
                (_, TypeCapabilities::Codes(codes)) => {
                    for code_ref in codes {
                        match code_ref.resolve(event_type) {
                            Some(code) => enable_code(fd, event_type, code)?,
                            None => log::warn!("ignoring unknown {type_key} code {code_ref:?}"),
                        }
                    }
                }
                (_, _) => {
                    return Err(Error::Config(format!(
                        "capabilities of {type_key} have the wrong shape"
                    )));
                }
            }
        }

        let setup = device_setup(description);
        unsafe {
            sys::ui_dev_setup(fd, &setup)?;
            sys::ui_dev_create(fd)?;
        }

        let mut device = VirtualDevice { file };
        log::debug!(
            "created virtual device {:?}",
            description.name.as_deref().unwrap_or("")
        );

        if let Some(settings) = repeat {
            device.apply_repeat(&settings)?;
        }
        Ok(device)
    }

    /// Write one record into the device.
    pub fn inject(&mut self, record: &EventRecord) -> Result<()> {
        use std::io::Write;
        self.file.write_all(record.as_bytes())?;
        Ok(())
    }

    fn apply_repeat(&mut self, settings: &RepeatSettings) -> Result<()> {
        for record in repeat_records(settings) {
            self.inject(&record)?;
        }
        Ok(())
    }

    /// The `/dev/input/event*` node backing this virtual device.
    pub fn devnode(&self) -> Result<PathBuf> {
        let mut buf = [0u8; 64];
        unsafe {
            sys::ui_get_sysname(self.file.as_raw_fd(), &mut buf)?;
        }
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let sysname = std::str::from_utf8(&buf[..len])
            .map_err(|_| Error::Protocol("non-utf8 uinput sysname".into()))?;

        // The sysfs node appears as soon as UI_DEV_CREATE returns.
        let sys_dir = format!("/sys/devices/virtual/input/{sysname}");
        for entry in std::fs::read_dir(&sys_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if name.starts_with("event") {
                return Ok(PathBuf::from(format!("/dev/input/{name}")));
            }
        }
        Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no event node under {sys_dir}"),
        )))
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        let _ = unsafe { sys::ui_dev_destroy(self.file.as_raw_fd()) };
    }
}

/// Read records from `source` and inject each one until EOF.
///
/// Any injection failure is fatal; a partial record on the stream is a
/// protocol error.
pub fn replay<R: Read>(device: &mut VirtualDevice, source: &mut R) -> Result<()> {
    while let Some(record) = event::read_event(source)? {
        device.inject(&record)?;
    }
    Ok(())
}

fn enable_code(fd: RawFd, event_type: u16, code: u16) -> Result<()> {
    let bit = code as libc::c_ulong;
    unsafe {
        match event_type {
            event::EV_KEY => {
                sys::ui_set_keybit(fd, bit)?;
            }
            event::EV_REL => {
                sys::ui_set_relbit(fd, bit)?;
            }
            event::EV_ABS => {
                sys::ui_set_absbit(fd, bit)?;
            }
            event::EV_MSC => {
                sys::ui_set_mscbit(fd, bit)?;
            }
            event::EV_SW => {
                sys::ui_set_swbit(fd, bit)?;
            }
            event::EV_LED => {
                sys::ui_set_ledbit(fd, bit)?;
            }
            event::EV_SND => {
                sys::ui_set_sndbit(fd, bit)?;
            }
            event::EV_FF => {
                sys::ui_set_ffbit(fd, bit)?;
            }
            // The kernel provides synchronization on every device.
            event::EV_SYN => {}
            _ => log::warn!("cannot enable codes for event type {event_type}"),
        }
    }
    Ok(())
}

fn device_setup(description: &DeviceDescription) -> libc::uinput_setup {
    let bustype = match &description.bustype {
        Some(bus) => bus.resolve().unwrap_or_else(|| {
            log::warn!("unknown bus type {bus:?}, using 0");
            0
        }),
        None => 0,
    };

    let mut setup = libc::uinput_setup {
        id: libc::input_id {
            bustype,
            vendor: description.vendor.unwrap_or(0),
            product: description.product.unwrap_or(0),
            version: description.version.unwrap_or(0),
        },
        name: [0; libc::UINPUT_MAX_NAME_SIZE],
        ff_effects_max: 0,
    };
    if let Some(name) = &description.name {
        fill_name(&mut setup.name, name);
    }
    setup
}

fn fill_name(dest: &mut [libc::c_char], name: &str) {
    // Leave room for the NUL terminator in the zeroed tail.
    let limit = dest.len() - 1;
    for (slot, byte) in dest[..limit].iter_mut().zip(name.bytes()) {
        *slot = byte as libc::c_char;
    }
}

fn repeat_records(settings: &RepeatSettings) -> Vec<EventRecord> {
    let mut records = Vec::new();
    if let Some(delay) = settings.delay {
        records.push(EventRecord::new(event::EV_REP, event::REP_DELAY, delay as i32));
    }
    if let Some(period) = settings.period {
        records.push(EventRecord::new(
            event::EV_REP,
            event::REP_PERIOD,
            period as i32,
        ));
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::BusRef;

    #[test]
    fn test_device_setup_identity() {
        let description = DeviceDescription {
            name: Some("clone".into()),
            vendor: Some(0x1234),
            product: Some(0x5678),
            version: Some(0x111),
            bustype: Some(BusRef::Name("BUS_USB".into())),
            ..Default::default()
        };
        let setup = device_setup(&description);
        assert_eq!(setup.id.bustype, 0x03);
        assert_eq!(setup.id.vendor, 0x1234);
        assert_eq!(setup.id.product, 0x5678);
        assert_eq!(setup.id.version, 0x111);
        assert_eq!(setup.name[0], b'c' as libc::c_char);
        assert_eq!(setup.name[5], 0);
    }

    #[test]
    fn test_device_setup_defaults_to_zero() {
        let setup = device_setup(&DeviceDescription::default());
        assert_eq!(setup.id.bustype, 0);
        assert_eq!(setup.id.vendor, 0);
        assert_eq!(setup.name[0], 0);
    }

    #[test]
    fn test_name_truncated_to_fit() {
        let mut dest = [0 as libc::c_char; 8];
        fill_name(&mut dest, "much-too-long-name");
        assert_eq!(dest[6], b'o' as libc::c_char);
        assert_eq!(dest[7], 0);
    }

    #[test]
    fn test_repeat_records() {
        let both = RepeatSettings {
            delay: Some(250),
            period: Some(33),
        };
        let records = repeat_records(&both);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], EventRecord::new(event::EV_REP, event::REP_DELAY, 250));
        assert_eq!(records[1], EventRecord::new(event::EV_REP, event::REP_PERIOD, 33));

        let only_delay = RepeatSettings {
            delay: Some(500),
            period: None,
        };
        assert_eq!(repeat_records(&only_delay).len(), 1);
    }
}
