//! Device metadata and capability introspection.
//!
//! Wraps the evdev crate's queries into the shapes the rest of the toolkit
//! needs: a full capability walk for the describe operation, and
//! [`DeviceProfile`], a pure snapshot that rule matching runs against so
//! that matching stays independent of live device handles.

use crate::error::Result;
use crate::event;
use evdev::Device;
use nix::ioctl_read;
use std::collections::{HashMap, HashSet};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

// EVIOCGREP: the two auto-repeat parameters, delay then period.
ioctl_read!(eviocgrep, b'E', 0x03, [libc::c_uint; 2]);

/// Read a device's auto-repeat (delay, period) in milliseconds.
pub fn auto_repeat(device: &Device) -> Result<(u32, u32)> {
    let mut rep = [0 as libc::c_uint; 2];
    unsafe { eviocgrep(device.as_raw_fd(), &mut rep) }?;
    Ok((rep[0] as u32, rep[1] as u32))
}

/// The kernel's packed driver version, as EVIOCGVERSION reports it.
pub fn driver_version(device: &Device) -> i32 {
    let (major, minor, rev) = device.driver_version();
    pack_driver_version(major, minor, rev)
}

fn pack_driver_version(major: u8, minor: u8, rev: u8) -> i32 {
    ((major as i32) << 16) | ((minor as i32) << 8) | rev as i32
}

/// The codes a device supports for one event type.
///
/// `EV_SYN` and `EV_REP` have fixed code sets once the type is present;
/// types the kernel exposes no code mask for (`EV_PWR` and friends) return
/// `None`.
pub fn supported_codes(device: &Device, event_type: u16) -> Option<Vec<u16>> {
    match event_type {
        event::EV_SYN => Some(vec![
            event::SYN_REPORT,
            event::SYN_CONFIG,
            event::SYN_MT_REPORT,
            event::SYN_DROPPED,
        ]),
        event::EV_REP => Some(vec![event::REP_DELAY, event::REP_PERIOD]),
        event::EV_KEY => device
            .supported_keys()
            .map(|set| set.iter().map(|key| key.code()).collect()),
        event::EV_REL => device
            .supported_relative_axes()
            .map(|set| set.iter().map(|axis| axis.0).collect()),
        event::EV_ABS => device
            .supported_absolute_axes()
            .map(|set| set.iter().map(|axis| axis.0).collect()),
        event::EV_MSC => device
            .misc_properties()
            .map(|set| set.iter().map(|misc| misc.0).collect()),
        event::EV_SW => device
            .supported_switches()
            .map(|set| set.iter().map(|switch| switch.0).collect()),
        event::EV_LED => device
            .supported_leds()
            .map(|set| set.iter().map(|led| led.0).collect()),
        event::EV_SND => device
            .supported_sounds()
            .map(|set| set.iter().map(|sound| sound.0).collect()),
        event::EV_FF => device
            .supported_ff()
            .map(|set| set.iter().map(|effect| effect.0).collect()),
        _ => None,
    }
}

/// Absolute axes with their current kernel state, in code order.
pub fn absolute_axes(device: &Device) -> Result<Vec<(u16, libc::input_absinfo)>> {
    let Some(axes) = device.supported_absolute_axes() else {
        return Ok(Vec::new());
    };
    let state = device.get_abs_state()?;
    Ok(axes
        .iter()
        .map(|axis| (axis.0, state[axis.0 as usize]))
        .collect())
}

/// A pure snapshot of everything a match rule can ask about a device.
///
/// String fields mirror the kernel's nullable strings as empty strings, so
/// an unspecified regex (`.*`) treats absent and empty alike.
#[derive(Debug, Clone, Default)]
pub struct DeviceProfile {
    pub devnode: PathBuf,
    pub links: Vec<String>,
    pub name: String,
    pub location: String,
    pub id: String,
    pub product: u16,
    pub vendor: u16,
    pub bustype: u16,
    pub driver_version: i32,
    pub properties: HashSet<u16>,
    pub events: HashMap<u16, HashSet<u16>>,
}

impl DeviceProfile {
    /// Snapshot an opened device. `links` are the devnode's symlink names
    /// (udev's `DEVLINKS`); evdev itself does not know them.
    pub fn from_device(devnode: PathBuf, links: Vec<String>, device: &Device) -> Self {
        let input_id = device.input_id();
        let mut events = HashMap::new();
        for event_type in device.supported_events().iter() {
            let codes = supported_codes(device, event_type.0).unwrap_or_default();
            events.insert(event_type.0, codes.into_iter().collect());
        }

        Self {
            devnode,
            links,
            name: device.name().unwrap_or_default().to_owned(),
            location: device.physical_path().unwrap_or_default().to_owned(),
            id: device.unique_name().unwrap_or_default().to_owned(),
            product: input_id.product(),
            vendor: input_id.vendor(),
            bustype: input_id.bus_type().0,
            driver_version: driver_version(device),
            properties: device.properties().iter().map(|prop| prop.0).collect(),
            events,
        }
    }

    pub fn has_property(&self, property: u16) -> bool {
        self.properties.contains(&property)
    }

    pub fn has_event_type(&self, event_type: u16) -> bool {
        self.events.contains_key(&event_type)
    }

    pub fn has_event_code(&self, event_type: u16, code: u16) -> bool {
        self.events
            .get(&event_type)
            .is_some_and(|codes| codes.contains(&code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_version_packing() {
        assert_eq!(pack_driver_version(1, 0, 1), 0x010001);
        assert_eq!(pack_driver_version(0, 0, 0), 0);
        assert_eq!(pack_driver_version(2, 6, 39), (2 << 16) | (6 << 8) | 39);
    }

    #[test]
    fn test_profile_capability_queries() {
        let mut profile = DeviceProfile::default();
        profile.properties.insert(0);
        profile
            .events
            .insert(event::EV_KEY, [30u16, 31, 32].into_iter().collect());
        profile.events.insert(event::EV_SYN, HashSet::new());

        assert!(profile.has_property(0));
        assert!(!profile.has_property(1));
        assert!(profile.has_event_type(event::EV_KEY));
        assert!(profile.has_event_type(event::EV_SYN));
        assert!(!profile.has_event_type(event::EV_REL));
        assert!(profile.has_event_code(event::EV_KEY, 30));
        assert!(!profile.has_event_code(event::EV_KEY, 99));
        assert!(!profile.has_event_code(event::EV_SYN, 0));
    }
}
