//! Declarative device descriptions.
//!
//! A description is a YAML tree capturing everything needed to clone a
//! device through uinput: identity fields, property bits and the full
//! capability map. [`describe`] extracts one from a live device;
//! [`merge`] folds several together with later descriptions overriding
//! earlier ones, which is what lets a captured hardware description be
//! tweaked by a small file on top.

use crate::device;
use crate::error::{Error, Result};
use crate::event;
use crate::names;
use evdev::Device;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// A bus type, symbolic (`BUS_USB`) where known, numeric otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusRef {
    Number(u16),
    Name(String),
}

impl BusRef {
    pub fn resolve(&self) -> Option<u16> {
        match self {
            BusRef::Number(bus) => Some(*bus),
            BusRef::Name(name) => names::bus_from_name(name),
        }
    }
}

/// An event code, by canonical name or by number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeRef {
    Number(u16),
    Name(String),
}

impl CodeRef {
    /// Resolve against a type's code space; numeric strings count as numbers.
    pub fn resolve(&self, event_type: u16) -> Option<u16> {
        match self {
            CodeRef::Number(code) => Some(*code),
            CodeRef::Name(name) => names::resolve_code(event_type, name),
        }
    }
}

/// Auto-repeat timing, milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepeatSettings {
    #[serde(rename = "REP_DELAY", default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    #[serde(rename = "REP_PERIOD", default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,
}

/// One absolute axis. Optional fields are omitted when zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisDescription {
    #[serde(rename = "VALUE", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i32>,
    #[serde(rename = "MIN", default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(rename = "MAX", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
    #[serde(rename = "FLAT", default, skip_serializing_if = "Option::is_none")]
    pub flat: Option<i32>,
    #[serde(rename = "FUZZ", default, skip_serializing_if = "Option::is_none")]
    pub fuzz: Option<i32>,
    #[serde(rename = "RES", default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<i32>,
}

impl AxisDescription {
    /// Kernel absinfo for this axis. A missing `VALUE` falls back to `MAX`,
    /// then `MIN`, so a freshly cloned axis rests at a sane position.
    pub fn to_absinfo(&self) -> libc::input_absinfo {
        libc::input_absinfo {
            value: self.value.or(self.max).or(self.min).unwrap_or(0),
            minimum: self.min.unwrap_or(0),
            maximum: self.max.unwrap_or(0),
            fuzz: self.fuzz.unwrap_or(0),
            flat: self.flat.unwrap_or(0),
            resolution: self.resolution.unwrap_or(0),
        }
    }
}

/// Capabilities of one event type, shaped per type: axes carry per-axis
/// info, auto-repeat carries its two timings, everything else is a flat
/// code list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeCapabilities {
    Axes(BTreeMap<String, AxisDescription>),
    Repeat(RepeatSettings),
    Codes(Vec<CodeRef>),
}

/// A full device description. Every field is optional on instantiate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    #[serde(rename = "NAME", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "LOCATION", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "PRODUCT", default, skip_serializing_if = "Option::is_none")]
    pub product: Option<u16>,
    #[serde(rename = "VENDOR", default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<u16>,
    #[serde(rename = "BUSTYPE", default, skip_serializing_if = "Option::is_none")]
    pub bustype: Option<BusRef>,
    #[serde(rename = "VERSION", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u16>,
    #[serde(rename = "DRIVER_VERSION", default, skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<i32>,
    #[serde(rename = "PROPERTIES", default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
    #[serde(rename = "EVENTS", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub events: BTreeMap<String, TypeCapabilities>,
}

impl DeviceDescription {
    /// Parse one YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Config(format!("bad device description: {e}")))
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(format!("unserializable description: {e}")))
    }

    /// Overlay `later` onto `self`: scalars replace, properties and code
    /// lists union, axes and repeat settings merge element-wise.
    fn apply(&mut self, later: DeviceDescription) {
        if later.name.is_some() {
            self.name = later.name;
        }
        if later.location.is_some() {
            self.location = later.location;
        }
        if later.id.is_some() {
            self.id = later.id;
        }
        if later.product.is_some() {
            self.product = later.product;
        }
        if later.vendor.is_some() {
            self.vendor = later.vendor;
        }
        if later.bustype.is_some() {
            self.bustype = later.bustype;
        }
        if later.version.is_some() {
            self.version = later.version;
        }
        if later.driver_version.is_some() {
            self.driver_version = later.driver_version;
        }

        for property in later.properties {
            if !self.properties.contains(&property) {
                self.properties.push(property);
            }
        }

        for (type_key, capabilities) in later.events {
            match self.events.entry(type_key) {
                Entry::Vacant(slot) => {
                    slot.insert(capabilities);
                }
                Entry::Occupied(mut slot) => merge_capabilities(slot.get_mut(), capabilities),
            }
        }
    }
}

fn merge_capabilities(existing: &mut TypeCapabilities, later: TypeCapabilities) {
    match later {
        TypeCapabilities::Codes(new) => {
            if let TypeCapabilities::Codes(old) = existing {
                for code in new {
                    if !old.contains(&code) {
                        old.push(code);
                    }
                }
            } else {
                *existing = TypeCapabilities::Codes(new);
            }
        }
        TypeCapabilities::Axes(new) => {
            if let TypeCapabilities::Axes(old) = existing {
                old.extend(new);
            } else {
                *existing = TypeCapabilities::Axes(new);
            }
        }
        TypeCapabilities::Repeat(new) => {
            if let TypeCapabilities::Repeat(old) = existing {
                if new.delay.is_some() {
                    old.delay = new.delay;
                }
                if new.period.is_some() {
                    old.period = new.period;
                }
            } else {
                *existing = TypeCapabilities::Repeat(new);
            }
        }
    }
}

/// Fold descriptions together, later ones winning.
pub fn merge(descriptions: impl IntoIterator<Item = DeviceDescription>) -> DeviceDescription {
    let mut merged = DeviceDescription::default();
    for description in descriptions {
        merged.apply(description);
    }
    merged
}

/// Extract the description of an opened device.
///
/// Zero identity fields are omitted, matching the truthiness checks the
/// kernel tools apply; only capabilities the device actually reports are
/// emitted.
pub fn describe(device: &Device) -> Result<DeviceDescription> {
    let mut description = DeviceDescription {
        name: device.name().map(str::to_owned),
        location: device.physical_path().map(str::to_owned),
        id: device.unique_name().map(str::to_owned),
        ..Default::default()
    };

    let input_id = device.input_id();
    if input_id.product() != 0 {
        description.product = Some(input_id.product());
    }
    if input_id.vendor() != 0 {
        description.vendor = Some(input_id.vendor());
    }
    let bustype = input_id.bus_type().0;
    if bustype != 0 {
        description.bustype = Some(match names::bus_name(bustype) {
            Some(name) => BusRef::Name(name.to_owned()),
            None => BusRef::Number(bustype),
        });
    }
    let driver_version = device::driver_version(device);
    if driver_version != 0 {
        description.driver_version = Some(driver_version);
    }

    for property in device.properties().iter() {
        let name = match names::property_name(property.0) {
            Some(name) => name.to_owned(),
            None => property.0.to_string(),
        };
        description.properties.push(name);
    }

    for event_type in device.supported_events().iter() {
        let type_key = match names::event_type_name(event_type.0) {
            Some(name) => name.to_owned(),
            None => event_type.0.to_string(),
        };

        let capabilities = match event_type.0 {
            event::EV_REP => {
                let (delay, period) = device::auto_repeat(device)?;
                TypeCapabilities::Repeat(RepeatSettings {
                    delay: Some(delay),
                    period: Some(period),
                })
            }
            event::EV_ABS => {
                let mut axes = BTreeMap::new();
                for (code, info) in device::absolute_axes(device)? {
                    let axis_key = names::code_name(event::EV_ABS, code)
                        .unwrap_or_else(|| code.to_string());
                    axes.insert(
                        axis_key,
                        AxisDescription {
                            value: Some(info.value),
                            min: Some(info.minimum),
                            max: Some(info.maximum),
                            flat: (info.flat > 0).then_some(info.flat),
                            fuzz: (info.fuzz > 0).then_some(info.fuzz),
                            resolution: (info.resolution > 0).then_some(info.resolution),
                        },
                    );
                }
                TypeCapabilities::Axes(axes)
            }
            _ => {
                let codes = device::supported_codes(device, event_type.0).unwrap_or_default();
                TypeCapabilities::Codes(
                    codes
                        .into_iter()
                        .map(|code| match names::code_name(event_type.0, code) {
                            Some(name) => CodeRef::Name(name),
                            None => CodeRef::Number(code),
                        })
                        .collect(),
                )
            }
        };

        description.events.insert(type_key, capabilities);
    }

    Ok(description)
}
