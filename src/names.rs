//! Symbolic names for kernel input constants.
//!
//! Device descriptions and match rules speak in the kernel's canonical
//! names (`EV_KEY`, `KEY_A`, `BUS_USB`, `INPUT_PROP_POINTER`); the wire and
//! the ioctls speak in numbers. This module is the bridge. Numeric strings
//! are accepted anywhere a name would fit, and codes with no canonical name
//! render back as numbers.

use crate::event;
use evdev::{
    AbsoluteAxisType, FFEffectType, Key, LedType, MiscType, RelativeAxisType, SoundType, SwitchType,
};

const EVENT_TYPES: &[(u16, &str)] = &[
    (event::EV_SYN, "EV_SYN"),
    (event::EV_KEY, "EV_KEY"),
    (event::EV_REL, "EV_REL"),
    (event::EV_ABS, "EV_ABS"),
    (event::EV_MSC, "EV_MSC"),
    (event::EV_SW, "EV_SW"),
    (event::EV_LED, "EV_LED"),
    (event::EV_SND, "EV_SND"),
    (event::EV_REP, "EV_REP"),
    (event::EV_FF, "EV_FF"),
    (event::EV_PWR, "EV_PWR"),
    (event::EV_FF_STATUS, "EV_FF_STATUS"),
];

const PROPERTIES: &[(u16, &str)] = &[
    (0x00, "INPUT_PROP_POINTER"),
    (0x01, "INPUT_PROP_DIRECT"),
    (0x02, "INPUT_PROP_BUTTONPAD"),
    (0x03, "INPUT_PROP_SEMI_MT"),
    (0x04, "INPUT_PROP_TOPBUTTONPAD"),
    (0x05, "INPUT_PROP_POINTING_STICK"),
    (0x06, "INPUT_PROP_ACCELEROMETER"),
];

const BUS_TYPES: &[(u16, &str)] = &[
    (0x01, "BUS_PCI"),
    (0x02, "BUS_ISAPNP"),
    (0x03, "BUS_USB"),
    (0x04, "BUS_HIL"),
    (0x05, "BUS_BLUETOOTH"),
    (0x06, "BUS_VIRTUAL"),
    (0x10, "BUS_ISA"),
    (0x11, "BUS_I8042"),
    (0x12, "BUS_XTKBD"),
    (0x13, "BUS_RS232"),
    (0x14, "BUS_GAMEPORT"),
    (0x15, "BUS_PARPORT"),
    (0x16, "BUS_AMIGA"),
    (0x17, "BUS_ADB"),
    (0x18, "BUS_I2C"),
    (0x19, "BUS_HOST"),
    (0x1a, "BUS_GSC"),
    (0x1b, "BUS_ATARI"),
    (0x1c, "BUS_SPI"),
    (0x1d, "BUS_RMI"),
    (0x1e, "BUS_CEC"),
    (0x1f, "BUS_INTEL_ISHTP"),
];

const SYN_CODES: &[(u16, &str)] = &[
    (event::SYN_REPORT, "SYN_REPORT"),
    (event::SYN_CONFIG, "SYN_CONFIG"),
    (event::SYN_MT_REPORT, "SYN_MT_REPORT"),
    (event::SYN_DROPPED, "SYN_DROPPED"),
];

const REP_CODES: &[(u16, &str)] = &[
    (event::REP_DELAY, "REP_DELAY"),
    (event::REP_PERIOD, "REP_PERIOD"),
];

fn forward(table: &[(u16, &'static str)], value: u16) -> Option<&'static str> {
    table
        .iter()
        .find(|(number, _)| *number == value)
        .map(|(_, name)| *name)
}

fn backward(table: &[(u16, &str)], name: &str) -> Option<u16> {
    table
        .iter()
        .find(|(_, candidate)| *candidate == name)
        .map(|(number, _)| *number)
}

/// True when a token is purely decimal digits.
pub fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

pub fn bus_name(bus: u16) -> Option<&'static str> {
    forward(BUS_TYPES, bus)
}

pub fn bus_from_name(name: &str) -> Option<u16> {
    backward(BUS_TYPES, name)
}

pub fn event_type_name(event_type: u16) -> Option<&'static str> {
    forward(EVENT_TYPES, event_type)
}

pub fn event_type_from_name(name: &str) -> Option<u16> {
    backward(EVENT_TYPES, name)
}

pub fn property_name(property: u16) -> Option<&'static str> {
    forward(PROPERTIES, property)
}

pub fn property_from_name(name: &str) -> Option<u16> {
    backward(PROPERTIES, name)
}

/// Canonical name of an event code within its type, if it has one.
///
/// Names come from the evdev crate's constants, which mirror the kernel
/// headers; anything the crate cannot name stays numeric.
pub fn code_name(event_type: u16, code: u16) -> Option<String> {
    match event_type {
        event::EV_SYN => forward(SYN_CODES, code).map(str::to_owned),
        event::EV_REP => forward(REP_CODES, code).map(str::to_owned),
        event::EV_KEY => named(format!("{:?}", Key::new(code)), &["KEY_", "BTN_"]),
        event::EV_REL => named(format!("{:?}", RelativeAxisType(code)), &["REL_"]),
        event::EV_ABS => named(format!("{:?}", AbsoluteAxisType(code)), &["ABS_"]),
        event::EV_MSC => named(format!("{:?}", MiscType(code)), &["MSC_"]),
        event::EV_SW => named(format!("{:?}", SwitchType(code)), &["SW_"]),
        event::EV_LED => named(format!("{:?}", LedType(code)), &["LED_"]),
        event::EV_SND => named(format!("{:?}", SoundType(code)), &["SND_"]),
        event::EV_FF => named(format!("{:?}", FFEffectType(code)), &["FF_"]),
        _ => None,
    }
}

fn named(rendered: String, prefixes: &[&str]) -> Option<String> {
    prefixes
        .iter()
        .any(|prefix| rendered.starts_with(prefix))
        .then_some(rendered)
}

/// Find the code a canonical name refers to within an event type.
pub fn code_from_name(event_type: u16, name: &str) -> Option<u16> {
    let last = code_space(event_type)?;
    (0..=last).find(|&code| code_name(event_type, code).as_deref() == Some(name))
}

// Per-type code-space upper bounds (the *_MAX values from the kernel headers).
fn code_space(event_type: u16) -> Option<u16> {
    match event_type {
        event::EV_SYN => Some(0x0f),
        event::EV_KEY => Some(0x2ff),
        event::EV_REL => Some(0x0f),
        event::EV_ABS => Some(0x3f),
        event::EV_MSC => Some(0x07),
        event::EV_SW => Some(0x10),
        event::EV_LED => Some(0x0f),
        event::EV_SND => Some(0x07),
        event::EV_REP => Some(0x01),
        event::EV_FF => Some(0x7f),
        _ => None,
    }
}

/// Resolve a type token that may be a canonical name or a number.
pub fn resolve_event_type(token: &str) -> Option<u16> {
    if is_numeric(token) {
        token.parse().ok()
    } else {
        event_type_from_name(token)
    }
}

/// Resolve a property token that may be a canonical name or a number.
pub fn resolve_property(token: &str) -> Option<u16> {
    if is_numeric(token) {
        token.parse().ok()
    } else {
        property_from_name(token)
    }
}

/// Resolve a code token within an event type; numbers pass straight through.
pub fn resolve_code(event_type: u16, token: &str) -> Option<u16> {
    if is_numeric(token) {
        token.parse().ok()
    } else {
        code_from_name(event_type, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_names_round_trip() {
        assert_eq!(bus_name(0x03), Some("BUS_USB"));
        assert_eq!(bus_from_name("BUS_USB"), Some(0x03));
        assert_eq!(bus_from_name("BUS_INTEL_ISHTP"), Some(0x1f));
        assert_eq!(bus_name(0x42), None);
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(event_type_name(event::EV_KEY), Some("EV_KEY"));
        assert_eq!(event_type_from_name("EV_ABS"), Some(event::EV_ABS));
        assert_eq!(event_type_from_name("EV_NOPE"), None);
    }

    #[test]
    fn test_key_code_names() {
        assert_eq!(code_name(event::EV_KEY, 30).as_deref(), Some("KEY_A"));
        assert_eq!(code_from_name(event::EV_KEY, "KEY_A"), Some(30));
        assert_eq!(code_name(event::EV_KEY, 0x110).as_deref(), Some("BTN_LEFT"));
        assert_eq!(code_from_name(event::EV_KEY, "BTN_LEFT"), Some(0x110));
    }

    #[test]
    fn test_axis_and_sync_names() {
        assert_eq!(code_name(event::EV_REL, 0).as_deref(), Some("REL_X"));
        assert_eq!(code_from_name(event::EV_ABS, "ABS_Y"), Some(1));
        assert_eq!(code_name(event::EV_SYN, 3).as_deref(), Some("SYN_DROPPED"));
        assert_eq!(code_from_name(event::EV_REP, "REP_PERIOD"), Some(1));
    }

    #[test]
    fn test_resolution_accepts_numbers() {
        assert_eq!(resolve_event_type("17"), Some(0x11));
        assert_eq!(resolve_code(event::EV_KEY, "30"), Some(30));
        assert_eq!(resolve_code(event::EV_KEY, "KEY_A"), Some(30));
        assert_eq!(resolve_property("INPUT_PROP_DIRECT"), Some(1));
        assert_eq!(resolve_property("6"), Some(6));
        assert_eq!(resolve_code(event::EV_KEY, "KEY_DOES_NOT_EXIST"), None);
    }

    #[test]
    fn test_unnamed_codes_stay_numeric() {
        // Codes beyond the last BTN_TRIGGER_HAPPY have no canonical names.
        assert_eq!(code_name(event::EV_KEY, 0x2f0), None);
        assert_eq!(code_name(event::EV_PWR, 0), None);
    }
}
