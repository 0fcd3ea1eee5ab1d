//! # evpipe
//!
//! A Linux input-event interception toolkit.
//!
//! evpipe sits between physical input devices and the kernel's user-facing
//! input subsystem. A pipeline captures raw events from a real device,
//! routes them through zero or more transforming programs, and replays the
//! resulting stream into a synthesized virtual device. A supervisor watches
//! device hotplug and launches one pipeline per matched device from a
//! declarative YAML configuration.
//!
//! ## Components
//!
//! - [`capture`] — exclusive device acquisition and raw event streaming
//!   (`evgrab`)
//! - [`mux`] — named persistent event queues with fan-out and
//!   activity-driven switching (`evmux`)
//! - [`describe`] / [`replay`] — device descriptions and uinput replay
//!   (`evplay`)
//! - [`supervisor`] — hotplug matching and job lifecycles (`evmon`)
//!
//! ## A pipeline
//!
//! ```sh
//! evgrab -g /dev/input/event3 | my-transform | evplay -d /dev/input/event3
//! ```
//!
//! Every stream between components carries fixed-size kernel event records
//! ([`event::EventRecord`]); partial records are errors, and order within a
//! stream is preserved end to end.

pub mod capture;
pub mod describe;
pub mod device;
pub mod error;
pub mod event;
pub mod mux;
pub mod names;
pub mod replay;
pub mod rules;
pub mod supervisor;

// Re-exports
pub use capture::capture;
pub use describe::{describe, merge, DeviceDescription};
pub use device::DeviceProfile;
pub use error::{Error, Result};
pub use event::{read_event, write_event, EventRecord, EVENT_SIZE};
pub use mux::{run_create, run_input, run_output, run_switch, MuxQueue, DEFAULT_CAPACITY};
pub use replay::{replay, VirtualDevice};
pub use rules::{parse_config, Rule};
pub use supervisor::Supervisor;
