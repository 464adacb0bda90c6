//! Interface between the bridge and a remote call-session runtime.
//!
//! The runtime owns the actual call (signalling, media transport, virtual
//! audio devices). The bridge only sees it through the traits in this crate,
//! so any runtime that can deliver the events in [`EventHandler`] and expose
//! byte-oriented virtual devices can be plugged in.

mod client;
mod device;
mod error;
mod inputs;
mod participant;

pub use client::*;
pub use device::*;
pub use error::*;
pub use inputs::*;
pub use participant::*;
