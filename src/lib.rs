#![deny(unsafe_code)]
#![warn(missing_docs)]

//! An IPMI v1.5 over LAN client library.
//!
//! The crate implements:
//! - RMCP/ASF presence discovery ([`ping`])
//! - IPMI v1.5 session setup over UDP/623 (none/MD2/MD5/password auth)
//! - Concurrent request multiplexing with per-request deadlines
//! - FRU inventory reading and decoding ([`Session::read_fru`])
//! - System Event Log reading ([`Session::read_sel`])
//!
//! Open sessions through [`Ipmi`]; lifecycle and error notifications fan out
//! to observers registered with [`Ipmi::subscribe`].
//!
//! ```no_run
//! use std::time::Duration;
//! # async fn run() -> ipmilan::Result<()> {
//! let ipmi = ipmilan::Ipmi::new();
//! let host = "10.0.0.17".parse().unwrap();
//!
//! if ipmi.ping(host, Duration::from_secs(1)).await {
//!     let session = ipmi
//!         .open(host, ipmilan::SessionOptions::new().user("admin").password("admin"))
//!         .await?;
//!     let inventory = session.read_fru(0).await?;
//!     println!("{inventory:#?}");
//!     session.close().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Wire details (framing, checksums, sequence discipline) are kept internal.

mod auth;
mod client;
mod codec;
/// Typed IPMI commands and the [`commands::Command`] trait.
pub mod commands;
mod config;
mod debug;
mod error;
mod events;
/// FRU inventory types and decoding.
pub mod fru;
mod observe;
mod ping;
mod registry;
/// System Event Log types and decoding.
pub mod sel;
mod session;
mod transport;
mod types;

pub use crate::client::{Ipmi, Stats};
pub use crate::config::SessionOptions;
pub use crate::error::{CompletionCode, DecodeError, Error, Result, SetupStep};
pub use crate::events::{CloseReason, Event, EventBus, EventKind, SubscriberId, Subscription};
pub use crate::fru::{FruDecodeOptions, FruInventory};
pub use crate::ping::{ping, ping_addr};
pub use crate::sel::SelEntry;
pub use crate::session::Session;
pub use crate::types::{
    AuthCapabilities, AuthType, DeviceId, PrivilegeLevel, RawResponse, SessionHandle,
};
