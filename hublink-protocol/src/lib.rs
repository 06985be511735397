//! # hublink-protocol
//!
//! Wire protocol implementation for hublink.
//!
//! The hub speaks a line-delimited JSON RPC dialect: one UTF-8 JSON object
//! per line, terminated by a carriage return, with single-letter field keys.
//! This crate provides:
//! - Line framing with partial-read buffering and noise filtering
//! - Presence-based message classification into typed variants
//! - Typed notification decoding with an unknown fallback
//! - The external sensor device registry

pub mod codec;
pub mod error;
pub mod message;
pub mod notification;
pub mod sensor;

pub use codec::{Encoder, LineDecoder};
pub use error::ProtocolError;
pub use message::{generate_id, MethodKey, Request, RpcMessage, RpcNotification};
pub use notification::{decode_notification, Notification};
pub use sensor::{Port, PortReading, SensorReading, SensorType};

/// Line delimiter for the wire format.
pub const DELIMITER: u8 = b'\r';

/// Baud rate the hub speaks over its serial link.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
