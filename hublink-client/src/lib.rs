//! # hublink-client
//!
//! Client library for programmable hubs speaking a line-delimited JSON RPC
//! dialect over a serial link.
//!
//! This crate provides:
//! - Connection management with a caller-driven background read loop
//! - FIFO request admission under an in-flight cap, with replies matched by
//!   identifier rather than order
//! - Notification fan-out to listeners with explicit unsubscribe handles
//! - A typed command API (display, motors, sound, program management)
//! - USB discovery of connected hubs
//!
//! ```no_run
//! # async fn demo() -> Result<(), hublink_client::ClientError> {
//! use hublink_client::Hub;
//!
//! let hub = Hub::discover()?;
//! let conn = hub.connection();
//! tokio::spawn(async move { conn.read_loop().await });
//!
//! hub.display().set_pixel(2, 2, 9).await?;
//! hub.close().await?;
//! # Ok(())
//! # }
//! ```

pub use hublink_protocol as protocol;

pub mod connection;
pub mod discovery;
pub mod error;
pub mod hub;
pub mod stream;

mod correlation;

pub use connection::{Connection, ConnectionConfig, Subscription};
pub use correlation::MAX_INFLIGHT_REQUESTS;
pub use error::ClientError;
pub use hub::Hub;
pub use stream::HubStream;
