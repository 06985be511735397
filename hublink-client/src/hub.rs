//! High-level hub API.
//!
//! [`Hub`] wraps a [`Connection`] with typed commands for the device's
//! method surface: display, motors, sound, and program management. Arguments
//! are validated before anything reaches the scheduler, with the ranges the
//! firmware enforces on its side.

use crate::connection::{Connection, ConnectionConfig, Subscription};
use crate::discovery;
use crate::error::ClientError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hublink_protocol::message::Request;
use hublink_protocol::notification::Notification;
use hublink_protocol::sensor::Port;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Program mode the hub can be switched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    Play,
    Download,
}

impl HubMode {
    fn as_str(&self) -> &'static str {
        match self {
            HubMode::Play => "play",
            HubMode::Download => "download",
        }
    }
}

/// Rotation strategy for absolute motor positioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Clockwise,
    Anticlockwise,
    Shortest,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Clockwise => "clockwise",
            Direction::Anticlockwise => "anticlockwise",
            Direction::Shortest => "shortest",
        }
    }
}

/// Metadata envelope for program and resource uploads.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectMeta {
    pub name: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub project_type: String,
    pub created: i64,
    pub modified: i64,
}

/// A connected hub.
pub struct Hub {
    conn: Arc<Connection>,
}

impl Hub {
    /// Opens the hub described by `config`.
    pub fn open(config: ConnectionConfig) -> Result<Self, ClientError> {
        Ok(Self {
            conn: Arc::new(Connection::open(config)?),
        })
    }

    /// Discovers the single connected hub and opens it at the default baud
    /// rate. Fails when none or several are plugged in.
    pub fn discover() -> Result<Self, ClientError> {
        let path = discovery::find_hub_port()?;
        Self::open(ConnectionConfig::new(path))
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// The underlying connection, for running the background read loop.
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.conn)
    }

    /// Registers a notification listener. See [`Connection::subscribe`].
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.conn.subscribe(listener)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    async fn invoke(&self, method: &str, parameters: Value) -> Result<Value, ClientError> {
        self.conn.invoke(Request::new(method, parameters)).await
    }

    // =========================================================================
    // Hub management
    // =========================================================================

    /// Queries general device information.
    pub async fn hub_info(&self) -> Result<Value, ClientError> {
        self.invoke("get_hub_info", json!({})).await
    }

    /// Queries firmware identity.
    pub async fn firmware_info(&self) -> Result<Value, ClientError> {
        self.invoke("get_firmware_info", json!({})).await
    }

    /// Asks the hub to push its current state. The hub answers with
    /// notifications rather than a reply, so this does not wait for one.
    pub async fn trigger_current_state(&self) -> Result<(), ClientError> {
        self.conn
            .send(&Request::new("trigger_current_state", json!({})))
            .await
    }

    /// Reads the hub's name from the info notification it pushes after a
    /// state trigger.
    pub async fn hub_name(&self) -> Result<String, ClientError> {
        let (tx, rx) = oneshot::channel();
        let tx = parking_lot::Mutex::new(Some(tx));
        let subscription = self.conn.subscribe(move |notification| {
            if let Notification::Info(info) = notification {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(info.name.clone());
                }
            }
        });

        let deadline = self.conn.config().request_timeout;
        let result = async {
            self.trigger_current_state().await?;
            tokio::time::timeout(deadline, rx)
                .await
                .map_err(|_| ClientError::Timeout)?
                .map_err(|_| ClientError::ConnectionClosed)
        }
        .await;
        subscription.unsubscribe();
        result
    }

    /// Renames the hub. The name travels base64-encoded.
    pub async fn set_name(&self, name: &str) -> Result<(), ClientError> {
        let encoded = BASE64.encode(name.as_bytes());
        self.invoke("set_hub_name", json!({ "name": encoded }))
            .await?;
        Ok(())
    }

    /// Runs the program stored in `slot`.
    pub async fn execute_program(&self, slot: u8) -> Result<(), ClientError> {
        self.invoke("program_execute", json!({ "slotid": slot }))
            .await?;
        Ok(())
    }

    /// Stops whatever program is running.
    pub async fn terminate_program(&self) -> Result<(), ClientError> {
        self.invoke("program_terminate", json!({})).await?;
        Ok(())
    }

    /// Moves a stored project between slots.
    pub async fn move_project(&self, old_slot: u8, new_slot: u8) -> Result<(), ClientError> {
        self.invoke(
            "move_project",
            json!({ "old_slotid": old_slot, "new_slotid": new_slot }),
        )
        .await?;
        Ok(())
    }

    /// Switches the hub between play and download mode.
    pub async fn switch_mode(&self, mode: HubMode) -> Result<(), ClientError> {
        self.invoke("program_modechange", json!({ "mode": mode.as_str() }))
            .await?;
        Ok(())
    }

    /// Begins a program upload into `slot`; the reply carries the transfer
    /// handle for [`write_package`](Self::write_package).
    pub async fn start_write_program(
        &self,
        slot: u8,
        size: u64,
        meta: &ProjectMeta,
    ) -> Result<Value, ClientError> {
        self.invoke(
            "start_write_program",
            json!({ "slotid": slot, "size": size, "meta": meta }),
        )
        .await
    }

    /// Begins a resource upload into `slot`.
    pub async fn start_write_resource(
        &self,
        slot: u8,
        size: u64,
        meta: &ProjectMeta,
    ) -> Result<Value, ClientError> {
        self.invoke(
            "start_write_resource",
            json!({ "slotid": slot, "size": size, "meta": meta }),
        )
        .await
    }

    /// Sends one chunk of an upload started with `start_write_program`.
    pub async fn write_package(&self, data: &str, transfer_id: &str) -> Result<(), ClientError> {
        self.invoke(
            "write_package",
            json!({ "transferid": transfer_id, "data": data }),
        )
        .await?;
        Ok(())
    }

    /// Mirrors or unmirrors the display for handedness.
    pub async fn sync_display(&self, sync: &str) -> Result<(), ClientError> {
        self.invoke("sync_display", json!({ "sync": sync })).await?;
        Ok(())
    }

    /// Zeroes the yaw axis.
    pub async fn reset_yaw(&self) -> Result<(), ClientError> {
        self.invoke("scratch.reset_yaw", json!({})).await?;
        Ok(())
    }

    /// Resets the program timer.
    pub async fn reset_program_time(&self) -> Result<(), ClientError> {
        self.invoke("reset_program_time", json!({})).await?;
        Ok(())
    }

    /// Starts the program timer.
    pub async fn start_program_time(&self) -> Result<(), ClientError> {
        self.invoke("start_program_time", json!({})).await?;
        Ok(())
    }

    // =========================================================================
    // Command surfaces
    // =========================================================================

    /// The 5x5 display and center button light.
    pub fn display(&self) -> Display<'_> {
        Display { hub: self }
    }

    /// The motor attached to `port`.
    pub fn motor(&self, port: Port) -> Motor<'_> {
        Motor { hub: self, port }
    }

    /// The beeper.
    pub fn sound(&self) -> Sound<'_> {
        Sound { hub: self }
    }
}

fn check_range(name: &str, value: i64, low: i64, high: i64) -> Result<(), ClientError> {
    if (low..=high).contains(&value) {
        Ok(())
    } else {
        Err(ClientError::InvalidArgument(format!(
            "{name}={value} must be between {low} and {high}"
        )))
    }
}

fn check_speed(speed: i64) -> Result<(), ClientError> {
    check_range("speed", speed, -100, 100)
}

/// Display command surface.
pub struct Display<'a> {
    hub: &'a Hub,
}

impl Display<'_> {
    /// Blanks the display.
    pub async fn clear(&self) -> Result<(), ClientError> {
        self.hub.invoke("scratch.display_clear", json!({})).await?;
        Ok(())
    }

    /// Lights one pixel. Coordinates run 0..=4 from the top left.
    pub async fn set_pixel(&self, x: u8, y: u8, brightness: u8) -> Result<(), ClientError> {
        check_range("x", x as i64, 0, 4)?;
        check_range("y", y as i64, 0, 4)?;
        self.hub
            .invoke(
                "scratch.display_set_pixel",
                json!({ "x": x, "y": y, "brightness": brightness }),
            )
            .await?;
        Ok(())
    }

    /// Shows a whole image: five rows of five brightness digits.
    pub async fn show_image(&self, image: &str) -> Result<(), ClientError> {
        check_image(image)?;
        self.hub
            .invoke("scratch.display_image", json!({ "image": image }))
            .await?;
        Ok(())
    }

    /// Shows an image for `duration` milliseconds, then reverts.
    pub async fn show_image_for(&self, image: &str, duration: u32) -> Result<(), ClientError> {
        check_image(image)?;
        self.hub
            .invoke(
                "scratch.display_image_for",
                json!({ "image": image, "duration": duration }),
            )
            .await?;
        Ok(())
    }

    /// Scrolls text across the display.
    pub async fn show_text(&self, text: &str) -> Result<(), ClientError> {
        self.hub
            .invoke("scratch.display_text", json!({ "text": text }))
            .await?;
        Ok(())
    }

    /// Sets the center button light color (0 turns it off).
    pub async fn set_center_button(&self, color: u8) -> Result<(), ClientError> {
        check_range("color", color as i64, 0, 10)?;
        self.hub
            .invoke("scratch.center_button_lights", json!({ "color": color }))
            .await?;
        Ok(())
    }
}

/// Five rows of five brightness digits, separated by single whitespace.
fn check_image(image: &str) -> Result<(), ClientError> {
    let rows: Vec<&str> = image.split(['\n', ' ', ':']).collect();
    let well_formed = rows.len() == 5
        && rows
            .iter()
            .all(|row| row.len() == 5 && row.bytes().all(|b| b.is_ascii_digit()));
    if well_formed {
        Ok(())
    } else {
        Err(ClientError::InvalidArgument(format!(
            "invalid image: {image:?}"
        )))
    }
}

/// Motor command surface for one port.
pub struct Motor<'a> {
    hub: &'a Hub,
    port: Port,
}

impl Motor<'_> {
    pub fn port(&self) -> Port {
        self.port
    }

    /// Runs at `speed` percent for `time` milliseconds.
    pub async fn run_timed(
        &self,
        time: u32,
        speed: i32,
        stall: bool,
        stop: u8,
    ) -> Result<(), ClientError> {
        check_speed(speed as i64)?;
        self.hub
            .invoke(
                "scratch.motor_run_timed",
                json!({
                    "port": self.port.as_str(),
                    "time": time,
                    "speed": speed,
                    "stall": stall,
                    "stop": stop,
                }),
            )
            .await?;
        Ok(())
    }

    /// Runs at `speed` percent for `degrees` of rotation.
    pub async fn run_for_degrees(
        &self,
        speed: i32,
        degrees: i32,
        stall: bool,
        stop: u8,
    ) -> Result<(), ClientError> {
        check_speed(speed as i64)?;
        self.hub
            .invoke(
                "scratch.motor_run_for_degrees",
                json!({
                    "port": self.port.as_str(),
                    "speed": speed,
                    "degrees": degrees,
                    "stall": stall,
                    "stop": stop,
                }),
            )
            .await?;
        Ok(())
    }

    /// Moves to `position` relative to the current zero point.
    pub async fn go_to_relative_position(
        &self,
        position: i32,
        speed: i32,
        stall: bool,
        stop: u8,
    ) -> Result<(), ClientError> {
        check_speed(speed as i64)?;
        self.hub
            .invoke(
                "scratch.motor_go_to_relative_position",
                json!({
                    "port": self.port.as_str(),
                    "position": position,
                    "speed": speed,
                    "stall": stall,
                    "stop": stop,
                }),
            )
            .await?;
        Ok(())
    }

    /// Moves to the absolute `position`, approaching per `direction`.
    pub async fn go_to_position(
        &self,
        position: i32,
        speed: i32,
        direction: Direction,
        stall: bool,
        stop: u8,
    ) -> Result<(), ClientError> {
        check_speed(speed as i64)?;
        self.hub
            .invoke(
                "scratch.motor_go_direction_to_position",
                json!({
                    "port": self.port.as_str(),
                    "speed": speed,
                    "position": position,
                    "direction": direction.as_str(),
                    "stall": stall,
                    "stop": stop,
                }),
            )
            .await?;
        Ok(())
    }

    /// Runs continuously at `speed` percent.
    pub async fn start(&self, speed: i32, stall: bool) -> Result<(), ClientError> {
        check_speed(speed as i64)?;
        self.hub
            .invoke(
                "scratch.motor_start",
                json!({
                    "port": self.port.as_str(),
                    "speed": speed,
                    "stall": stall,
                }),
            )
            .await?;
        Ok(())
    }

    /// Drives the motor with raw PWM `power`.
    pub async fn power(&self, power: i32, stall: bool) -> Result<(), ClientError> {
        check_range("power", power as i64, -100, 100)?;
        self.hub
            .invoke(
                "scratch.motor_pwm",
                json!({
                    "port": self.port.as_str(),
                    "power": power,
                    "stall": stall,
                }),
            )
            .await?;
        Ok(())
    }

    /// Stops the motor with the given brake behavior.
    pub async fn stop(&self, stop: u8) -> Result<(), ClientError> {
        self.hub
            .invoke(
                "scratch.motor_stop",
                json!({ "port": self.port.as_str(), "stop": stop }),
            )
            .await?;
        Ok(())
    }

    /// Declares the current position to be `offset`.
    pub async fn set_position(&self, offset: i32) -> Result<(), ClientError> {
        self.hub
            .invoke(
                "scratch.motor_set_position",
                json!({ "port": self.port.as_str(), "offset": offset }),
            )
            .await?;
        Ok(())
    }
}

/// Sound command surface.
pub struct Sound<'a> {
    hub: &'a Hub,
}

impl Sound<'_> {
    /// Beeps `note` (MIDI pitch) at `volume` for `duration` milliseconds.
    pub async fn beep(&self, duration: u32, note: u8, volume: u8) -> Result<(), ClientError> {
        self.hub
            .invoke(
                "scratch.sound_beep_for_time",
                json!({ "duration": duration, "note": note, "volume": volume }),
            )
            .await?;
        Ok(())
    }
}
