//! Typed notification decoding.
//!
//! The hub pushes telemetry as notifications keyed by a small integer, plus
//! one string-named event for user program output. [`decode_notification`]
//! routes each raw notification through an immutable key registry; keys the
//! registry does not know fall back to [`Notification::Unknown`], which never
//! fails.

use crate::error::ProtocolError;
use crate::message::{base64_text, MethodKey, RpcNotification};
use crate::sensor::{Port, PortReading};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Method key of the user program print notification.
pub const PRINT_METHOD: &str = "userProgram.print";

/// A decoded telemetry notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Sensor(SensorStatus),
    Storage(StorageStatus),
    Battery(BatteryStatus),
    Button(ButtonEvent),
    Gesture(GestureEvent),
    DisplayStatus(DisplayStatus),
    Firmware(FirmwareInfo),
    StackStart(StackEvent),
    StackStop(StackEvent),
    Info(HubInfo),
    RuntimeError(RuntimeErrorReport),
    VmState(VmState),
    ProgramRunning(ProgramRunning),
    Print(PrintOutput),
    /// Fallback wrapping the raw notification for any unrecognized key.
    Unknown(RpcNotification),
}

/// Periodic device state: internal sensors plus the six external ports.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorStatus {
    pub accelerometer: Value,
    pub gyroscope: Value,
    pub position: Value,
    pub time: Value,
    pub leds: Value,
    /// Readings for ports A through F, absent where nothing recognizable is
    /// attached.
    pub ports: [Option<PortReading>; 6],
}

// Slot positions in the sensor telemetry sequence. Ports occupy 0..=5.
const IDX_ACCELEROMETER: usize = 6;
const IDX_GYROSCOPE: usize = 7;
const IDX_POSITION: usize = 8;
const IDX_DISPLAY: usize = 9;
const IDX_TIME: usize = 10;

impl SensorStatus {
    /// Reading for one external port.
    pub fn port(&self, port: Port) -> Option<&PortReading> {
        self.ports[port.index()].as_ref()
    }

    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        let data = params_seq(parameters, IDX_TIME + 1, "sensor")?;
        let ports = std::array::from_fn(|idx| PortReading::decode(&data[idx]));
        Ok(Self {
            accelerometer: data[IDX_ACCELEROMETER].clone(),
            gyroscope: data[IDX_GYROSCOPE].clone(),
            position: data[IDX_POSITION].clone(),
            time: data[IDX_TIME].clone(),
            leds: data[IDX_DISPLAY].clone(),
            ports,
        })
    }
}

/// Program storage summary.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageStatus {
    pub total: u64,
    pub available: u64,
    pub pct: f64,
    pub unit: String,
    pub slots: HashMap<String, SlotInfo>,
}

/// One stored program slot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlotInfo {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(rename = "type", default)]
    pub slot_type: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub modified: Option<i64>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl StorageStatus {
    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        #[derive(Deserialize)]
        struct Params {
            storage: Totals,
            #[serde(default)]
            slots: HashMap<String, SlotInfo>,
        }
        #[derive(Deserialize)]
        struct Totals {
            total: u64,
            available: u64,
            pct: f64,
            unit: String,
        }

        let params: Params = serde_json::from_value(parameters.clone())
            .map_err(|_| ProtocolError::MalformedPayload("storage"))?;
        Ok(Self {
            total: params.storage.total,
            available: params.storage.available,
            pct: params.storage.pct,
            unit: params.storage.unit,
            slots: params.slots,
        })
    }
}

/// Battery level report.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryStatus {
    pub voltage: f64,
    pub percentage: i64,
}

impl BatteryStatus {
    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        let data = params_seq(parameters, 2, "battery")?;
        Ok(Self {
            voltage: data[0]
                .as_f64()
                .ok_or(ProtocolError::MalformedPayload("battery"))?,
            percentage: data[1]
                .as_i64()
                .ok_or(ProtocolError::MalformedPayload("battery"))?,
        })
    }
}

/// Face button state change.
#[derive(Debug, Clone, PartialEq)]
pub struct ButtonEvent {
    pub button: String,
    pub pressed: bool,
}

impl ButtonEvent {
    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        let data = params_seq(parameters, 2, "button")?;
        Ok(Self {
            button: string_field(&data[0], "button")?,
            pressed: data[1]
                .as_i64()
                .ok_or(ProtocolError::MalformedPayload("button"))?
                > 0,
        })
    }
}

/// Motion gesture the hub detected (tapped, shaken, freefall, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct GestureEvent {
    pub gesture: String,
}

/// Raw display state push.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayStatus {
    pub parameters: Value,
}

/// Firmware identity report.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareInfo {
    pub version: Vec<i64>,
    pub checksum: String,
    pub runtime: i64,
}

impl FirmwareInfo {
    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        let data = params_seq(parameters, 3, "firmware")?;
        let version = data[0]
            .as_array()
            .ok_or(ProtocolError::MalformedPayload("firmware"))?
            .iter()
            .map(|part| part.as_i64().ok_or(ProtocolError::MalformedPayload("firmware")))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            version,
            checksum: string_field(&data[1], "firmware")?,
            runtime: data[2]
                .as_i64()
                .ok_or(ProtocolError::MalformedPayload("firmware"))?,
        })
    }
}

/// A program stack started or stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct StackEvent {
    pub stack_id: String,
}

/// Hub identity; the name travels base64-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct HubInfo {
    pub name: String,
}

impl HubInfo {
    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        let data = params_seq(parameters, 1, "info")?;
        Ok(Self {
            name: base64_text(&data[0], "info")?,
        })
    }
}

/// A user program crashed; the traceback travels base64-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeErrorReport {
    pub error_type: Value,
    pub traceback: String,
}

impl RuntimeErrorReport {
    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        let data = params_seq(parameters, 2, "runtime error")?;
        Ok(Self {
            error_type: data[0].clone(),
            traceback: base64_text(&data[1], "runtime error")?,
        })
    }
}

/// Scratch VM state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct VmState {
    pub target: String,
    pub variables: Value,
    pub lists: Value,
    pub store: Value,
}

impl VmState {
    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        let data = params_seq(parameters, 4, "vm state")?;
        Ok(Self {
            target: string_field(&data[0], "vm state")?,
            variables: data[1].clone(),
            lists: data[2].clone(),
            store: data[3].clone(),
        })
    }
}

/// A stored program started or stopped running.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramRunning {
    pub project_id: String,
    pub running: bool,
}

impl ProgramRunning {
    fn decode(parameters: &Value) -> Result<Self, ProtocolError> {
        let data = params_seq(parameters, 2, "program running")?;
        Ok(Self {
            project_id: string_field(&data[0], "program running")?,
            running: data[1]
                .as_bool()
                .ok_or(ProtocolError::MalformedPayload("program running"))?,
        })
    }
}

/// Output printed by a user program.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintOutput {
    pub parameters: Value,
}

/// Decodes a raw notification through the method key registry.
///
/// Recognized keys produce their typed variant, or an error when the payload
/// does not match the expected layout; such errors are scoped to this one
/// notification. Unrecognized keys always produce [`Notification::Unknown`].
pub fn decode_notification(
    notification: &RpcNotification,
) -> Result<Notification, ProtocolError> {
    let params = &notification.parameters;
    match &notification.method {
        MethodKey::Code(0) => SensorStatus::decode(params).map(Notification::Sensor),
        MethodKey::Code(1) => StorageStatus::decode(params).map(Notification::Storage),
        MethodKey::Code(2) => BatteryStatus::decode(params).map(Notification::Battery),
        MethodKey::Code(3) => ButtonEvent::decode(params).map(Notification::Button),
        MethodKey::Code(4) => Ok(Notification::Gesture(GestureEvent {
            gesture: string_field(params, "gesture")?,
        })),
        MethodKey::Code(5) => Ok(Notification::DisplayStatus(DisplayStatus {
            parameters: params.clone(),
        })),
        MethodKey::Code(6) => FirmwareInfo::decode(params).map(Notification::Firmware),
        MethodKey::Code(7) => Ok(Notification::StackStart(StackEvent {
            stack_id: string_field(params, "stack")?,
        })),
        MethodKey::Code(8) => Ok(Notification::StackStop(StackEvent {
            stack_id: string_field(params, "stack")?,
        })),
        MethodKey::Code(9) => HubInfo::decode(params).map(Notification::Info),
        MethodKey::Code(10) => RuntimeErrorReport::decode(params).map(Notification::RuntimeError),
        MethodKey::Code(11) => VmState::decode(params).map(Notification::VmState),
        MethodKey::Code(12) => ProgramRunning::decode(params).map(Notification::ProgramRunning),
        MethodKey::Name(name) if name == PRINT_METHOD => Ok(Notification::Print(PrintOutput {
            parameters: params.clone(),
        })),
        _ => Ok(Notification::Unknown(notification.clone())),
    }
}

/// Fixed-position parameter sequence of at least `len` entries.
fn params_seq<'a>(
    parameters: &'a Value,
    len: usize,
    kind: &'static str,
) -> Result<&'a [Value], ProtocolError> {
    let data = parameters
        .as_array()
        .ok_or(ProtocolError::MalformedPayload(kind))?;
    if data.len() < len {
        return Err(ProtocolError::MalformedPayload(kind));
    }
    Ok(data)
}

fn string_field(value: &Value, kind: &'static str) -> Result<String, ProtocolError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(ProtocolError::MalformedPayload(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{MotorReading, SensorReading, SensorType};
    use serde_json::json;

    fn raw(method: impl Into<MethodKey>, parameters: Value) -> RpcNotification {
        RpcNotification {
            method: method.into(),
            parameters,
        }
    }

    #[test]
    fn test_battery_decode() {
        let decoded = decode_notification(&raw(2, json!([8.1, 73]))).unwrap();
        assert_eq!(
            decoded,
            Notification::Battery(BatteryStatus {
                voltage: 8.1,
                percentage: 73,
            })
        );
    }

    #[test]
    fn test_sensor_decode_with_ports() {
        let params = json!([
            [48, [0, 0, 45, 100]],
            [0, []],
            [99, [1, 2]],
            [62, [120]],
            [0, []],
            [0, []],
            [1, -2, 998],
            [0, 0, 0],
            [0, 0],
            "00000:00000:00000:00000:00000",
            123456
        ]);
        let decoded = decode_notification(&raw(0, params)).unwrap();
        let Notification::Sensor(sensor) = decoded else {
            panic!("expected sensor notification");
        };

        assert_eq!(
            sensor.port(Port::A),
            Some(&PortReading {
                sensor_type: SensorType::MotorMedium,
                reading: SensorReading::Motor(MotorReading {
                    position: 45,
                    absolute_position: 100,
                }),
            })
        );
        // unrecognized type identifier leaves the port absent
        assert_eq!(sensor.port(Port::C), None);
        assert_eq!(
            sensor.port(Port::D),
            Some(&PortReading {
                sensor_type: SensorType::Distance,
                reading: SensorReading::Raw(json!([120])),
            })
        );
        assert_eq!(sensor.accelerometer, json!([1, -2, 998]));
        assert_eq!(sensor.time, json!(123456));
    }

    #[test]
    fn test_storage_decode() {
        let params = json!({
            "storage": {"total": 31744, "available": 31043, "pct": 2.2, "unit": "kb"},
            "slots": {
                "0": {"name": "demo", "id": "p-1", "project_id": "p-1",
                      "type": "python", "created": 1, "modified": 2, "size": 314}
            }
        });
        let decoded = decode_notification(&raw(1, params)).unwrap();
        let Notification::Storage(storage) = decoded else {
            panic!("expected storage notification");
        };
        assert_eq!(storage.total, 31744);
        assert_eq!(storage.unit, "kb");
        assert_eq!(storage.slots["0"].name, "demo");
        assert_eq!(storage.slots["0"].size, Some(314));
    }

    #[test]
    fn test_button_decode() {
        let decoded = decode_notification(&raw(3, json!(["center", 1]))).unwrap();
        assert_eq!(
            decoded,
            Notification::Button(ButtonEvent {
                button: "center".to_string(),
                pressed: true,
            })
        );
        let decoded = decode_notification(&raw(3, json!(["left", 0]))).unwrap();
        assert_eq!(
            decoded,
            Notification::Button(ButtonEvent {
                button: "left".to_string(),
                pressed: false,
            })
        );
    }

    #[test]
    fn test_gesture_and_stack_events() {
        assert_eq!(
            decode_notification(&raw(4, json!("tapped"))).unwrap(),
            Notification::Gesture(GestureEvent {
                gesture: "tapped".to_string(),
            })
        );
        assert_eq!(
            decode_notification(&raw(7, json!("stack-9"))).unwrap(),
            Notification::StackStart(StackEvent {
                stack_id: "stack-9".to_string(),
            })
        );
        assert_eq!(
            decode_notification(&raw(8, json!("stack-9"))).unwrap(),
            Notification::StackStop(StackEvent {
                stack_id: "stack-9".to_string(),
            })
        );
    }

    #[test]
    fn test_firmware_decode() {
        let decoded = decode_notification(&raw(6, json!([[1, 14, 0], "a1b2c3", 4]))).unwrap();
        assert_eq!(
            decoded,
            Notification::Firmware(FirmwareInfo {
                version: vec![1, 14, 0],
                checksum: "a1b2c3".to_string(),
                runtime: 4,
            })
        );
    }

    #[test]
    fn test_info_decodes_name() {
        // "mp8" in base64
        let decoded = decode_notification(&raw(9, json!(["bXA4"]))).unwrap();
        assert_eq!(
            decoded,
            Notification::Info(HubInfo {
                name: "mp8".to_string(),
            })
        );
    }

    #[test]
    fn test_runtime_error_decodes_traceback() {
        // "Traceback: boom" in base64
        let decoded =
            decode_notification(&raw(10, json!(["RuntimeError", "VHJhY2ViYWNrOiBib29t"])))
                .unwrap();
        assert_eq!(
            decoded,
            Notification::RuntimeError(RuntimeErrorReport {
                error_type: json!("RuntimeError"),
                traceback: "Traceback: boom".to_string(),
            })
        );
    }

    #[test]
    fn test_vm_state_and_program_running() {
        let decoded =
            decode_notification(&raw(11, json!(["target1", {"v": 1}, [], {}]))).unwrap();
        let Notification::VmState(state) = decoded else {
            panic!("expected vm state");
        };
        assert_eq!(state.target, "target1");
        assert_eq!(state.variables, json!({"v": 1}));

        let decoded = decode_notification(&raw(12, json!(["proj-1", true]))).unwrap();
        assert_eq!(
            decoded,
            Notification::ProgramRunning(ProgramRunning {
                project_id: "proj-1".to_string(),
                running: true,
            })
        );
    }

    #[test]
    fn test_print_output() {
        let decoded =
            decode_notification(&raw(PRINT_METHOD, json!({"value": "aGVsbG8="}))).unwrap();
        assert_eq!(
            decoded,
            Notification::Print(PrintOutput {
                parameters: json!({"value": "aGVsbG8="}),
            })
        );
    }

    #[test]
    fn test_unknown_key_never_fails() {
        for method in [MethodKey::Code(42), MethodKey::from("future.event")] {
            let notification = raw(method, json!({"anything": [1, 2, 3]}));
            let decoded = decode_notification(&notification).unwrap();
            assert_eq!(decoded, Notification::Unknown(notification));
        }
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(decode_notification(&raw(2, json!("not a list"))).is_err());
        assert!(decode_notification(&raw(2, json!([8.1]))).is_err());
        assert!(decode_notification(&raw(9, json!(["not base64 @@"]))).is_err());
    }
}
