//! External sensor device registry.
//!
//! Telemetry reports each external port as a `[type_id, values]` pair. The
//! registry maps the reported type identifier to the device kind and its
//! value decoder; identifiers it does not know yield an absent reading
//! instead of failing the surrounding notification.

use serde_json::Value;
use std::fmt;

/// External port letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Port {
    pub const ALL: [Port; 6] = [Port::A, Port::B, Port::C, Port::D, Port::E, Port::F];

    /// Position of this port in the telemetry parameter sequence.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Port::A => "A",
            Port::B => "B",
            Port::C => "C",
            Port::D => "D",
            Port::E => "E",
            Port::F => "F",
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Devices the hub recognizes on its external ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    MotorSmall,
    MotorMedium,
    MotorLarge,
    Color,
    Distance,
    Force,
    Acceleration,
    Gyro,
    Orientation,
    StoneGreyMotorMedium,
    StoneGreyMotorLarge,
}

const MOTOR_MODES: &[u8] = &[1, 2, 3, 0];

impl SensorType {
    /// Looks up a device by the type identifier reported in telemetry.
    pub fn from_type_id(id: i64) -> Option<Self> {
        match id {
            65 => Some(SensorType::MotorSmall),
            48 => Some(SensorType::MotorMedium),
            49 => Some(SensorType::MotorLarge),
            61 => Some(SensorType::Color),
            62 => Some(SensorType::Distance),
            63 => Some(SensorType::Force),
            57 => Some(SensorType::Acceleration),
            58 => Some(SensorType::Gyro),
            59 => Some(SensorType::Orientation),
            75 => Some(SensorType::StoneGreyMotorMedium),
            76 => Some(SensorType::StoneGreyMotorLarge),
            _ => None,
        }
    }

    /// Type identifier this device reports in telemetry.
    pub fn type_id(&self) -> i64 {
        match self {
            SensorType::MotorSmall => 65,
            SensorType::MotorMedium => 48,
            SensorType::MotorLarge => 49,
            SensorType::Color => 61,
            SensorType::Distance => 62,
            SensorType::Force => 63,
            SensorType::Acceleration => 57,
            SensorType::Gyro => 58,
            SensorType::Orientation => 59,
            SensorType::StoneGreyMotorMedium => 75,
            SensorType::StoneGreyMotorLarge => 76,
        }
    }

    /// Mode list the device advertises.
    pub fn modes(&self) -> &'static [u8] {
        match self {
            SensorType::MotorSmall
            | SensorType::MotorMedium
            | SensorType::MotorLarge
            | SensorType::StoneGreyMotorMedium
            | SensorType::StoneGreyMotorLarge => MOTOR_MODES,
            SensorType::Color => &[1, 0],
            SensorType::Force => &[0, 1, 4],
            SensorType::Distance
            | SensorType::Acceleration
            | SensorType::Gyro
            | SensorType::Orientation => &[0],
        }
    }

    /// Turns the raw value list into a typed reading.
    ///
    /// Only the three flipper motors decode into a structured reading; every
    /// other device passes its values through unchanged. Returns `None` when
    /// the values do not match the expected layout.
    pub fn decode(&self, values: &Value) -> Option<SensorReading> {
        match self {
            SensorType::MotorSmall | SensorType::MotorMedium | SensorType::MotorLarge => {
                MotorReading::decode(values).map(SensorReading::Motor)
            }
            _ => Some(SensorReading::Raw(values.clone())),
        }
    }
}

/// Decoded values for one external port.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    /// Raw mode values, passed through unchanged.
    Raw(Value),
    /// Structured motor reading.
    Motor(MotorReading),
}

/// Position data reported by a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorReading {
    pub position: i64,
    pub absolute_position: i64,
}

impl MotorReading {
    fn decode(values: &Value) -> Option<Self> {
        let values = values.as_array()?;
        Some(Self {
            position: values.get(2)?.as_i64()?,
            absolute_position: values.get(3)?.as_i64()?,
        })
    }
}

/// A recognized device and its decoded reading on one port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortReading {
    pub sensor_type: SensorType,
    pub reading: SensorReading,
}

impl PortReading {
    /// Decodes one `[type_id, values]` port entry. Unknown type identifiers
    /// and malformed value lists yield `None`.
    pub fn decode(entry: &Value) -> Option<Self> {
        let entry = entry.as_array()?;
        let sensor_type = SensorType::from_type_id(entry.first()?.as_i64()?)?;
        let reading = sensor_type.decode(entry.get(1)?)?;
        Some(Self {
            sensor_type,
            reading,
        })
    }
}
