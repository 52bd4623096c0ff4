//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed telemetry samples emitted once per element per cycle."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::model::{ElementStatus, ElementType};

/// A single measurement record for one element.
///
/// Serialises flat: `{"timestamp", "element_id", "status", "element_type", <fields>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub element_id: String,
    pub status: ElementStatus,
    #[serde(flatten)]
    pub reading: Reading,
}

impl TelemetrySample {
    pub fn element_type(&self) -> ElementType {
        self.reading.element_type()
    }

    pub fn measurements(&self) -> Vec<(&'static str, f64)> {
        self.reading.measurements()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "element_type")]
pub enum Reading {
    Bus(BusReading),
    Generator(GeneratorReading),
    Load(LoadReading),
    Line(LineReading),
    Transformer(TransformerReading),
}

impl Reading {
    pub fn element_type(&self) -> ElementType {
        match self {
            Reading::Bus(_) => ElementType::Bus,
            Reading::Generator(_) => ElementType::Generator,
            Reading::Load(_) => ElementType::Load,
            Reading::Line(_) => ElementType::Line,
            Reading::Transformer(_) => ElementType::Transformer,
        }
    }

    /// Reading for a non-active element: the primary fields of its type set to zero.
    pub fn zeroed(element_type: ElementType) -> Self {
        match element_type {
            ElementType::Bus => Reading::Bus(BusReading::zeroed()),
            ElementType::Generator => Reading::Generator(GeneratorReading::zeroed()),
            ElementType::Load => Reading::Load(LoadReading::zeroed()),
            ElementType::Line => Reading::Line(LineReading::zeroed()),
            ElementType::Transformer => Reading::Transformer(TransformerReading::zeroed()),
        }
    }

    /// Populated fields in declaration order.
    pub fn measurements(&self) -> Vec<(&'static str, f64)> {
        let mut out = Vec::new();
        let mut push = |name: &'static str, value: Option<f64>| {
            if let Some(value) = value {
                out.push((name, value));
            }
        };
        match self {
            Reading::Bus(r) => {
                push("voltage", r.voltage);
                push("voltage_level", r.voltage_level);
                push("voltage_change", r.voltage_change);
                push("frequency", r.frequency);
            }
            Reading::Generator(r) => {
                push("power", r.power);
                push("frequency", r.frequency);
                push("voltage", r.voltage);
                push("efficiency", r.efficiency);
                push("load_factor", r.load_factor);
                push("capacity", r.capacity);
                push("voltage_level", r.voltage_level);
            }
            Reading::Load(r) => {
                push("power", r.power);
                push("demand", r.demand);
                push("current", r.current);
                push("power_factor", r.power_factor);
                push("utilization_rate", r.utilization_rate);
                push("voltage_level", r.voltage_level);
            }
            Reading::Line(r) => {
                push("current", r.current);
                push("loading", r.loading);
                push("power_flow", r.power_flow);
                push("power_loss", r.power_loss);
                push("temperature", r.temperature);
                push("capacity", r.capacity);
            }
            Reading::Transformer(r) => {
                push("loading", r.loading);
                push("power_flow", r.power_flow);
                push("oil_temperature", r.oil_temperature);
                push("winding_temperature", r.winding_temperature);
                push("tap_position", r.tap_position);
                push("rating", r.rating);
            }
        }
        out
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusReading {
    /// kV.
    #[serde(default)]
    pub voltage: Option<f64>,
    /// Nominal kV.
    #[serde(default)]
    pub voltage_level: Option<f64>,
    /// Percent deviation from nominal.
    #[serde(default)]
    pub voltage_change: Option<f64>,
    /// Hz.
    #[serde(default)]
    pub frequency: Option<f64>,
}

impl BusReading {
    pub fn zeroed() -> Self {
        Self {
            voltage: Some(0.0),
            frequency: Some(0.0),
            ..Self::default()
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorReading {
    /// MW.
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(default)]
    pub frequency: Option<f64>,
    #[serde(default)]
    pub voltage: Option<f64>,
    /// Percent.
    #[serde(default)]
    pub efficiency: Option<f64>,
    /// Output as a percentage of capacity.
    #[serde(default)]
    pub load_factor: Option<f64>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub voltage_level: Option<f64>,
}

impl GeneratorReading {
    pub fn zeroed() -> Self {
        Self {
            power: Some(0.0),
            frequency: Some(0.0),
            voltage: Some(0.0),
            efficiency: Some(0.0),
            ..Self::default()
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReading {
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(default)]
    pub demand: Option<f64>,
    /// A.
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub power_factor: Option<f64>,
    #[serde(default)]
    pub utilization_rate: Option<f64>,
    #[serde(default)]
    pub voltage_level: Option<f64>,
}

impl LoadReading {
    pub fn zeroed() -> Self {
        Self {
            power: Some(0.0),
            current: Some(0.0),
            power_factor: Some(0.0),
            ..Self::default()
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineReading {
    #[serde(default)]
    pub current: Option<f64>,
    /// Percent of thermal capacity.
    #[serde(default)]
    pub loading: Option<f64>,
    #[serde(default)]
    pub power_flow: Option<f64>,
    #[serde(default)]
    pub power_loss: Option<f64>,
    /// Conductor temperature, °C.
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub capacity: Option<f64>,
}

impl LineReading {
    pub fn zeroed() -> Self {
        Self {
            current: Some(0.0),
            loading: Some(0.0),
            power_flow: Some(0.0),
            ..Self::default()
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformerReading {
    #[serde(default)]
    pub loading: Option<f64>,
    #[serde(default)]
    pub power_flow: Option<f64>,
    #[serde(default)]
    pub oil_temperature: Option<f64>,
    #[serde(default)]
    pub winding_temperature: Option<f64>,
    #[serde(default)]
    pub tap_position: Option<f64>,
    /// MVA.
    #[serde(default)]
    pub rating: Option<f64>,
}

impl TransformerReading {
    pub fn zeroed() -> Self {
        Self {
            loading: Some(0.0),
            oil_temperature: Some(0.0),
            winding_temperature: Some(0.0),
            ..Self::default()
        }
    }
}
