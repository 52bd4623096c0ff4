//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Grid element model and the defaulted base values derived from topology."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tracing::debug;

/// Kind of grid component being simulated.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ElementType {
    Bus,
    Generator,
    Load,
    Line,
    Transformer,
}

/// Operational status carried through from the topology.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ElementStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
    Fault,
}

impl ElementStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ElementStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One element as read from the topology source.
///
/// Numeric attributes may live either as first-class fields or inside the
/// free-form `properties` map; first-class fields win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", alias = "element_type")]
    pub element_type: ElementType,
    #[serde(default)]
    pub status: ElementStatus,
    #[serde(default)]
    pub voltage_level: Option<f64>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub output: Option<f64>,
    #[serde(default)]
    pub demand: Option<f64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub resistance: Option<f64>,
    #[serde(default)]
    pub reactance: Option<f64>,
    #[serde(default)]
    pub tap_ratio: Option<f64>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
}

impl Element {
    pub fn new(id: impl Into<String>, element_type: ElementType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            element_type,
            status: ElementStatus::Active,
            voltage_level: None,
            capacity: None,
            output: None,
            demand: None,
            rating: None,
            resistance: None,
            reactance: None,
            tap_ratio: None,
            position: None,
            properties: IndexMap::new(),
        }
    }

    pub fn with_status(mut self, status: ElementStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_voltage_level(mut self, kv: f64) -> Self {
        self.voltage_level = Some(kv);
        self
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Numeric property lookup. Strings holding numbers are accepted.
    pub fn property_f64(&self, key: &str) -> Option<f64> {
        match self.properties.get(key)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Generation technology; only solar and wind follow weather.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FuelType {
    Solar,
    Wind,
    Thermal,
}

impl FuelType {
    /// Anything other than solar or wind is dispatched against load.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|value| value.trim().to_ascii_lowercase()) {
            Some(value) if value == "solar" => FuelType::Solar,
            Some(value) if value == "wind" => FuelType::Wind,
            _ => FuelType::Thermal,
        }
    }
}

/// Shedding priority of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LoadPriority {
    Low,
    Medium,
    High,
}

impl LoadPriority {
    /// Missing labels default to medium; unknown labels are never shed.
    pub fn from_label(label: Option<&str>) -> Self {
        let Some(raw) = label else {
            return LoadPriority::Medium;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => LoadPriority::Low,
            "medium" => LoadPriority::Medium,
            "high" | "critical" => LoadPriority::High,
            other => {
                debug!(priority = other, "unrecognised load priority, treating as high");
                LoadPriority::High
            }
        }
    }

    /// Demand multiplier applied while the system is overloaded.
    pub fn shedding_multiplier(self) -> f64 {
        match self {
            LoadPriority::Low => 0.7,
            LoadPriority::Medium => 0.9,
            LoadPriority::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BusBase {
    pub nominal_voltage_kv: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeneratorBase {
    pub capacity_mw: f64,
    /// Nameplate output from the topology; ramp tracking starts from the
    /// dispatch target, not from this value.
    pub nominal_output_mw: f64,
    /// Percent.
    pub base_efficiency: f64,
    pub fuel: FuelType,
    pub voltage_level_kv: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadBase {
    pub base_demand_mw: f64,
    pub power_factor: f64,
    pub priority: LoadPriority,
    pub voltage_level_kv: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineBase {
    pub capacity_mw: f64,
    pub resistance: f64,
    pub reactance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransformerBase {
    pub rating_mva: f64,
    pub tap_ratio: f64,
    pub oil_temp_base_c: f64,
}

/// Type-specific base values with defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "element_type")]
pub enum BaseValues {
    Bus(BusBase),
    Generator(GeneratorBase),
    Load(LoadBase),
    Line(LineBase),
    Transformer(TransformerBase),
}

impl BaseValues {
    pub fn element_type(&self) -> ElementType {
        match self {
            BaseValues::Bus(_) => ElementType::Bus,
            BaseValues::Generator(_) => ElementType::Generator,
            BaseValues::Load(_) => ElementType::Load,
            BaseValues::Line(_) => ElementType::Line,
            BaseValues::Transformer(_) => ElementType::Transformer,
        }
    }
}

/// Immutable per-element record captured when the topology is loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseSnapshot {
    pub element_id: String,
    pub name: String,
    pub status: ElementStatus,
    pub values: BaseValues,
    pub properties: IndexMap<String, Value>,
}

impl BaseSnapshot {
    pub fn from_element(element: &Element) -> Self {
        let values = match element.element_type {
            ElementType::Bus => BaseValues::Bus(BusBase {
                nominal_voltage_kv: element
                    .voltage_level
                    .or_else(|| element.property_f64("voltage_level"))
                    .unwrap_or(110.0),
            }),
            ElementType::Generator => BaseValues::Generator(GeneratorBase {
                capacity_mw: element
                    .capacity
                    .or_else(|| element.property_f64("capacity"))
                    .unwrap_or(100.0),
                nominal_output_mw: element
                    .output
                    .or_else(|| element.property_f64("output"))
                    .unwrap_or(0.0),
                base_efficiency: element.property_f64("efficiency").unwrap_or(90.0),
                fuel: FuelType::from_label(element.property_str("fuel_type")),
                voltage_level_kv: element
                    .property_f64("voltage_level")
                    .or(element.voltage_level)
                    .unwrap_or(22.0),
            }),
            ElementType::Load => BaseValues::Load(LoadBase {
                base_demand_mw: element
                    .demand
                    .or_else(|| element.property_f64("demand"))
                    .or(element.capacity)
                    .unwrap_or(50.0),
                power_factor: element.property_f64("power_factor").unwrap_or(0.95),
                priority: LoadPriority::from_label(element.property_str("priority")),
                voltage_level_kv: element
                    .property_f64("voltage_level")
                    .or(element.voltage_level)
                    .unwrap_or(11.0),
            }),
            ElementType::Line => BaseValues::Line(LineBase {
                capacity_mw: element
                    .capacity
                    .or_else(|| element.property_f64("capacity"))
                    .unwrap_or(100.0),
                resistance: element
                    .resistance
                    .or_else(|| element.property_f64("resistance"))
                    .unwrap_or(0.01),
                reactance: element
                    .reactance
                    .or_else(|| element.property_f64("reactance"))
                    .unwrap_or(0.05),
            }),
            ElementType::Transformer => BaseValues::Transformer(TransformerBase {
                rating_mva: element
                    .rating
                    .or_else(|| element.property_f64("rating"))
                    .or(element.capacity)
                    .unwrap_or(100.0),
                tap_ratio: element
                    .tap_ratio
                    .or_else(|| element.property_f64("tap_ratio"))
                    .unwrap_or(1.0),
                oil_temp_base_c: element.property_f64("oil_temp_base").unwrap_or(40.0),
            }),
        };

        Self {
            element_id: element.id.clone(),
            name: element.name.clone(),
            status: element.status,
            values,
            properties: element.properties.clone(),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.values.element_type()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_attributes_fall_back_to_defaults() {
        let snapshot = BaseSnapshot::from_element(&Element::new("g1", ElementType::Generator));
        match snapshot.values {
            BaseValues::Generator(base) => {
                assert_eq!(base.capacity_mw, 100.0);
                assert_eq!(base.base_efficiency, 90.0);
                assert_eq!(base.fuel, FuelType::Thermal);
                assert_eq!(base.voltage_level_kv, 22.0);
            }
            other => panic!("unexpected base values: {other:?}"),
        }

        let load = BaseSnapshot::from_element(&Element::new("l1", ElementType::Load));
        match load.values {
            BaseValues::Load(base) => {
                assert_eq!(base.base_demand_mw, 50.0);
                assert_eq!(base.power_factor, 0.95);
                assert_eq!(base.priority, LoadPriority::Medium);
                assert_eq!(base.voltage_level_kv, 11.0);
            }
            other => panic!("unexpected base values: {other:?}"),
        }
    }

    #[test]
    fn first_class_attributes_take_precedence() {
        let element = Element::new("b1", ElementType::Bus)
            .with_voltage_level(220.0)
            .with_property("voltage_level", 33.0);
        let snapshot = BaseSnapshot::from_element(&element);
        assert_eq!(
            snapshot.values,
            BaseValues::Bus(BusBase {
                nominal_voltage_kv: 220.0
            })
        );
    }

    #[test]
    fn topology_json_uses_type_key() {
        let raw = r#"{
            "id": "pv-1",
            "type": "Generator",
            "status": "maintenance",
            "capacity": 40,
            "properties": { "fuel_type": "Solar", "efficiency": "18.5" }
        }"#;
        let element: Element = serde_json::from_str(raw).expect("element parses");
        assert_eq!(element.status, ElementStatus::Maintenance);
        let snapshot = BaseSnapshot::from_element(&element);
        match snapshot.values {
            BaseValues::Generator(base) => {
                assert_eq!(base.fuel, FuelType::Solar);
                assert_eq!(base.capacity_mw, 40.0);
                assert_eq!(base.base_efficiency, 18.5);
            }
            other => panic!("unexpected base values: {other:?}"),
        }
        assert!(!snapshot.is_active());
    }

    #[test]
    fn nominal_attributes_parse_as_top_level_fields() {
        let parse = |raw: &str| {
            let element: Element = serde_json::from_str(raw).expect("element parses");
            BaseSnapshot::from_element(&element).values
        };

        match parse(r#"{"id":"ld","type":"Load","demand":80,"capacity":120}"#) {
            BaseValues::Load(base) => assert_eq!(base.base_demand_mw, 80.0),
            other => panic!("unexpected base values: {other:?}"),
        }
        match parse(r#"{"id":"tx","type":"Transformer","rating":250,"tap_ratio":1.1,"capacity":90}"#)
        {
            BaseValues::Transformer(base) => {
                assert_eq!(base.rating_mva, 250.0);
                assert_eq!(base.tap_ratio, 1.1);
            }
            other => panic!("unexpected base values: {other:?}"),
        }
        match parse(r#"{"id":"ln","type":"Line","resistance":0.5,"reactance":0.3}"#) {
            BaseValues::Line(base) => {
                assert_eq!(base.resistance, 0.5);
                assert_eq!(base.reactance, 0.3);
            }
            other => panic!("unexpected base values: {other:?}"),
        }
        match parse(r#"{"id":"gn","type":"Generator","output":35,"properties":{"output":10}}"#) {
            BaseValues::Generator(base) => assert_eq!(base.nominal_output_mw, 35.0),
            other => panic!("unexpected base values: {other:?}"),
        }
    }

    #[test]
    fn properties_fill_in_missing_nominal_attributes() {
        let element = Element::new("tx", ElementType::Transformer)
            .with_capacity(90.0)
            .with_property("tap_ratio", "0.95");
        match BaseSnapshot::from_element(&element).values {
            BaseValues::Transformer(base) => {
                assert_eq!(base.rating_mva, 90.0);
                assert_eq!(base.tap_ratio, 0.95);
            }
            other => panic!("unexpected base values: {other:?}"),
        }
    }

    #[test]
    fn priority_labels() {
        assert_eq!(LoadPriority::from_label(None), LoadPriority::Medium);
        assert_eq!(LoadPriority::from_label(Some("LOW")), LoadPriority::Low);
        assert_eq!(LoadPriority::from_label(Some("vip")), LoadPriority::High);
        assert_eq!(LoadPriority::High.shedding_multiplier(), 1.0);
    }
}
