//! Element types for the combiner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identifier of an element in a source or target dataset.
///
/// Rendered as lowercase hex with a `0x` prefix and ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ElementId(u64);

impl ElementId {
    /// The root subject. Also the repository container holding subjects,
    /// partitions and categories.
    pub const ROOT: ElementId = ElementId(0x1);

    /// Create an ElementId from its raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for ElementId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Error parsing an ElementId.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid element id: {0:?}")]
pub struct ParseElementIdError(String);

impl FromStr for ElementId {
    type Err = ParseElementIdError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(Self)
            .map_err(|_| ParseElementIdError(s.to_string()))
    }
}

impl TryFrom<String> for ElementId {
    type Error = ParseElementIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ElementId> for String {
    fn from(id: ElementId) -> Self {
        id.to_string()
    }
}

/// Kind tag of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Hierarchy node organizing partitions and other subjects.
    Subject,
    /// Partition element; its id doubles as the id of the container it models.
    Partition,
    /// Category (or subcategory) that ordinary elements link to.
    Category,
    /// Any other element.
    Ordinary,
}

impl ElementKind {
    /// Parse kind from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "subject" => Some(Self::Subject),
            "partition" => Some(Self::Partition),
            "category" => Some(Self::Category),
            "ordinary" | "" => Some(Self::Ordinary),
            _ => None,
        }
    }
}

impl Default for ElementKind {
    fn default() -> Self {
        Self::Ordinary
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject => write!(f, "subject"),
            Self::Partition => write!(f, "partition"),
            Self::Category => write!(f, "category"),
            Self::Ordinary => write!(f, "ordinary"),
        }
    }
}

/// A node of a source dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Unique element identifier.
    pub id: ElementId,
    /// Parent element, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ElementId>,
    /// Container (model) holding this element.
    pub container_id: ElementId,
    /// Kind tag.
    #[serde(default)]
    pub kind: ElementKind,
    /// Code value used for classification matching.
    #[serde(default)]
    pub code: String,
    /// Category this element is linked to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<ElementId>,
    /// Free-form properties, copied verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Element {
    /// Create an element with no parent, code, category or properties.
    pub fn new(id: ElementId, kind: ElementKind, container_id: ElementId) -> Self {
        Self {
            id,
            parent_id: None,
            container_id,
            kind,
            code: String::new(),
            category_id: None,
            properties: BTreeMap::new(),
        }
    }

    /// Set the parent.
    pub fn with_parent(mut self, parent_id: ElementId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the code value.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Link to a category.
    pub fn with_category(mut self, category_id: ElementId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Request to insert an element into a target dataset.
///
/// All ids are target-side ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInsert {
    /// Kind tag.
    pub kind: ElementKind,
    /// Code value.
    pub code: String,
    /// Parent element in the target.
    pub parent_id: Option<ElementId>,
    /// Container in the target.
    pub container_id: ElementId,
    /// Category in the target.
    pub category_id: Option<ElementId>,
    /// Properties copied from the source element.
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Whether the geometry of this element should be simplified on import.
    pub simplify_geometry: bool,
}

impl ElementInsert {
    /// Build an insert for a merge container (a partition in the repository container).
    pub fn merge_container(label: impl Into<String>, parent_id: ElementId) -> Self {
        Self {
            kind: ElementKind::Partition,
            code: label.into(),
            parent_id: Some(parent_id),
            container_id: ElementId::ROOT,
            category_id: None,
            properties: BTreeMap::new(),
            simplify_geometry: true,
        }
    }
}

/// Cartographic position (radians, meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cartographic {
    /// Longitude in radians.
    pub longitude: f64,
    /// Latitude in radians.
    pub latitude: f64,
    /// Height in meters.
    pub height: f64,
}

/// Yaw/pitch/roll in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    /// Yaw in degrees.
    pub yaw: f64,
    /// Pitch in degrees.
    pub pitch: f64,
    /// Roll in degrees.
    pub roll: f64,
}

/// Earth-centered anchor placing a dataset on the globe.
///
/// Copied verbatim from source to target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialAnchor {
    /// ECEF origin in meters.
    pub origin: [f64; 3],
    /// Orientation of the dataset axes.
    #[serde(default)]
    pub orientation: Orientation,
    /// Cartographic equivalent of the origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cartographic_origin: Option<Cartographic>,
}

/// Dataset-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Dataset (root subject) name.
    pub name: String,
    /// Spatial anchor, if the dataset is georeferenced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<SpatialAnchor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_id_display_and_parse() {
        let id = ElementId::new(0x40000009395);
        assert_eq!(id.to_string(), "0x40000009395");
        assert_eq!("0x40000009395".parse::<ElementId>().unwrap(), id);
        assert_eq!("17".parse::<ElementId>().unwrap(), ElementId::new(17));
        assert!("0xzz".parse::<ElementId>().is_err());
    }

    #[test]
    fn test_element_id_serializes_as_hex_string() {
        let json = serde_json::to_string(&ElementId::new(0x2a)).unwrap();
        assert_eq!(json, "\"0x2a\"");
        let back: ElementId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ElementId::new(0x2a));
    }

    #[test]
    fn test_element_deserialize_defaults() {
        let element: Element = serde_json::from_str(
            r#"{"id": "0x20", "container_id": "0x10"}"#,
        )
        .unwrap();
        assert_eq!(element.kind, ElementKind::Ordinary);
        assert!(element.parent_id.is_none());
        assert!(element.code.is_empty());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!(ElementKind::from_str("Partition"), Some(ElementKind::Partition));
        assert_eq!(ElementKind::from_str("widget"), None);
    }
}
