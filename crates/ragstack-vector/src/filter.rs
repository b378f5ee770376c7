//! Object filters
//!
//! A [`DeleteFilter`] mirrors Weaviate's `where` clause. It is passed to
//! the database as-is; the database decides whether it is meaningful.
//! Parsing is strict: an unrecognised field or `value*` key is an error
//! rather than being dropped from the clause.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Comparison or logical operator of a filter node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    And,
    Or,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Like,
    IsNull,
    ContainsAny,
    ContainsAll,
    WithinGeoRange,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "And",
            Self::Or => "Or",
            Self::Equal => "Equal",
            Self::NotEqual => "NotEqual",
            Self::GreaterThan => "GreaterThan",
            Self::GreaterThanEqual => "GreaterThanEqual",
            Self::LessThan => "LessThan",
            Self::LessThanEqual => "LessThanEqual",
            Self::Like => "Like",
            Self::IsNull => "IsNull",
            Self::ContainsAny => "ContainsAny",
            Self::ContainsAll => "ContainsAll",
            Self::WithinGeoRange => "WithinGeoRange",
        }
    }
}

/// Typed operand; serializes to the matching `value*` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    #[serde(rename = "valueText")]
    Text(String),
    #[serde(rename = "valueInt")]
    Int(i64),
    #[serde(rename = "valueNumber")]
    Number(f64),
    #[serde(rename = "valueBoolean")]
    Boolean(bool),
    #[serde(rename = "valueDate")]
    Date(String),
    #[serde(rename = "valueTextArray")]
    TextArray(Vec<String>),
    /// Pre-1.19 alias of `valueText`
    #[serde(rename = "valueString")]
    LegacyString(String),
    #[serde(rename = "valueIntArray")]
    IntArray(Vec<i64>),
    #[serde(rename = "valueNumberArray")]
    NumberArray(Vec<f64>),
    #[serde(rename = "valueBooleanArray")]
    BooleanArray(Vec<bool>),
    #[serde(rename = "valueDateArray")]
    DateArray(Vec<String>),
    #[serde(rename = "valueGeoRange")]
    GeoRange(GeoRange),
}

/// Operand of `WithinGeoRange`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoRange {
    pub geo_coordinates: GeoCoordinates,
    pub distance: GeoDistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Radius in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoDistance {
    pub max: f64,
}

impl FilterValue {
    /// Key this value occupies in a `where` clause
    pub fn key(&self) -> &'static str {
        match self {
            Self::Text(_) => "valueText",
            Self::Int(_) => "valueInt",
            Self::Number(_) => "valueNumber",
            Self::Boolean(_) => "valueBoolean",
            Self::Date(_) => "valueDate",
            Self::TextArray(_) => "valueTextArray",
            Self::LegacyString(_) => "valueString",
            Self::IntArray(_) => "valueIntArray",
            Self::NumberArray(_) => "valueNumberArray",
            Self::BooleanArray(_) => "valueBooleanArray",
            Self::DateArray(_) => "valueDateArray",
            Self::GeoRange(_) => "valueGeoRange",
        }
    }

    fn to_graphql(&self) -> String {
        match self {
            Self::Text(s) | Self::Date(s) | Self::LegacyString(s) => quote(s),
            Self::Int(n) => n.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::TextArray(items) | Self::DateArray(items) => {
                list(items.iter().map(|s| quote(s)))
            }
            Self::IntArray(items) => list(items.iter().map(|n| n.to_string())),
            Self::NumberArray(items) => list(items.iter().map(|n| n.to_string())),
            Self::BooleanArray(items) => list(items.iter().map(|b| b.to_string())),
            Self::GeoRange(range) => format!(
                "{{geoCoordinates: {{latitude: {}, longitude: {}}}, distance: {{max: {}}}}}",
                range.geo_coordinates.latitude,
                range.geo_coordinates.longitude,
                range.distance.max
            ),
        }
    }
}

/// Predicate selecting objects within a collection.
///
/// Leaf nodes carry `path`, `operator` and a value; `And`/`Or` nodes
/// carry `operands` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFilter")]
pub struct DeleteFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    pub operator: FilterOperator,
    #[serde(flatten)]
    pub value: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<DeleteFilter>,
}

/// Wire form of a filter node before its `value*` key is resolved
#[derive(Deserialize)]
struct RawFilter {
    #[serde(default)]
    path: Vec<String>,
    operator: FilterOperator,
    #[serde(default)]
    operands: Vec<DeleteFilter>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl TryFrom<RawFilter> for DeleteFilter {
    type Error = String;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        let mut value = None;
        for (key, operand) in raw.rest {
            if !key.starts_with("value") {
                return Err(format!("unknown filter field `{key}`"));
            }
            if value.is_some() {
                return Err("a filter node takes at most one value* field".to_string());
            }

            let tagged = Value::Object(Map::from_iter([(key.clone(), operand)]));
            let parsed: FilterValue = serde_json::from_value(tagged)
                .map_err(|e| format!("unsupported or malformed `{key}`: {e}"))?;
            value = Some(parsed);
        }

        Ok(Self {
            path: raw.path,
            operator: raw.operator,
            value,
            operands: raw.operands,
        })
    }
}

impl DeleteFilter {
    /// Leaf comparison against a property path
    pub fn new(path: &[&str], operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            path: path.iter().map(|p| p.to_string()).collect(),
            operator,
            value: Some(value),
            operands: Vec::new(),
        }
    }

    /// `path == text`
    pub fn text_equals(path: &str, text: impl Into<String>) -> Self {
        Self::new(&[path], FilterOperator::Equal, FilterValue::Text(text.into()))
    }

    pub fn and(operands: Vec<DeleteFilter>) -> Self {
        Self::logical(FilterOperator::And, operands)
    }

    pub fn or(operands: Vec<DeleteFilter>) -> Self {
        Self::logical(FilterOperator::Or, operands)
    }

    fn logical(operator: FilterOperator, operands: Vec<DeleteFilter>) -> Self {
        Self {
            path: Vec::new(),
            operator,
            value: None,
            operands,
        }
    }

    /// Render as a GraphQL `where` argument.
    ///
    /// GraphQL takes operators as bare enum values, unlike the REST JSON form.
    pub fn to_graphql(&self) -> String {
        let mut fields = Vec::new();

        if !self.path.is_empty() {
            let path: Vec<String> = self.path.iter().map(|p| quote(p)).collect();
            fields.push(format!("path: [{}]", path.join(", ")));
        }
        fields.push(format!("operator: {}", self.operator.as_str()));

        if let Some(value) = &self.value {
            fields.push(format!("{}: {}", value.key(), value.to_graphql()));
        }

        if !self.operands.is_empty() {
            let operands: Vec<String> = self.operands.iter().map(|o| o.to_graphql()).collect();
            fields.push(format!("operands: [{}]", operands.join(", ")));
        }

        format!("{{{}}}", fields.join(", "))
    }
}

/// JSON string escaping is valid GraphQL string escaping
fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn list(items: impl Iterator<Item = String>) -> String {
    format!("[{}]", items.collect::<Vec<_>>().join(", "))
}
