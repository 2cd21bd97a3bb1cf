use crate::error::GeometryDefect;

/// A normalized feature: geometry in EPSG:4326 plus an open JSON property map.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: geo::Geometry,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl From<geo::Geometry> for Feature {
    fn from(value: geo::Geometry) -> Self {
        Self {
            geometry: value,
            properties: serde_json::Map::new(),
        }
    }
}

/// Attribute value as read from the DBF component, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    IntegerList(Vec<i64>),
    RealList(Vec<f64>),
    TextList(Vec<String>),
}

impl From<gdal::vector::FieldValue> for AttributeValue {
    fn from(value: gdal::vector::FieldValue) -> Self {
        use gdal::vector::FieldValue::*;
        match value {
            IntegerValue(value) => AttributeValue::Integer(value as i64),
            Integer64Value(value) => AttributeValue::Integer(value),
            RealValue(value) => AttributeValue::Real(value),
            StringValue(value) => AttributeValue::Text(value),
            IntegerListValue(values) => {
                AttributeValue::IntegerList(values.into_iter().map(i64::from).collect())
            }
            Integer64ListValue(values) => AttributeValue::IntegerList(values),
            RealListValue(values) => AttributeValue::RealList(values),
            StringListValue(values) => AttributeValue::TextList(values),
            // Dates and date-times are kept in their ISO 8601 text form.
            other => other
                .into_string()
                .map(AttributeValue::Text)
                .unwrap_or(AttributeValue::Null),
        }
    }
}

/// One shapefile record as produced by the decoder. Records whose shape could
/// not be turned into a `geo::Geometry` (null shapes, open rings) carry the
/// defect instead, so the normalizer can apply the invalid geometry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub index: usize,
    pub geometry: Result<geo::Geometry, GeometryDefect>,
    pub attributes: Vec<(String, AttributeValue)>,
}

impl DecodedRecord {
    pub fn new(index: usize, geometry: geo::Geometry) -> Self {
        Self {
            index,
            geometry: Ok(geometry),
            attributes: Vec::new(),
        }
    }

    pub fn defective(index: usize, defect: GeometryDefect) -> Self {
        Self {
            index,
            geometry: Err(defect),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: AttributeValue) -> Self {
        self.attributes.push((key.to_string(), value));
        self
    }
}
