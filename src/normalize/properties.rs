use std::collections::HashSet;

use serde_json::{Map, Number, Value};

use crate::error::UnsupportedPropertyTypeError;
use crate::geofile::feature::AttributeValue;

/// Turn a raw attribute list into a JSON object.
///
/// DBF field names can be blank, those become `field_<position>`, suffixed with
/// `_<n>` when the record already uses that name. Every value must be
/// representable as JSON; non-finite reals are not.
pub fn normalize_properties(
    index: usize,
    attributes: Vec<(String, AttributeValue)>,
) -> Result<Map<String, Value>, UnsupportedPropertyTypeError> {
    let named: HashSet<String> = attributes
        .iter()
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, _)| key.clone())
        .collect();
    let mut properties = Map::with_capacity(attributes.len());
    for (position, (key, value)) in attributes.into_iter().enumerate() {
        let key = if key.trim().is_empty() {
            unused_name(position, &named, &properties)
        } else {
            key
        };
        let value = attribute_to_json(&value).ok_or_else(|| UnsupportedPropertyTypeError {
            index,
            key: key.clone(),
            value: format!("{:?}", value),
        })?;
        properties.insert(key, value);
    }
    Ok(properties)
}

fn unused_name(position: usize, named: &HashSet<String>, taken: &Map<String, Value>) -> String {
    let base = format!("field_{}", position);
    let mut name = base.clone();
    let mut suffix = 0;
    while named.contains(&name) || taken.contains_key(&name) {
        suffix += 1;
        name = format!("{}_{}", base, suffix);
    }
    name
}

fn attribute_to_json(value: &AttributeValue) -> Option<Value> {
    Some(match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Integer(value) => Value::from(*value),
        AttributeValue::Real(value) => Value::Number(Number::from_f64(*value)?),
        AttributeValue::Text(value) => Value::String(value.clone()),
        AttributeValue::IntegerList(values) => {
            Value::Array(values.iter().map(|value| Value::from(*value)).collect())
        }
        AttributeValue::RealList(values) => Value::Array(
            values
                .iter()
                .map(|value| Number::from_f64(*value).map(Value::Number))
                .collect::<Option<Vec<Value>>>()?,
        ),
        AttributeValue::TextList(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
    })
}
