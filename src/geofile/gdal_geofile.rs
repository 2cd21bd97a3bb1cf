use anyhow::{anyhow, Context};
use gdal::vector::{FieldValue, LayerAccess, OGRFieldType};
use indicatif::ProgressBar;
use serde_json::Value;
use std::{collections::BTreeMap, path::Path};

use super::feature::Feature;
use crate::crs::crs_utils::epsg_4326;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GdalDriverType {
    #[value(name = "GPKG")]
    GeoPackage,
    #[value(name = "GeoJSON")]
    GeoJson,
    #[value(name = "ESRI Shapefile")]
    EsriShapefile,
}

impl GdalDriverType {
    pub fn name(&self) -> &'static str {
        match self {
            GdalDriverType::GeoPackage => "GPKG",
            GdalDriverType::GeoJson => "GeoJSON",
            GdalDriverType::EsriShapefile => "ESRI Shapefile",
        }
    }
}

/// Write features to a GDAL vector file, one layer named after the file stem.
///
/// With `crs` set to `None` the layer is written without a spatial reference,
/// which for shapefiles means no `.prj` component.
pub fn write_features_to_geofile(
    features: &[Feature],
    output_filepath: &Path,
    crs: Option<&gdal::spatial_ref::SpatialRef>,
    driver: GdalDriverType,
) -> anyhow::Result<()> {
    let gdal_driver = gdal::DriverManager::get_driver_by_name(driver.name())
        .context("Getting GDAL driver")?;

    let first = match features.first() {
        Some(feature) => feature,
        None => return Ok(()),
    };
    let layer_type = {
        use gdal::vector::OGRwkbGeometryType::*;
        match &first.geometry {
            geo::Geometry::Point(_) => wkbPoint,
            geo::Geometry::LineString(_) => wkbLineString,
            geo::Geometry::Polygon(_) => wkbPolygon,
            geo::Geometry::MultiPoint(_) => wkbMultiPoint,
            geo::Geometry::MultiLineString(_) => wkbMultiLineString,
            geo::Geometry::MultiPolygon(_) => wkbMultiPolygon,
            geometry => {
                return Err(anyhow!(
                    "Cannot write geometry type {:?} to file.",
                    geometry
                ))
            }
        }
    };

    // GPKG and GeoJSON layers always carry a CRS, shapefiles only when asked to.
    let crs = match (crs, driver) {
        (Some(crs), _) => Some(crs.clone()),
        (None, GdalDriverType::EsriShapefile) => None,
        (None, _) => Some(epsg_4326()?),
    };
    if let Some(crs) = &crs {
        log::debug!("Using spatial ref {} for writing geofile", crs.name()?);
    }

    let layer_name = output_filepath
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("features");
    let mut dataset = gdal_driver.create_vector_only(output_filepath)?;
    let mut layer = dataset.create_layer(gdal::LayerOptions {
        name: layer_name,
        srs: crs.as_ref(),
        ty: layer_type,
        options: None,
    })?;

    let field_types = get_field_types(features);
    let field_definitions: Vec<(&str, OGRFieldType::Type)> = field_types
        .iter()
        .map(|(name, field_type)| (name.as_str(), *field_type))
        .collect();
    layer.create_defn_fields(&field_definitions)?;

    log::info!(
        "Writing {} features to {:?}",
        features.len(),
        output_filepath
    );
    unsafe {
        // Drivers that support transactions (GeoPackage) commit all features
        // at once, the others ignore this.
        gdal_sys::OGR_L_StartTransaction(layer.c_layer());
    };
    let bar = ProgressBar::new(features.len() as u64);
    for feature in features {
        let wkb = wkb::geom_to_wkb(&feature.geometry)
            .map_err(|err| anyhow!("Could not write geometry to WKB, {:?}", err))?;
        let geometry = gdal::vector::Geometry::from_wkb(&wkb)?;

        let mut field_names = Vec::new();
        let mut values = Vec::new();
        for (key, value) in &feature.properties {
            if let Some(field_value) = json_to_field_value(value) {
                field_names.push(key.as_str());
                values.push(field_value);
            }
        }
        if field_names.is_empty() {
            layer.create_feature(geometry)?;
        } else {
            layer.create_feature_fields(geometry, &field_names, &values)?;
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    unsafe {
        gdal_sys::OGR_L_CommitTransaction(layer.c_layer());
    };
    Ok(())
}

/// Field type per property key over all features. Keys whose values disagree
/// on a numeric type fall back to strings.
fn get_field_types(features: &[Feature]) -> BTreeMap<String, OGRFieldType::Type> {
    let mut field_types = BTreeMap::new();
    for feature in features {
        for (key, value) in &feature.properties {
            let field_type = match value {
                Value::Null => continue,
                Value::Bool(_) => OGRFieldType::OFTInteger,
                Value::Number(number) if number.is_i64() => OGRFieldType::OFTInteger64,
                Value::Number(_) => OGRFieldType::OFTReal,
                _ => OGRFieldType::OFTString,
            };
            field_types
                .entry(key.clone())
                .and_modify(|existing: &mut OGRFieldType::Type| {
                    *existing = widen_field_type(*existing, field_type)
                })
                .or_insert(field_type);
        }
    }
    field_types
}

fn widen_field_type(a: OGRFieldType::Type, b: OGRFieldType::Type) -> OGRFieldType::Type {
    use OGRFieldType::*;
    match (a, b) {
        (a, b) if a == b => a,
        (OFTInteger, OFTInteger64) | (OFTInteger64, OFTInteger) => OFTInteger64,
        (OFTInteger | OFTInteger64, OFTReal) | (OFTReal, OFTInteger | OFTInteger64) => OFTReal,
        _ => OFTString,
    }
}

fn json_to_field_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Null => None,
        Value::Bool(value) => Some(FieldValue::IntegerValue(*value as i32)),
        Value::Number(number) => match number.as_i64() {
            Some(value) => Some(FieldValue::Integer64Value(value)),
            None => number.as_f64().map(FieldValue::RealValue),
        },
        Value::String(value) => Some(FieldValue::StringValue(value.clone())),
        other => Some(FieldValue::StringValue(other.to_string())),
    }
}
