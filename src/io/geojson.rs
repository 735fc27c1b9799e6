//! GeoJSON FeatureCollection reader for polygon units.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail, ensure};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;

/// A polygon feature keyed by an id property.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFeature {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

pub fn read_geojson(path: &Path, id_field: &str) -> Result<Vec<GeoFeature>> {
    let bytes = fs::read(path)
        .with_context(|| format!("[io::geojson] Failed to read {}", path.display()))?;
    read_geojson_bytes(&bytes, id_field)
        .with_context(|| format!("[io::geojson] Failed to load {}", path.display()))
}

/// Parse a FeatureCollection of Polygon / MultiPolygon features.
pub fn read_geojson_bytes(bytes: &[u8], id_field: &str) -> Result<Vec<GeoFeature>> {
    let value: Value = serde_json::from_slice(bytes).context("[io::geojson] Failed to parse GeoJSON")?;
    ensure!(value["type"] == "FeatureCollection", "[io::geojson] Expected a FeatureCollection");
    let features = value["features"].as_array()
        .ok_or_else(|| anyhow!("[io::geojson] FeatureCollection has no features array"))?;

    features.iter().enumerate()
        .map(|(i, feature)| {
            let id = match &feature["properties"][id_field] {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => bail!("[io::geojson] Feature {i} has no '{id_field}' property"),
            };
            let geometry = parse_geometry(&feature["geometry"])
                .with_context(|| format!("[io::geojson] Feature '{id}'"))?;
            Ok(GeoFeature { id, geometry })
        })
        .collect()
}

fn parse_geometry(geometry: &Value) -> Result<MultiPolygon<f64>> {
    let coords = geometry["coordinates"].as_array()
        .ok_or_else(|| anyhow!("geometry has no coordinates"))?;
    match geometry["type"].as_str() {
        Some("Polygon") => Ok(MultiPolygon(vec![parse_polygon(coords)?])),
        Some("MultiPolygon") => coords.iter()
            .map(|p| p.as_array().ok_or_else(|| anyhow!("polygon is not an array")).and_then(|p| parse_polygon(p)))
            .collect::<Result<Vec<_>>>()
            .map(MultiPolygon),
        other => bail!("unsupported geometry type {other:?}"),
    }
}

/// First ring is the exterior, the rest are holes.
fn parse_polygon(rings: &[Value]) -> Result<Polygon<f64>> {
    let mut rings = rings.iter().map(|ring| {
        ring.as_array().ok_or_else(|| anyhow!("ring is not an array")).and_then(|r| parse_ring(r))
    });
    let exterior = rings.next().ok_or_else(|| anyhow!("polygon has no exterior ring"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(coords: &[Value]) -> Result<LineString<f64>> {
    let mut points = coords.iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => bail!("coordinate is not numeric"),
            },
            _ => bail!("coordinate needs two values"),
        })
        .collect::<Result<Vec<_>>>()?;

    // Ensure ring is closed
    if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
        if first != last {
            points.push(first);
        }
    }
    Ok(LineString(points))
}
