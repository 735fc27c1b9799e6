//! Entity tables (CSV via polars) and their join with unit geometries.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use anyhow::{Context, Result, bail, ensure};
use log::debug;
use polars::{frame::DataFrame, io::{SerReader, SerWriter}, prelude::{Column, CsvReadOptions, CsvWriter, DataType, Field, NamedFrom, Schema}, series::Series};

use crate::data::{Dataset, SpatialUnit};
use crate::gwr::{GwrRow, GwrTable};
use crate::io::GeoFeature;

/// Numeric columns of an entity table keyed by unit id. Null cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTable {
    pub ids: Vec<String>,
    pub columns: BTreeMap<String, Vec<Option<f64>>>,
}

/// Read a CSV entity table. The id column is read as text so leading zeros
/// survive; other columns are kept when they cast to numbers.
pub fn read_table(path: &Path, id_field: &str) -> Result<EntityTable> {
    let file = File::open(path)
        .with_context(|| format!("[io::table] Failed to open CSV file: {}", path.display()))?;
    let schema = Arc::new(Schema::from_iter([Field::new(id_field.into(), DataType::String)]));
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(schema))
        .into_reader_with_file_handle(file)
        .finish()
        .with_context(|| format!("[io::table] Failed to read CSV from {:?}", path))?;
    table_from_frame(&df, id_field)
}

pub fn table_from_frame(df: &DataFrame, id_field: &str) -> Result<EntityTable> {
    let ids = df.column(id_field)
        .with_context(|| format!("[io::table] Missing id column '{id_field}'"))?
        .cast(&DataType::String)?;
    let ids = ids.str()?.into_iter()
        .enumerate()
        .map(|(row, id)| match id {
            Some(id) => Ok(id.to_string()),
            None => bail!("[io::table] Row {row} has no '{id_field}'"),
        })
        .collect::<Result<Vec<_>>>()?;

    let mut columns = BTreeMap::new();
    for name in df.get_column_names().into_iter().map(|s| s.to_string()).filter(|s| s != id_field) {
        let column = df.column(&name)?;
        if !column.dtype().is_primitive_numeric() {
            debug!("[io::table] Skipping non-numeric column '{name}'");
            continue;
        }
        let values = column.cast(&DataType::Float64)?;
        columns.insert(name, values.f64()?.into_iter().collect::<Vec<_>>());
    }
    Ok(EntityTable { ids, columns })
}

/// Join features with table rows by id into a dataset, in feature order.
/// `weight_column` names the per-unit sampling weight, if any.
pub fn join_dataset(features: Vec<GeoFeature>, table: &EntityTable, weight_column: Option<&str>) -> Result<Dataset> {
    let mut rows = AHashMap::with_capacity(table.ids.len());
    for (row, id) in table.ids.iter().enumerate() {
        ensure!(rows.insert(id.as_str(), row).is_none(), "[io::table] Duplicate table id '{id}'");
    }

    let unmatched_features = features.iter()
        .filter(|f| !rows.contains_key(f.id.as_str()))
        .map(|f| f.id.clone())
        .collect::<Vec<_>>();
    ensure!(unmatched_features.is_empty(), "[io::table] Geometries without table rows: {}", unmatched_features.join(", "));
    let geometry_ids = features.iter().map(|f| f.id.as_str()).collect::<ahash::AHashSet<_>>();
    let unmatched_rows = table.ids.iter()
        .filter(|id| !geometry_ids.contains(id.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    ensure!(unmatched_rows.is_empty(), "[io::table] Table rows without geometry: {}", unmatched_rows.join(", "));

    if let Some(name) = weight_column {
        ensure!(table.columns.contains_key(name), "[io::table] Weight column '{name}' not found");
    }

    let units = features.into_iter()
        .map(|feature| {
            let row = rows[feature.id.as_str()];
            let mut unit = SpatialUnit::new(feature.id, feature.geometry);
            for (name, values) in &table.columns {
                match (values[row], Some(name.as_str()) == weight_column) {
                    (Some(v), true) => unit = unit.with_weight(v),
                    (Some(v), false) => unit = unit.with_value(name.clone(), v),
                    (None, _) => {}
                }
            }
            unit
        })
        .collect();
    Dataset::new(units).context("[io::table] Failed to build dataset")
}

/// Per-unit GWR estimates as a DataFrame, columns in `GwrTable::headers` order.
pub fn gwr_frame(table: &GwrTable) -> Result<DataFrame> {
    fn values(rows: &[GwrRow], f: impl Fn(&GwrRow) -> f64) -> Vec<f64> { rows.iter().map(f).collect() }

    let headers = table.headers();
    let p = table.names.len();
    let rows = &table.rows;

    let mut columns: Vec<Column> = Vec::with_capacity(headers.len());
    columns.push(Series::new("id".into(), rows.iter().map(|r| r.id.clone()).collect::<Vec<_>>()).into());
    for k in 0..p {
        columns.push(Series::new(headers[1 + k].as_str().into(), values(rows, |r| r.coefficients[k])).into());
    }
    for k in 0..p {
        columns.push(Series::new(headers[1 + p + k].as_str().into(), values(rows, |r| r.std_errors[k])).into());
    }
    columns.push(Series::new("local_r2".into(), values(rows, |r| r.local_r2)).into());
    columns.push(Series::new("leverage".into(), values(rows, |r| r.leverage)).into());
    columns.push(Series::new("fitted".into(), values(rows, |r| r.fitted)).into());
    columns.push(Series::new("residual".into(), values(rows, |r| r.residual)).into());
    columns.push(Series::new("failure".into(), rows.iter().map(|r| r.failure.clone()).collect::<Vec<_>>()).into());

    DataFrame::new(columns).context("[io::table] Failed to build GWR frame")
}

pub fn write_gwr_table(table: &GwrTable, path: &Path) -> Result<()> {
    let mut df = gwr_frame(table)?;
    let file = File::create(path)
        .with_context(|| format!("[io::table] Failed to create CSV file: {}", path.display()))?;
    CsvWriter::new(file)
        .finish(&mut df)
        .with_context(|| format!("[io::table] Failed to write CSV to {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, MultiPolygon, Rect};
    use std::io::Write;

    fn feature(id: &str, x: f64) -> GeoFeature {
        let cell = Rect::new(Coord { x, y: 0.0 }, Coord { x: x + 1.0, y: 1.0 }).to_polygon();
        GeoFeature { id: id.to_string(), geometry: MultiPolygon(vec![cell]) }
    }

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_numeric_columns_and_keeps_id_text() {
        let file = write_csv("GEOID,pop,income,name\n01,10,2.5,a\n02,20,,b\n");
        let table = read_table(file.path(), "GEOID").unwrap();
        assert_eq!(table.ids, vec!["01", "02"]);
        assert_eq!(table.columns["pop"], vec![Some(10.0), Some(20.0)]);
        assert_eq!(table.columns["income"], vec![Some(2.5), None]);
        assert!(!table.columns.contains_key("name"));
    }

    #[test]
    fn join_builds_dataset_in_feature_order() {
        let table = EntityTable {
            ids: vec!["b".into(), "a".into()],
            columns: BTreeMap::from([
                ("x".to_string(), vec![Some(2.0), None]),
                ("w".to_string(), vec![Some(0.5), Some(1.5)]),
            ]),
        };
        let data = join_dataset(vec![feature("a", 0.0), feature("b", 1.0)], &table, Some("w")).unwrap();
        assert_eq!(data.ids(), &["a".to_string(), "b".to_string()]);
        assert!(data.variable("x").unwrap()[0].is_nan());
        assert_eq!(data.variable("x").unwrap()[1], 2.0);
        assert_eq!(data.weights(), &[Some(1.5), Some(0.5)]);
        assert!(data.variable("w").is_none());
    }

    #[test]
    fn gwr_table_is_written_with_headers() {
        let table = GwrTable {
            names: vec!["(Intercept)".into(), "x".into()],
            rows: vec![
                GwrRow { id: "a".into(), coefficients: vec![1.0, 2.0], std_errors: vec![0.1, 0.2], local_r2: 0.9, leverage: 0.3, fitted: 3.0, residual: 0.5, failure: None },
                GwrRow { id: "b".into(), coefficients: vec![f64::NAN; 2], std_errors: vec![f64::NAN; 2], local_r2: f64::NAN, leverage: f64::NAN, fitted: f64::NAN, residual: f64::NAN, failure: Some("singular".into()) },
            ],
        };
        let df = gwr_frame(&table).unwrap();
        let names = df.get_column_names().into_iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(names, table.headers());
        assert_eq!(df.height(), 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gwr.csv");
        write_gwr_table(&table, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,(Intercept),x,se_(Intercept),se_x,local_r2"));
        assert!(text.contains("singular"));
    }

    #[test]
    fn join_requires_matching_ids() {
        let table = EntityTable { ids: vec!["a".into(), "z".into()], columns: BTreeMap::new() };
        let err = join_dataset(vec![feature("a", 0.0)], &table, None).unwrap_err();
        assert!(err.to_string().contains("z"));
        let err = join_dataset(vec![feature("a", 0.0), feature("b", 1.0)], &EntityTable { ids: vec!["a".into()], columns: BTreeMap::new() }, None).unwrap_err();
        assert!(err.to_string().contains("b"));
    }
}
