//! Reading and writing, organized by format.
//!
//! - `geojson` - polygon units from a FeatureCollection
//! - `table` - CSV entity tables, the unit join, and GWR coefficient tables
//! - `weights` - JSON triples for weight matrices
//! - `csr` - compact binary CSR for weight matrices
//! - `results` - JSON reports for model and batch output

mod csr;
mod geojson;
mod results;
mod table;
mod weights;

pub use csr::{read_weights_bytes, read_weights_file, write_weights_bytes, write_weights_file};
pub use geojson::{read_geojson, read_geojson_bytes, GeoFeature};
pub use results::{write_batch_report, write_json, BatchDocument, GwrRecord, ModelRecord, Outcome, SpecificationRecord};
pub use table::{gwr_frame, join_dataset, read_table, table_from_frame, write_gwr_table, EntityTable};
pub use weights::{read_weights, read_weights_json, write_weights, write_weights_json, WeightEntry, WeightsDocument};
