/// Writers for every output format the jobs produce.
///
/// Aquifer table: `parquet` (GeoParquet with `wkb` geometry), `geojson`,
/// `html` (table rows for the web page). GRACE grid: `archive` (NetCDF).
/// The tiled GRACE store lives in `crate::store`.

pub mod archive;
pub mod geojson;
pub mod html;
pub mod parquet;
pub mod wkb;
