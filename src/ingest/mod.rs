/// Readers for the raw inputs.
///
/// Submodules:
/// - `polygons`: aquifer polygons and attributes from a shapefile.
/// - `grid`: GRACE `(time, lat, lon)` fields from NetCDF.

pub mod grid;
pub mod polygons;
