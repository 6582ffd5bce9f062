/// Derived products computed from the prepared outputs.
///
/// The preparation jobs write files for the web map; this module reads
/// them back to answer the questions the map asks of a single aquifer.
///
/// Submodules:
/// - `series`: area-weighted anomaly time series for one aquifer.

pub mod series;
