//! Data preparation for a groundwater web map.
//!
//! Two batch jobs feed the map's static assets:
//! - `aquifers` cleans and dissolves an aquifer polygon shapefile into a
//!   GeoParquet table, a GeoJSON collection and an HTML table fragment.
//! - `grace` adds a time-mean anomaly to a GRACE water-storage grid and
//!   writes a NetCDF archive and a tiled, compressed store.
//!
//! `analysis::series` and `verify` read those outputs back.

pub mod analysis;
pub mod aquifers;
pub mod config;
pub mod export;
pub mod grace;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod projection;
pub mod store;
pub mod verify;
