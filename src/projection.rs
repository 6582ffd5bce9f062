//! EPSG:6933 equal-area projection.
//!
//! EASE-Grid 2.0 global: Lambert cylindrical equal-area on the WGS84
//! ellipsoid with standard parallels at ±30°. Only the forward direction is
//! needed; areas measured in projected metres are true ground areas.

use geo::{Area, Coord, MapCoords, MultiPolygon, Polygon};

pub const EQUAL_AREA_EPSG: u32 = 6933;

const SEMI_MAJOR_M: f64 = 6_378_137.0;
const INVERSE_FLATTENING: f64 = 298.257_223_563;
const STANDARD_PARALLEL_DEG: f64 = 30.0;

struct Ellipsoid {
    e: f64,
    e2: f64,
    k0: f64,
}

fn ellipsoid() -> Ellipsoid {
    let f = 1.0 / INVERSE_FLATTENING;
    let e2 = f * (2.0 - f);
    let sin_s = STANDARD_PARALLEL_DEG.to_radians().sin();
    Ellipsoid {
        e: e2.sqrt(),
        e2,
        k0: STANDARD_PARALLEL_DEG.to_radians().cos() / (1.0 - e2 * sin_s * sin_s).sqrt(),
    }
}

/// Authalic `q` term for a latitude in radians.
fn q(el: &Ellipsoid, phi: f64) -> f64 {
    let s = phi.sin();
    let es = el.e * s;
    (1.0 - el.e2) * (s / (1.0 - es * es) - (1.0 / (2.0 * el.e)) * ((1.0 - es) / (1.0 + es)).ln())
}

/// Projects one WGS84 longitude/latitude coordinate (degrees) to metres.
///
/// Latitudes are clamped to ±90°.
pub fn project_coord(c: Coord<f64>) -> Coord<f64> {
    let el = ellipsoid();
    let lambda = c.x.to_radians();
    let phi = c.y.clamp(-90.0, 90.0).to_radians();
    Coord {
        x: SEMI_MAJOR_M * el.k0 * lambda,
        y: SEMI_MAJOR_M * q(&el, phi) / (2.0 * el.k0),
    }
}

pub fn project_multipolygon(mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    mp.map_coords(project_coord)
}

pub fn project_polygon(p: &Polygon<f64>) -> Polygon<f64> {
    p.map_coords(project_coord)
}

/// Ground area in square metres of a longitude/latitude multipolygon.
pub fn equal_area_m2(mp: &MultiPolygon<f64>) -> f64 {
    project_multipolygon(mp).unsigned_area()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Rect, coord};

    fn rect_area_km2(min: Coord<f64>, max: Coord<f64>) -> f64 {
        let poly = Rect::new(min, max).to_polygon();
        equal_area_m2(&MultiPolygon(vec![poly])) / 1.0e6
    }

    #[test]
    fn test_projection_extent_matches_epsg_6933() {
        let east = project_coord(coord! { x: 180.0, y: 0.0 });
        assert!((east.x - 17_367_530.45).abs() < 1.0, "x = {}", east.x);
        assert_eq!(east.y, 0.0);

        let north = project_coord(coord! { x: 0.0, y: 86.0 });
        let south = project_coord(coord! { x: 0.0, y: -86.0 });
        assert!((north.y + south.y).abs() < 1e-6);
        assert!(north.y > 7_000_000.0 && north.y < 7_350_000.0);
    }

    #[test]
    fn test_whole_globe_has_authalic_area() {
        let area = rect_area_km2(coord! { x: -180.0, y: -90.0 }, coord! { x: 180.0, y: 90.0 });
        let expected = 510_065_622.0;
        assert!((area - expected).abs() / expected < 1e-4, "area = {}", area);
    }

    #[test]
    fn test_one_degree_cell_at_equator() {
        let area = rect_area_km2(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        assert!((area - 12_308.0).abs() < 60.0, "area = {}", area);
    }

    #[test]
    fn test_cells_shrink_toward_the_pole() {
        let equator = rect_area_km2(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        let sixty = rect_area_km2(coord! { x: 0.0, y: 60.0 }, coord! { x: 1.0, y: 61.0 });
        assert!(sixty < equator * 0.52 && sixty > equator * 0.46);
    }
}
