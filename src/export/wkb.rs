//! Well-known binary encoding of multipolygons.
//!
//! Little-endian ISO WKB, 2D only. Used for the GeoParquet geometry column.

use geo::{Coord, LineString, MultiPolygon, Polygon};

const LITTLE_ENDIAN: u8 = 1;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOLYGON: u32 = 6;

pub fn encode_multipolygon(mp: &MultiPolygon<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(LITTLE_ENDIAN);
    out.extend_from_slice(&WKB_MULTIPOLYGON.to_le_bytes());
    out.extend_from_slice(&(mp.0.len() as u32).to_le_bytes());
    for polygon in &mp.0 {
        out.push(LITTLE_ENDIAN);
        out.extend_from_slice(&WKB_POLYGON.to_le_bytes());
        let rings = 1 + polygon.interiors().len();
        out.extend_from_slice(&(rings as u32).to_le_bytes());
        write_ring(&mut out, polygon.exterior());
        for hole in polygon.interiors() {
            write_ring(&mut out, hole);
        }
    }
    out
}

fn write_ring(out: &mut Vec<u8>, ring: &LineString<f64>) {
    out.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
    for c in &ring.0 {
        out.extend_from_slice(&c.x.to_le_bytes());
        out.extend_from_slice(&c.y.to_le_bytes());
    }
}

/// Decodes a WKB `Polygon` or `MultiPolygon` in either byte order.
///
/// Returns `None` for other geometry types or truncated input.
pub fn decode_multipolygon(bytes: &[u8]) -> Option<MultiPolygon<f64>> {
    let mut cursor = Cursor { bytes, pos: 0, little: true };
    let kind = cursor.header()?;
    let mp = match kind {
        WKB_POLYGON => MultiPolygon(vec![cursor.polygon_body()?]),
        WKB_MULTIPOLYGON => {
            let count = cursor.u32()?;
            let mut polygons = Vec::with_capacity(cursor.capacity_for(count, 13));
            for _ in 0..count {
                if cursor.header()? != WKB_POLYGON {
                    return None;
                }
                polygons.push(cursor.polygon_body()?);
            }
            MultiPolygon(polygons)
        }
        _ => return None,
    };
    (cursor.pos == bytes.len()).then_some(mp)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    little: bool,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let slice = self.bytes.get(self.pos..self.pos + N)?;
        self.pos += N;
        slice.try_into().ok()
    }

    /// Counts come from the input; never reserve more items than the
    /// remaining bytes could hold at `min_size` bytes each.
    fn capacity_for(&self, count: u32, min_size: usize) -> usize {
        let remaining = self.bytes.len().saturating_sub(self.pos);
        (count as usize).min(remaining / min_size)
    }

    fn header(&mut self) -> Option<u32> {
        let [order] = self.take::<1>()?;
        self.little = order == LITTLE_ENDIAN;
        self.u32()
    }

    fn u32(&mut self) -> Option<u32> {
        let raw = self.take::<4>()?;
        Some(if self.little { u32::from_le_bytes(raw) } else { u32::from_be_bytes(raw) })
    }

    fn f64(&mut self) -> Option<f64> {
        let raw = self.take::<8>()?;
        Some(if self.little { f64::from_le_bytes(raw) } else { f64::from_be_bytes(raw) })
    }

    fn polygon_body(&mut self) -> Option<Polygon<f64>> {
        let rings = self.u32()?;
        let mut lines = Vec::with_capacity(self.capacity_for(rings, 4));
        for _ in 0..rings {
            let points = self.u32()?;
            let mut coords = Vec::with_capacity(self.capacity_for(points, 16));
            for _ in 0..points {
                coords.push(Coord { x: self.f64()?, y: self.f64()? });
            }
            lines.push(LineString(coords));
        }
        let mut lines = lines.into_iter();
        let exterior = lines.next().unwrap_or_else(|| LineString(Vec::new()));
        Some(Polygon::new(exterior, lines.collect()))
    }
}
