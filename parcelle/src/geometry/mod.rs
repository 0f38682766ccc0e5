//! Géométrie des parcelles: extraction polygonale, projection plane et surfaces

mod ellipsoid;
pub mod enclaves;
pub mod lambert;

use geo::{Area, BooleanOps, BoundingRect, CoordsIter, Geometry, Intersects, MapCoords, MultiPolygon};

use crate::ParcelleError;

/// SRID des géométries échangées (WGS84)
pub const WGS84_SRID: u32 = 4326;

/// SRID plan utilisé pour les surfaces exactes (Lambert 93)
pub const LAMBERT93_SRID: u32 = 2154;

/// Géométrie polygonale d'une parcelle, en WGS84 et en Lambert 93
#[derive(Debug, Clone)]
pub struct ParcelShape {
    label: String,
    wgs84: MultiPolygon<f64>,
    planar: MultiPolygon<f64>,
}

impl ParcelShape {
    /// Construit la forme d'une parcelle depuis une géométrie WGS84.
    ///
    /// Seules les parties polygonales sont conservées. Une géométrie sans
    /// polygone ou hors des bornes WGS84 est rejetée.
    pub fn from_geometry(label: impl Into<String>, geom: &Geometry<f64>) -> Result<Self, ParcelleError> {
        let label = label.into();
        let wgs84 = polygonal_parts(geom);

        if wgs84.0.is_empty() {
            return Err(ParcelleError::invalid_geometry(label, "no polygonal part"));
        }

        let in_range = wgs84.coords_iter().all(|c| {
            c.x.is_finite()
                && c.y.is_finite()
                && (-180.0..=180.0).contains(&c.x)
                && (-90.0..=90.0).contains(&c.y)
        });
        if !in_range {
            return Err(ParcelleError::invalid_geometry(
                label,
                "coordinates outside WGS84 bounds",
            ));
        }

        Ok(Self::from_wgs84(label, wgs84))
    }

    pub(crate) fn from_wgs84(label: String, wgs84: MultiPolygon<f64>) -> Self {
        let planar = project_lambert93(&wgs84);
        Self {
            label,
            wgs84,
            planar,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Polygones en WGS84 (EPSG:4326)
    pub fn wgs84(&self) -> &MultiPolygon<f64> {
        &self.wgs84
    }

    /// Polygones en Lambert 93 (EPSG:2154)
    pub fn planar(&self) -> &MultiPolygon<f64> {
        &self.planar
    }

    /// Surface plane en m²
    pub fn planar_area_m2(&self) -> f64 {
        self.planar.unsigned_area()
    }

    pub fn to_geometry(&self) -> Geometry<f64> {
        Geometry::MultiPolygon(self.wgs84.clone())
    }
}

/// Extrait les parties polygonales d'une géométrie (équivalent de
/// `ST_CollectionExtract(g, 3)`)
pub fn polygonal_parts(geom: &Geometry<f64>) -> MultiPolygon<f64> {
    let mut polygons = Vec::new();
    collect_polygons(geom, &mut polygons);
    MultiPolygon::new(polygons)
}

fn collect_polygons(geom: &Geometry<f64>, out: &mut Vec<geo::Polygon<f64>>) {
    match geom {
        Geometry::Polygon(p) => out.push(p.clone()),
        Geometry::MultiPolygon(mp) => out.extend(mp.0.iter().cloned()),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in gc.0.iter() {
                collect_polygons(g, out);
            }
        }
        _ => {}
    }
}

/// WGS84 → Lambert 93
pub fn project_lambert93<G>(geom: &G) -> G
where
    G: MapCoords<f64, f64, Output = G>,
{
    geom.map_coords(lambert::forward)
}

/// Lambert 93 → WGS84
pub fn unproject_lambert93<G>(geom: &G) -> G
where
    G: MapCoords<f64, f64, Output = G>,
{
    geom.map_coords(lambert::inverse)
}

/// Pré-filtre sur les emprises (équivalent de l'opérateur `&&`)
pub fn bbox_intersects<A, B>(a: &A, b: &B) -> bool
where
    A: BoundingRect<f64>,
    B: BoundingRect<f64>,
    A::Output: Into<Option<geo::Rect<f64>>>,
    B::Output: Into<Option<geo::Rect<f64>>>,
{
    match (a.bounding_rect().into(), b.bounding_rect().into()) {
        (Some(ra), Some(rb)) => ra.intersects(&rb),
        _ => false,
    }
}

/// Surface de l'intersection de deux multipolygones plans (m²)
pub fn intersection_area(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    if !bbox_intersects(a, b) {
        return 0.0;
    }
    a.intersection(b).unsigned_area()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use geo::{polygon, Geometry, Polygon};

    /// Carré WGS84 de côté `size` degrés, coin bas-gauche (lon, lat)
    pub fn square(lon: f64, lat: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: lon, y: lat),
            (x: lon + size, y: lat),
            (x: lon + size, y: lat + size),
            (x: lon, y: lat + size),
            (x: lon, y: lat),
        ]
    }

    pub fn square_geom(lon: f64, lat: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(square(lon, lat, size))
    }
}
