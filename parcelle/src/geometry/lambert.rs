//! Projection Lambert 93 (EPSG:2154), conique conforme à 2 parallèles standards
//!
//! Sert aux calculs de surfaces planes faits hors base (store mémoire,
//! découpe des enclaves). Valable pour la métropole.

use std::sync::OnceLock;

use geo::Coord;

use super::ellipsoid::Grs80;

/// Constantes dérivées de la projection
struct Lambert93 {
    lon0: f64,
    x0: f64,
    y0: f64,
    /// Exposant de la projection
    n: f64,
    /// Constante C
    c: f64,
    /// Rayon à l'origine
    r0: f64,
}

impl Lambert93 {
    fn new() -> Self {
        let lon0 = 3.0_f64.to_radians();
        let lat0 = 46.5_f64.to_radians();
        let lat1 = 44.0_f64.to_radians();
        let lat2 = 49.0_f64.to_radians();
        let e = Grs80::E;

        let n1 = grande_normale(lat1);
        let n2 = grande_normale(lat2);
        let iso1 = isometric_latitude(lat1, e);
        let iso2 = isometric_latitude(lat2, e);
        let iso0 = isometric_latitude(lat0, e);

        let n = ((n1 * lat1.cos()).ln() - (n2 * lat2.cos()).ln()) / (iso2 - iso1);
        let c = (n1 * lat1.cos() / n) * (n * iso1).exp();
        let r0 = c * (-n * iso0).exp();

        Self {
            lon0,
            x0: 700000.0,
            y0: 6600000.0,
            n,
            c,
            r0,
        }
    }
}

fn params() -> &'static Lambert93 {
    static PARAMS: OnceLock<Lambert93> = OnceLock::new();
    PARAMS.get_or_init(Lambert93::new)
}

/// Latitude isométrique
fn isometric_latitude(lat: f64, e: f64) -> f64 {
    let sin_lat = lat.sin();
    let term = ((1.0 - e * sin_lat) / (1.0 + e * sin_lat)).powf(e / 2.0);
    ((std::f64::consts::FRAC_PI_4 + lat / 2.0).tan() * term).ln()
}

/// Latitude depuis la latitude isométrique (itératif)
fn latitude_from_isometric(iso_lat: f64, e: f64) -> f64 {
    let mut lat = 2.0 * iso_lat.exp().atan() - std::f64::consts::FRAC_PI_2;

    for _ in 0..10 {
        let sin_lat = lat.sin();
        let term = ((1.0 + e * sin_lat) / (1.0 - e * sin_lat)).powf(e / 2.0);
        let new_lat = 2.0 * (iso_lat.exp() * term).atan() - std::f64::consts::FRAC_PI_2;

        if (new_lat - lat).abs() < 1e-12 {
            return new_lat;
        }
        lat = new_lat;
    }
    lat
}

/// Grande normale
fn grande_normale(lat: f64) -> f64 {
    Grs80::A / (1.0 - Grs80::E2 * lat.sin().powi(2)).sqrt()
}

/// WGS84 (degrés) → Lambert 93 (mètres)
pub fn forward(c: Coord<f64>) -> Coord<f64> {
    let p = params();
    let lon = c.x.to_radians();
    let lat = c.y.to_radians();

    let r = p.c * (-p.n * isometric_latitude(lat, Grs80::E)).exp();
    let gamma = p.n * (lon - p.lon0);

    Coord {
        x: p.x0 + r * gamma.sin(),
        y: p.y0 + p.r0 - r * gamma.cos(),
    }
}

/// Lambert 93 (mètres) → WGS84 (degrés)
pub fn inverse(c: Coord<f64>) -> Coord<f64> {
    let p = params();

    let dx = c.x - p.x0;
    let dy = c.y - p.y0;

    let r = (dx.powi(2) + (p.r0 - dy).powi(2)).sqrt();
    let r = if p.n < 0.0 { -r } else { r };
    let gamma = (dx / (p.r0 - dy)).atan();

    let iso_lat = -(r / p.c).ln() / p.n;
    let lat = latitude_from_isometric(iso_lat, Grs80::E);
    let lon = p.lon0 + gamma / p.n;

    Coord {
        x: lon.to_degrees(),
        y: lat.to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paris_inverse() {
        // Tour Eiffel approximativement
        let c = inverse(Coord {
            x: 648237.0,
            y: 6862107.0,
        });
        assert!((c.x - 2.2945).abs() < 0.01, "lon={}", c.x);
        assert!((c.y - 48.8584).abs() < 0.01, "lat={}", c.y);
    }

    #[test]
    fn test_origin_forward() {
        // L'origine (3°E, 46.5°N) tombe sur les faux est/nord
        let c = forward(Coord { x: 3.0, y: 46.5 });
        assert!((c.x - 700000.0).abs() < 1e-3, "x={}", c.x);
        assert!((c.y - 6600000.0).abs() < 1e-3, "y={}", c.y);
    }

    #[test]
    fn test_latresne_forward_inverse() {
        let wgs = Coord { x: -0.4938, y: 44.7812 };
        let l93 = forward(wgs);
        // Gironde: ~ 425 km E, ~ 6 420 km N
        assert!((l93.x - 425_000.0).abs() < 20_000.0, "x={}", l93.x);
        assert!((l93.y - 6_420_000.0).abs() < 20_000.0, "y={}", l93.y);
        let back = inverse(l93);
        assert!((back.x - wgs.x).abs() < 1e-9);
        assert!((back.y - wgs.y).abs() < 1e-9);
    }
}
