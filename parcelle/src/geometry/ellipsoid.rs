//! Ellipsoïde GRS80 (RGF93, Lambert 93)

pub struct Grs80;

impl Grs80 {
    /// Demi-grand axe en mètres
    pub const A: f64 = 6378137.0;
    /// Aplatissement
    pub const F: f64 = 1.0 / 298.257222101;
    /// Première excentricité au carré
    pub const E2: f64 = 2.0 * Self::F - Self::F * Self::F;
    /// Première excentricité
    pub const E: f64 = 0.0818191910428158; // sqrt(E2)
}
