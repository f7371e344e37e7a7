// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

// ===========================================================================
// WGS 84 <-> UTM zone 17N (EPSG:4326 <-> EPSG:32617)
// Transverse Mercator via the Krüger n-series to fourth order (well under a
// millimetre inside the zone).
// ===========================================================================
use geo::Point;

/// A point in UTM 17N metres: x = easting, y = northing.
pub type PlanarPoint = Point<f64>;

pub const WGS84_A: f64 = 6378137.0;
pub const WGS84_F: f64 = 1.0 / 298.257223563;

pub const UTM_SCALE: f64 = 0.9996;
pub const UTM_FALSE_EASTING: f64 = 500_000.0;
pub const UTM_17N_CENTRAL_MERIDIAN: f64 = -81.0;

struct KruegerSeries {
    /// Rectifying radius scaled by k0
    k0_a: f64,
    /// 2 sqrt(n) / (1 + n), the first eccentricity
    e: f64,
    alpha: [f64; 4],
    beta: [f64; 4],
    delta: [f64; 4],
}

fn series() -> KruegerSeries {
    let n = WGS84_F / (2.0 - WGS84_F);
    let n2 = n * n;
    let n3 = n2 * n;
    let n4 = n3 * n;
    let a = WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0);

    KruegerSeries {
        k0_a: UTM_SCALE * a,
        e: 2.0 * n.sqrt() / (1.0 + n),
        alpha: [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0,
            61.0 * n3 / 240.0 - 103.0 * n4 / 140.0,
            49561.0 * n4 / 161280.0,
        ],
        beta: [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0,
            n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0,
            17.0 * n3 / 480.0 - 37.0 * n4 / 840.0,
            4397.0 * n4 / 161280.0,
        ],
        delta: [
            2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3 + 116.0 * n4 / 45.0,
            7.0 * n2 / 3.0 - 8.0 * n3 / 5.0 - 227.0 * n4 / 45.0,
            56.0 * n3 / 15.0 - 136.0 * n4 / 35.0,
            4279.0 * n4 / 630.0,
        ],
    }
}

/// Convert lon/lat (degrees) to UTM 17N easting/northing (metres).
/// Points far outside the zone still convert, with growing distortion.
pub fn geographic_to_planar(p: Point<f64>) -> PlanarPoint {
    let s = series();
    let phi = p.y().to_radians();
    let d_lambda = (p.x() - UTM_17N_CENTRAL_MERIDIAN).to_radians();

    let sin_phi = phi.sin();
    let t = (sin_phi.atanh() - s.e * (s.e * sin_phi).atanh()).sinh();
    let xi_p = t.atan2(d_lambda.cos());
    let eta_p = (d_lambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut easting = eta_p;
    let mut northing = xi_p;
    for (j, alpha) in s.alpha.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        easting += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        northing += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
    }

    Point::new(UTM_FALSE_EASTING + s.k0_a * easting, s.k0_a * northing)
}

/// Inverse of [`geographic_to_planar`].
pub fn planar_to_geographic(p: PlanarPoint) -> Point<f64> {
    let s = series();
    let xi = p.y() / s.k0_a;
    let eta = (p.x() - UTM_FALSE_EASTING) / s.k0_a;

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, beta) in s.beta.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
        eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, delta) in s.delta.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        phi += delta * (k * chi).sin();
    }
    let d_lambda = eta_p.sinh().atan2(xi_p.cos());

    Point::new(
        UTM_17N_CENTRAL_MERIDIAN + d_lambda.to_degrees(),
        phi.to_degrees(),
    )
}

pub fn to_planar(points: &[Point<f64>]) -> Vec<PlanarPoint> {
    points.iter().map(|p| geographic_to_planar(*p)).collect()
}

pub fn to_geographic(points: &[PlanarPoint]) -> Vec<Point<f64>> {
    points.iter().map(|p| planar_to_geographic(*p)).collect()
}

pub fn planar_distance(a: PlanarPoint, b: PlanarPoint) -> f64 {
    (a.x() - b.x()).hypot(a.y() - b.y())
}

/// Arithmetic mean of planar points. `None` for an empty slice.
pub fn planar_centroid(points: &[PlanarPoint]) -> Option<PlanarPoint> {
    if points.is_empty() {
        return None;
    }
    let count = points.len() as f64;
    let (sum_x, sum_y) = points
        .iter()
        .fold((0.0, 0.0), |acc, p| (acc.0 + p.x(), acc.1 + p.y()));
    Some(Point::new(sum_x / count, sum_y / count))
}
