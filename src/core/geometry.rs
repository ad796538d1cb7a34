use crate::types::GeoPoint;

/// WGS84 semi-major axis (meters)
pub const WGS84_A: f64 = 6378137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257223563;

const MAX_ITERATIONS: usize = 200;
const CONVERGENCE: f64 = 1e-12;

/// Geographic corners enclosing a POI footprint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingCorners {
    pub top_left: GeoPoint,
    pub bottom_right: GeoPoint,
}

/// Distance from the footprint center to its corners
pub fn half_diagonal(width_m: f64, height_m: f64) -> f64 {
    ((width_m / 2.0).powi(2) + (height_m / 2.0).powi(2)).sqrt()
}

/// Corners of the crop box for a footprint centered on `center`.
///
/// Both corners lie at the half diagonal from the center, north-west (315°)
/// and south-east (135°). For non-square footprints this box is larger than
/// the footprint itself; the margin is kept.
pub fn bounding_corners(center: GeoPoint, width_m: f64, height_m: f64) -> BoundingCorners {
    let distance = half_diagonal(width_m, height_m);
    BoundingCorners {
        top_left: destination(center, 315.0, distance),
        bottom_right: destination(center, 135.0, distance),
    }
}

/// Geodesic forward problem on the WGS84 ellipsoid (Vincenty's direct formula).
///
/// Returns the point reached from `start` after `distance_m` meters along the
/// geodesic leaving at `azimuth_deg` (clockwise from north). Longitude is
/// normalized to [-180, 180).
pub fn destination(start: GeoPoint, azimuth_deg: f64, distance_m: f64) -> GeoPoint {
    let a = WGS84_A;
    let f = WGS84_F;
    let b = (1.0 - f) * a;

    let alpha1 = azimuth_deg.to_radians();
    let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();

    let tan_u1 = (1.0 - f) * start.lat.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;

    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
    let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let mut sigma = distance_m / (b * big_a);
    let mut cos_2sigma_m;
    let mut sin_sigma;
    let mut cos_sigma;
    let mut iterations = 0;
    loop {
        cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        sin_sigma = sigma.sin();
        cos_sigma = sigma.cos();
        let delta_sigma = big_b
            * sin_sigma
            * (cos_2sigma_m
                + big_b / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                        - big_b / 6.0
                            * cos_2sigma_m
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
        let previous = sigma;
        sigma = distance_m / (b * big_a) + delta_sigma;
        iterations += 1;
        if (sigma - previous).abs() < CONVERGENCE || iterations >= MAX_ITERATIONS {
            break;
        }
    }
    cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
    sin_sigma = sigma.sin();
    cos_sigma = sigma.cos();

    let x = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - f) * (sin_alpha * sin_alpha + x * x).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * f
            * sin_alpha
            * (sigma + c * sin_sigma * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

    let lon2 = (start.lon + l.to_degrees() + 180.0).rem_euclid(360.0) - 180.0;
    GeoPoint::new(lat2.to_degrees(), lon2)
}

/// Rectangular pixel region of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    /// Smallest whole-pixel window enclosing the box spanned by two native-CRS points,
    /// clipped to the raster extent. `None` when the box misses the raster entirely
    /// or the geotransform is degenerate.
    pub fn enclosing(
        geo_transform: &[f64; 6],
        raster_size: (usize, usize),
        a: (f64, f64),
        b: (f64, f64),
    ) -> Option<PixelWindow> {
        let gt = geo_transform;
        let det = gt[1] * gt[5] - gt[2] * gt[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let to_pixel = |x: f64, y: f64| -> (f64, f64) {
            let dx = x - gt[0];
            let dy = y - gt[3];
            ((gt[5] * dx - gt[2] * dy) / det, (gt[1] * dy - gt[4] * dx) / det)
        };

        let (x_min, x_max) = (a.0.min(b.0), a.0.max(b.0));
        let (y_min, y_max) = (a.1.min(b.1), a.1.max(b.1));
        let corners = [
            to_pixel(x_min, y_min),
            to_pixel(x_min, y_max),
            to_pixel(x_max, y_min),
            to_pixel(x_max, y_max),
        ];

        let col_min = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min).floor();
        let col_max = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max).ceil();
        let row_min = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min).floor();
        let row_max = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max).ceil();
        if ![col_min, col_max, row_min, row_max].iter().all(|v| v.is_finite()) {
            return None;
        }

        let (width, height) = (raster_size.0 as f64, raster_size.1 as f64);
        let col_start = col_min.max(0.0);
        let col_end = col_max.min(width);
        let row_start = row_min.max(0.0);
        let row_end = row_max.min(height);
        if col_end <= col_start || row_end <= row_start {
            return None;
        }

        Some(PixelWindow {
            col_off: col_start as usize,
            row_off: row_start as usize,
            width: (col_end - col_start) as usize,
            height: (row_end - row_start) as usize,
        })
    }
}
