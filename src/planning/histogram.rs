//! Polar obstacle histogram.
//!
//! Obstacles are binned into a 2D polar grid (elevation × azimuth) around
//! the vehicle. Each planning tick builds a fresh histogram from the
//! cropped cloud; cells that have rotated out of the camera field of view
//! are backfilled from a coarser histogram propagated out of the previous
//! tick, so the vehicle does not forget an obstacle the moment it yaws
//! away from it.

use crate::core::geometry::{
    cartesian_to_polar, histogram_index_to_polar, polar_to_cartesian, polar_to_histogram_index,
    Vec3,
};
use crate::planning::cloud::FilteredCloud;

/// Histogram angular resolution in degrees. Must divide 180 and be even.
pub const ALPHA_RES: usize = 6;
/// Number of elevation rows at [`ALPHA_RES`].
pub const GRID_LENGTH_E: usize = 180 / ALPHA_RES;
/// Number of azimuth columns at [`ALPHA_RES`].
pub const GRID_LENGTH_Z: usize = 360 / ALPHA_RES;

/// Reprojected points closer than this to the vehicle are discarded.
const MIN_REPROJECTION_DIST: f32 = 0.3;

/// Distance/age grid over polar directions.
///
/// A cell distance of 0 means empty; ages count planner ticks since the
/// underlying observation was made.
#[derive(Debug, Clone)]
pub struct Histogram {
    resolution: usize,
    n_e: usize,
    n_z: usize,
    dist: Vec<f32>,
    age: Vec<i32>,
}

impl Histogram {
    /// Create an empty histogram at `resolution` degrees per cell.
    pub fn new(resolution: usize) -> Self {
        let n_e = 180 / resolution;
        let n_z = 360 / resolution;
        Self {
            resolution,
            n_e,
            n_z,
            dist: vec![0.0; n_e * n_z],
            age: vec![0; n_e * n_z],
        }
    }

    /// Cell resolution in degrees.
    #[inline]
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Number of elevation rows.
    #[inline]
    pub fn n_e(&self) -> usize {
        self.n_e
    }

    /// Number of azimuth columns.
    #[inline]
    pub fn n_z(&self) -> usize {
        self.n_z
    }

    /// Distance stored at cell (e, z), 0 when empty.
    #[inline]
    pub fn get_dist(&self, e: usize, z: usize) -> f32 {
        self.dist[e * self.n_z + z]
    }

    /// Write the distance of cell (e, z).
    #[inline]
    pub fn set_dist(&mut self, e: usize, z: usize, dist: f32) {
        self.dist[e * self.n_z + z] = dist;
    }

    /// Age of the observation in cell (e, z), in planner ticks.
    #[inline]
    pub fn get_age(&self, e: usize, z: usize) -> i32 {
        self.age[e * self.n_z + z]
    }

    /// Write the age of cell (e, z).
    #[inline]
    pub fn set_age(&mut self, e: usize, z: usize, age: i32) {
        self.age[e * self.n_z + z] = age;
    }

    /// Every cell empty.
    pub fn is_empty(&self) -> bool {
        self.dist.iter().all(|&d| d == 0.0)
    }

    /// Reset all cells to empty.
    pub fn set_zero(&mut self) {
        self.dist.fill(0.0);
        self.age.fill(0);
    }
}

/// The set of histogram cells covered by the camera field of view at the
/// current attitude.
#[derive(Debug, Clone, Default)]
pub struct Fov {
    /// Azimuth indices (at [`ALPHA_RES`]) inside the horizontal FOV
    pub z_idx: Vec<usize>,
    /// Exclusive lower elevation index bound
    pub e_min: i32,
    /// Exclusive upper elevation index bound
    pub e_max: i32,
}

impl Fov {
    /// Cell (e, z) lies inside the field of view.
    #[inline]
    pub fn contains(&self, e: usize, z: usize) -> bool {
        let e = e as i32;
        e > self.e_min && e < self.e_max && self.z_idx.contains(&z)
    }
}

/// Compute the histogram cells covered by a camera with the given
/// horizontal/vertical FOV (degrees) at the given yaw/pitch (radians,
/// FCU frame). Handles the azimuth wrap at ±180°.
pub fn calculate_fov(h_fov_deg: f32, v_fov_deg: f32, yaw: f32, pitch: f32) -> Fov {
    let alpha = ALPHA_RES as f32;
    let yaw_deg = -yaw.to_degrees();
    let pitch_deg = -pitch.to_degrees();

    let mut z_max = ((yaw_deg + h_fov_deg / 2.0 + 270.0) / alpha).round() as i32 - 1;
    let mut z_min = ((yaw_deg - h_fov_deg / 2.0 + 270.0) / alpha).round() as i32 - 1;
    let e_max = ((pitch_deg + v_fov_deg / 2.0 + 90.0) / alpha).round() as i32 - 1;
    let e_min = ((pitch_deg - v_fov_deg / 2.0 + 90.0) / alpha).round() as i32 - 1;

    let n_z = GRID_LENGTH_Z as i32;
    if z_max >= n_z && z_min >= n_z {
        z_max -= n_z;
        z_min -= n_z;
    }
    if z_max < 0 && z_min < 0 {
        z_max += n_z;
        z_min += n_z;
    }

    let mut z_idx = Vec::new();
    if z_max >= n_z && z_min < n_z {
        for i in 0..(z_max - n_z) {
            z_idx.push(i as usize);
        }
        for i in z_min..n_z {
            z_idx.push(i as usize);
        }
    } else if z_min < 0 && z_max >= 0 {
        for i in 0..z_max {
            z_idx.push(i as usize);
        }
        for i in (z_min + n_z)..n_z {
            z_idx.push(i as usize);
        }
    } else {
        for i in z_min..z_max {
            z_idx.push(i as usize);
        }
    }

    Fov {
        z_idx,
        e_min,
        e_max,
    }
}

/// Bin the cropped cloud into `hist` as seen from `position`.
///
/// Each cell keeps the nearest contributing point; fresh cells get age 0.
pub fn generate_new_histogram(hist: &mut Histogram, cloud: &FilteredCloud, position: &Vec3) {
    for p in &cloud.points {
        let p_pol = cartesian_to_polar(p, position);
        let (e, z) = polar_to_histogram_index(&p_pol, hist.resolution());

        let current = hist.get_dist(e, z);
        if current == 0.0 || p_pol.r < current {
            hist.set_dist(e, z, p_pol.r);
            hist.set_age(e, z, 0);
        }
    }
}

/// Reconstruct Cartesian points from the previous tick's histogram.
///
/// Each non-empty cell emits its four corners (±res/2 around the cell
/// center) cast from the *previous* vehicle position. Points are kept when
/// their distance to the current position is inside
/// (`MIN_REPROJECTION_DIST`, 2·`box_radius`) and the cell age is below
/// `reproj_age`. Returns the points with a parallel age array.
pub fn reproject_points(
    prev_hist: &Histogram,
    prev_position: &Vec3,
    position: &Vec3,
    box_radius: f32,
    reproj_age: i32,
) -> (Vec<Vec3>, Vec<i32>) {
    let half_res = (prev_hist.resolution() / 2) as f32;
    let corner_offsets = [
        (half_res, half_res),
        (-half_res, half_res),
        (half_res, -half_res),
        (-half_res, -half_res),
    ];

    let mut points = Vec::new();
    let mut ages = Vec::new();

    for e in 0..prev_hist.n_e() {
        for z in 0..prev_hist.n_z() {
            let dist = prev_hist.get_dist(e, z);
            if dist <= f32::MIN_POSITIVE {
                continue;
            }
            let age = prev_hist.get_age(e, z);
            let center = histogram_index_to_polar(e, z, prev_hist.resolution(), dist);

            for (de, dz) in corner_offsets {
                let mut corner = center;
                corner.e += de;
                corner.z += dz;
                let p = polar_to_cartesian(&corner, prev_position);
                let d = position.distance(&p);

                if d < 2.0 * box_radius && d > MIN_REPROJECTION_DIST && age < reproj_age {
                    points.push(p);
                    ages.push(age);
                }
            }
        }
    }

    (points, ages)
}

/// Bin reprojected points into a coarser histogram (built at 2·α) so
/// stale observations fill FOV gaps without dominating fresh data.
///
/// Per cell the nearest contributor wins and the age advances by one tick
/// over the stalest contributor.
pub fn propagate_histogram(
    hist: &mut Histogram,
    points: &[Vec3],
    ages: &[i32],
    position: &Vec3,
) {
    debug_assert_eq!(points.len(), ages.len());

    for (p, &age) in points.iter().zip(ages) {
        let p_pol = cartesian_to_polar(p, position);
        let (e, z) = polar_to_histogram_index(&p_pol, hist.resolution());

        let current = hist.get_dist(e, z);
        if current == 0.0 || p_pol.r < current {
            hist.set_dist(e, z, p_pol.r);
        }
        if age + 1 > hist.get_age(e, z) {
            hist.set_age(e, z, age + 1);
        }
    }
}

/// Backfill `new_hist` cells that are empty *and* outside the current FOV
/// from the propagated (coarser) histogram. Cells inside the FOV are
/// trusted as observed this tick and never overwritten.
///
/// Returns whether the combined histogram is entirely empty.
pub fn combine_histogram(new_hist: &mut Histogram, propagated: &Histogram, fov: &Fov) -> bool {
    let mut empty = true;

    for e in 0..new_hist.n_e() {
        for z in 0..new_hist.n_z() {
            if !fov.contains(e, z) && new_hist.get_dist(e, z) == 0.0 {
                let coarse = propagated.get_dist(e / 2, z / 2);
                if coarse > 0.0 {
                    new_hist.set_dist(e, z, coarse);
                    new_hist.set_age(e, z, propagated.get_age(e / 2, z / 2));
                }
            }
            if new_hist.get_dist(e, z) > 0.0 {
                empty = false;
            }
        }
    }

    empty
}

/// Collapse the histogram onto elevation row 0 by taking, per azimuth,
/// the nearest distance over all elevation rows. Feeds the 1D obstacle
/// ring shared with the flight controller.
pub fn compress_histogram_elevation(out: &mut Histogram, hist: &Histogram) {
    for z in 0..hist.n_z() {
        let mut min_dist = 0.0f32;
        for e in 0..hist.n_e() {
            let d = hist.get_dist(e, z);
            if d > 0.0 && (min_dist == 0.0 || d < min_dist) {
                min_dist = d;
            }
        }
        if min_dist > 0.0 {
            out.set_dist(0, z, min_dist);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cloud_from(points: Vec<Vec3>) -> FilteredCloud {
        FilteredCloud {
            points,
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_marks_cell_with_nearest_distance() {
        let mut hist = Histogram::new(ALPHA_RES);
        let pos = Vec3::ZERO;
        // two points in the same bearing, different range
        let cloud = cloud_from(vec![Vec3::new(0.0, 5.0, 0.0), Vec3::new(0.0, 3.0, 0.0)]);
        generate_new_histogram(&mut hist, &cloud, &pos);

        let p_pol = cartesian_to_polar(&Vec3::new(0.0, 3.0, 0.0), &pos);
        let (e, z) = polar_to_histogram_index(&p_pol, ALPHA_RES);
        assert_relative_eq!(hist.get_dist(e, z), 3.0);
        assert_eq!(hist.get_age(e, z), 0);
        assert!(!hist.is_empty());
    }

    #[test]
    fn test_generate_distance_bounded_by_range() {
        let mut hist = Histogram::new(ALPHA_RES);
        let pos = Vec3::new(1.0, 2.0, 3.0);
        let points = vec![
            Vec3::new(4.0, 2.0, 3.0),
            Vec3::new(1.0, 8.0, 4.0),
            Vec3::new(-2.0, -1.0, 2.0),
        ];
        let cloud = cloud_from(points.clone());
        generate_new_histogram(&mut hist, &cloud, &pos);

        for p in &points {
            let p_pol = cartesian_to_polar(p, &pos);
            let (e, z) = polar_to_histogram_index(&p_pol, ALPHA_RES);
            assert!(hist.get_dist(e, z) <= p_pol.r + 1e-5);
            assert!(hist.get_dist(e, z) > 0.0);
        }
    }

    #[test]
    fn test_empty_iff_all_zero() {
        let mut hist = Histogram::new(ALPHA_RES);
        assert!(hist.is_empty());
        hist.set_dist(3, 7, 4.2);
        assert!(!hist.is_empty());
        hist.set_zero();
        assert!(hist.is_empty());
    }

    #[test]
    fn test_fov_facing_east() {
        // FCU yaw 0 faces +x = azimuth +90° = column 45. A 60x60 FOV
        // covers the columns around it and the elevation rows around the
        // horizontal.
        let fov = calculate_fov(60.0, 60.0, 0.0, 0.0);
        assert!(fov.z_idx.contains(&44));
        assert!(!fov.z_idx.contains(&10));
        assert!(fov.contains(GRID_LENGTH_E / 2, 44));
        assert!(!fov.contains(0, 44));
    }

    #[test]
    fn test_fov_wraps_at_seam() {
        // yaw -pi/2 faces -y = azimuth ±180°, the wrap seam: the index
        // set must span both ends of the azimuth range
        let fov = calculate_fov(60.0, 60.0, -std::f32::consts::FRAC_PI_2, 0.0);
        assert!(fov.z_idx.contains(&0));
        assert!(fov.z_idx.contains(&(GRID_LENGTH_Z - 1)));
        assert!(!fov.z_idx.contains(&30));
    }

    #[test]
    fn test_combine_fills_only_outside_fov() {
        let pos = Vec3::ZERO;
        // camera faces east (+x)
        let fov = calculate_fov(60.0, 60.0, 0.0, 0.0);

        // propagated histogram with an obstacle ahead (inside FOV) and
        // one behind (outside)
        let mut propagated = Histogram::new(2 * ALPHA_RES);
        let east = cartesian_to_polar(&Vec3::new(5.0, 0.0, 0.0), &pos);
        let west = cartesian_to_polar(&Vec3::new(-5.0, 0.0, 0.0), &pos);
        let (ee, ez) = polar_to_histogram_index(&east, 2 * ALPHA_RES);
        let (we, wz) = polar_to_histogram_index(&west, 2 * ALPHA_RES);
        propagated.set_dist(ee, ez, 5.0);
        propagated.set_dist(we, wz, 5.0);

        let mut new_hist = Histogram::new(ALPHA_RES);
        let empty = combine_histogram(&mut new_hist, &propagated, &fov);
        assert!(!empty);

        // the obstacle behind was backfilled
        let (fe, fz) = polar_to_histogram_index(&west, ALPHA_RES);
        assert_relative_eq!(new_hist.get_dist(fe, fz), 5.0);

        // the cell ahead stayed empty: it is inside the FOV and the
        // fresh histogram saw nothing there
        let (fe, fz) = polar_to_histogram_index(&east, ALPHA_RES);
        assert_relative_eq!(new_hist.get_dist(fe, fz), 0.0);
    }

    #[test]
    fn test_combine_preserves_fresh_cells() {
        let fov = calculate_fov(60.0, 60.0, 0.0, 0.0);
        // cell (15, 44) is inside the east-facing FOV
        let mut new_hist = Histogram::new(ALPHA_RES);
        new_hist.set_dist(15, 44, 2.5);

        let mut propagated = Histogram::new(2 * ALPHA_RES);
        propagated.set_dist(7, 22, 9.0);

        combine_histogram(&mut new_hist, &propagated, &fov);
        assert_relative_eq!(new_hist.get_dist(15, 44), 2.5);
    }

    #[test]
    fn test_reprojection_carries_old_obstacle() {
        let pos = Vec3::ZERO;
        let mut prev = Histogram::new(ALPHA_RES);
        let obstacle = cartesian_to_polar(&Vec3::new(0.0, 5.0, 0.0), &pos);
        let (e, z) = polar_to_histogram_index(&obstacle, ALPHA_RES);
        prev.set_dist(e, z, 5.0);
        prev.set_age(e, z, 3);

        let (points, ages) = reproject_points(&prev, &pos, &pos, 10.0, 20);
        assert_eq!(points.len(), 4);
        assert!(ages.iter().all(|&a| a == 3));
        for p in &points {
            assert_relative_eq!(p.norm(), 5.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_reprojection_drops_aged_cells() {
        let pos = Vec3::ZERO;
        let mut prev = Histogram::new(ALPHA_RES);
        prev.set_dist(15, 30, 5.0);
        prev.set_age(15, 30, 25);

        let (points, _) = reproject_points(&prev, &pos, &pos, 10.0, 20);
        assert!(points.is_empty());
    }

    #[test]
    fn test_reprojection_range_window() {
        let pos = Vec3::ZERO;
        let mut prev = Histogram::new(ALPHA_RES);
        prev.set_dist(15, 30, 5.0);

        // moved far away: all corners now beyond 2 * box_radius
        let far = Vec3::new(100.0, 0.0, 0.0);
        let (points, _) = reproject_points(&prev, &pos, &far, 10.0, 20);
        assert!(points.is_empty());
    }

    #[test]
    fn test_propagate_ages_advance() {
        let pos = Vec3::ZERO;
        let mut hist = Histogram::new(2 * ALPHA_RES);
        let points = vec![Vec3::new(0.0, 5.0, 0.0)];
        propagate_histogram(&mut hist, &points, &[4], &pos);

        let p_pol = cartesian_to_polar(&points[0], &pos);
        let (e, z) = polar_to_histogram_index(&p_pol, 2 * ALPHA_RES);
        assert_eq!(hist.get_age(e, z), 5);
        assert_relative_eq!(hist.get_dist(e, z), 5.0);
    }

    #[test]
    fn test_compress_elevation_takes_min() {
        let mut hist = Histogram::new(ALPHA_RES);
        hist.set_dist(10, 30, 7.0);
        hist.set_dist(20, 30, 4.0);

        let mut flat = Histogram::new(ALPHA_RES);
        compress_histogram_elevation(&mut flat, &hist);
        assert_relative_eq!(flat.get_dist(0, 30), 4.0);
        assert_relative_eq!(flat.get_dist(0, 31), 0.0);
    }
}
