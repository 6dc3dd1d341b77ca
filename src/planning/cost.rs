//! Cost-field evaluation over histogram cells.
//!
//! Each polar direction gets a scalar cost combining goal alignment,
//! heading continuity, smoothness against the previously commanded
//! direction, a climb penalty, and an inflated obstacle penalty. The
//! candidate selector picks the cheapest unblocked directions.

use crate::core::geometry::{
    cartesian_to_polar, histogram_index_to_polar, PolarPoint, Vec3,
};
use crate::core::math::index_angle_difference;
use crate::planning::histogram::Histogram;

/// Obstacle penalty numerator: an occupied cell at distance d contributes
/// `OBSTACLE_COST_BASE / d`, dwarfing every direction term.
pub const OBSTACLE_COST_BASE: f32 = 5000.0;

/// Speed below which the vehicle counts as stationary and the heading
/// term is dropped (yawing in place is free).
pub const HEADING_SPEED_THRESHOLD: f32 = 0.1;

/// Weights of the direction cost terms.
///
/// `height_change_cost_param_adapted` tracks the nominal
/// `height_change_cost_param` but is lowered by the progress-rate monitor
/// when the vehicle stops making headway toward the goal, making climbing
/// over an obstacle progressively cheaper than going around it.
#[derive(Debug, Clone, Copy)]
pub struct CostParams {
    pub goal_cost_param: f32,
    pub heading_cost_param: f32,
    pub smooth_cost_param: f32,
    pub height_change_cost_param: f32,
    pub height_change_cost_param_adapted: f32,
    pub pitch_cost_param: f32,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            goal_cost_param: 2.0,
            heading_cost_param: 0.5,
            smooth_cost_param: 1.5,
            height_change_cost_param: 1.0,
            height_change_cost_param_adapted: 1.0,
            pitch_cost_param: 0.3,
        }
    }
}

/// Dense cost field over histogram cells.
#[derive(Debug, Clone)]
pub struct CostMatrix {
    resolution: usize,
    n_e: usize,
    n_z: usize,
    cost: Vec<f32>,
    blocked: Vec<bool>,
}

impl CostMatrix {
    fn new(resolution: usize, n_e: usize, n_z: usize) -> Self {
        Self {
            resolution,
            n_e,
            n_z,
            cost: vec![0.0; n_e * n_z],
            blocked: vec![false; n_e * n_z],
        }
    }

    /// Cost of cell (e, z).
    #[inline]
    pub fn get(&self, e: usize, z: usize) -> f32 {
        self.cost[e * self.n_z + z]
    }

    /// Cell is occupied or inside the obstacle margin.
    #[inline]
    pub fn is_blocked(&self, e: usize, z: usize) -> bool {
        self.blocked[e * self.n_z + z]
    }

    #[inline]
    fn set(&mut self, e: usize, z: usize, cost: f32, blocked: bool) {
        self.cost[e * self.n_z + z] = cost;
        self.blocked[e * self.n_z + z] = blocked;
    }
}

/// A candidate flight direction extracted from the cost matrix.
#[derive(Debug, Clone, Copy)]
pub struct CandidateDirection {
    pub cost: f32,
    /// Elevation angle of the cell center in degrees
    pub elevation_angle: f32,
    /// Azimuth angle of the cell center in degrees
    pub azimuth_angle: f32,
}

impl CandidateDirection {
    /// The candidate as a polar direction with the given radius.
    pub fn to_polar(&self, radius: f32) -> PolarPoint {
        PolarPoint::new(self.elevation_angle, self.azimuth_angle, radius)
    }
}

/// Evaluate the cost of every histogram cell.
///
/// `heading_azimuth_deg` is the vehicle heading expressed as a histogram
/// azimuth; the heading term is applied only when `moving` (see
/// [`HEADING_SPEED_THRESHOLD`]). The smooth term is dropped when no
/// waypoint has been sent yet (`last_sent_waypoint` coincides with the
/// position). Returns the matrix and an RGB debug image (3·E·Z bytes,
/// rows top-down).
#[allow(clippy::too_many_arguments)]
pub fn get_cost_matrix(
    histogram: &Histogram,
    goal: &Vec3,
    position: &Vec3,
    heading_azimuth_deg: f32,
    last_sent_waypoint: &Vec3,
    params: &CostParams,
    moving: bool,
    smoothing_margin_degrees: f32,
) -> (CostMatrix, Vec<u8>) {
    let n_e = histogram.n_e();
    let n_z = histogram.n_z();
    let res = histogram.resolution();
    let mut matrix = CostMatrix::new(res, n_e, n_z);

    let goal_pol = cartesian_to_polar(goal, position);
    let last_pol = cartesian_to_polar(last_sent_waypoint, position);
    let use_smooth = position.distance(last_sent_waypoint) > 1e-3;

    let margin_deg = smoothing_margin_degrees.max(0.0);
    let margin_cells = (margin_deg / res as f32).ceil() as isize;
    let falloff_deg = margin_deg + res as f32;

    for e in 0..n_e {
        for z in 0..n_z {
            let cell = histogram_index_to_polar(e, z, res, 1.0);

            let mut cost = params.goal_cost_param * cell.angle_distance(&goal_pol);
            cost += params.height_change_cost_param_adapted
                * params.pitch_cost_param
                * cell.e.max(0.0);
            if moving {
                cost +=
                    params.heading_cost_param * index_angle_difference(cell.z, heading_azimuth_deg);
            }
            if use_smooth {
                cost += params.smooth_cost_param * cell.angle_distance(&last_pol);
            }

            // inflated obstacle penalty: nearest occupied cell within the
            // angular margin dominates, attenuated with angular distance
            let mut obstacle = 0.0f32;
            for de in -margin_cells..=margin_cells {
                let ee = e as isize + de;
                if ee < 0 || ee >= n_e as isize {
                    continue;
                }
                for dz in -margin_cells..=margin_cells {
                    let zz = (z as isize + dz).rem_euclid(n_z as isize) as usize;
                    let d = histogram.get_dist(ee as usize, zz);
                    if d <= 0.0 {
                        continue;
                    }
                    let ang = (((de * res as isize).pow(2) + (dz * res as isize).pow(2)) as f32)
                        .sqrt();
                    if ang < falloff_deg {
                        let atten = 1.0 - ang / falloff_deg;
                        obstacle = obstacle.max(OBSTACLE_COST_BASE / d * atten);
                    }
                }
            }

            matrix.set(e, z, cost + obstacle, obstacle > 0.0);
        }
    }

    let image = render_cost_image(&matrix);
    (matrix, image)
}

/// Render the cost matrix as an RGB byte buffer for debugging: blocked
/// cells red, free cells grayscale by relative cost, rows top-down.
fn render_cost_image(matrix: &CostMatrix) -> Vec<u8> {
    let mut max_free = 0.0f32;
    for e in 0..matrix.n_e {
        for z in 0..matrix.n_z {
            if !matrix.is_blocked(e, z) {
                max_free = max_free.max(matrix.get(e, z));
            }
        }
    }

    let mut image = Vec::with_capacity(3 * matrix.n_e * matrix.n_z);
    for e in (0..matrix.n_e).rev() {
        for z in 0..matrix.n_z {
            if matrix.is_blocked(e, z) {
                image.extend_from_slice(&[255, 0, 0]);
            } else {
                let v = if max_free > 0.0 {
                    (matrix.get(e, z) / max_free * 255.0) as u8
                } else {
                    0
                };
                image.extend_from_slice(&[v, v, v]);
            }
        }
    }
    image
}

/// Render the histogram as an 8-bit grayscale depth image, rows top-down,
/// distances scaled by `max_range`.
pub fn render_histogram_image(histogram: &Histogram, max_range: f32) -> Vec<u8> {
    let mut image = Vec::with_capacity(histogram.n_e() * histogram.n_z());
    for e in (0..histogram.n_e()).rev() {
        for z in 0..histogram.n_z() {
            let v = 255.0 * histogram.get_dist(e, z) / max_range;
            image.push(v.clamp(0.0, 255.0) as u8);
        }
    }
    image
}

/// The `k` cheapest unblocked directions, cheapest first.
///
/// Ties are broken by row-major cell order (stable sort over the
/// traversal). Returns an empty vector when every cell is blocked.
pub fn get_best_candidates(matrix: &CostMatrix, k: usize) -> Vec<CandidateDirection> {
    let mut free: Vec<(f32, usize, usize)> = Vec::new();
    for e in 0..matrix.n_e {
        for z in 0..matrix.n_z {
            if !matrix.is_blocked(e, z) {
                free.push((matrix.get(e, z), e, z));
            }
        }
    }

    free.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    free.truncate(k);

    free.into_iter()
        .map(|(cost, e, z)| {
            let p = histogram_index_to_polar(e, z, matrix.resolution, 1.0);
            CandidateDirection {
                cost,
                elevation_angle: p.e,
                azimuth_angle: p.z,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::polar_to_histogram_index;
    use crate::planning::histogram::{ALPHA_RES, GRID_LENGTH_E, GRID_LENGTH_Z};

    fn empty_matrix_toward(goal: Vec3) -> CostMatrix {
        let hist = Histogram::new(ALPHA_RES);
        let (matrix, _) = get_cost_matrix(
            &hist,
            &goal,
            &Vec3::ZERO,
            90.0,
            &Vec3::ZERO,
            &CostParams::default(),
            false,
            30.0,
        );
        matrix
    }

    #[test]
    fn test_best_candidate_points_at_goal() {
        let matrix = empty_matrix_toward(Vec3::new(10.0, 0.0, 0.0));
        let candidates = get_best_candidates(&matrix, 1);
        assert_eq!(candidates.len(), 1);

        // goal sits due east (azimuth 90°) at elevation 0
        assert!(index_angle_difference(candidates[0].azimuth_angle, 90.0) <= ALPHA_RES as f32);
        assert!(candidates[0].elevation_angle.abs() <= ALPHA_RES as f32);
    }

    #[test]
    fn test_goal_weight_improves_goal_cell_rank() {
        let goal = Vec3::new(10.0, 0.0, 0.0);
        let goal_pol = cartesian_to_polar(&goal, &Vec3::ZERO);
        let (ge, gz) = polar_to_histogram_index(&goal_pol, ALPHA_RES);
        let hist = Histogram::new(ALPHA_RES);

        let rank_of_goal_cell = |goal_weight: f32| -> usize {
            let params = CostParams {
                goal_cost_param: goal_weight,
                ..Default::default()
            };
            let (matrix, _) = get_cost_matrix(
                &hist,
                &goal,
                &Vec3::ZERO,
                0.0,
                &Vec3::ZERO,
                &params,
                false,
                30.0,
            );
            let goal_cost = matrix.get(ge, gz);
            let mut rank = 0;
            for e in 0..GRID_LENGTH_E {
                for z in 0..GRID_LENGTH_Z {
                    if matrix.get(e, z) < goal_cost {
                        rank += 1;
                    }
                }
            }
            rank
        };

        assert!(rank_of_goal_cell(20.0) <= rank_of_goal_cell(2.0));
    }

    #[test]
    fn test_obstacle_cell_blocked_and_margin_decays() {
        let pos = Vec3::ZERO;
        let mut hist = Histogram::new(ALPHA_RES);
        // obstacle due east at 3 m, elevation 0
        let obstacle = cartesian_to_polar(&Vec3::new(3.0, 0.0, 0.0), &pos);
        let (oe, oz) = polar_to_histogram_index(&obstacle, ALPHA_RES);
        hist.set_dist(oe, oz, 3.0);

        let (matrix, _) = get_cost_matrix(
            &hist,
            &Vec3::new(10.0, 0.0, 0.0),
            &pos,
            90.0,
            &Vec3::ZERO,
            &CostParams::default(),
            false,
            30.0,
        );

        assert!(matrix.is_blocked(oe, oz));
        // a neighbour inside the margin is blocked but cheaper than the
        // occupied cell itself
        assert!(matrix.is_blocked(oe, oz + 2));
        assert!(matrix.get(oe, oz + 2) < matrix.get(oe, oz));
        // far around the ring is unblocked
        let far_z = (oz + GRID_LENGTH_Z / 2) % GRID_LENGTH_Z;
        assert!(!matrix.is_blocked(oe, far_z));
    }

    #[test]
    fn test_all_blocked_yields_no_candidates() {
        let pos = Vec3::ZERO;
        let mut hist = Histogram::new(ALPHA_RES);
        for e in 0..GRID_LENGTH_E {
            for z in 0..GRID_LENGTH_Z {
                hist.set_dist(e, z, 2.0);
            }
        }
        let (matrix, _) = get_cost_matrix(
            &hist,
            &Vec3::new(10.0, 0.0, 0.0),
            &pos,
            90.0,
            &Vec3::ZERO,
            &CostParams::default(),
            false,
            30.0,
        );
        assert!(get_best_candidates(&matrix, 5).is_empty());
    }

    #[test]
    fn test_heading_term_only_when_moving() {
        let hist = Histogram::new(ALPHA_RES);
        let goal = Vec3::new(0.0, 10.0, 0.0);
        let params = CostParams::default();

        // heading west while the goal is north
        let cost_of = |moving: bool| {
            let (matrix, _) = get_cost_matrix(
                &hist, &goal, &Vec3::ZERO, -90.0, &Vec3::ZERO, &params, moving, 30.0,
            );
            let north = cartesian_to_polar(&goal, &Vec3::ZERO);
            let (e, z) = polar_to_histogram_index(&north, ALPHA_RES);
            matrix.get(e, z)
        };

        assert!(cost_of(true) > cost_of(false));
    }

    #[test]
    fn test_candidate_tiebreak_insertion_order() {
        // symmetric goal straight up: many cells share the minimum; the
        // first row-major cell must win deterministically
        let matrix = empty_matrix_toward(Vec3::new(0.0, 0.0, 10.0));
        let a = get_best_candidates(&matrix, 3);
        let b = get_best_candidates(&matrix, 3);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.elevation_angle, y.elevation_angle);
            assert_eq!(x.azimuth_angle, y.azimuth_angle);
        }
    }

    #[test]
    fn test_cost_image_dimensions() {
        let matrix = empty_matrix_toward(Vec3::new(10.0, 0.0, 0.0));
        let image = render_cost_image(&matrix);
        assert_eq!(image.len(), 3 * GRID_LENGTH_E * GRID_LENGTH_Z);
    }
}
