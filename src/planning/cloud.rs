//! Point-cloud cropping around the vehicle.
//!
//! Raw depth clouds are cropped to a cube centered on the vehicle before
//! they feed the histogram; the crop also extracts the closest obstacle
//! and a count of points close enough to trigger the backoff maneuver.

use serde::{Deserialize, Serialize};

use crate::core::Vec3;

/// Axis-aligned crop cube around the vehicle.
///
/// The lower face is additionally limited by the measured ground
/// clearance, so ground returns below the vehicle do not count as
/// obstacles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Half side length in meters
    pub radius: f32,
    xmin: f32,
    xmax: f32,
    ymin: f32,
    ymax: f32,
    zmin: f32,
    zmax: f32,
}

impl BoundingBox {
    /// Create a box with the given half side length. Limits are unset
    /// until [`set_limits`](Self::set_limits) is called.
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            xmin: 0.0,
            xmax: 0.0,
            ymin: 0.0,
            ymax: 0.0,
            zmin: 0.0,
            zmax: 0.0,
        }
    }

    /// Center the box on `pos`; the lower plane stops at the ground.
    pub fn set_limits(&mut self, pos: &Vec3, ground_distance: f32) {
        self.xmin = pos.x - self.radius;
        self.xmax = pos.x + self.radius;
        self.ymin = pos.y - self.radius;
        self.ymax = pos.y + self.radius;
        self.zmin = pos.z - self.radius.min(ground_distance);
        self.zmax = pos.z + self.radius;
    }

    /// Point inside the box limits.
    #[inline]
    pub fn contains(&self, p: &Vec3) -> bool {
        p.x > self.xmin
            && p.x < self.xmax
            && p.y > self.ymin
            && p.y < self.ymax
            && p.z > self.zmin
            && p.z < self.zmax
    }

    /// Lower face height in meters.
    #[inline]
    pub fn zmin(&self) -> f32 {
        self.zmin
    }
}

/// Result of cropping the merged input clouds.
#[derive(Debug, Clone)]
pub struct FilteredCloud {
    /// Retained points inside the box and beyond the sensor minimum
    pub points: Vec<Vec3>,
    /// Closest retained point, if any
    pub closest_point: Option<Vec3>,
    /// Distance to the closest retained point (`f32::MAX` when empty)
    pub distance_to_closest: f32,
    /// Points closer than the backoff threshold
    pub n_close: usize,
}

impl Default for FilteredCloud {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            closest_point: None,
            distance_to_closest: f32::MAX,
            n_close: 0,
        }
    }
}

impl FilteredCloud {
    /// Whether the crop contains enough points to be treated as an
    /// obstacle at all. Sparse returns are sensor noise.
    #[inline]
    pub fn is_obstacle(&self, min_cloud_size: usize) -> bool {
        self.points.len() > min_cloud_size
    }
}

/// Crop `clouds` to `bbox` around `position`.
///
/// Points closer than `min_sensor_dist` (inside the depth camera's dead
/// zone) and non-finite points are dropped. Among the retained points the
/// minimum distance is tracked and every point closer than
/// `min_backoff_dist` bumps the close-point counter.
pub fn filter_point_cloud(
    clouds: &[Vec<Vec3>],
    bbox: &BoundingBox,
    position: &Vec3,
    min_sensor_dist: f32,
    min_backoff_dist: f32,
) -> FilteredCloud {
    let mut out = FilteredCloud::default();

    for cloud in clouds {
        for p in cloud {
            if !p.is_finite() || !bbox.contains(p) {
                continue;
            }
            let dist = position.distance(p);
            if dist <= min_sensor_dist {
                continue;
            }

            out.points.push(*p);
            if dist < out.distance_to_closest {
                out.distance_to_closest = dist;
                out.closest_point = Some(*p);
            }
            if dist < min_backoff_dist {
                out.n_close += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn box_at(pos: &Vec3, radius: f32, ground: f32) -> BoundingBox {
        let mut b = BoundingBox::new(radius);
        b.set_limits(pos, ground);
        b
    }

    #[test]
    fn test_box_limits_ground() {
        let pos = Vec3::new(0.0, 0.0, 5.0);
        let b = box_at(&pos, 10.0, 2.0);
        // lower face stops at the ground, not at pos.z - radius
        assert_relative_eq!(b.zmin(), 3.0);
        assert!(b.contains(&Vec3::new(0.0, 0.0, 4.0)));
        assert!(!b.contains(&Vec3::new(0.0, 0.0, 2.5)));
        assert!(!b.contains(&Vec3::new(11.0, 0.0, 5.0)));
    }

    #[test]
    fn test_filter_tracks_closest_and_close_count() {
        let pos = Vec3::new(0.0, 0.0, 5.0);
        let b = box_at(&pos, 10.0, 10.0);

        let cloud = vec![
            Vec3::new(3.0, 0.0, 5.0),
            Vec3::new(1.0, 0.0, 5.0),
            Vec3::new(6.0, 0.0, 5.0),
            Vec3::new(0.1, 0.0, 5.0), // inside sensor dead zone
            Vec3::new(f32::NAN, 0.0, 5.0),
        ];
        let filtered = filter_point_cloud(&[cloud], &b, &pos, 0.2, 2.0);

        assert_eq!(filtered.points.len(), 3);
        assert_relative_eq!(filtered.distance_to_closest, 1.0);
        assert_eq!(filtered.closest_point, Some(Vec3::new(1.0, 0.0, 5.0)));
        assert_eq!(filtered.n_close, 1);
    }

    #[test]
    fn test_filter_merges_multiple_clouds() {
        let pos = Vec3::ZERO;
        let b = box_at(&pos, 5.0, 5.0);

        let c1 = vec![Vec3::new(1.0, 0.0, 0.0)];
        let c2 = vec![Vec3::new(0.0, 2.0, 0.0), Vec3::new(20.0, 0.0, 0.0)];
        let filtered = filter_point_cloud(&[c1, c2], &b, &pos, 0.2, 3.0);

        assert_eq!(filtered.points.len(), 2);
        assert_eq!(filtered.n_close, 2);
    }

    #[test]
    fn test_empty_cloud_is_not_obstacle() {
        let filtered = FilteredCloud::default();
        assert!(!filtered.is_obstacle(160));
        assert_eq!(filtered.distance_to_closest, f32::MAX);
    }

    #[test]
    fn test_small_cloud_returned_but_not_obstacle() {
        let pos = Vec3::ZERO;
        let b = box_at(&pos, 5.0, 5.0);
        let cloud = vec![Vec3::new(1.0, 1.0, 0.0); 10];
        let filtered = filter_point_cloud(&[cloud], &b, &pos, 0.2, 3.0);

        assert_eq!(filtered.points.len(), 10);
        assert!(!filtered.is_obstacle(160));
    }
}
