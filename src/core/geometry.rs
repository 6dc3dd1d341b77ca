//! Geometric primitives: 3D vectors, orientation, and the polar
//! coordinate system of the obstacle histogram.
//!
//! The polar frame is anchored at the vehicle: azimuth is measured in
//! degrees from the +y axis (0° = north) in (-180, 180], elevation in
//! degrees from the horizontal plane in (-90, 90].

use serde::{Deserialize, Serialize};

use super::math::{index_angle_difference, wrap_angle_to_plus_minus_180};

const DEG_TO_RAD: f32 = std::f32::consts::PI / 180.0;
const RAD_TO_DEG: f32 = 180.0 / std::f32::consts::PI;

/// A 3D point or vector in meters, local-origin frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate in meters
    pub x: f32,
    /// Y coordinate in meters
    pub y: f32,
    /// Z coordinate in meters (up)
    pub z: f32,
}

impl Vec3 {
    /// Create a new vector.
    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector.
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Euclidean norm.
    #[inline]
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Norm of the horizontal (x, y) component.
    #[inline]
    pub fn norm_xy(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Vec3) -> f32 {
        (*self - *other).norm()
    }

    /// Unit vector in the same direction; zero vector stays zero.
    pub fn normalized(&self) -> Vec3 {
        let n = self.norm();
        if n > f32::EPSILON {
            Vec3::new(self.x / n, self.y / n, self.z / n)
        } else {
            Vec3::ZERO
        }
    }

    /// All components finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;
    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;
    #[inline]
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn mul(self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }
}

/// Vehicle orientation.
///
/// Only the yaw/pitch extraction the planner needs; this is not a general
/// rotation type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create from components.
    #[inline]
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Identity orientation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Pure-yaw orientation about the z axis, yaw in radians.
    pub fn from_yaw(yaw: f32) -> Self {
        let half = 0.5 * yaw;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// Yaw angle in radians.
    pub fn yaw(&self) -> f32 {
        let siny_cosp = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy_cosp = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny_cosp.atan2(cosy_cosp)
    }

    /// Pitch angle in radians.
    pub fn pitch(&self) -> f32 {
        let sinp = 2.0 * (self.w * self.y - self.z * self.x);
        if sinp.abs() >= 1.0 {
            std::f32::consts::FRAC_PI_2.copysign(sinp)
        } else {
            sinp.asin()
        }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// A direction-and-range in the vehicle-anchored polar frame.
///
/// Elevation `e` and azimuth `z` in degrees, radius `r` in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PolarPoint {
    /// Elevation angle in degrees, (-90, 90]
    pub e: f32,
    /// Azimuth angle in degrees from +y, (-180, 180]
    pub z: f32,
    /// Radius in meters
    pub r: f32,
}

impl PolarPoint {
    /// Create a new polar point.
    #[inline]
    pub fn new(e: f32, z: f32, r: f32) -> Self {
        Self { e, z, r }
    }

    /// Canonical form: elevation reflected into (-90, 90], azimuth
    /// shifted by 180° for each reflection and wrapped to (-180, 180].
    /// Idempotent.
    pub fn wrapped(self) -> PolarPoint {
        let mut e = wrap_angle_to_plus_minus_180(self.e);
        let mut z = wrap_angle_to_plus_minus_180(self.z);

        let mut reflected = false;
        if e > 90.0 {
            e = 180.0 - e;
            reflected = true;
        } else if e < -90.0 {
            e = -(180.0 + e);
            reflected = true;
        }
        if reflected {
            z = if z < 0.0 { z + 180.0 } else { z - 180.0 };
        }

        PolarPoint::new(e, z, self.r)
    }

    /// Angular distance to another polar direction: Euclidean in the
    /// (elevation, azimuth) plane with azimuth wrap handled.
    #[inline]
    pub fn angle_distance(&self, other: &PolarPoint) -> f32 {
        let de = self.e - other.e;
        let dz = index_angle_difference(self.z, other.z);
        (de * de + dz * dz).sqrt()
    }
}

/// Bearing and range of point `p` seen from `origin`.
///
/// Azimuth is the angle from the +y axis in (-180, 180], elevation the
/// angle above the horizontal plane through `origin`.
pub fn cartesian_to_polar(p: &Vec3, origin: &Vec3) -> PolarPoint {
    let d = *p - *origin;
    PolarPoint::new(
        d.z.atan2(d.norm_xy()) * RAD_TO_DEG,
        d.x.atan2(d.y) * RAD_TO_DEG,
        d.norm(),
    )
}

/// Cartesian point at bearing/range `p_pol` from `origin`. Inverse of
/// [`cartesian_to_polar`].
pub fn polar_to_cartesian(p_pol: &PolarPoint, origin: &Vec3) -> Vec3 {
    let e = p_pol.e * DEG_TO_RAD;
    let z = p_pol.z * DEG_TO_RAD;
    Vec3::new(
        origin.x + p_pol.r * e.cos() * z.sin(),
        origin.y + p_pol.r * e.cos() * z.cos(),
        origin.z + p_pol.r * e.sin(),
    )
}

/// Polar direction of histogram cell (e, z) at resolution `res` degrees,
/// pointing at the cell center.
pub fn histogram_index_to_polar(e: usize, z: usize, res: usize, radius: f32) -> PolarPoint {
    PolarPoint::new(
        (e as f32 + 0.5) * res as f32 - 90.0,
        (z as f32 + 0.5) * res as f32 - 180.0,
        radius,
    )
}

/// Histogram cell (e, z) containing the polar direction `p_pol` at
/// resolution `res` degrees.
///
/// The input is canonicalized first; the result is clamped into the valid
/// index range so floating-point edge values never map out of the grid.
pub fn polar_to_histogram_index(p_pol: &PolarPoint, res: usize) -> (usize, usize) {
    let n_e = (180 / res) as isize;
    let n_z = (360 / res) as isize;
    let wrapped = p_pol.wrapped();

    let e = ((wrapped.e + 90.0) / res as f32).floor() as isize;
    let z = ((wrapped.z + 180.0) / res as f32).floor() as isize;

    (
        e.clamp(0, n_e - 1) as usize,
        z.clamp(0, n_z - 1) as usize,
    )
}

/// Yaw angle (radians) of the direction from `u` to `v`, measured like
/// the polar azimuth from the +y axis.
#[inline]
pub fn next_yaw(u: &Vec3, v: &Vec3) -> f32 {
    (v.x - u.x).atan2(v.y - u.y)
}

/// Histogram azimuth (degrees) of the vehicle heading for an FCU-frame
/// yaw (radians, measured from +x). FCU yaw 0 points along +x, which is
/// azimuth +90°.
#[inline]
pub fn yaw_to_azimuth_deg(yaw: f32) -> f32 {
    wrap_angle_to_plus_minus_180(90.0 - yaw.to_degrees())
}

/// FCU-frame yaw (radians) pointing along an azimuth-convention angle
/// (radians, from +y). Inverse of the frame change in
/// [`yaw_to_azimuth_deg`]; also maps [`next_yaw`] output back to FCU yaw.
#[inline]
pub fn azimuth_to_yaw(azimuth: f32) -> f32 {
    crate::core::math::wrap_angle_to_plus_minus_pi(std::f32::consts::FRAC_PI_2 - azimuth)
}
