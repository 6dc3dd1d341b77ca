//! Core math and geometry primitives.

pub mod geometry;
pub mod math;

pub use geometry::{
    cartesian_to_polar, histogram_index_to_polar, next_yaw, polar_to_cartesian,
    polar_to_histogram_index, PolarPoint, Quaternion, Vec3,
};
