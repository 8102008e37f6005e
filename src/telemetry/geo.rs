//! # Simulator Geometry
//!
//! Conversions from the simulator's world frame (Y up, Z forward/north, X east)
//! to GPS coordinates, compass heading and aircraft Euler angles.

use std::f64::consts::FRAC_PI_2;

/// Meters per degree of latitude used by the flat-earth approximation
const METERS_PER_DEGREE: f64 = 111_111.0;

/// Geographic point the simulator origin is mapped to
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoOrigin {
    pub latitude: f64,
    pub longitude: f64,
}

/// Position converted to GPS coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// Meters
    pub altitude: f64,
}

/// Map a world position to latitude/longitude/altitude
///
/// Flat-earth approximation: good for displacements of a few kilometers away
/// from the poles.
pub fn gps_from_coord(position: [f32; 3], origin: GeoOrigin) -> GeoPosition {
    let east = position[0] as f64;
    let north = position[2] as f64;

    let latitude = origin.latitude + north / METERS_PER_DEGREE;
    let longitude = origin.longitude + east / (METERS_PER_DEGREE * latitude.to_radians().cos());

    GeoPosition {
        latitude,
        longitude,
        altitude: position[1] as f64,
    }
}

/// Rotation about the vertical axis in radians, `-pi..=pi`, 0 = north
pub fn quat_to_heading(q: [f32; 4]) -> f64 {
    let [q0, q1, q2, q3] = q.map(f64::from);
    (2.0 * (q2 * q0 + q3 * q1)).atan2(q3 * q3 + q2 * q2 - q0 * q0 - q1 * q1)
}

/// Aircraft attitude in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// Convert the simulator quaternion to pitch/roll/yaw
///
/// The quaternion is first moved from the Y-up frame to the Z-up IMU frame
/// (`y <-> z`, `w -> -w`), then decomposed through the rotation matrix the
/// same way flight controllers derive their attitude.
pub fn quat_to_euler(q: [f32; 4]) -> EulerAngles {
    let [x, y_up, z_fwd, w] = q.map(f64::from);
    let (qx, qy, qz, qw) = (x, z_fwd, y_up, -w);

    let m00 = 1.0 - 2.0 * qy * qy - 2.0 * qz * qz;
    let m10 = 2.0 * (qx * qy + qw * qz);
    let m20 = 2.0 * (qx * qz - qw * qy);
    let m21 = 2.0 * (qy * qz + qw * qx);
    let m22 = 1.0 - 2.0 * qx * qx - 2.0 * qy * qy;

    EulerAngles {
        roll: m21.atan2(m22),
        pitch: FRAC_PI_2 - (-m20).clamp(-1.0, 1.0).acos(),
        yaw: -m10.atan2(m00),
    }
}
