use nalgebra::Vector3;

/// Gravity magnitude (m/s^2).
pub const GRAVITY_MAGNITUDE: f64 = 9.81;

/// IMU biases.
#[derive(Debug, Clone, Copy)]
pub struct ImuBias {
    pub gyro: Vector3<f64>,
    pub accel: Vector3<f64>,
}

impl ImuBias {
    pub fn zero() -> Self {
        Self {
            gyro: Vector3::zeros(),
            accel: Vector3::zeros(),
        }
    }
}

/// Single IMU measurement.
#[derive(Debug, Clone, Copy)]
pub struct ImuSample {
    pub timestamp_s: f64,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}
