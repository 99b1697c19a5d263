//! Constant-velocity Kalman filter over `(cx, cy, aspect, height)` boxes.

use nalgebra::{SMatrix, SVector};

pub type StateMean = SVector<f64, 8>;
pub type StateCovariance = SMatrix<f64, 8, 8>;
pub type Measurement = SVector<f64, 4>;

type ProjectedCovariance = SMatrix<f64, 4, 4>;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion: StateCovariance,
    observation: SMatrix<f64, 4, 8>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut motion = StateCovariance::identity();
        for i in 0..4 {
            motion[(i, 4 + i)] = 1.0;
        }

        let mut observation = SMatrix::<f64, 4, 8>::zeros();
        for i in 0..4 {
            observation[(i, i)] = 1.0;
        }

        Self {
            motion,
            observation,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Track state for a first measurement, with zero velocity.
    pub fn initiate(&self, measurement: &Measurement) -> (StateMean, StateCovariance) {
        let mut mean = StateMean::zeros();
        mean.fixed_rows_mut::<4>(0).copy_from(measurement);

        let h = measurement[3];
        let position = 2.0 * self.std_weight_position * h;
        let velocity = 10.0 * self.std_weight_velocity * h;
        let std = [
            position, position, 1e-2, position, velocity, velocity, 1e-5, velocity,
        ];

        (mean, diagonal(std))
    }

    pub fn predict(
        &self,
        mean: &StateMean,
        covariance: &StateCovariance,
    ) -> (StateMean, StateCovariance) {
        let h = mean[3];
        let position = self.std_weight_position * h;
        let velocity = self.std_weight_velocity * h;
        let motion_noise = diagonal([
            position, position, 1e-2, position, velocity, velocity, 1e-5, velocity,
        ]);

        let mean = self.motion * mean;
        let covariance = self.motion * covariance * self.motion.transpose() + motion_noise;
        (mean, covariance)
    }

    fn project(
        &self,
        mean: &StateMean,
        covariance: &StateCovariance,
    ) -> (Measurement, ProjectedCovariance) {
        let h = mean[3];
        let position = self.std_weight_position * h;
        let mut noise = ProjectedCovariance::zeros();
        for (i, std) in [position, position, 1e-1, position].into_iter().enumerate() {
            noise[(i, i)] = std * std;
        }

        let projected_mean = self.observation * mean;
        let projected_covariance =
            self.observation * covariance * self.observation.transpose() + noise;
        (projected_mean, projected_covariance)
    }

    /// Corrects the state with a new measurement. A singular innovation
    /// covariance leaves the state unchanged.
    pub fn update(
        &self,
        mean: &StateMean,
        covariance: &StateCovariance,
        measurement: &Measurement,
    ) -> (StateMean, StateCovariance) {
        let (projected_mean, projected_covariance) = self.project(mean, covariance);
        let Some(inverse) = projected_covariance.try_inverse() else {
            tracing::warn!("Singular innovation covariance, skipping Kalman update");
            return (*mean, *covariance);
        };

        let gain = covariance * self.observation.transpose() * inverse;
        let innovation = measurement - projected_mean;

        let mean = mean + gain * innovation;
        let covariance = covariance - gain * projected_covariance * gain.transpose();
        (mean, covariance)
    }
}

fn diagonal(std: [f64; 8]) -> StateCovariance {
    StateCovariance::from_diagonal(&StateMean::from_iterator(std.into_iter().map(|s| s * s)))
}
