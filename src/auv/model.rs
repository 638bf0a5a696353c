/**
 * Buoyancy Model
 *
 * Running estimate of the vehicle's net buoyant force and the offset of
 * its center of buoyancy from its center of mass, plus the incremental
 * update law that folds one residual sample at a time into it.
 */

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::error::CalibrationError;

/// Standard gravity, m/s^2
pub const GRAVITY: f64 = 9.81;

/// How a level-attitude moment residual maps onto the center offset.
///
/// `Crossed` feeds the moment's x component into the y offset and the
/// y component into the x offset. `Direct` keeps the axes aligned. Which
/// one is right depends on the controller's body-frame convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelMomentMapping {
    #[default]
    Crossed,
    Direct,
}

/// Current buoyancy estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuoyancyModel {
    /// Net buoyant force (N)
    pub buoyant_force: f64,
    /// Center of buoyancy relative to center of mass (m)
    pub center_offset: Vector3<f64>,
}

/// Parameter snapshot as the thruster controller's configuration names it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    #[serde(rename = "Buoyant_Force")]
    pub buoyant_force: f64,
    #[serde(rename = "Buoyancy_X_POS")]
    pub cob_x: f64,
    #[serde(rename = "Buoyancy_Y_POS")]
    pub cob_y: f64,
    #[serde(rename = "Buoyancy_Z_POS")]
    pub cob_z: f64,
}

impl BuoyancyModel {
    /// Neutrally buoyant vehicle with coincident centers.
    pub fn from_mass(mass_kg: f64) -> Self {
        Self {
            buoyant_force: mass_kg * GRAVITY,
            center_offset: Vector3::zeros(),
        }
    }

    /// Magnitude of a force residual, negated when it points down (z < 0).
    pub fn signed_force_magnitude(force: &Vector3<f64>) -> f64 {
        let magnitude = force.norm();
        if force.z < 0.0 {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Fold one force residual into the buoyant force. Returns the correction applied.
    pub fn apply_force_residual(&mut self, force: &Vector3<f64>, gain: f64) -> f64 {
        let correction = Self::signed_force_magnitude(force) * gain;
        self.buoyant_force += correction;
        correction
    }

    /// Fold one moment residual measured at level attitude into the x/y offset.
    pub fn apply_level_moment(
        &mut self,
        moment: &Vector3<f64>,
        gain: f64,
        mapping: LevelMomentMapping,
        min_buoyant_force: f64,
    ) -> Result<(), CalibrationError> {
        let force = self.checked_force(min_buoyant_force)?;
        match mapping {
            LevelMomentMapping::Crossed => {
                self.center_offset.y += moment.x / force * gain;
                self.center_offset.x += moment.y / force * gain;
            }
            LevelMomentMapping::Direct => {
                self.center_offset.x += moment.x / force * gain;
                self.center_offset.y += moment.y / force * gain;
            }
        }
        Ok(())
    }

    /// Fold one moment residual measured while rolled into the z offset.
    pub fn apply_roll_moment(
        &mut self,
        moment: &Vector3<f64>,
        gain: f64,
        min_buoyant_force: f64,
    ) -> Result<(), CalibrationError> {
        let force = self.checked_force(min_buoyant_force)?;
        self.center_offset.z -= moment.x / force * gain;
        Ok(())
    }

    fn checked_force(&self, min_buoyant_force: f64) -> Result<f64, CalibrationError> {
        if !self.buoyant_force.is_finite() || self.buoyant_force.abs() < min_buoyant_force {
            return Err(CalibrationError::DegenerateEstimate {
                buoyant_force: self.buoyant_force,
            });
        }
        Ok(self.buoyant_force)
    }

    pub fn to_update(&self) -> ParameterUpdate {
        ParameterUpdate {
            buoyant_force: self.buoyant_force,
            cob_x: self.center_offset.x,
            cob_y: self.center_offset.y,
            cob_z: self.center_offset.z,
        }
    }
}
