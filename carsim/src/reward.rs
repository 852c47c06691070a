use serde::{Deserialize, Serialize};

use crate::sensor::Observation;
use crate::vehicle::CarAction;

/// Reward shaping of the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardPolicy {
    pub turn_penalty: f32,
    pub forward_bonus: f32,
    /// Weight of the summed proximity term `Σ(reading - safe_distance)`
    pub proximity_weight: f32,
    /// Normalized distance below which a reading is penalized
    pub safe_distance: f32,
    pub crash_penalty: f32,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            turn_penalty: 0.8,
            forward_bonus: 0.5,
            proximity_weight: 0.2,
            safe_distance: 0.7,
            crash_penalty: 500.0,
        }
    }
}

impl RewardPolicy {
    pub fn step_reward(
        &self,
        action: CarAction,
        observation: &Observation,
        crashed: bool,
    ) -> f32 {
        if crashed {
            return -self.crash_penalty;
        }
        let action_reward = match action {
            CarAction::TurnLeft | CarAction::TurnRight => -self.turn_penalty,
            CarAction::Forward => self.forward_bonus,
        };
        let proximity: f32 = observation.readings().iter().map(|r| r - self.safe_distance).sum();
        action_reward + self.proximity_weight * proximity
    }

    /// Best reward a single step can earn (driving forward, nothing in sight)
    pub fn max_step_reward(
        &self,
        observation_len: usize,
    ) -> f32 {
        self.forward_bonus + self.proximity_weight * observation_len as f32 * (1.0 - self.safe_distance)
    }
}
