use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use nalgebra::DVector;

use crate::prelude::{Action, Environment, ModelActionType, QlError};

/// Value function abstraction: maps an environment state to a vector of per-action scores (Q-values)
pub trait DeepQLearningModel {
    type E: Environment;

    /// Q-values of all actions for the given state
    fn predict_q_values(
        &self,
        state: &<Self::E as Environment>::S,
    ) -> DVector<f32>;

    /// Predicts the best action (highest Q-value) for the given state
    fn predict_action(
        &self,
        state: &<Self::E as Environment>::S,
    ) -> Result<<Self::E as Environment>::A, QlError> {
        let q_values = self.predict_q_values(state);
        let best = q_values.imax() as ModelActionType;
        <Self::E as Environment>::A::try_from_numeric(best)
    }

    /// max_a Q(state, a) for every state of the batch
    fn batch_predict_max_future_reward(
        &self,
        states: &[&Rc<<Self::E as Environment>::S>],
    ) -> Vec<f32> {
        states
            .iter()
            .map(|&state| self.predict_q_values(state).max())
            .collect()
    }

    /// Performs a single training step using a batch of data.
    /// Regresses Q(state, action) towards the given `updated_q_values`.
    ///
    /// # Returns
    ///   mean loss of the batch (before the update)
    fn train(
        &mut self,
        state_batch: &[&Rc<<Self::E as Environment>::S>],
        action_batch: &[<Self::E as Environment>::A],
        updated_q_values: &[f32],
    ) -> Result<f32>;

    /// Overwrites own weights with the weights of `source`
    fn sync_from(
        &mut self,
        source: &Self,
    ) where
        Self: Sized;

    fn write_checkpoint(
        &self,
        file: &Path,
    ) -> Result<()>;

    fn read_checkpoint(
        &mut self,
        file: &Path,
    ) -> Result<()>;
}
