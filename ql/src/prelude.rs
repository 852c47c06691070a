use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::rc::Rc;

use console_engine::screen::Screen;
use nalgebra::DVector;

/// Data type we use to encode an `Action` to feed the model.
pub type ModelActionType = u8;

pub trait Action: Display + Debug + Sized + Clone + Copy + Hash + PartialEq + Eq {
    /// Number of possible actions
    const ACTION_SPACE: ModelActionType;
    /// Identifying the Action as a unique value in range (0..Self::ACTION_SPACE)
    fn numeric(&self) -> ModelActionType;
    fn try_from_numeric(value: ModelActionType) -> Result<Self, QlError>;
}

/// Produces the flat input vector, a state is represented with towards the model
pub trait ToModelInput {
    /// Number of scalar model inputs
    fn input_len(&self) -> usize;

    fn to_model_input(&self) -> DVector<f32>;
}

/// Learning environment, modeling the world of a learning agent.
///
/// Implemented by the simulation as well as by a hardware backend, which delegates
/// the physics to a remote device.
pub trait Environment {
    type S: Clone + DebugVisualizer + ToModelInput;
    type A: Action;

    /// Resets the environment to a defined starting point and returns the initial state
    fn reset(&mut self) -> Result<&Self::S, QlError>;

    /// Current state
    fn state(&self) -> &Self::S;

    /// Convenience wrapper around [Self::state]
    fn state_as_rc(&self) -> Rc<Self::S> { Rc::new(self.state().clone()) }

    /// Performs one time/action-step.
    ///
    /// Applies the given `action` to the environment and returns:
    ///   - next state
    ///   - immediate reward earned during performing that step
    ///   - done flag (e.g. vehicle crashed or step limit reached)
    fn step(
        &mut self,
        action: Self::A,
    ) -> Result<(&Self::S, f32, bool), QlError>;

    /// Performs a step with an action given by its numeric index.
    /// An index outside of the action space is a contract violation.
    fn step_numeric(
        &mut self,
        action: ModelActionType,
    ) -> Result<(&Self::S, f32, bool), QlError> {
        let action = Self::A::try_from_numeric(action)?;
        self.step(action)
    }

    /// Convenience wrapper around [Self::step] returning an [Rc] with a copy of the state.
    fn step_as_rc(
        &mut self,
        action: Self::A,
    ) -> Result<(Rc<Self::S>, f32, bool), QlError> {
        let (state, reward, done) = self.step(action)?;
        Ok((Rc::new(state.clone()), reward, done))
    }

    /// Reward booked for an episode, which had to be terminated because of a failure (e.g. a stalled device link)
    fn failure_reward(&self) -> f32;

    /// Average reward to reach over all episodes
    /// (expected to be a constant - not a moving target)
    fn episode_reward_goal_mean(&self) -> f32;

    /// Draws the current situation into `screen`. Never alters the environment.
    fn render(
        &self,
        _screen: &mut Screen,
    ) {
    }

    /// Releases external resources (e.g. a serial port)
    fn close(&mut self) -> Result<(), QlError> { Ok(()) }
}

pub trait DebugVisualizer {
    fn one_line_info(&self) -> String;
    fn render_to_console(&self) -> Screen;
}

#[derive(Debug, thiserror::Error)]
pub enum QlError {
    #[error("action value {value} out of range (0..{action_space})")]
    InvalidAction {
        value: ModelActionType,
        action_space: ModelActionType,
    },
    #[error("insufficient data: requested {requested} samples, but only {available} available")]
    InsufficientData { requested: usize, available: usize },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("episode is over - reset required")]
    EpisodeOver,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl QlError {
    pub fn protocol(msg: impl Into<String>) -> Self { QlError::Protocol(msg.into()) }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self { QlError::InvalidConfiguration(msg.into()) }

    /// Errors, which end the current episode, but leave the learner in a consistent state
    pub fn is_episode_fatal(&self) -> bool { matches!(self, QlError::Protocol(_)) }
}
