use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ql::prelude::{Environment, QlError};

use crate::carsim_environment::EpisodePhase;
use crate::hardware::link::{InputPort, LineLink};
use crate::hardware::protocol::{encode_action, encode_token, parse_reply, Reply};
use crate::sensor::Observation;
use crate::vehicle::CarAction;

pub mod link;
pub mod protocol;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Number of sensor readings per reply
    pub observation_len: usize,
    pub reset_token: String,
    /// Reward booked for a step, which failed because of the link
    pub failure_reward: f32,
    pub episode_reward_goal_mean: f32,
}

impl HardwareConfig {
    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 5_000,
            observation_len: 5,
            reset_token: "-1".to_string(),
            failure_reward: -500.0,
            episode_reward_goal_mean: 300.0,
        }
    }
}

/// A physical vehicle, connected over a line oriented link (usually a serial port).
/// The device runs the physics and computes the step score. This side only encodes actions and parses replies.
///
/// Any link or protocol failure ends the current episode with a [QlError::Protocol].
pub struct HardwareEnvironment<R: InputPort, W: Write> {
    config: HardwareConfig,
    link: Option<LineLink<R, W>>,
    observation: Observation,
    phase: EpisodePhase,
    step_count: usize,
}

impl<R: InputPort, W: Write> HardwareEnvironment<R, W> {
    pub fn new(
        config: HardwareConfig,
        link: LineLink<R, W>,
    ) -> Result<Self, QlError> {
        if config.observation_len == 0 {
            return Err(QlError::invalid_configuration("observation length must be positive"));
        }
        let observation = Observation::clear(config.observation_len);
        Ok(Self {
            config,
            link: Some(link),
            observation,
            // the device state is unknown until the first reset
            phase: EpisodePhase::Terminal,
            step_count: 0,
        })
    }

    pub fn phase(&self) -> EpisodePhase { self.phase }

    pub fn step_count(&self) -> usize { self.step_count }

    pub fn link(&self) -> Option<&LineLink<R, W>> { self.link.as_ref() }

    /// Sends a message and waits for the reply. Any failure terminates the episode.
    fn exchange(
        &mut self,
        message: &str,
    ) -> Result<Reply, QlError> {
        let observation_len = self.config.observation_len;
        let result = match self.link.as_mut() {
            None => Err(QlError::protocol("link is closed")),
            Some(link) => link
                .send(message)
                .and_then(|_| link.receive_line())
                .and_then(|line| parse_reply(&line, observation_len)),
        };
        if let Err(e) = &result {
            self.phase = EpisodePhase::Terminal;
            log::warn!("device exchange failed: {}", e);
        }
        result
    }
}

impl<R: InputPort, W: Write> Environment for HardwareEnvironment<R, W> {
    type S = Observation;
    type A = CarAction;

    fn reset(&mut self) -> Result<&Self::S, QlError> {
        // drop replies, which arrived after their timeout
        match self.link.as_mut() {
            Some(link) => link.discard_input()?,
            None => return Err(QlError::protocol("link is closed")),
        }
        let token = encode_token(&self.config.reset_token);
        let reply = self.exchange(&token)?;
        self.observation = reply.observation;
        self.phase = EpisodePhase::Ready;
        self.step_count = 0;
        Ok(&self.observation)
    }

    fn state(&self) -> &Self::S { &self.observation }

    fn step(
        &mut self,
        action: Self::A,
    ) -> Result<(&Self::S, f32, bool), QlError> {
        if self.link.is_none() {
            return Err(QlError::protocol("link is closed"));
        }
        if self.phase == EpisodePhase::Terminal {
            return Err(QlError::EpisodeOver);
        }
        self.phase = EpisodePhase::Running;
        let reply = self.exchange(&encode_action(action))?;
        self.observation = reply.observation;
        self.step_count += 1;
        if reply.done {
            self.phase = EpisodePhase::Terminal;
        }
        log::trace!("step {}: {} -> score {:.2}, done: {}", self.step_count, action, reply.score, reply.done);
        Ok((&self.observation, reply.score, reply.done))
    }

    fn failure_reward(&self) -> f32 { self.config.failure_reward }

    fn episode_reward_goal_mean(&self) -> f32 { self.config.episode_reward_goal_mean }

    fn close(&mut self) -> Result<(), QlError> {
        self.phase = EpisodePhase::Terminal;
        match self.link.take() {
            Some(mut link) => link.flush(),
            None => Ok(()),
        }
    }
}
