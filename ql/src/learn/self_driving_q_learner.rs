use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Result;
use itertools::Itertools;
use num_format::ToFormattedString;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::learn::replay_buffer::{EpisodeRewardHistory, ReplayBuffer};
use crate::ml_model::model::DeepQLearningModel;
use crate::prelude::{Action, DebugVisualizer, Environment, QlError};
use crate::util::format;
use crate::util::immutable::Immutable;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameter {
    /// Discount rate; (0 <= 𝛾 <= 1) represents the value of future rewards. The bigger, the more farsighted the agent becomes
    pub gamma: f32,
    /// Initial epsilon greedy parameter
    pub epsilon_max: f64,
    /// Minimum epsilon greedy parameter
    pub epsilon_min: f64,
    /// Multiplicative epsilon decay, applied once per finished episode
    pub epsilon_decay: f64,
    pub max_steps_per_episode: usize,
    pub batch_size: usize,
    /// Maximum replay length
    pub history_buffer_len: usize,
    /// Train the model after n actions
    pub update_after_actions: usize,
    /// After how many episodes we want to update the target network
    pub update_target_network_after_episodes: usize,
    /// this determines directly the number of recent goal-achieving episodes required to consider the learning task done
    pub episode_reward_history_buffer_len: usize,
    pub stats_after_episodes: usize,
    /// Percentage of total reward goal, which any single episode needs to reach (regardless of the average reward)
    pub lowest_episode_reward_goal_threshold_pct: f32,
    /// Fixed seed for exploration; random if not set
    pub seed: Option<u64>,
}

impl Parameter {
    fn decayed_epsilon(
        &self,
        epsilon: f64,
    ) -> f64 {
        f64::max(epsilon * self.epsilon_decay, self.epsilon_min)
    }
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            gamma: 0.95,
            epsilon_max: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            max_steps_per_episode: 10_000,
            batch_size: 32,
            history_buffer_len: 50_000,
            update_after_actions: 1,
            update_target_network_after_episodes: 10,
            episode_reward_history_buffer_len: 100,
            stats_after_episodes: 10,
            lowest_episode_reward_goal_threshold_pct: 0.5,
            seed: None,
        }
    }
}

/// Outcome of one learning episode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeSummary {
    pub steps: usize,
    pub reward: f32,
    /// The episode ended because the environment failed (e.g. a stalled device link)
    pub aborted: bool,
}

/// A self-driving Q learning algorithm.
/// It's directly connected to an environment and drives the speed of the steps in that environment with its response.
///
/// Per step: epsilon-greedy action selection, environment step, transition into the replay buffer
/// and (once enough transitions are recorded) a training update of the online model towards targets
/// computed with the stabilized (target) model.
/// Per episode: epsilon decay and - every n-th episode - synchronization of the target model.
pub struct SelfDrivingQLearner<E, M>
where
    E: Environment,
    M: DeepQLearningModel<E = E>,
{
    environment: E,
    param: Immutable<Parameter>,
    rng: StdRng,
    model: M,
    // "target_model"
    stabilized_model: M,
    checkpoint_file: Option<PathBuf>,
    replay_buffer: ReplayBuffer<E::S, E::A>,
    episode_reward_history: EpisodeRewardHistory,
    step_count: usize,
    episode_count: usize,
    running_reward: f32,
    last_loss: Option<f32>,
    ///  Epsilon greedy parameter
    epsilon: f64,
}

impl<E, M> SelfDrivingQLearner<E, M>
where
    E: Environment,
    M: DeepQLearningModel<E = E>,
{
    /// `model` and `stabilized_model` are expected to be of the same layout.
    /// The stabilized model starts as a copy of `model`.
    pub fn new(
        environment: E,
        param: Parameter,
        model: M,
        mut stabilized_model: M,
        checkpoint_file: Option<PathBuf>,
    ) -> Result<Self, QlError> {
        if param.batch_size == 0 || param.history_buffer_len < param.batch_size {
            return Err(QlError::invalid_configuration(format!(
                "history buffer ({}) must hold at least one batch ({}) and batch size must be positive",
                param.history_buffer_len, param.batch_size
            )));
        }
        if param.update_after_actions == 0 || param.update_target_network_after_episodes == 0 {
            return Err(QlError::invalid_configuration("update intervals must be positive"));
        }
        if !(0.0..=1.0).contains(&param.epsilon_decay) || param.epsilon_min > param.epsilon_max {
            return Err(QlError::invalid_configuration("epsilon schedule out of range"));
        }

        stabilized_model.sync_from(&model);
        let rng = match param.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let replay_buffer = ReplayBuffer::new(param.history_buffer_len);
        let episode_reward_history = EpisodeRewardHistory::new(param.episode_reward_history_buffer_len.max(1));
        let epsilon = param.epsilon_max;

        Ok(Self {
            environment,
            param: Immutable::new(param),
            rng,
            model,
            stabilized_model,
            checkpoint_file,
            replay_buffer,
            episode_reward_history,
            step_count: 0,
            episode_count: 0,
            running_reward: 0.0,
            last_loss: None,
            epsilon,
        })
    }

    pub fn environment(&self) -> &E { &self.environment }

    pub fn model(&self) -> &M { &self.model }

    pub fn stabilized_model(&self) -> &M { &self.stabilized_model }

    pub fn replay_buffer(&self) -> &ReplayBuffer<E::S, E::A> { &self.replay_buffer }

    pub fn epsilon(&self) -> f64 { self.epsilon }

    pub fn step_count(&self) -> usize { self.step_count }

    pub fn episode_count(&self) -> usize { self.episode_count }

    pub fn running_reward(&self) -> f32 { self.running_reward }

    /// Gives back the environment, e.g. to close it
    pub fn into_environment(self) -> E { self.environment }

    pub fn learn_till_mastered(&mut self) -> Result<()> {
        while !self.solved() {
            self.learn_episode()?;
        }
        Ok(())
    }

    pub fn solved(&self) -> bool {
        let goal = self.environment.episode_reward_goal_mean();
        self.episode_reward_history.is_full()
            && self.running_reward >= goal
            && self.episode_reward_history.min() >= goal * self.param.lowest_episode_reward_goal_threshold_pct
    }

    pub fn learn_episode(&mut self) -> Result<EpisodeSummary> {
        let mut state = Rc::new(self.environment.reset()?.clone());
        log::trace!("started learning episode {}", self.episode_count);

        let mut episode_reward: f32 = 0.0;
        let mut steps = 0;
        let mut aborted = false;

        while steps < self.param.max_steps_per_episode {
            self.step_count += 1;
            steps += 1;

            let action = self.choose_action(&state)?;

            log::trace!("{}", state.one_line_info());
            // Apply the sampled action in our environment
            let (state_next, reward, done) = match self.environment.step_as_rc(action) {
                Ok(r) => r,
                Err(e) if e.is_episode_fatal() => {
                    log::warn!("episode {} terminated: {}", self.episode_count, e);
                    aborted = true;
                    (Rc::clone(&state), self.environment.failure_reward(), true)
                }
                Err(e) => return Err(e.into()),
            };
            log::trace!("step with action {} resulted in reward: {:.2}, done: {}", action, reward, done);

            episode_reward += reward;

            // Save actions and states in replay buffer
            self.replay_buffer.add(action, state, Rc::clone(&state_next), reward, done);
            state = state_next;

            // Update every n-th step, once the replay buffer holds enough data for a batch
            if self.step_count % self.param.update_after_actions == 0 && self.replay_buffer.len() >= self.param.batch_size {
                self.train_step()?;
            }

            if done {
                break;
            }
        }

        self.finish_episode(episode_reward)?;

        Ok(EpisodeSummary {
            steps,
            reward: episode_reward,
            aborted,
        })
    }

    /// Epsilon-greedy action selection
    fn choose_action(
        &mut self,
        state: &E::S,
    ) -> Result<E::A, QlError> {
        if self.epsilon > self.rng.gen_range(0_f64..1_f64) {
            // Take random action
            let a = self.rng.gen_range(0..E::A::ACTION_SPACE);
            E::A::try_from_numeric(a)
        } else {
            // Predict best action Q-values from environment state
            self.model.predict_action(state)
        }
    }

    fn train_step(&mut self) -> Result<()> {
        let batch = self.replay_buffer.sample(&mut self.rng, self.param.batch_size)?;

        let state_samples = batch.iter().map(|t| &t.state).collect::<Vec<_>>();
        let state_next_samples = batch.iter().map(|t| &t.state_next).collect::<Vec<_>>();
        let action_samples = batch.iter().map(|t| t.action).collect::<Vec<_>>();

        // Build the updated Q-values for the sampled future states
        // Use the target model for stability
        let max_future_rewards = self.stabilized_model.batch_predict_max_future_reward(&state_next_samples);

        // Q value = reward + discount factor * expected future reward
        // for terminal steps, the updated q-value shall be exactly the reward
        let updated_q_values = batch
            .iter()
            .zip(max_future_rewards)
            .map(|(t, max_future_reward)| {
                if t.done {
                    t.reward
                } else {
                    t.reward + self.param.gamma * max_future_reward
                }
            })
            .collect::<Vec<_>>();

        let loss = self.model.train(&state_samples, &action_samples, &updated_q_values)?;
        log::debug!("step: {}, training loss: {:.4}", self.step_count, loss);
        self.last_loss = Some(loss);
        Ok(())
    }

    fn finish_episode(
        &mut self,
        episode_reward: f32,
    ) -> Result<()> {
        self.episode_reward_history.add(episode_reward);
        self.running_reward = self.episode_reward_history.avg();
        self.episode_count += 1;

        // Decay probability of taking random action
        self.epsilon = self.param.decayed_epsilon(self.epsilon);

        if self.episode_count % self.param.update_target_network_after_episodes == 0 {
            // update the target network with new weights
            self.stabilized_model.sync_from(&self.model);
            if let Some(file) = &self.checkpoint_file {
                self.model.write_checkpoint(file)?;
            }
            log::info!(
                "synchronized target network at episode {}, running reward: {:.2}",
                self.episode_count,
                self.running_reward
            );
        }

        if self.episode_count % self.param.stats_after_episodes.max(1) == 0 {
            self.learning_update_log();
        }

        if self.solved() {
            if let Some(file) = &self.checkpoint_file {
                self.model.write_checkpoint(file)?;
            }
            log::info!("Solved at episode {}!", self.episode_count);
            self.learning_update_log();
        }
        Ok(())
    }

    fn learning_update_log(&self) {
        let number_format = format::number_format();

        let mut action_counts = FxHashMap::<E::A, usize>::default();
        for a in self.replay_buffer.actions() {
            action_counts.entry(a).and_modify(|e| *e += 1).or_insert(1);
        }

        let total_actions = self.replay_buffer.len();
        let action_distribution_line = action_counts
            .iter()
            .sorted_by_key(|(action, _)| action.numeric())
            .map(|(&action, &count)| {
                let ratio = 100.0 * count as f32 / total_actions as f32;
                format!("{} {:.1}%", action, ratio)
            })
            .join(", ");

        let goal = self.environment.episode_reward_goal_mean();
        log::info!(
            "\n\
    episode: {}, steps: {}, 𝛾={:.2}, 𝜀={:.3}, reward_goal: {{mean >= {:.1}, low >= {:.1}}}, current_rewards: {{mean: {:.1}, low: {:.1}}}, loss: {}\n\
    action_distribution (of last {}): {}",
            self.episode_count.to_formatted_string(&number_format),
            self.step_count.to_formatted_string(&number_format),
            self.param.gamma,
            self.epsilon,
            goal,
            goal * self.param.lowest_episode_reward_goal_threshold_pct,
            self.episode_reward_history.avg(),
            self.episode_reward_history.min(),
            self.last_loss.map_or("-".to_string(), |l| format!("{:.4}", l)),
            total_actions.to_formatted_string(&number_format),
            action_distribution_line
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::ml_model::mlp::{ModelParameter, QLearningMlpModel};
    use crate::test::corridor_test_environment::CorridorTestEnvironment;

    use super::*;

    fn learner(
        environment: CorridorTestEnvironment,
        param: Parameter,
    ) -> SelfDrivingQLearner<CorridorTestEnvironment, QLearningMlpModel<CorridorTestEnvironment>> {
        let mut rng = StdRng::seed_from_u64(11);
        let model = QLearningMlpModel::init(2, ModelParameter::default(), &mut rng);
        let stabilized_model = QLearningMlpModel::init(2, ModelParameter::default(), &mut rng);
        SelfDrivingQLearner::new(environment, param, model, stabilized_model, None).unwrap()
    }

    fn test_param() -> Parameter {
        Parameter {
            batch_size: 8,
            history_buffer_len: 200,
            update_target_network_after_episodes: 3,
            episode_reward_history_buffer_len: 5,
            seed: Some(5),
            ..Parameter::default()
        }
    }

    #[test]
    fn test_learner_single_episode() -> Result<()> {
        let mut learner = learner(CorridorTestEnvironment::new(1), test_param());
        assert!(!learner.solved());

        let summary = learner.learn_episode()?;

        assert!(!learner.solved());
        assert!(summary.steps >= 1);
        assert!(!summary.aborted);
        assert_eq!(learner.step_count(), summary.steps);
        assert_eq!(learner.episode_count(), 1);
        assert_eq!(learner.replay_buffer().len(), summary.steps);
        Ok(())
    }

    #[test]
    fn test_epsilon_decays_per_episode() -> Result<()> {
        let param = Parameter {
            epsilon_decay: 0.5,
            epsilon_min: 0.1,
            ..test_param()
        };
        let mut learner = learner(CorridorTestEnvironment::new(2), param);
        let mut last_epsilon = learner.epsilon();
        assert_eq!(last_epsilon, 1.0);
        for _ in 0..10 {
            learner.learn_episode()?;
            assert!(learner.epsilon() <= last_epsilon);
            assert!(learner.epsilon() >= 0.1);
            last_epsilon = learner.epsilon();
        }
        assert_eq!(learner.epsilon(), 0.1);
        Ok(())
    }

    #[test]
    fn test_target_network_synchronized_every_n_episodes() -> Result<()> {
        let state = CorridorTestEnvironment::default().state_as_rc();
        let mut learner = learner(CorridorTestEnvironment::new(3), test_param());
        assert_eq!(
            learner.model().predict_q_values(&state),
            learner.stabilized_model().predict_q_values(&state)
        );
        while learner.episode_count() < 3 {
            learner.learn_episode()?;
        }
        assert_eq!(
            learner.model().predict_q_values(&state),
            learner.stabilized_model().predict_q_values(&state)
        );
        Ok(())
    }

    #[test]
    fn test_protocol_failure_produces_terminal_transition() -> Result<()> {
        let mut learner = learner(CorridorTestEnvironment::with_link_failure_at(4, 1), test_param());
        let summary = learner.learn_episode()?;

        assert!(summary.aborted);
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.reward, learner.environment().failure_reward());
        let last = learner.replay_buffer().iter().last().unwrap();
        assert!(last.done);
        assert_eq!(last.reward, learner.environment().failure_reward());
        assert_eq!(last.state, last.state_next);

        // the learner proceeds with the next episode
        learner.learn_episode()?;
        assert_eq!(learner.episode_count(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_parameter() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = QLearningMlpModel::<CorridorTestEnvironment>::init(2, ModelParameter::default(), &mut rng);
        let stabilized_model = QLearningMlpModel::init(2, ModelParameter::default(), &mut rng);
        let param = Parameter {
            batch_size: 64,
            history_buffer_len: 10,
            ..Parameter::default()
        };
        let r = SelfDrivingQLearner::new(CorridorTestEnvironment::default(), param, model, stabilized_model, None);
        assert!(matches!(r, Err(QlError::InvalidConfiguration(_))));
    }
}
