use rand::rngs::StdRng;
use rand::SeedableRng;

use ql::learn::self_driving_q_learner::{Parameter, SelfDrivingQLearner};
use ql::ml_model::mlp::{ModelParameter, QLearningMlpModel};
use ql::ml_model::model::DeepQLearningModel;
use ql::prelude::Environment;
use ql::test::corridor_test_environment::{CorridorAction, CorridorTestEnvironment};

const MAX_EPISODES: usize = 500;

#[test]
fn itest_learn_corridor() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    let checkpoint_file = dir.path().join("corridor.json");

    let model_param = ModelParameter {
        learning_rate: 0.005,
        ..ModelParameter::default()
    };
    let mut rng = StdRng::seed_from_u64(42);
    let model = QLearningMlpModel::init(2, model_param.clone(), &mut rng);
    let stabilized_model = QLearningMlpModel::init(2, model_param.clone(), &mut rng);

    let param = Parameter {
        epsilon_decay: 0.95,
        max_steps_per_episode: 50,
        batch_size: 16,
        history_buffer_len: 1_000,
        update_target_network_after_episodes: 5,
        episode_reward_history_buffer_len: 10,
        seed: Some(42),
        ..Parameter::default()
    };
    let mut learner = SelfDrivingQLearner::new(
        CorridorTestEnvironment::new(42),
        param,
        model,
        stabilized_model,
        Some(checkpoint_file.clone()),
    )?;

    while !learner.solved() && learner.episode_count() < MAX_EPISODES {
        learner.learn_episode()?;
    }
    assert!(
        learner.solved(),
        "not solved after {} episodes, running reward: {}",
        learner.episode_count(),
        learner.running_reward()
    );
    assert!(checkpoint_file.exists());

    // the persisted model prefers to stay
    let mut restored = QLearningMlpModel::<CorridorTestEnvironment>::init(2, model_param, &mut rng);
    restored.read_checkpoint(&checkpoint_file)?;
    let state = learner.environment().state_as_rc();
    assert_eq!(restored.predict_q_values(&state), learner.model().predict_q_values(&state));
    let mut env = CorridorTestEnvironment::new(7);
    let start = env.reset()?.clone();
    assert_eq!(restored.predict_action(&start)?, CorridorAction::Stay);
    Ok(())
}
