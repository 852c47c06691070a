use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console_engine::pixel;
use console_engine::screen::Screen;
use num_format::ToFormattedString;
use rand::rngs::StdRng;
use rand::SeedableRng;

use carsim::carsim_environment::CarSimEnvironment;
use carsim::config::{load_json, CarSimConfig};
use carsim::hardware::link::open_serial;
use carsim::hardware::{HardwareConfig, HardwareEnvironment};
use carsim::sensor::SensorLayout;
use ql::learn::self_driving_q_learner::{Parameter, SelfDrivingQLearner};
use ql::ml_model::mlp::{ModelParameter, QLearningMlpModel};
use ql::ml_model::model::DeepQLearningModel;
use ql::prelude::Environment;
use ql::util::format::number_format;
use ql::util::log::init_logging;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LayoutArg {
    Cones,
    ArmWindows,
}

#[derive(Debug, Parser)]
#[command(name = "carsim", about = "Q-learning collision avoidance - simulated or on a serial-linked vehicle", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct LearnArgs {
    /// Number of episodes to run (stops earlier when mastered)
    #[arg(long, default_value_t = 1000)]
    episodes: usize,

    /// Learner parameters (JSON)
    #[arg(long)]
    learner: Option<PathBuf>,

    /// Model weights are written to this file on every target network update
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Continue from the weights in the checkpoint file
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Fixed seed for all random decisions
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Learn in the simulated arena
    Train {
        #[command(flatten)]
        learn: LearnArgs,

        /// Simulation configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overrides the sensor layout of the configuration
        #[arg(long, value_enum)]
        layout: Option<LayoutArg>,

        /// Draw the arena to the console after every n-th episode (0 = never)
        #[arg(long, default_value_t = 0)]
        render_every: usize,
    },
    /// Learn on the physical vehicle, connected over a serial port
    Drive {
        #[command(flatten)]
        learn: LearnArgs,

        /// Hardware configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Serial port, e.g. /dev/ttyACM0
        #[arg(long)]
        port: Option<String>,

        #[arg(long)]
        baud_rate: Option<u32>,

        /// Read timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    match args.command {
        Command::Train {
            learn,
            config,
            layout,
            render_every,
        } => {
            let mut config: CarSimConfig = load_or_default(config.as_deref())?;
            if let Some(layout) = layout {
                config.sensors = match layout {
                    LayoutArg::Cones => SensorLayout::default_cones(),
                    LayoutArg::ArmWindows => SensorLayout::default_arm_windows(),
                };
            }
            config.seed = learn.seed.or(config.seed);
            let input_len = config.sensors.observation_len();
            let environment = CarSimEnvironment::new(config)?;
            run(environment, input_len, &learn, render_every)
        }
        Command::Drive {
            learn,
            config,
            port,
            baud_rate,
            timeout_ms,
        } => {
            let mut config: HardwareConfig = load_or_default(config.as_deref())?;
            config.port = port.unwrap_or(config.port);
            config.baud_rate = baud_rate.unwrap_or(config.baud_rate);
            config.timeout_ms = timeout_ms.unwrap_or(config.timeout_ms);
            let link = open_serial(&config.port, config.baud_rate, config.timeout())?;
            let input_len = config.observation_len;
            let environment = HardwareEnvironment::new(config, link)?;
            run(environment, input_len, &learn, 0)
        }
    }
}

fn load_or_default<T>(file: Option<&Path>) -> Result<T>
where
    T: Default + for<'de> serde::Deserialize<'de>,
{
    match file {
        Some(file) => load_json(file),
        None => Ok(T::default()),
    }
}

fn run<E: Environment>(
    environment: E,
    input_len: usize,
    args: &LearnArgs,
    render_every: usize,
) -> Result<()> {
    let mut param: Parameter = load_or_default(args.learner.as_deref())?;
    param.seed = args.seed.or(param.seed);

    let mut rng = match param.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut model = QLearningMlpModel::<E>::init(input_len, ModelParameter::default(), &mut rng);
    let stabilized_model = QLearningMlpModel::<E>::init(input_len, ModelParameter::default(), &mut rng);
    if let (true, Some(file)) = (args.resume, &args.checkpoint) {
        model.read_checkpoint(file)?;
        log::info!("resuming from checkpoint '{}'", file.display());
    }

    let mut learner = SelfDrivingQLearner::new(environment, param, model, stabilized_model, args.checkpoint.clone())?;
    let number_format = number_format();
    for _ in 0..args.episodes {
        let summary = learner.learn_episode()?;
        log::debug!(
            "episode {}: {} steps, reward {:.1}{}",
            learner.episode_count().to_formatted_string(&number_format),
            summary.steps,
            summary.reward,
            if summary.aborted { " (aborted)" } else { "" }
        );
        if render_every > 0 && learner.episode_count() % render_every == 0 {
            render(learner.environment());
        }
        if learner.solved() {
            break;
        }
    }
    log::info!(
        "finished after {} episodes ({} steps), running reward: {:.1}",
        learner.episode_count().to_formatted_string(&number_format),
        learner.step_count().to_formatted_string(&number_format),
        learner.running_reward()
    );

    learner.into_environment().close()?;
    Ok(())
}

fn render<E: Environment>(environment: &E) {
    let mut screen = Screen::new_fill(96, 36, pixel::pxl(' '));
    environment.render(&mut screen);
    screen.draw();
    println!();
}
