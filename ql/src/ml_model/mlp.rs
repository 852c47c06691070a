use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::path::Path;
use std::rc::Rc;

use anyhow::{ensure, Context, Result};
use nalgebra::{DMatrix, DVector};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ml_model::model::DeepQLearningModel;
use crate::ml_model::optimizer::Adam;
use crate::prelude::{Action, Environment, ToModelInput};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameter {
    /// Number of units per hidden layer
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f32,
    /// Huber loss turns from quadratic into linear beyond this error
    pub huber_delta: f32,
    pub adam_beta1: f32,
    pub adam_beta2: f32,
    pub adam_epsilon: f32,
}

impl Default for ModelParameter {
    fn default() -> Self {
        Self {
            hidden_layers: vec![24, 24],
            learning_rate: 0.001,
            huber_delta: 1.0,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DenseLayer {
    pub(crate) weights: DMatrix<f32>,
    pub(crate) bias: DVector<f32>,
}

impl DenseLayer {
    fn init<R: Rng>(
        rng: &mut R,
        inputs: usize,
        outputs: usize,
        limit: f32,
    ) -> Self {
        let distribution = Uniform::new_inclusive(-limit, limit);
        Self {
            weights: DMatrix::from_fn(outputs, inputs, |_, _| distribution.sample(rng)),
            bias: DVector::zeros(outputs),
        }
    }
}

/// Weights of all layers - this is what gets copied on target synchronization and written to a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpWeights {
    pub(crate) layers: Vec<DenseLayer>,
}

impl MlpWeights {
    fn same_shape(
        &self,
        other: &MlpWeights,
    ) -> bool {
        self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(other.layers.iter())
                .all(|(a, b)| a.weights.shape() == b.weights.shape() && a.bias.len() == b.bias.len())
    }
}

/// Layer outputs of one forward pass, kept for backpropagation
struct ForwardPass {
    /// `activations[0]` is the model input, `activations[i+1]` the output of layer `i`
    activations: Vec<DVector<f32>>,
}

impl ForwardPass {
    fn output(&self) -> &DVector<f32> { &self.activations[self.activations.len() - 1] }
}

/// Fully connected feed-forward network (ReLU hidden layers, linear output layer),
/// producing one Q-value per action.
///
/// Training regresses only the output of the taken action towards its target, using the Huber loss.
pub struct QLearningMlpModel<E: Environment> {
    param: ModelParameter,
    weights: MlpWeights,
    optimizer: Adam,
    _phantom: PhantomData<E>,
}

impl<E: Environment> QLearningMlpModel<E> {
    pub fn init<R: Rng>(
        input_len: usize,
        param: ModelParameter,
        rng: &mut R,
    ) -> Self {
        let action_space = E::A::ACTION_SPACE as usize;
        let mut layer_sizes = vec![input_len];
        layer_sizes.extend(param.hidden_layers.iter().copied());
        layer_sizes.push(action_space);

        let num_layers = layer_sizes.len() - 1;
        let layers = layer_sizes
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let (inputs, outputs) = (w[0], w[1]);
                let limit = if i + 1 < num_layers {
                    // He uniform
                    (6.0 / inputs as f32).sqrt()
                } else {
                    // Glorot uniform
                    (6.0 / (inputs + outputs) as f32).sqrt()
                };
                DenseLayer::init(rng, inputs, outputs, limit)
            })
            .collect::<Vec<_>>();

        let weights = MlpWeights { layers };
        let optimizer = Adam::new(&weights, param.learning_rate, param.adam_beta1, param.adam_beta2, param.adam_epsilon);
        Self {
            param,
            weights,
            optimizer,
            _phantom: PhantomData,
        }
    }

    pub fn weights(&self) -> &MlpWeights { &self.weights }

    pub fn input_len(&self) -> usize { self.weights.layers[0].weights.ncols() }

    fn forward(
        &self,
        input: DVector<f32>,
    ) -> ForwardPass {
        let num_layers = self.weights.layers.len();
        let mut activations = Vec::with_capacity(num_layers + 1);
        activations.push(input);
        for (i, layer) in self.weights.layers.iter().enumerate() {
            let z = &layer.weights * &activations[i] + &layer.bias;
            let a = if i + 1 < num_layers { z.map(|e| e.max(0.0)) } else { z };
            activations.push(a);
        }
        ForwardPass { activations }
    }

    /// Accumulates the gradients of one sample into `gradients`
    fn backward(
        &self,
        pass: &ForwardPass,
        output_gradient: DVector<f32>,
        gradients: &mut [DenseLayer],
    ) {
        let mut delta = output_gradient;
        for i in (0..self.weights.layers.len()).rev() {
            let input = &pass.activations[i];
            gradients[i].weights += &delta * input.transpose();
            gradients[i].bias += &delta;
            if i > 0 {
                let propagated = self.weights.layers[i].weights.transpose() * &delta;
                // ReLU derivative of the previous layer
                delta = propagated.zip_map(input, |d, a| if a > 0.0 { d } else { 0.0 });
            }
        }
    }

    fn zero_gradients(&self) -> Vec<DenseLayer> {
        self.weights
            .layers
            .iter()
            .map(|l| DenseLayer {
                weights: DMatrix::zeros(l.weights.nrows(), l.weights.ncols()),
                bias: DVector::zeros(l.bias.len()),
            })
            .collect()
    }
}

impl<E: Environment> DeepQLearningModel for QLearningMlpModel<E> {
    type E = E;

    fn predict_q_values(
        &self,
        state: &E::S,
    ) -> DVector<f32> {
        let input = state.to_model_input();
        debug_assert_eq!(input.len(), self.input_len(), "state dimension mismatch");
        let pass = self.forward(input);
        pass.output().clone()
    }

    fn train(
        &mut self,
        state_batch: &[&Rc<E::S>],
        action_batch: &[E::A],
        updated_q_values: &[f32],
    ) -> Result<f32> {
        ensure!(
            state_batch.len() == action_batch.len() && state_batch.len() == updated_q_values.len(),
            "batch length mismatch: {} states, {} actions, {} q-values",
            state_batch.len(),
            action_batch.len(),
            updated_q_values.len()
        );
        ensure!(!state_batch.is_empty(), "empty training batch");

        let batch_len = state_batch.len() as f32;
        let delta = self.param.huber_delta;
        let mut gradients = self.zero_gradients();
        let mut loss = 0.0;

        for ((state, action), &target) in state_batch.iter().zip(action_batch.iter()).zip(updated_q_values.iter()) {
            let input = state.to_model_input();
            ensure!(
                input.len() == self.input_len(),
                "state dimension mismatch. Expected {}, got {}",
                self.input_len(),
                input.len()
            );
            let pass = self.forward(input);
            let a = action.numeric() as usize;
            let error = pass.output()[a] - target;
            loss += huber_loss(error, delta);

            let mut output_gradient = DVector::zeros(pass.output().len());
            output_gradient[a] = huber_gradient(error, delta) / batch_len;
            self.backward(&pass, output_gradient, &mut gradients);
        }

        self.optimizer.apply(&mut self.weights, &gradients);
        Ok(loss / batch_len)
    }

    fn sync_from(
        &mut self,
        source: &Self,
    ) {
        self.weights.clone_from(&source.weights);
    }

    fn write_checkpoint(
        &self,
        file: &Path,
    ) -> Result<()> {
        let writer = BufWriter::new(File::create(file).with_context(|| format!("failed to create checkpoint file {}", file.display()))?);
        serde_json::to_writer(writer, &self.weights).with_context(|| format!("failed to write checkpoint {}", file.display()))?;
        log::debug!("wrote model checkpoint to '{}'", file.display());
        Ok(())
    }

    fn read_checkpoint(
        &mut self,
        file: &Path,
    ) -> Result<()> {
        let reader = BufReader::new(File::open(file).with_context(|| format!("failed to open checkpoint file {}", file.display()))?);
        let weights: MlpWeights =
            serde_json::from_reader(reader).with_context(|| format!("failed to read checkpoint {}", file.display()))?;
        ensure!(
            weights.same_shape(&self.weights),
            "checkpoint {} does not match the model layout",
            file.display()
        );
        self.weights = weights;
        self.optimizer = Adam::new(
            &self.weights,
            self.param.learning_rate,
            self.param.adam_beta1,
            self.param.adam_beta2,
            self.param.adam_epsilon,
        );
        Ok(())
    }
}

/// Huber loss of a single error value
pub fn huber_loss(
    error: f32,
    delta: f32,
) -> f32 {
    let abs = error.abs();
    if abs <= delta {
        0.5 * error * error
    } else {
        delta * (abs - 0.5 * delta)
    }
}

/// Derivative of [huber_loss] - bounded by `delta`
pub fn huber_gradient(
    error: f32,
    delta: f32,
) -> f32 {
    error.clamp(-delta, delta)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    use crate::test::corridor_test_environment::{CorridorAction, CorridorTestEnvironment};

    use super::*;

    fn model(seed: u64) -> QLearningMlpModel<CorridorTestEnvironment> {
        let mut rng = StdRng::seed_from_u64(seed);
        QLearningMlpModel::init(2, ModelParameter::default(), &mut rng)
    }

    #[rstest]
    #[case(0.0, 0.0, 0.0)]
    #[case(0.5, 0.125, 0.5)]
    #[case(-1.0, 0.5, -1.0)]
    #[case(3.0, 2.5, 1.0)]
    #[case(-500.0, 499.5, -1.0)]
    fn test_huber(
        #[case] error: f32,
        #[case] expected_loss: f32,
        #[case] expected_gradient: f32,
    ) {
        assert!((huber_loss(error, 1.0) - expected_loss).abs() < 1e-6);
        assert_eq!(huber_gradient(error, 1.0), expected_gradient);
    }

    #[test]
    fn test_output_dims() {
        let model = model(1);
        let env = CorridorTestEnvironment::default();
        let q = model.predict_q_values(env.state());
        assert_eq!(q.len(), 3);
        assert_eq!(model.input_len(), 2);
    }

    #[test]
    fn test_train_reduces_loss() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(2);
        let param = ModelParameter {
            learning_rate: 0.01,
            ..ModelParameter::default()
        };
        let mut model = QLearningMlpModel::<CorridorTestEnvironment>::init(2, param, &mut rng);
        let env = CorridorTestEnvironment::default();
        let state = env.state_as_rc();
        let states = vec![&state; 8];
        let actions = vec![CorridorAction::Stay; 8];
        let targets = vec![0.75; 8];

        let first_loss = model.train(&states, &actions, &targets)?;
        let mut loss = first_loss;
        for _ in 0..1000 {
            loss = model.train(&states, &actions, &targets)?;
        }
        assert!(loss < first_loss || first_loss < 1e-6, "loss {} did not drop below {}", loss, first_loss);
        let q = model.predict_q_values(&state);
        assert!((q[CorridorAction::Stay.numeric() as usize] - 0.75).abs() < 0.05);
        Ok(())
    }

    #[test]
    fn test_train_batch_length_mismatch() {
        let mut model = model(3);
        let state = CorridorTestEnvironment::default().state_as_rc();
        let r = model.train(&[&state, &state], &[CorridorAction::Left], &[1.0, 2.0]);
        assert!(r.is_err());
    }

    #[test]
    fn test_sync_from() {
        let online = model(4);
        let mut target = model(5);
        assert_ne!(online.weights(), target.weights());
        target.sync_from(&online);
        assert_eq!(online.weights(), target.weights());
    }

    #[test]
    fn test_save_and_load_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("checkpoint.json");
        let saved = model(6);
        saved.write_checkpoint(&file)?;

        let mut loaded = model(7);
        loaded.read_checkpoint(&file)?;
        let state = CorridorTestEnvironment::default().state_as_rc();
        assert_eq!(saved.predict_q_values(&state), loaded.predict_q_values(&state));
        Ok(())
    }

    #[test]
    fn test_load_checkpoint_with_other_layout_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("checkpoint.json");
        let mut rng = StdRng::seed_from_u64(8);
        let other = QLearningMlpModel::<CorridorTestEnvironment>::init(
            2,
            ModelParameter {
                hidden_layers: vec![5],
                ..ModelParameter::default()
            },
            &mut rng,
        );
        other.write_checkpoint(&file)?;
        assert!(model(9).read_checkpoint(&file).is_err());
        Ok(())
    }
}
