use nalgebra::{DMatrix, DVector};

use crate::ml_model::mlp::{DenseLayer, MlpWeights};

/// Adam optimizer state (first and second moment estimates per weight)
pub(crate) struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: i32,
    m: Vec<DenseLayer>,
    v: Vec<DenseLayer>,
}

impl Adam {
    pub(crate) fn new(
        weights: &MlpWeights,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> Self {
        let zeros = || {
            weights
                .layers
                .iter()
                .map(|l| DenseLayer {
                    weights: DMatrix::zeros(l.weights.nrows(), l.weights.ncols()),
                    bias: DVector::zeros(l.bias.len()),
                })
                .collect::<Vec<_>>()
        };
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: zeros(),
            v: zeros(),
        }
    }

    pub(crate) fn apply(
        &mut self,
        weights: &mut MlpWeights,
        gradients: &[DenseLayer],
    ) {
        self.t += 1;
        let (b1, b2, learning_rate, epsilon) = (self.beta1, self.beta2, self.learning_rate, self.epsilon);
        let bias_correction1 = 1.0 - b1.powi(self.t);
        let bias_correction2 = 1.0 - b2.powi(self.t);
        let step = |m: f32, v: f32| learning_rate * (m / bias_correction1) / ((v / bias_correction2).sqrt() + epsilon);

        for (((layer, g), m), v) in weights.layers.iter_mut().zip(gradients).zip(self.m.iter_mut()).zip(self.v.iter_mut()) {
            m.weights = &m.weights * b1 + &g.weights * (1.0 - b1);
            v.weights = &v.weights * b2 + g.weights.component_mul(&g.weights) * (1.0 - b2);
            layer.weights -= m.weights.zip_map(&v.weights, step);

            m.bias = &m.bias * b1 + &g.bias * (1.0 - b1);
            v.bias = &v.bias * b2 + g.bias.component_mul(&g.bias) * (1.0 - b2);
            layer.bias -= m.bias.zip_map(&v.bias, step);
        }
    }
}
