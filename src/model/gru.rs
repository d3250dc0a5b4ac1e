// GRU cell with an explicit hidden state
//
// r = σ(W_ir x + W_hr h)
// z = σ(W_iz x + W_hz h)
// n = tanh(W_in x + r ⊙ (W_hn h))
// h' = (1 − z) ⊙ n + z ⊙ h

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{activation::sigmoid, backend::Backend, Tensor};

/// Single-step gated recurrent unit
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    input_gates: Linear<B>,
    hidden_gates: Linear<B>,
    hidden_size: usize,
}

impl<B: Backend> GruCell<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            input_gates: LinearConfig::new(input_size, 3 * hidden_size).init(device),
            hidden_gates: LinearConfig::new(hidden_size, 3 * hidden_size).init(device),
            hidden_size,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Advance one step
    ///
    /// # Arguments
    /// * `input` - [N, input_size]
    /// * `hidden` - [N, hidden_size]
    ///
    /// # Returns
    /// Next hidden state, [N, hidden_size]
    pub fn forward(&self, input: Tensor<B, 2>, hidden: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = self.hidden_size;
        let gi = self.input_gates.forward(input);
        let gh = self.hidden_gates.forward(hidden.clone());

        let reset = sigmoid(gi.clone().narrow(1, 0, h) + gh.clone().narrow(1, 0, h));
        let update = sigmoid(gi.clone().narrow(1, h, h) + gh.clone().narrow(1, h, h));
        let candidate = (gi.narrow(1, 2 * h, h) + reset * gh.narrow(1, 2 * h, h)).tanh();

        let keep = update.clone().neg().add_scalar(1.0);
        keep * candidate + update * hidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InferenceBackend;

    #[test]
    fn test_output_shape_and_bounds() {
        let device = Default::default();
        let cell = GruCell::<InferenceBackend>::new(4, 6, &device);
        let input = Tensor::<InferenceBackend, 2>::ones([2, 4], &device);
        let hidden = Tensor::<InferenceBackend, 2>::zeros([2, 6], &device);

        let next = cell.forward(input, hidden);
        assert_eq!(next.dims(), [2, 6]);

        // Convex mix of tanh output and a zero state stays in (-1, 1)
        let values = next.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_deterministic_for_fixed_weights() {
        let device = Default::default();
        let cell = GruCell::<InferenceBackend>::new(3, 5, &device);
        let input = Tensor::<InferenceBackend, 2>::from_floats([[0.1, -0.2, 0.3]], &device);
        let hidden = Tensor::<InferenceBackend, 2>::zeros([1, 5], &device);

        let a = cell.forward(input.clone(), hidden.clone()).into_data();
        let b = cell.forward(input, hidden).into_data();
        assert_eq!(a, b);
    }
}
