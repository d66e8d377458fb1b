//! # LSTM Layer

use rand::Rng;

use crate::model::{init, matrix::Matrix};

/// The four LSTM gates, in kernel column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Input gate.
    Input,
    /// Forget gate.
    Forget,
    /// Cell candidate.
    Cell,
    /// Output gate.
    Output,
}

impl Gate {
    /// All gates, in kernel column order.
    pub const ALL: [Gate; 4] = [Gate::Input, Gate::Forget, Gate::Cell, Gate::Output];

    /// The gate's block index along the `4 * units` axis.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lower-case gate name.
    pub fn name(self) -> &'static str {
        match self {
            Gate::Input => "input",
            Gate::Forget => "forget",
            Gate::Cell => "cell",
            Gate::Output => "output",
        }
    }
}

/// A unidirectional LSTM layer returning the full output sequence.
///
/// Weights are laid out like a Keras `LSTM`:
/// * `kernel` is `[input_dim, 4 * units]`,
/// * `recurrent_kernel` is `[units, 4 * units]`,
/// * `bias` is `[4 * units]`,
///
/// with the `4 * units` axis split into `i, f, c, o` gate blocks.
#[derive(Debug, Clone)]
pub struct LstmLayer {
    units: usize,
    kernel: Matrix,
    recurrent_kernel: Matrix,
    bias: Vec<f32>,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl LstmLayer {
    /// Create a layer with Keras default initialization.
    pub fn new<R: Rng>(
        rng: &mut R,
        input_dim: usize,
        units: usize,
    ) -> Self {
        Self {
            units,
            kernel: init::glorot_uniform(rng, input_dim, 4 * units),
            recurrent_kernel: init::orthogonal(rng, units, 4 * units),
            bias: init::unit_forget_bias(units),
        }
    }

    /// Number of units.
    pub fn units(&self) -> usize {
        self.units
    }

    /// Input feature width.
    pub fn input_dim(&self) -> usize {
        self.kernel.rows()
    }

    /// The `[input_dim, 4 * units]` input kernel.
    pub fn kernel(&self) -> &Matrix {
        &self.kernel
    }

    /// The `[units, 4 * units]` recurrent kernel.
    pub fn recurrent_kernel(&self) -> &Matrix {
        &self.recurrent_kernel
    }

    /// The `[4 * units]` bias.
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// The `[input_dim, units]` input kernel block for one gate.
    pub fn gate_kernel(
        &self,
        gate: Gate,
    ) -> Matrix {
        self.kernel.column_block(gate.index() * self.units, self.units)
    }

    /// The `[units, units]` recurrent kernel block for one gate.
    pub fn gate_recurrent_kernel(
        &self,
        gate: Gate,
    ) -> Matrix {
        self.recurrent_kernel
            .column_block(gate.index() * self.units, self.units)
    }

    /// The `[units]` bias slice for one gate.
    pub fn gate_bias(
        &self,
        gate: Gate,
    ) -> &[f32] {
        let start = gate.index() * self.units;
        &self.bias[start..start + self.units]
    }

    /// Number of trainable parameters.
    pub fn num_parameters(&self) -> usize {
        self.kernel.as_slice().len() + self.recurrent_kernel.as_slice().len() + self.bias.len()
    }

    /// Run the layer over a `[seq, input_dim]` sequence from a zero state.
    ///
    /// Returns the `[seq, units]` hidden states.
    pub fn forward(
        &self,
        inputs: &Matrix,
    ) -> Matrix {
        let units = self.units;
        let mut outputs = Matrix::zeros(inputs.rows(), units);

        let mut h = vec![0.0f32; units];
        let mut c = vec![0.0f32; units];
        let mut z = vec![0.0f32; 4 * units];

        for t in 0..inputs.rows() {
            z.copy_from_slice(&self.bias);
            self.kernel.accumulate_vec_mul(inputs.row(t), &mut z);
            self.recurrent_kernel.accumulate_vec_mul(&h, &mut z);

            for u in 0..units {
                let i = sigmoid(z[u]);
                let f = sigmoid(z[units + u]);
                let g = z[2 * units + u].tanh();
                let o = sigmoid(z[3 * units + u]);

                c[u] = f * c[u] + i * g;
                h[u] = o * c[u].tanh();
            }

            outputs.row_mut(t).copy_from_slice(&h);
        }

        outputs
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn test_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = LstmLayer::new(&mut rng, 5, 3);

        assert_eq!(layer.kernel().shape(), [5, 12]);
        assert_eq!(layer.recurrent_kernel().shape(), [3, 12]);
        assert_eq!(layer.bias().len(), 12);
        assert_eq!(layer.num_parameters(), 5 * 12 + 3 * 12 + 12);

        assert_eq!(layer.gate_kernel(Gate::Cell).shape(), [5, 3]);
        assert_eq!(layer.gate_recurrent_kernel(Gate::Output).shape(), [3, 3]);
        assert_eq!(layer.gate_bias(Gate::Forget), &[1.0, 1.0, 1.0]);
        assert_eq!(layer.gate_bias(Gate::Input), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_gate_blocks_match_kernel() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = LstmLayer::new(&mut rng, 4, 2);

        let block = layer.gate_kernel(Gate::Forget);
        for r in 0..4 {
            for c in 0..2 {
                assert_eq!(block.get(r, c), layer.kernel().get(r, 2 + c));
            }
        }
    }

    #[test]
    fn test_forward_bounded() {
        let mut rng = StdRng::seed_from_u64(2);
        let layer = LstmLayer::new(&mut rng, 4, 3);

        let inputs = Matrix::from_vec(2, 4, vec![0.5, -1.0, 2.0, 0.0, 1.0, 1.0, -3.0, 0.25]).unwrap();
        let out = layer.forward(&inputs);

        assert_eq!(out.shape(), [2, 3]);
        assert!(out.as_slice().iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_zero_input_zero_state() {
        let mut rng = StdRng::seed_from_u64(4);
        let layer = LstmLayer::new(&mut rng, 2, 2);

        // With zero inputs and zero biases on i/c/o, the candidate is
        // tanh(0) = 0, so the cell and hidden state stay at zero.
        let out = layer.forward(&Matrix::zeros(3, 2));
        assert!(out.as_slice().iter().all(|&v| v == 0.0));
    }
}
