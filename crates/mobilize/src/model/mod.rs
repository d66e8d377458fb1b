//! # Mobile Model
//!
//! The simplified recurrent network that stands in for the checkpoint's
//! transformer in the mobile bundle:
//!
//! ```text
//! tokens [seq] -> Embedding [seq, hidden]
//!              -> LSTM x num_layers [seq, hidden]
//!              -> Dense [seq, vocab]
//! ```
//!
//! The network is freshly initialized; it shares only the vocabulary size
//! with the source checkpoint.

pub mod init;
pub mod lstm;
pub mod matrix;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    errors::{MZResult, MobilizeError},
    model::{lstm::LstmLayer, matrix::Matrix},
};

/// Default model vocabulary size.
pub const DEFAULT_VOCAB_SIZE: usize = 32000;

/// Default hidden (embedding and LSTM) width.
pub const DEFAULT_HIDDEN_SIZE: usize = 512;

/// Default number of stacked LSTM layers.
pub const DEFAULT_NUM_LAYERS: usize = 2;

/// Shape options for [`MobileModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MobileModelConfig {
    /// Vocabulary size of the embedding table and the output projection.
    pub vocab_size: usize,

    /// Embedding and LSTM width.
    pub hidden_size: usize,

    /// Number of stacked LSTM layers.
    pub num_layers: usize,
}

impl Default for MobileModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: DEFAULT_VOCAB_SIZE,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            num_layers: DEFAULT_NUM_LAYERS,
        }
    }
}

impl MobileModelConfig {
    /// Set the vocabulary size.
    pub fn with_vocab_size(
        mut self,
        vocab_size: usize,
    ) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    /// Set the hidden size.
    pub fn with_hidden_size(
        mut self,
        hidden_size: usize,
    ) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Set the number of LSTM layers.
    pub fn with_num_layers(
        mut self,
        num_layers: usize,
    ) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Check that every dimension is non-zero.
    pub fn validate(&self) -> MZResult<()> {
        if self.vocab_size == 0 || self.hidden_size == 0 || self.num_layers == 0 {
            return Err(MobilizeError::InvalidConfig(format!(
                "model dimensions must be non-zero: {self:?}"
            )));
        }
        if self.vocab_size > i32::MAX as usize || self.hidden_size > i32::MAX as usize {
            return Err(MobilizeError::InvalidConfig(format!(
                "model dimensions must fit in i32: {self:?}"
            )));
        }
        Ok(())
    }
}

/// A dense output projection.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    kernel: Matrix,
    bias: Vec<f32>,
}

impl DenseLayer {
    /// Create a layer with Glorot-uniform kernel and zero bias.
    pub fn new<R: Rng>(
        rng: &mut R,
        input_dim: usize,
        units: usize,
    ) -> Self {
        Self {
            kernel: init::glorot_uniform(rng, input_dim, units),
            bias: vec![0.0; units],
        }
    }

    /// The `[input_dim, units]` kernel.
    pub fn kernel(&self) -> &Matrix {
        &self.kernel
    }

    /// The `[units]` bias.
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// Apply the projection to each row of `inputs`.
    pub fn forward(
        &self,
        inputs: &Matrix,
    ) -> Matrix {
        let mut out = Matrix::zeros(inputs.rows(), self.kernel.cols());
        for t in 0..inputs.rows() {
            let row = out.row_mut(t);
            row.copy_from_slice(&self.bias);
            self.kernel.accumulate_vec_mul(inputs.row(t), row);
        }
        out
    }
}

/// The result of tracing a model with a dummy input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceReport {
    /// Length of the dummy token sequence.
    pub input_len: usize,

    /// The `[seq, vocab]` output shape.
    pub output_shape: [usize; 2],
}

/// Embedding -> stacked LSTM -> dense language model.
#[derive(Debug, Clone)]
pub struct MobileModel {
    config: MobileModelConfig,
    embedding: Matrix,
    lstm_layers: Vec<LstmLayer>,
    dense: DenseLayer,
}

impl MobileModel {
    /// Build a freshly initialized model.
    pub fn new<R: Rng>(
        config: MobileModelConfig,
        rng: &mut R,
    ) -> MZResult<Self> {
        config.validate()?;

        let hidden = config.hidden_size;
        let embedding = init::uniform(
            rng,
            config.vocab_size,
            hidden,
            init::EMBEDDING_INIT_LIMIT,
        );
        let lstm_layers = (0..config.num_layers)
            .map(|_| LstmLayer::new(&mut *rng, hidden, hidden))
            .collect();
        let dense = DenseLayer::new(rng, hidden, config.vocab_size);

        Ok(Self {
            config,
            embedding,
            lstm_layers,
            dense,
        })
    }

    /// Build a model from an optional seed.
    ///
    /// `None` draws the seed from the operating system.
    pub fn seeded(
        config: MobileModelConfig,
        seed: Option<u64>,
    ) -> MZResult<Self> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::new(config, &mut rng)
    }

    /// The model shape.
    pub fn config(&self) -> &MobileModelConfig {
        &self.config
    }

    /// The `[vocab, hidden]` embedding table.
    pub fn embedding(&self) -> &Matrix {
        &self.embedding
    }

    /// The stacked LSTM layers, input first.
    pub fn lstm_layers(&self) -> &[LstmLayer] {
        &self.lstm_layers
    }

    /// The output projection.
    pub fn dense(&self) -> &DenseLayer {
        &self.dense
    }

    /// Number of trainable parameters.
    pub fn num_parameters(&self) -> usize {
        self.embedding.as_slice().len()
            + self
                .lstm_layers
                .iter()
                .map(LstmLayer::num_parameters)
                .sum::<usize>()
            + self.dense.kernel().as_slice().len()
            + self.dense.bias().len()
    }

    /// Compute `[seq, vocab]` logits for a token sequence.
    pub fn forward(
        &self,
        tokens: &[u32],
    ) -> MZResult<Matrix> {
        let vocab_size = self.config.vocab_size;
        let mut x = Matrix::zeros(tokens.len(), self.config.hidden_size);
        for (t, &token) in tokens.iter().enumerate() {
            if token as usize >= vocab_size {
                return Err(MobilizeError::TokenOutOfRange { token, vocab_size });
            }
            x.row_mut(t)
                .copy_from_slice(self.embedding.row(token as usize));
        }

        for layer in &self.lstm_layers {
            x = layer.forward(&x);
        }

        Ok(self.dense.forward(&x))
    }

    /// Run a zero-filled dummy sequence through the model and check the output shape.
    pub fn trace(
        &self,
        dummy_len: usize,
    ) -> MZResult<TraceReport> {
        let dummy = vec![0u32; dummy_len];
        let logits = self.forward(&dummy)?;

        let expected = [dummy_len, self.config.vocab_size];
        if logits.shape() != expected {
            return Err(MobilizeError::ShapeMismatch(format!(
                "trace produced {:?}, expected {expected:?}",
                logits.shape()
            )));
        }

        Ok(TraceReport {
            input_len: dummy_len,
            output_shape: expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MobileModelConfig {
        MobileModelConfig::default()
            .with_vocab_size(16)
            .with_hidden_size(4)
    }

    #[test]
    fn test_default_config() {
        let config = MobileModelConfig::default();
        assert_eq!(config.vocab_size, 32000);
        assert_eq!(config.hidden_size, 512);
        assert_eq!(config.num_layers, 2);
    }

    #[test]
    fn test_validate() {
        assert!(small_config().validate().is_ok());
        assert!(small_config().with_num_layers(0).validate().is_err());
        assert!(small_config().with_hidden_size(0).validate().is_err());
    }

    #[test]
    fn test_build_shapes() {
        let model = MobileModel::seeded(small_config(), Some(42)).unwrap();

        assert_eq!(model.embedding().shape(), [16, 4]);
        assert_eq!(model.lstm_layers().len(), 2);
        assert_eq!(model.dense().kernel().shape(), [4, 16]);
        assert_eq!(model.dense().bias(), &[0.0; 16]);
        assert!(
            model
                .embedding()
                .as_slice()
                .iter()
                .all(|v| v.abs() <= init::EMBEDDING_INIT_LIMIT)
        );

        let lstm = 4 * 16 + 4 * 16 + 16;
        assert_eq!(model.num_parameters(), 16 * 4 + 2 * lstm + 4 * 16 + 16);
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = MobileModel::seeded(small_config(), Some(9)).unwrap();
        let b = MobileModel::seeded(small_config(), Some(9)).unwrap();
        assert_eq!(a.embedding(), b.embedding());
        assert_eq!(a.dense().kernel(), b.dense().kernel());
    }

    #[test]
    fn test_forward_and_trace() {
        let model = MobileModel::seeded(small_config(), Some(1)).unwrap();

        let logits = model.forward(&[1, 5, 15]).unwrap();
        assert_eq!(logits.shape(), [3, 16]);
        assert!(logits.as_slice().iter().all(|v| v.is_finite()));

        let report = model.trace(4).unwrap();
        assert_eq!(
            report,
            TraceReport {
                input_len: 4,
                output_shape: [4, 16],
            }
        );
    }

    #[test]
    fn test_forward_rejects_out_of_range() {
        let model = MobileModel::seeded(small_config(), Some(1)).unwrap();
        match model.forward(&[16]) {
            Err(MobilizeError::TokenOutOfRange { token, vocab_size }) => {
                assert_eq!(token, 16);
                assert_eq!(vocab_size, 16);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
