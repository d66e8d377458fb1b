//! # Model Converter
//!
//! Lowers a [`MobileModel`] into a TFLite graph:
//!
//! ```text
//! input_ids [1, seq] INT32
//!   -> GATHER(embedding)
//!   -> UNIDIRECTIONAL_SEQUENCE_LSTM x num_layers
//!   -> FULLY_CONNECTED(logits) [1, seq, vocab]
//! ```
//!
//! With float16 weights each constant is stored as `FLOAT16` and widened at
//! load time by a `DEQUANTIZE` operator.

use half::f16;

use crate::{
    errors::{MZResult, MobilizeError},
    model::{
        MobileModel,
        lstm::{Gate, LstmLayer},
        matrix::Matrix,
    },
    tflite::{
        builder::{GraphBuilder, OperatorOptions},
        schema::{Activation, BuiltinOperator, LSTM_INPUT_COUNT, OPTIONAL_INPUT, TensorType},
    },
};

/// Name of the converted subgraph.
pub const SUBGRAPH_NAME: &str = "main";

/// Description written into the model.
pub const MODEL_DESCRIPTION: &str = "mobilize: embedding-lstm language model";

/// Name of the token input tensor.
pub const INPUT_TENSOR_NAME: &str = "input_ids";

/// Name of the logits output tensor.
pub const OUTPUT_TENSOR_NAME: &str = "logits";

/// Converter optimization flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimization {
    /// Default size optimization; weight quantization to the supported types.
    Default,
}

/// Converts a [`MobileModel`] into TFLite bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TfliteConverter {
    /// Enabled optimizations.
    pub optimizations: Vec<Optimization>,

    /// Target types for quantized weights.
    pub supported_types: Vec<TensorType>,
}

impl TfliteConverter {
    /// A converter with no optimizations; weights stay float32.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default optimization with float16 weights.
    pub fn float16() -> Self {
        Self::new()
            .with_optimizations(vec![Optimization::Default])
            .with_supported_types(vec![TensorType::Float16])
    }

    /// Set the optimizations.
    pub fn with_optimizations(
        mut self,
        optimizations: Vec<Optimization>,
    ) -> Self {
        self.optimizations = optimizations;
        self
    }

    /// Set the supported weight types.
    pub fn with_supported_types(
        mut self,
        supported_types: Vec<TensorType>,
    ) -> Self {
        self.supported_types = supported_types;
        self
    }

    /// The storage type of constant weights.
    pub fn weight_type(&self) -> MZResult<TensorType> {
        if self.optimizations.is_empty() {
            return Ok(TensorType::Float32);
        }
        if self.supported_types.contains(&TensorType::Float16) {
            Ok(TensorType::Float16)
        } else {
            Err(MobilizeError::UnsupportedQuantization(format!(
                "optimizations {:?} with supported types {:?}; only float16 weights are implemented",
                self.optimizations, self.supported_types
            )))
        }
    }

    /// Convert a model into a serialized TFLite flatbuffer.
    pub fn convert(
        &self,
        model: &MobileModel,
    ) -> MZResult<Vec<u8>> {
        let weight_type = self.weight_type()?;
        let config = model.config();
        log::debug!(
            "lowering model: vocab={} hidden={} layers={} weights={weight_type:?}",
            config.vocab_size,
            config.hidden_size,
            config.num_layers
        );

        let mut lowering = Lowering {
            graph: GraphBuilder::new(SUBGRAPH_NAME),
            weight_type,
        };

        let input = lowering.graph.add_activation(
            INPUT_TENSOR_NAME,
            vec![1, 1],
            Some(vec![-1, -1]),
            TensorType::Int32,
        );

        let hidden = dim(config.hidden_size);
        let embedding = lowering.matrix("embedding/embeddings", model.embedding());
        let mut x = lowering.graph.add_activation(
            "embedding/output",
            vec![1, 1, hidden],
            Some(vec![-1, -1, hidden]),
            TensorType::Float32,
        );
        lowering.graph.add_operator(
            BuiltinOperator::Gather,
            1,
            vec![embedding, input],
            vec![x],
            OperatorOptions::Gather {
                axis: 0,
                batch_dims: 0,
            },
        );

        for (idx, layer) in model.lstm_layers().iter().enumerate() {
            x = lowering.lstm(&format!("lstm_{idx}"), layer, x);
        }

        let dense = model.dense();
        let vocab = dim(config.vocab_size);
        let weights = lowering.matrix("dense/kernel", &dense.kernel().transpose());
        let bias = lowering.vector("dense/bias", dense.bias());
        let logits = lowering.graph.add_activation(
            OUTPUT_TENSOR_NAME,
            vec![1, 1, vocab],
            Some(vec![-1, -1, vocab]),
            TensorType::Float32,
        );
        lowering.graph.add_operator(
            BuiltinOperator::FullyConnected,
            5,
            vec![x, weights, bias],
            vec![logits],
            OperatorOptions::FullyConnected {
                activation: Activation::None,
                keep_num_dims: true,
            },
        );

        lowering.graph.set_inputs(vec![input]);
        lowering.graph.set_outputs(vec![logits]);

        log::debug!(
            "graph has {} tensors and {} operators",
            lowering.graph.num_tensors(),
            lowering.graph.num_operators()
        );
        Ok(lowering.graph.finish(MODEL_DESCRIPTION))
    }
}

fn dim(n: usize) -> i32 {
    n as i32
}

struct Lowering {
    graph: GraphBuilder,
    weight_type: TensorType,
}

impl Lowering {
    /// Add a float constant, returning the float32 tensor consumers read.
    fn constant(
        &mut self,
        name: &str,
        shape: Vec<i32>,
        values: &[f32],
    ) -> i32 {
        match self.weight_type {
            TensorType::Float16 => {
                let data = values
                    .iter()
                    .flat_map(|&v| f16::from_f32(v).to_le_bytes())
                    .collect();
                let packed = self.graph.add_constant(
                    &format!("{name}_fp16"),
                    shape.clone(),
                    TensorType::Float16,
                    data,
                );
                let widened = self
                    .graph
                    .add_activation(name, shape, None, TensorType::Float32);
                self.graph.add_operator(
                    BuiltinOperator::Dequantize,
                    3,
                    vec![packed],
                    vec![widened],
                    OperatorOptions::Dequantize,
                );
                widened
            }
            _ => {
                let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                self.graph
                    .add_constant(name, shape, TensorType::Float32, data)
            }
        }
    }

    fn matrix(
        &mut self,
        name: &str,
        m: &Matrix,
    ) -> i32 {
        self.constant(name, vec![dim(m.rows()), dim(m.cols())], m.as_slice())
    }

    fn vector(
        &mut self,
        name: &str,
        v: &[f32],
    ) -> i32 {
        self.constant(name, vec![dim(v.len())], v)
    }

    /// Lower one LSTM layer; returns the output sequence tensor.
    fn lstm(
        &mut self,
        prefix: &str,
        layer: &LstmLayer,
        input: i32,
    ) -> i32 {
        let units = dim(layer.units());
        let mut inputs = vec![OPTIONAL_INPUT; LSTM_INPUT_COUNT];
        inputs[0] = input;

        for gate in Gate::ALL {
            let g = gate.index();
            let name = gate.name();
            inputs[1 + g] = self.matrix(
                &format!("{prefix}/input_to_{name}_weights"),
                &layer.gate_kernel(gate).transpose(),
            );
            inputs[5 + g] = self.matrix(
                &format!("{prefix}/recurrent_to_{name}_weights"),
                &layer.gate_recurrent_kernel(gate).transpose(),
            );
            inputs[12 + g] = self.vector(&format!("{prefix}/{name}_gate_bias"), layer.gate_bias(gate));
        }

        inputs[18] = self.graph.add_variable(
            &format!("{prefix}/output_state"),
            vec![1, units],
            TensorType::Float32,
        );
        inputs[19] = self.graph.add_variable(
            &format!("{prefix}/cell_state"),
            vec![1, units],
            TensorType::Float32,
        );

        let output = self.graph.add_activation(
            &format!("{prefix}/output"),
            vec![1, 1, units],
            Some(vec![-1, -1, units]),
            TensorType::Float32,
        );
        self.graph.add_operator(
            BuiltinOperator::UnidirectionalSequenceLstm,
            1,
            inputs,
            vec![output],
            OperatorOptions::UnidirectionalSequenceLstm {
                activation: Activation::Tanh,
                cell_clip: 0.0,
                proj_clip: 0.0,
                time_major: false,
            },
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::MobileModelConfig,
        tflite::{reader::TfliteModelInfo, schema::options_type},
    };

    fn small_model() -> MobileModel {
        let config = MobileModelConfig::default()
            .with_vocab_size(12)
            .with_hidden_size(3);
        MobileModel::seeded(config, Some(5)).unwrap()
    }

    fn find_tensor(
        info: &TfliteModelInfo<'_>,
        name: &str,
    ) -> usize {
        info.main_subgraph()
            .unwrap()
            .tensors
            .iter()
            .position(|t| t.name == name)
            .unwrap_or_else(|| panic!("no tensor {name}"))
    }

    #[test]
    fn test_weight_type() {
        assert_eq!(TfliteConverter::new().weight_type().unwrap(), TensorType::Float32);
        assert_eq!(
            TfliteConverter::float16().weight_type().unwrap(),
            TensorType::Float16
        );

        let int8 = TfliteConverter::new().with_optimizations(vec![Optimization::Default]);
        assert!(matches!(
            int8.weight_type(),
            Err(MobilizeError::UnsupportedQuantization(_))
        ));
        assert!(int8.convert(&small_model()).is_err());
    }

    #[test]
    fn test_float32_graph() {
        let model = small_model();
        let bytes = TfliteConverter::new().convert(&model).unwrap();
        let info = TfliteModelInfo::parse(&bytes).unwrap();

        assert_eq!(info.description.as_deref(), Some(MODEL_DESCRIPTION));
        assert_eq!(
            info.operator_sequence(0).unwrap(),
            vec![
                BuiltinOperator::Gather,
                BuiltinOperator::UnidirectionalSequenceLstm,
                BuiltinOperator::UnidirectionalSequenceLstm,
                BuiltinOperator::FullyConnected,
            ]
        );

        let subgraph = info.main_subgraph().unwrap();
        let input = &subgraph.tensors[subgraph.inputs[0] as usize];
        assert_eq!(input.name, INPUT_TENSOR_NAME);
        assert_eq!(input.tensor_type, TensorType::Int32 as i8);
        assert_eq!(input.shape_signature, Some(vec![-1, -1]));

        let output = &subgraph.tensors[subgraph.outputs[0] as usize];
        assert_eq!(output.name, OUTPUT_TENSOR_NAME);
        assert_eq!(output.shape, vec![1, 1, 12]);

        let embedding = find_tensor(&info, "embedding/embeddings");
        assert_eq!(
            info.tensor_values_f32(0, embedding).unwrap(),
            model.embedding().as_slice()
        );

        let dense = find_tensor(&info, "dense/kernel");
        assert_eq!(subgraph.tensors[dense].shape, vec![12, 3]);
        assert_eq!(
            info.tensor_values_f32(0, dense).unwrap(),
            model.dense().kernel().transpose().as_slice()
        );
    }

    #[test]
    fn test_lstm_operator_inputs() {
        let bytes = TfliteConverter::new().convert(&small_model()).unwrap();
        let info = TfliteModelInfo::parse(&bytes).unwrap();
        let subgraph = info.main_subgraph().unwrap();

        let lstm = &subgraph.operators[1];
        assert_eq!(lstm.options_type, options_type::UNIDIRECTIONAL_SEQUENCE_LSTM);
        assert_eq!(lstm.inputs.len(), LSTM_INPUT_COUNT);
        for idx in [9, 10, 11, 16, 17, 20, 21, 22, 23] {
            assert_eq!(lstm.inputs[idx], OPTIONAL_INPUT);
        }
        for idx in [18, 19] {
            let state = &subgraph.tensors[lstm.inputs[idx] as usize];
            assert!(state.is_variable);
            assert_eq!(state.shape, vec![1, 3]);
        }

        let forget_bias = &subgraph.tensors[lstm.inputs[13] as usize];
        assert_eq!(forget_bias.name, "lstm_0/forget_gate_bias");
        assert_eq!(
            info.tensor_values_f32(0, lstm.inputs[13] as usize).unwrap(),
            vec![1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_float16_graph() {
        let model = small_model();
        let f32_bytes = TfliteConverter::new().convert(&model).unwrap();
        let bytes = TfliteConverter::float16().convert(&model).unwrap();
        let info = TfliteModelInfo::parse(&bytes).unwrap();

        let ops = info.operator_sequence(0).unwrap();
        // One widening op per constant: embedding, 12 per LSTM layer, dense kernel and bias.
        let dequantize = ops
            .iter()
            .filter(|&&op| op == BuiltinOperator::Dequantize)
            .count();
        assert_eq!(dequantize, 1 + 2 * 12 + 2);
        assert_eq!(ops.last(), Some(&BuiltinOperator::FullyConnected));

        let packed = find_tensor(&info, "embedding/embeddings_fp16");
        let subgraph = info.main_subgraph().unwrap();
        assert_eq!(subgraph.tensors[packed].tensor_type, TensorType::Float16 as i8);

        let decoded = info.tensor_values_f32(0, packed).unwrap();
        for (a, b) in decoded.iter().zip(model.embedding().as_slice()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }

        let f32_info = TfliteModelInfo::parse(&f32_bytes).unwrap();
        assert_eq!(
            2 * info.total_buffer_bytes(),
            f32_info.total_buffer_bytes()
        );
    }
}
