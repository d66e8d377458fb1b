//! # TFLite Graph Builder
//!
//! Accumulates tensors, buffers and operators for a single-subgraph model,
//! then serializes them into a TFLite flatbuffer.

use flatbuffers::{FlatBufferBuilder, TableFinishedWIPOffset, WIPOffset};

use crate::tflite::schema::{
    Activation,
    BuiltinOperator,
    FILE_IDENTIFIER,
    SCHEMA_VERSION,
    TensorType,
    buffer_fields,
    fully_connected_options_fields,
    gather_options_fields,
    lstm_options_fields,
    model_fields,
    operator_code_fields,
    operator_fields,
    options_type,
    slot,
    subgraph_fields,
    tensor_fields,
};

/// A tensor in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    /// Tensor name.
    pub name: String,

    /// Static shape.
    pub shape: Vec<i32>,

    /// Shape with `-1` for dynamic dimensions, if any.
    pub shape_signature: Option<Vec<i32>>,

    /// Element type.
    pub tensor_type: TensorType,

    /// Index into the model buffers; `0` is the empty sentinel.
    pub buffer: u32,

    /// Whether the tensor is mutable state (e.g. LSTM state).
    pub is_variable: bool,
}

/// Builtin options attached to an operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorOptions {
    /// No options table.
    None,

    /// `GatherOptions`.
    Gather {
        /// Gather axis.
        axis: i32,
        /// Number of batch dimensions.
        batch_dims: i32,
    },

    /// `DequantizeOptions`.
    Dequantize,

    /// `FullyConnectedOptions`.
    FullyConnected {
        /// Fused activation.
        activation: Activation,
        /// Keep the leading input dimensions in the output.
        keep_num_dims: bool,
    },

    /// `UnidirectionalSequenceLSTMOptions`.
    UnidirectionalSequenceLstm {
        /// Cell and output activation.
        activation: Activation,
        /// Cell state clip; `0.0` disables clipping.
        cell_clip: f32,
        /// Projection clip; `0.0` disables clipping.
        proj_clip: f32,
        /// Whether the input is `[time, batch, ...]`.
        time_major: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct OperatorSpec {
    opcode_index: u32,
    inputs: Vec<i32>,
    outputs: Vec<i32>,
    options: OperatorOptions,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OperatorCodeSpec {
    code: BuiltinOperator,
    version: i32,
}

/// Builds a single-subgraph TFLite model.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    name: String,
    tensors: Vec<TensorSpec>,
    buffers: Vec<Vec<u8>>,
    operator_codes: Vec<OperatorCodeSpec>,
    operators: Vec<OperatorSpec>,
    inputs: Vec<i32>,
    outputs: Vec<i32>,
}

impl GraphBuilder {
    /// Create an empty graph with the given subgraph name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tensors: Vec::new(),
            // Buffer 0 is the empty sentinel shared by non-constant tensors.
            buffers: vec![Vec::new()],
            operator_codes: Vec::new(),
            operators: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Number of tensors added so far.
    pub fn num_tensors(&self) -> usize {
        self.tensors.len()
    }

    /// Number of operators added so far.
    pub fn num_operators(&self) -> usize {
        self.operators.len()
    }

    /// Add a raw buffer, returning its index.
    pub fn add_buffer(
        &mut self,
        data: Vec<u8>,
    ) -> u32 {
        self.buffers.push(data);
        (self.buffers.len() - 1) as u32
    }

    /// Add a tensor, returning its index.
    pub fn add_tensor(
        &mut self,
        spec: TensorSpec,
    ) -> i32 {
        self.tensors.push(spec);
        (self.tensors.len() - 1) as i32
    }

    /// Add a constant tensor backed by its own buffer.
    pub fn add_constant(
        &mut self,
        name: &str,
        shape: Vec<i32>,
        tensor_type: TensorType,
        data: Vec<u8>,
    ) -> i32 {
        let buffer = self.add_buffer(data);
        self.add_tensor(TensorSpec {
            name: name.to_string(),
            shape,
            shape_signature: None,
            tensor_type,
            buffer,
            is_variable: false,
        })
    }

    /// Add a computed (activation) tensor.
    pub fn add_activation(
        &mut self,
        name: &str,
        shape: Vec<i32>,
        shape_signature: Option<Vec<i32>>,
        tensor_type: TensorType,
    ) -> i32 {
        self.add_tensor(TensorSpec {
            name: name.to_string(),
            shape,
            shape_signature,
            tensor_type,
            buffer: 0,
            is_variable: false,
        })
    }

    /// Add a variable (state) tensor.
    pub fn add_variable(
        &mut self,
        name: &str,
        shape: Vec<i32>,
        tensor_type: TensorType,
    ) -> i32 {
        self.add_tensor(TensorSpec {
            name: name.to_string(),
            shape,
            shape_signature: None,
            tensor_type,
            buffer: 0,
            is_variable: true,
        })
    }

    /// Get or register an operator code, returning its index.
    ///
    /// A code registered twice keeps the highest version.
    pub fn opcode_index(
        &mut self,
        code: BuiltinOperator,
        version: i32,
    ) -> u32 {
        if let Some(idx) = self.operator_codes.iter().position(|c| c.code == code) {
            let entry = &mut self.operator_codes[idx];
            entry.version = entry.version.max(version);
            return idx as u32;
        }
        self.operator_codes.push(OperatorCodeSpec { code, version });
        (self.operator_codes.len() - 1) as u32
    }

    /// Append an operator.
    pub fn add_operator(
        &mut self,
        code: BuiltinOperator,
        version: i32,
        inputs: Vec<i32>,
        outputs: Vec<i32>,
        options: OperatorOptions,
    ) {
        let opcode_index = self.opcode_index(code, version);
        self.operators.push(OperatorSpec {
            opcode_index,
            inputs,
            outputs,
            options,
        });
    }

    /// Set the subgraph input tensors.
    pub fn set_inputs(
        &mut self,
        inputs: Vec<i32>,
    ) {
        self.inputs = inputs;
    }

    /// Set the subgraph output tensors.
    pub fn set_outputs(
        &mut self,
        outputs: Vec<i32>,
    ) {
        self.outputs = outputs;
    }

    fn size_hint(&self) -> usize {
        let data: usize = self.buffers.iter().map(Vec::len).sum();
        data + 256 * (self.tensors.len() + self.operators.len() + 1)
    }

    /// Serialize the graph as a TFLite flatbuffer.
    pub fn finish(
        &self,
        description: &str,
    ) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::with_capacity(self.size_hint());

        let mut buffer_offsets = Vec::with_capacity(self.buffers.len());
        for data in &self.buffers {
            let data = (!data.is_empty()).then(|| fbb.create_vector(data.as_slice()));
            let start = fbb.start_table();
            if let Some(data) = data {
                fbb.push_slot_always(slot(buffer_fields::DATA), data);
            }
            buffer_offsets.push(fbb.end_table(start));
        }

        let mut tensor_offsets = Vec::with_capacity(self.tensors.len());
        for tensor in &self.tensors {
            tensor_offsets.push(write_tensor(&mut fbb, tensor));
        }

        let mut operator_offsets = Vec::with_capacity(self.operators.len());
        for op in &self.operators {
            operator_offsets.push(write_operator(&mut fbb, op));
        }

        let mut code_offsets = Vec::with_capacity(self.operator_codes.len());
        for code in &self.operator_codes {
            let builtin = code.code as i32;
            let start = fbb.start_table();
            fbb.push_slot::<i8>(
                slot(operator_code_fields::DEPRECATED_BUILTIN_CODE),
                builtin.min(127) as i8,
                0,
            );
            fbb.push_slot::<i32>(slot(operator_code_fields::VERSION), code.version, 1);
            fbb.push_slot::<i32>(slot(operator_code_fields::BUILTIN_CODE), builtin, 0);
            code_offsets.push(fbb.end_table(start));
        }

        let tensors = fbb.create_vector(tensor_offsets.as_slice());
        let inputs = fbb.create_vector(self.inputs.as_slice());
        let outputs = fbb.create_vector(self.outputs.as_slice());
        let operators = fbb.create_vector(operator_offsets.as_slice());
        let name = fbb.create_string(&self.name);
        let start = fbb.start_table();
        fbb.push_slot_always(slot(subgraph_fields::TENSORS), tensors);
        fbb.push_slot_always(slot(subgraph_fields::INPUTS), inputs);
        fbb.push_slot_always(slot(subgraph_fields::OUTPUTS), outputs);
        fbb.push_slot_always(slot(subgraph_fields::OPERATORS), operators);
        fbb.push_slot_always(slot(subgraph_fields::NAME), name);
        let subgraph = fbb.end_table(start);

        let operator_codes = fbb.create_vector(code_offsets.as_slice());
        let subgraphs = fbb.create_vector(&[subgraph][..]);
        let description = fbb.create_string(description);
        let buffers = fbb.create_vector(buffer_offsets.as_slice());
        let start = fbb.start_table();
        fbb.push_slot::<u32>(slot(model_fields::VERSION), SCHEMA_VERSION, 0);
        fbb.push_slot_always(slot(model_fields::OPERATOR_CODES), operator_codes);
        fbb.push_slot_always(slot(model_fields::SUBGRAPHS), subgraphs);
        fbb.push_slot_always(slot(model_fields::DESCRIPTION), description);
        fbb.push_slot_always(slot(model_fields::BUFFERS), buffers);
        let model = fbb.end_table(start);

        fbb.finish(model, Some(FILE_IDENTIFIER));
        fbb.finished_data().to_vec()
    }
}

fn write_tensor(
    fbb: &mut FlatBufferBuilder<'_>,
    tensor: &TensorSpec,
) -> WIPOffset<TableFinishedWIPOffset> {
    let shape = fbb.create_vector(tensor.shape.as_slice());
    let name = fbb.create_string(&tensor.name);
    let signature = tensor
        .shape_signature
        .as_ref()
        .map(|s| fbb.create_vector(s.as_slice()));

    let start = fbb.start_table();
    fbb.push_slot_always(slot(tensor_fields::SHAPE), shape);
    fbb.push_slot::<i8>(slot(tensor_fields::TYPE), tensor.tensor_type as i8, 0);
    fbb.push_slot::<u32>(slot(tensor_fields::BUFFER), tensor.buffer, 0);
    fbb.push_slot_always(slot(tensor_fields::NAME), name);
    fbb.push_slot::<bool>(slot(tensor_fields::IS_VARIABLE), tensor.is_variable, false);
    if let Some(signature) = signature {
        fbb.push_slot_always(slot(tensor_fields::SHAPE_SIGNATURE), signature);
    }
    fbb.end_table(start)
}

fn write_options(
    fbb: &mut FlatBufferBuilder<'_>,
    options: &OperatorOptions,
) -> (u8, Option<WIPOffset<TableFinishedWIPOffset>>) {
    match *options {
        OperatorOptions::None => (options_type::NONE, None),
        OperatorOptions::Gather { axis, batch_dims } => {
            let start = fbb.start_table();
            fbb.push_slot::<i32>(slot(gather_options_fields::AXIS), axis, 0);
            fbb.push_slot::<i32>(slot(gather_options_fields::BATCH_DIMS), batch_dims, 0);
            (options_type::GATHER, Some(fbb.end_table(start)))
        }
        OperatorOptions::Dequantize => {
            let start = fbb.start_table();
            (options_type::DEQUANTIZE, Some(fbb.end_table(start)))
        }
        OperatorOptions::FullyConnected {
            activation,
            keep_num_dims,
        } => {
            let start = fbb.start_table();
            fbb.push_slot::<i8>(
                slot(fully_connected_options_fields::FUSED_ACTIVATION_FUNCTION),
                activation as i8,
                0,
            );
            fbb.push_slot::<bool>(
                slot(fully_connected_options_fields::KEEP_NUM_DIMS),
                keep_num_dims,
                false,
            );
            (options_type::FULLY_CONNECTED, Some(fbb.end_table(start)))
        }
        OperatorOptions::UnidirectionalSequenceLstm {
            activation,
            cell_clip,
            proj_clip,
            time_major,
        } => {
            let start = fbb.start_table();
            fbb.push_slot::<i8>(
                slot(lstm_options_fields::FUSED_ACTIVATION_FUNCTION),
                activation as i8,
                0,
            );
            fbb.push_slot::<f32>(slot(lstm_options_fields::CELL_CLIP), cell_clip, 0.0);
            fbb.push_slot::<f32>(slot(lstm_options_fields::PROJ_CLIP), proj_clip, 0.0);
            fbb.push_slot::<bool>(slot(lstm_options_fields::TIME_MAJOR), time_major, false);
            (
                options_type::UNIDIRECTIONAL_SEQUENCE_LSTM,
                Some(fbb.end_table(start)),
            )
        }
    }
}

fn write_operator(
    fbb: &mut FlatBufferBuilder<'_>,
    op: &OperatorSpec,
) -> WIPOffset<TableFinishedWIPOffset> {
    let inputs = fbb.create_vector(op.inputs.as_slice());
    let outputs = fbb.create_vector(op.outputs.as_slice());
    let (options_type, options) = write_options(fbb, &op.options);

    let start = fbb.start_table();
    fbb.push_slot::<u32>(slot(operator_fields::OPCODE_INDEX), op.opcode_index, 0);
    fbb.push_slot_always(slot(operator_fields::INPUTS), inputs);
    fbb.push_slot_always(slot(operator_fields::OUTPUTS), outputs);
    fbb.push_slot::<u8>(slot(operator_fields::BUILTIN_OPTIONS_TYPE), options_type, 0);
    if let Some(options) = options {
        fbb.push_slot_always(slot(operator_fields::BUILTIN_OPTIONS), options);
    }
    fbb.end_table(start)
}
