//! # TFLite Schema Constants
//!
//! The subset of the TensorFlow Lite flatbuffer schema (`schema.fbs`, version 3)
//! that the converter emits and the reader understands.

/// The flatbuffer file identifier for TFLite models.
pub const FILE_IDENTIFIER: &str = "TFL3";

/// The schema version written into `Model.version`.
pub const SCHEMA_VERSION: u32 = 3;

/// Byte offset of field `id` inside a flatbuffer vtable.
pub const fn slot(id: u16) -> u16 {
    4 + 2 * id
}

/// Element types of TFLite tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum TensorType {
    /// 32-bit float.
    Float32 = 0,
    /// 16-bit IEEE half float.
    Float16 = 1,
    /// 32-bit signed integer.
    Int32 = 2,
}

impl TensorType {
    /// Decode a schema value.
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            0 => Some(TensorType::Float32),
            1 => Some(TensorType::Float16),
            2 => Some(TensorType::Int32),
            _ => None,
        }
    }

    /// Size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            TensorType::Float32 | TensorType::Int32 => 4,
            TensorType::Float16 => 2,
        }
    }
}

/// Builtin operators used by the converted graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum BuiltinOperator {
    /// `DEQUANTIZE`: float16 constant to float32.
    Dequantize = 6,
    /// `FULLY_CONNECTED`.
    FullyConnected = 9,
    /// `GATHER`: embedding lookup.
    Gather = 36,
    /// `UNIDIRECTIONAL_SEQUENCE_LSTM`.
    UnidirectionalSequenceLstm = 44,
}

impl BuiltinOperator {
    /// Decode a schema value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            6 => Some(BuiltinOperator::Dequantize),
            9 => Some(BuiltinOperator::FullyConnected),
            36 => Some(BuiltinOperator::Gather),
            44 => Some(BuiltinOperator::UnidirectionalSequenceLstm),
            _ => None,
        }
    }

    /// The schema name of the operator.
    pub fn name(self) -> &'static str {
        match self {
            BuiltinOperator::Dequantize => "DEQUANTIZE",
            BuiltinOperator::FullyConnected => "FULLY_CONNECTED",
            BuiltinOperator::Gather => "GATHER",
            BuiltinOperator::UnidirectionalSequenceLstm => "UNIDIRECTIONAL_SEQUENCE_LSTM",
        }
    }
}

/// `ActivationFunctionType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum Activation {
    /// No fused activation.
    None = 0,
    /// Fused `tanh`.
    Tanh = 4,
}

/// `BuiltinOptions` union discriminants.
pub mod options_type {
    /// No options table.
    pub const NONE: u8 = 0;
    /// `FullyConnectedOptions`.
    pub const FULLY_CONNECTED: u8 = 8;
    /// `GatherOptions`.
    pub const GATHER: u8 = 23;
    /// `DequantizeOptions`.
    pub const DEQUANTIZE: u8 = 38;
    /// `UnidirectionalSequenceLSTMOptions`.
    pub const UNIDIRECTIONAL_SEQUENCE_LSTM: u8 = 71;
}

/// Field ids of `Model`.
pub mod model_fields {
    /// `version: uint`.
    pub const VERSION: u16 = 0;
    /// `operator_codes: [OperatorCode]`.
    pub const OPERATOR_CODES: u16 = 1;
    /// `subgraphs: [SubGraph]`.
    pub const SUBGRAPHS: u16 = 2;
    /// `description: string`.
    pub const DESCRIPTION: u16 = 3;
    /// `buffers: [Buffer]`.
    pub const BUFFERS: u16 = 4;
}

/// Field ids of `OperatorCode`.
pub mod operator_code_fields {
    /// `deprecated_builtin_code: byte`.
    pub const DEPRECATED_BUILTIN_CODE: u16 = 0;
    /// `version: int = 1`.
    pub const VERSION: u16 = 2;
    /// `builtin_code: BuiltinOperator`.
    pub const BUILTIN_CODE: u16 = 3;
}

/// Field ids of `SubGraph`.
pub mod subgraph_fields {
    /// `tensors: [Tensor]`.
    pub const TENSORS: u16 = 0;
    /// `inputs: [int]`.
    pub const INPUTS: u16 = 1;
    /// `outputs: [int]`.
    pub const OUTPUTS: u16 = 2;
    /// `operators: [Operator]`.
    pub const OPERATORS: u16 = 3;
    /// `name: string`.
    pub const NAME: u16 = 4;
}

/// Field ids of `Tensor`.
pub mod tensor_fields {
    /// `shape: [int]`.
    pub const SHAPE: u16 = 0;
    /// `type: TensorType`.
    pub const TYPE: u16 = 1;
    /// `buffer: uint`.
    pub const BUFFER: u16 = 2;
    /// `name: string`.
    pub const NAME: u16 = 3;
    /// `is_variable: bool`.
    pub const IS_VARIABLE: u16 = 5;
    /// `shape_signature: [int]`.
    pub const SHAPE_SIGNATURE: u16 = 7;
}

/// Field ids of `Buffer`.
pub mod buffer_fields {
    /// `data: [ubyte]`.
    pub const DATA: u16 = 0;
}

/// Field ids of `Operator`.
pub mod operator_fields {
    /// `opcode_index: uint`.
    pub const OPCODE_INDEX: u16 = 0;
    /// `inputs: [int]`.
    pub const INPUTS: u16 = 1;
    /// `outputs: [int]`.
    pub const OUTPUTS: u16 = 2;
    /// `builtin_options_type: BuiltinOptions`.
    pub const BUILTIN_OPTIONS_TYPE: u16 = 3;
    /// `builtin_options: BuiltinOptions`.
    pub const BUILTIN_OPTIONS: u16 = 4;
}

/// Field ids of `GatherOptions`.
pub mod gather_options_fields {
    /// `axis: int`.
    pub const AXIS: u16 = 0;
    /// `batch_dims: int`.
    pub const BATCH_DIMS: u16 = 1;
}

/// Field ids of `FullyConnectedOptions`.
pub mod fully_connected_options_fields {
    /// `fused_activation_function: ActivationFunctionType`.
    pub const FUSED_ACTIVATION_FUNCTION: u16 = 0;
    /// `keep_num_dims: bool`.
    pub const KEEP_NUM_DIMS: u16 = 2;
}

/// Field ids of `UnidirectionalSequenceLSTMOptions`.
pub mod lstm_options_fields {
    /// `fused_activation_function: ActivationFunctionType`.
    pub const FUSED_ACTIVATION_FUNCTION: u16 = 0;
    /// `cell_clip: float`.
    pub const CELL_CLIP: u16 = 1;
    /// `proj_clip: float`.
    pub const PROJ_CLIP: u16 = 2;
    /// `time_major: bool`.
    pub const TIME_MAJOR: u16 = 3;
}

/// Number of inputs of `UNIDIRECTIONAL_SEQUENCE_LSTM`.
pub const LSTM_INPUT_COUNT: usize = 24;

/// Marker for an omitted optional operator input.
pub const OPTIONAL_INPUT: i32 = -1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_offsets() {
        assert_eq!(slot(0), 4);
        assert_eq!(slot(3), 10);
    }

    #[test]
    fn test_enum_decoding() {
        for op in [
            BuiltinOperator::Dequantize,
            BuiltinOperator::FullyConnected,
            BuiltinOperator::Gather,
            BuiltinOperator::UnidirectionalSequenceLstm,
        ] {
            assert_eq!(BuiltinOperator::from_i32(op as i32), Some(op));
        }
        assert_eq!(BuiltinOperator::from_i32(0), None);

        assert_eq!(TensorType::from_i8(1), Some(TensorType::Float16));
        assert_eq!(TensorType::Float16.element_size(), 2);
    }
}
