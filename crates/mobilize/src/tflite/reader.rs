//! # TFLite Model Reader
//!
//! Reads the flatbuffer layout written by
//! [`GraphBuilder`](super::builder::GraphBuilder).
//!
//! The buffer is checked by a [`flatbuffers::Verifier`] pass before any field
//! is read; a corrupt or truncated file yields [`MobilizeError::MalformedModel`]
//! rather than a panic.

use flatbuffers::{
    Follow,
    ForwardsUOffset,
    InvalidFlatbuffer,
    Table,
    Vector,
    Verifiable,
    Verifier,
};
use half::f16;

use crate::{
    errors::{MZResult, MobilizeError},
    tflite::schema::{
        BuiltinOperator,
        FILE_IDENTIFIER,
        TensorType,
        buffer_fields,
        model_fields,
        operator_code_fields,
        operator_fields,
        slot,
        subgraph_fields,
        tensor_fields,
    },
};

fn malformed(msg: impl Into<String>) -> MobilizeError {
    MobilizeError::MalformedModel(msg.into())
}

type Offset<T> = ForwardsUOffset<T>;
type TableList<'a, T> = Offset<Vector<'a, Offset<T>>>;

/// Declare a typed view over a schema table.
macro_rules! schema_table {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy)]
        struct $name<'a>(Table<'a>);

        impl<'a> Follow<'a> for $name<'a> {
            type Inner = Self;

            unsafe fn follow(
                buf: &'a [u8],
                loc: usize,
            ) -> Self::Inner {
                // SAFETY: the caller guarantees a table at `loc`.
                Self(unsafe { Table::new(buf, loc) })
            }
        }
    };
}

schema_table!(ModelTable);
schema_table!(OperatorCodeTable);
schema_table!(SubGraphTable);
schema_table!(TensorTable);
schema_table!(OperatorTable);
schema_table!(BufferTable);

// Each accessor reads a field with the type its `run_verifier` visited.

impl Verifiable for ModelTable<'_> {
    fn run_verifier(
        v: &mut Verifier,
        pos: usize,
    ) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u32>("version", slot(model_fields::VERSION), false)?
            .visit_field::<TableList<'_, OperatorCodeTable<'_>>>(
                "operator_codes",
                slot(model_fields::OPERATOR_CODES),
                false,
            )?
            .visit_field::<TableList<'_, SubGraphTable<'_>>>(
                "subgraphs",
                slot(model_fields::SUBGRAPHS),
                false,
            )?
            .visit_field::<Offset<&str>>("description", slot(model_fields::DESCRIPTION), false)?
            .visit_field::<TableList<'_, BufferTable<'_>>>(
                "buffers",
                slot(model_fields::BUFFERS),
                false,
            )?
            .finish();
        Ok(())
    }
}

impl<'a> ModelTable<'a> {
    fn version(self) -> u32 {
        unsafe { self.0.get::<u32>(slot(model_fields::VERSION), Some(0)) }.unwrap_or(0)
    }

    fn operator_codes(self) -> Option<Vector<'a, Offset<OperatorCodeTable<'a>>>> {
        let field = slot(model_fields::OPERATOR_CODES);
        unsafe { self.0.get::<TableList<'a, OperatorCodeTable<'a>>>(field, None) }
    }

    fn subgraphs(self) -> Option<Vector<'a, Offset<SubGraphTable<'a>>>> {
        let field = slot(model_fields::SUBGRAPHS);
        unsafe { self.0.get::<TableList<'a, SubGraphTable<'a>>>(field, None) }
    }

    fn description(self) -> Option<&'a str> {
        unsafe { self.0.get::<Offset<&'a str>>(slot(model_fields::DESCRIPTION), None) }
    }

    fn buffers(self) -> Option<Vector<'a, Offset<BufferTable<'a>>>> {
        unsafe { self.0.get::<TableList<'a, BufferTable<'a>>>(slot(model_fields::BUFFERS), None) }
    }
}

impl Verifiable for OperatorCodeTable<'_> {
    fn run_verifier(
        v: &mut Verifier,
        pos: usize,
    ) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i8>(
                "deprecated_builtin_code",
                slot(operator_code_fields::DEPRECATED_BUILTIN_CODE),
                false,
            )?
            .visit_field::<i32>("version", slot(operator_code_fields::VERSION), false)?
            .visit_field::<i32>(
                "builtin_code",
                slot(operator_code_fields::BUILTIN_CODE),
                false,
            )?
            .finish();
        Ok(())
    }
}

impl OperatorCodeTable<'_> {
    fn read(self) -> TfliteOperatorCode {
        let deprecated = unsafe {
            self.0
                .get::<i8>(slot(operator_code_fields::DEPRECATED_BUILTIN_CODE), Some(0))
        }
        .unwrap_or(0);
        let builtin_code =
            unsafe { self.0.get::<i32>(slot(operator_code_fields::BUILTIN_CODE), Some(0)) }
                .unwrap_or(0);
        let version = unsafe { self.0.get::<i32>(slot(operator_code_fields::VERSION), Some(1)) }
            .unwrap_or(1);
        TfliteOperatorCode {
            // Older writers only fill the deprecated byte.
            builtin_code: builtin_code.max(deprecated as i32),
            version,
        }
    }
}

impl Verifiable for SubGraphTable<'_> {
    fn run_verifier(
        v: &mut Verifier,
        pos: usize,
    ) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<TableList<'_, TensorTable<'_>>>(
                "tensors",
                slot(subgraph_fields::TENSORS),
                false,
            )?
            .visit_field::<Offset<Vector<'_, i32>>>(
                "inputs",
                slot(subgraph_fields::INPUTS),
                false,
            )?
            .visit_field::<Offset<Vector<'_, i32>>>(
                "outputs",
                slot(subgraph_fields::OUTPUTS),
                false,
            )?
            .visit_field::<TableList<'_, OperatorTable<'_>>>(
                "operators",
                slot(subgraph_fields::OPERATORS),
                false,
            )?
            .visit_field::<Offset<&str>>("name", slot(subgraph_fields::NAME), false)?
            .finish();
        Ok(())
    }
}

impl SubGraphTable<'_> {
    fn read(self) -> TfliteSubgraph {
        let tensors = unsafe {
            self.0
                .get::<TableList<'_, TensorTable<'_>>>(slot(subgraph_fields::TENSORS), None)
        };
        let operators = unsafe {
            self.0
                .get::<TableList<'_, OperatorTable<'_>>>(slot(subgraph_fields::OPERATORS), None)
        };
        TfliteSubgraph {
            name: unsafe { self.0.get::<Offset<&str>>(slot(subgraph_fields::NAME), None) }
                .map(str::to_string),
            tensors: tensors.into_iter().flatten().map(TensorTable::read).collect(),
            inputs: i32s(unsafe {
                self.0
                    .get::<Offset<Vector<'_, i32>>>(slot(subgraph_fields::INPUTS), None)
            }),
            outputs: i32s(unsafe {
                self.0
                    .get::<Offset<Vector<'_, i32>>>(slot(subgraph_fields::OUTPUTS), None)
            }),
            operators: operators.into_iter().flatten().map(OperatorTable::read).collect(),
        }
    }
}

impl Verifiable for TensorTable<'_> {
    fn run_verifier(
        v: &mut Verifier,
        pos: usize,
    ) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<Offset<Vector<'_, i32>>>("shape", slot(tensor_fields::SHAPE), false)?
            .visit_field::<i8>("type", slot(tensor_fields::TYPE), false)?
            .visit_field::<u32>("buffer", slot(tensor_fields::BUFFER), false)?
            .visit_field::<Offset<&str>>("name", slot(tensor_fields::NAME), false)?
            .visit_field::<bool>("is_variable", slot(tensor_fields::IS_VARIABLE), false)?
            .visit_field::<Offset<Vector<'_, i32>>>(
                "shape_signature",
                slot(tensor_fields::SHAPE_SIGNATURE),
                false,
            )?
            .finish();
        Ok(())
    }
}

impl TensorTable<'_> {
    fn read(self) -> TfliteTensor {
        TfliteTensor {
            name: unsafe { self.0.get::<Offset<&str>>(slot(tensor_fields::NAME), None) }
                .unwrap_or_default()
                .to_string(),
            shape: i32s(unsafe {
                self.0
                    .get::<Offset<Vector<'_, i32>>>(slot(tensor_fields::SHAPE), None)
            }),
            shape_signature: unsafe {
                self.0
                    .get::<Offset<Vector<'_, i32>>>(slot(tensor_fields::SHAPE_SIGNATURE), None)
            }
            .map(|v| v.iter().collect()),
            tensor_type: unsafe { self.0.get::<i8>(slot(tensor_fields::TYPE), Some(0)) }
                .unwrap_or(0),
            buffer: unsafe { self.0.get::<u32>(slot(tensor_fields::BUFFER), Some(0)) }
                .unwrap_or(0),
            is_variable: unsafe {
                self.0
                    .get::<bool>(slot(tensor_fields::IS_VARIABLE), Some(false))
            }
            .unwrap_or(false),
        }
    }
}

impl Verifiable for OperatorTable<'_> {
    fn run_verifier(
        v: &mut Verifier,
        pos: usize,
    ) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u32>("opcode_index", slot(operator_fields::OPCODE_INDEX), false)?
            .visit_field::<Offset<Vector<'_, i32>>>("inputs", slot(operator_fields::INPUTS), false)?
            .visit_field::<Offset<Vector<'_, i32>>>(
                "outputs",
                slot(operator_fields::OUTPUTS),
                false,
            )?
            .visit_field::<u8>(
                "builtin_options_type",
                slot(operator_fields::BUILTIN_OPTIONS_TYPE),
                false,
            )?
            .finish();
        Ok(())
    }
}

impl OperatorTable<'_> {
    fn read(self) -> TfliteOperator {
        TfliteOperator {
            opcode_index: unsafe {
                self.0
                    .get::<u32>(slot(operator_fields::OPCODE_INDEX), Some(0))
            }
            .unwrap_or(0),
            inputs: i32s(unsafe {
                self.0
                    .get::<Offset<Vector<'_, i32>>>(slot(operator_fields::INPUTS), None)
            }),
            outputs: i32s(unsafe {
                self.0
                    .get::<Offset<Vector<'_, i32>>>(slot(operator_fields::OUTPUTS), None)
            }),
            options_type: unsafe {
                self.0
                    .get::<u8>(slot(operator_fields::BUILTIN_OPTIONS_TYPE), Some(0))
            }
            .unwrap_or(0),
        }
    }
}

impl Verifiable for BufferTable<'_> {
    fn run_verifier(
        v: &mut Verifier,
        pos: usize,
    ) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<Offset<Vector<'_, u8>>>("data", slot(buffer_fields::DATA), false)?
            .finish();
        Ok(())
    }
}

impl<'a> BufferTable<'a> {
    fn data(self) -> &'a [u8] {
        unsafe { self.0.get::<Offset<Vector<'a, u8>>>(slot(buffer_fields::DATA), None) }
            .map_or(&[][..], |v| v.bytes())
    }
}

fn i32s(vector: Option<Vector<'_, i32>>) -> Vec<i32> {
    vector.map(|v| v.iter().collect()).unwrap_or_default()
}

/// An operator code entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfliteOperatorCode {
    /// The `BuiltinOperator` value.
    pub builtin_code: i32,

    /// The operator version.
    pub version: i32,
}

impl TfliteOperatorCode {
    /// The builtin operator, if it is one this crate knows.
    pub fn operator(&self) -> Option<BuiltinOperator> {
        BuiltinOperator::from_i32(self.builtin_code)
    }
}

/// A tensor entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfliteTensor {
    /// Tensor name.
    pub name: String,

    /// Static shape.
    pub shape: Vec<i32>,

    /// Dynamic shape signature, if present.
    pub shape_signature: Option<Vec<i32>>,

    /// Raw `TensorType` value.
    pub tensor_type: i8,

    /// Buffer index.
    pub buffer: u32,

    /// Whether the tensor is variable state.
    pub is_variable: bool,
}

impl TfliteTensor {
    /// Number of elements implied by the static shape.
    ///
    /// `None` for a negative dimension or a count that overflows `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |count, &dim| {
            count.checked_mul(usize::try_from(dim).ok()?)
        })
    }
}

/// An operator entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfliteOperator {
    /// Index into the model operator codes.
    pub opcode_index: u32,

    /// Input tensor indices; `-1` marks an omitted optional input.
    pub inputs: Vec<i32>,

    /// Output tensor indices.
    pub outputs: Vec<i32>,

    /// `BuiltinOptions` union discriminant.
    pub options_type: u8,
}

/// A subgraph entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfliteSubgraph {
    /// Subgraph name.
    pub name: Option<String>,

    /// Tensors.
    pub tensors: Vec<TfliteTensor>,

    /// Input tensor indices.
    pub inputs: Vec<i32>,

    /// Output tensor indices.
    pub outputs: Vec<i32>,

    /// Operators in execution order.
    pub operators: Vec<TfliteOperator>,
}

/// A parsed view of a TFLite model.
///
/// Buffer contents are borrowed from the input bytes.
#[derive(Debug, Clone)]
pub struct TfliteModelInfo<'a> {
    /// Schema version.
    pub version: u32,

    /// Model description string.
    pub description: Option<String>,

    /// Operator codes.
    pub operator_codes: Vec<TfliteOperatorCode>,

    /// Subgraphs; the first is the main graph.
    pub subgraphs: Vec<TfliteSubgraph>,

    buffers: Vec<&'a [u8]>,
}

impl<'a> TfliteModelInfo<'a> {
    /// Parse a TFLite flatbuffer.
    pub fn parse(data: &'a [u8]) -> MZResult<Self> {
        if data.len() < 8 {
            return Err(malformed(format!("{} bytes is too short", data.len())));
        }
        if &data[4..8] != FILE_IDENTIFIER.as_bytes() {
            return Err(malformed(format!(
                "file identifier {:?} is not {FILE_IDENTIFIER:?}",
                String::from_utf8_lossy(&data[4..8])
            )));
        }

        let root = flatbuffers::root::<ModelTable<'a>>(data)
            .map_err(|e| malformed(format!("flatbuffer verification failed: {e}")))?;

        let operator_codes = root
            .operator_codes()
            .into_iter()
            .flatten()
            .map(OperatorCodeTable::read)
            .collect();
        let subgraphs = root
            .subgraphs()
            .into_iter()
            .flatten()
            .map(SubGraphTable::read)
            .collect();
        let buffers = root
            .buffers()
            .into_iter()
            .flatten()
            .map(BufferTable::data)
            .collect();

        let info = Self {
            version: root.version(),
            description: root.description().map(str::to_string),
            operator_codes,
            subgraphs,
            buffers,
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> MZResult<()> {
        for subgraph in &self.subgraphs {
            let num_tensors = subgraph.tensors.len() as i32;
            let check = |idx: i32, what: &str| {
                if idx < -1 || idx >= num_tensors {
                    Err(malformed(format!("{what} tensor index {idx} out of range")))
                } else {
                    Ok(())
                }
            };
            for &idx in subgraph.inputs.iter().chain(&subgraph.outputs) {
                check(idx, "subgraph io")?;
            }
            for op in &subgraph.operators {
                if op.opcode_index as usize >= self.operator_codes.len() {
                    return Err(malformed(format!(
                        "opcode index {} out of range",
                        op.opcode_index
                    )));
                }
                for &idx in op.inputs.iter().chain(&op.outputs) {
                    check(idx, "operator")?;
                }
            }
            for tensor in &subgraph.tensors {
                if tensor.buffer as usize >= self.buffers.len() {
                    return Err(malformed(format!(
                        "tensor {:?} references missing buffer {}",
                        tensor.name, tensor.buffer
                    )));
                }
            }
        }
        Ok(())
    }

    /// The main (first) subgraph.
    pub fn main_subgraph(&self) -> MZResult<&TfliteSubgraph> {
        self.subgraphs
            .first()
            .ok_or_else(|| malformed("model has no subgraphs"))
    }

    /// Number of buffers, including the empty sentinel.
    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Total size of all buffer payloads.
    pub fn total_buffer_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.len()).sum()
    }

    /// Borrow a buffer payload.
    pub fn buffer_data(
        &self,
        index: usize,
    ) -> MZResult<&'a [u8]> {
        self.buffers
            .get(index)
            .copied()
            .ok_or_else(|| malformed(format!("no buffer {index}")))
    }

    /// The builtin operators of a subgraph, in execution order.
    pub fn operator_sequence(
        &self,
        subgraph: usize,
    ) -> MZResult<Vec<BuiltinOperator>> {
        let subgraph = self
            .subgraphs
            .get(subgraph)
            .ok_or_else(|| malformed(format!("no subgraph {subgraph}")))?;
        subgraph
            .operators
            .iter()
            .map(|op| {
                let code = self.operator_codes[op.opcode_index as usize];
                code.operator().ok_or_else(|| {
                    malformed(format!("unknown builtin operator {}", code.builtin_code))
                })
            })
            .collect()
    }

    /// Decode a constant float tensor (FLOAT32 or FLOAT16) to `f32` values.
    pub fn tensor_values_f32(
        &self,
        subgraph: usize,
        tensor: usize,
    ) -> MZResult<Vec<f32>> {
        let tensor = self
            .subgraphs
            .get(subgraph)
            .and_then(|s| s.tensors.get(tensor))
            .ok_or_else(|| malformed(format!("no tensor {tensor} in subgraph {subgraph}")))?;
        let data = self.buffer_data(tensor.buffer as usize)?;

        let tensor_type = TensorType::from_i8(tensor.tensor_type);
        let element_size = match tensor_type {
            Some(t @ (TensorType::Float32 | TensorType::Float16)) => t.element_size(),
            _ => {
                return Err(malformed(format!(
                    "tensor {:?} is not a float tensor",
                    tensor.name
                )));
            }
        };
        let expected = tensor
            .num_elements()
            .and_then(|n| n.checked_mul(element_size))
            .ok_or_else(|| {
                malformed(format!(
                    "tensor {:?} has invalid shape {:?}",
                    tensor.name, tensor.shape
                ))
            })?;
        if data.len() != expected {
            return Err(malformed(format!(
                "tensor {:?} has {} bytes for shape {:?}",
                tensor.name,
                data.len(),
                tensor.shape
            )));
        }

        Ok(match tensor_type {
            Some(TensorType::Float16) => data
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            _ => data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tflite::builder::{GraphBuilder, TensorSpec};

    fn small_model() -> Vec<u8> {
        let mut graph = GraphBuilder::new("main");
        let input = graph.add_activation("input", vec![1, 1], None, TensorType::Int32);
        graph.add_constant(
            "weights",
            vec![2],
            TensorType::Float16,
            [f16::from_f32(0.5), f16::from_f32(-2.0)]
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        );
        graph.set_inputs(vec![input]);
        graph.set_outputs(vec![input]);
        graph.finish("small")
    }

    #[test]
    fn test_float16_values() {
        let bytes = small_model();
        let info = TfliteModelInfo::parse(&bytes).unwrap();
        assert_eq!(info.tensor_values_f32(0, 1).unwrap(), vec![0.5, -2.0]);
        assert!(matches!(
            info.tensor_values_f32(0, 0),
            Err(MobilizeError::MalformedModel(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_files() {
        let bytes = small_model();
        for len in (0..bytes.len()).step_by(3) {
            assert!(
                matches!(
                    TfliteModelInfo::parse(&bytes[..len]),
                    Err(MobilizeError::MalformedModel(_))
                ),
                "prefix of {len} bytes parsed"
            );
        }
    }

    #[test]
    fn test_oversized_and_negative_shapes() {
        let mut graph = GraphBuilder::new("main");
        let big = graph.add_constant("big", vec![i32::MAX; 3], TensorType::Float32, vec![0; 4]);
        let negative = graph.add_constant("neg", vec![-1, 2], TensorType::Float32, vec![0; 8]);
        let bytes = graph.finish("shapes");

        let info = TfliteModelInfo::parse(&bytes).unwrap();
        let subgraph = info.main_subgraph().unwrap();
        assert_eq!(subgraph.tensors[big as usize].num_elements(), None);
        assert_eq!(subgraph.tensors[negative as usize].num_elements(), None);

        for tensor in [big, negative] {
            assert!(matches!(
                info.tensor_values_f32(0, tensor as usize),
                Err(MobilizeError::MalformedModel(_))
            ));
        }
    }

    #[test]
    fn test_rejects_missing_buffer() {
        let mut graph = GraphBuilder::new("main");
        graph.add_tensor(TensorSpec {
            name: "dangling".to_string(),
            shape: vec![1],
            shape_signature: None,
            tensor_type: TensorType::Float32,
            buffer: 9,
            is_variable: false,
        });
        let bytes = graph.finish("dangling");
        assert!(matches!(
            TfliteModelInfo::parse(&bytes),
            Err(MobilizeError::MalformedModel(_))
        ));
    }

    #[test]
    fn test_rejects_short_and_foreign_files() {
        assert!(matches!(
            TfliteModelInfo::parse(b"TFL3"),
            Err(MobilizeError::MalformedModel(_))
        ));
        assert!(matches!(
            TfliteModelInfo::parse(b"\x08\x00\x00\x00GGUF\x00\x00\x00\x00"),
            Err(MobilizeError::MalformedModel(_))
        ));
    }

    #[test]
    fn test_rejects_dangling_root() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&1000u32.to_le_bytes());
        bytes[4..8].copy_from_slice(b"TFL3");
        assert!(matches!(
            TfliteModelInfo::parse(&bytes),
            Err(MobilizeError::MalformedModel(_))
        ));
    }
}
