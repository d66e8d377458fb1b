//! # TensorFlow Lite
//!
//! Writing and reading the TFLite flatbuffer format.
//!
//! * [`TfliteConverter`] lowers a [`crate::model::MobileModel`] to model bytes,
//! * [`GraphBuilder`] is the underlying single-subgraph serializer,
//! * [`TfliteModelInfo`] parses model bytes back for inspection.

pub mod builder;
pub mod converter;
pub mod reader;
pub mod schema;

#[doc(inline)]
pub use builder::{GraphBuilder, OperatorOptions, TensorSpec};
#[doc(inline)]
pub use converter::{Optimization, TfliteConverter};
#[doc(inline)]
pub use reader::{TfliteModelInfo, TfliteOperator, TfliteSubgraph, TfliteTensor};
#[doc(inline)]
pub use schema::{BuiltinOperator, TensorType};
