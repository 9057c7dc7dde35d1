//! # Architectures
//!
//! Concrete models, composed from one encoder and one or more heads:
//!
//! * [`Graph2Class`] - [`CodeGraphEncoder`] + [`TypeClassificationHead`].
//! * [`Graph2HybridMetric`] - [`CodeGraphEncoder`] + [`TypeClassificationHead`]
//!   + [`TypeMetricHead`], annotating through a [`TypeSpaceIndex`] once one
//!   is attached.
//! * [`Path2Annotation`] - [`PathEncoder`] + [`TypeClassificationHead`].

pub mod code_graph;
pub mod graph2class;
pub mod graph2hybrid;
pub mod path2annotation;
pub mod path_encoder;
pub mod type_classification;
pub mod type_metric;
pub mod typed_graph;

#[doc(inline)]
pub use code_graph::{CodeGraphEncoder, CodeGraphMetadata, CodeGraphSample};
#[doc(inline)]
pub use graph2class::Graph2Class;
#[doc(inline)]
pub use graph2hybrid::{Graph2HybridMetric, HybridBatch};
#[doc(inline)]
pub use path2annotation::{Path2Annotation, PathAnnotationMetadata, PathAnnotationSample};
#[doc(inline)]
pub use path_encoder::{PathEncoder, PathMetadata, PathSample};
#[doc(inline)]
pub use type_classification::{TypeClassificationHead, TypeClassificationMetadata};
#[doc(inline)]
pub use type_metric::{IndexedType, MetricBatch, TypeMetricHead, TypeSpaceIndex};
#[doc(inline)]
pub use typed_graph::{TypedGraphMetadata, TypedGraphModel, TypedGraphSample};
