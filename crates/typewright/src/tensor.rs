//! # Tensor Values
//!
//! The concrete values exchanged with an
//! [`ExecutionEngine`](crate::model::ExecutionEngine): minibatch inputs,
//! fetched outputs and learnable parameters.

use std::collections::BTreeMap;

use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::errors::{TWResult, TypewrightError};

/// Element type of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit float.
    F32,
    /// 32-bit signed integer.
    I32,
}

/// A dense n-dimensional value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Float tensor.
    F32(ArrayD<f32>),
    /// Integer tensor.
    I32(ArrayD<i32>),
}

impl Value {
    /// A 0-dimensional float.
    pub fn scalar_f32(x: f32) -> Self {
        Value::F32(ArrayD::from_elem(IxDyn(&[]), x))
    }

    /// A 0-dimensional integer.
    pub fn scalar_i32(x: i32) -> Self {
        Value::I32(ArrayD::from_elem(IxDyn(&[]), x))
    }

    /// The element type.
    pub fn dtype(&self) -> DType {
        match self {
            Value::F32(_) => DType::F32,
            Value::I32(_) => DType::I32,
        }
    }

    /// The shape.
    pub fn shape(&self) -> &[usize] {
        match self {
            Value::F32(a) => a.shape(),
            Value::I32(a) => a.shape(),
        }
    }

    /// The float array, if this is a float value.
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Value::F32(a) => Some(a),
            Value::I32(_) => None,
        }
    }

    /// The integer array, if this is an integer value.
    pub fn as_i32(&self) -> Option<&ArrayD<i32>> {
        match self {
            Value::I32(a) => Some(a),
            Value::F32(_) => None,
        }
    }

    /// The value of a single-element tensor, widened to `f64`.
    pub fn to_scalar(&self) -> Option<f64> {
        match self {
            Value::F32(a) if a.len() == 1 => a.iter().next().map(|&x| x as f64),
            Value::I32(a) if a.len() == 1 => a.iter().next().map(|&x| x as f64),
            _ => None,
        }
    }

    /// Concatenate values along the leading axis.
    ///
    /// 0-dimensional values are treated as length-1 vectors.
    pub fn concat(
        name: &str,
        values: &[Value],
    ) -> TWResult<Value> {
        let mismatch = |reason: String| TypewrightError::ShapeMismatch {
            placeholder: name.to_string(),
            reason,
        };

        let Some(first) = values.first() else {
            return Err(mismatch("nothing to concatenate".to_string()));
        };

        fn lift<T: Clone>(a: &ArrayD<T>) -> ArrayD<T> {
            if a.ndim() == 0 {
                a.clone().insert_axis(Axis(0))
            } else {
                a.clone()
            }
        }

        match first {
            Value::F32(_) => {
                let parts = values
                    .iter()
                    .map(|v| v.as_f32().map(lift))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| mismatch("mixed element types".to_string()))?;
                let views: Vec<_> = parts.iter().map(|a| a.view()).collect();
                ndarray::concatenate(Axis(0), &views)
                    .map(Value::F32)
                    .map_err(|e| mismatch(e.to_string()))
            }
            Value::I32(_) => {
                let parts = values
                    .iter()
                    .map(|v| v.as_i32().map(lift))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| mismatch("mixed element types".to_string()))?;
                let views: Vec<_> = parts.iter().map(|a| a.view()).collect();
                ndarray::concatenate(Axis(0), &views)
                    .map(Value::I32)
                    .map_err(|e| mismatch(e.to_string()))
            }
        }
    }
}

/// Named inputs for one engine call.
pub type Minibatch = BTreeMap<String, Value>;

/// Named outputs of one engine call.
pub type Fetches = BTreeMap<String, Value>;

/// Learnable parameter values by name.
pub type Weights = BTreeMap<String, ArrayD<f32>>;

/// Flat, row-major data accumulated for one input slot.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatData {
    /// Float elements.
    F32(Vec<f32>),
    /// Integer elements.
    I32(Vec<i32>),
}

impl FlatData {
    /// The number of elements.
    pub fn len(&self) -> usize {
        match self {
            FlatData::F32(v) => v.len(),
            FlatData::I32(v) => v.len(),
        }
    }

    /// Is there no element?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element type.
    pub fn dtype(&self) -> DType {
        match self {
            FlatData::F32(_) => DType::F32,
            FlatData::I32(_) => DType::I32,
        }
    }
}

impl From<Vec<f32>> for FlatData {
    fn from(v: Vec<f32>) -> Self {
        FlatData::F32(v)
    }
}

impl From<Vec<i32>> for FlatData {
    fn from(v: Vec<i32>) -> Self {
        FlatData::I32(v)
    }
}

impl From<f32> for FlatData {
    fn from(x: f32) -> Self {
        FlatData::F32(vec![x])
    }
}

impl From<i32> for FlatData {
    fn from(x: i32) -> Self {
        FlatData::I32(vec![x])
    }
}

/// The declared shape of an input slot; `None` marks the dynamic leading dimension.
pub type SlotShape = [Option<usize>];

/// Shape `data` for a slot of the given element type and declared shape.
///
/// The leading dimension may be dynamic (`None`); every other dimension must
/// be fixed. An empty `data` becomes a value with a zero leading dimension,
/// never an absent one.
pub fn shape_slot_value(
    name: &str,
    dtype: DType,
    shape: &SlotShape,
    data: FlatData,
) -> TWResult<Value> {
    let mismatch = |reason: String| TypewrightError::ShapeMismatch {
        placeholder: name.to_string(),
        reason,
    };

    if data.dtype() != dtype {
        return Err(mismatch(format!(
            "expected {dtype:?} elements, found {:?}",
            data.dtype()
        )));
    }

    let dims: Vec<usize> = match shape.split_first() {
        None => {
            if data.len() != 1 {
                return Err(mismatch(format!("scalar slot given {} elements", data.len())));
            }
            Vec::new()
        }
        Some((leading, trailing)) => {
            let trailing = trailing
                .iter()
                .map(|d| d.ok_or_else(|| mismatch("only the leading dimension may be dynamic".into())))
                .collect::<TWResult<Vec<usize>>>()?;
            let row_len: usize = trailing.iter().product();
            let rows = if row_len == 0 {
                0
            } else if data.len() % row_len != 0 {
                return Err(mismatch(format!(
                    "{} elements do not fill rows of {row_len}",
                    data.len()
                )));
            } else {
                data.len() / row_len
            };
            if let Some(fixed) = leading
                && *fixed != rows
            {
                return Err(mismatch(format!("expected {fixed} rows, found {rows}")));
            }
            std::iter::once(rows).chain(trailing).collect()
        }
    };

    let value = match data {
        FlatData::F32(v) => ArrayD::from_shape_vec(IxDyn(&dims), v).map(Value::F32),
        FlatData::I32(v) => ArrayD::from_shape_vec(IxDyn(&dims), v).map(Value::I32),
    };
    value.map_err(|e| mismatch(e.to_string()))
}
