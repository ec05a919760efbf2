use std::borrow::Cow;
use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::error::Result;

/// Named tensors handed to and returned from a graph.
pub type TensorMap = HashMap<String, Tensor>;

/// A dense f32 buffer with a shape. The element count always matches the shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: ArrayD<f32>,
}

impl Tensor {
    pub fn new(data: ArrayD<f32>) -> Self {
        Self { data }
    }

    pub fn from_shape_vec(shape: &[usize], values: Vec<f32>) -> Result<Self> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Self { data })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ndarray::ArrayViewMutD<'_, f32> {
        self.data.view_mut()
    }

    /// Values in row-major order, borrowed when the buffer is already contiguous.
    pub fn values(&self) -> Cow<'_, [f32]> {
        match self.data.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(self.data.iter().copied().collect()),
        }
    }

    pub fn into_array(self) -> ArrayD<f32> {
        self.data
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(data: ArrayD<f32>) -> Self {
        Tensor::new(data)
    }
}
