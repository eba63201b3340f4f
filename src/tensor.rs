// src/tensor.rs
pub mod matrix;
pub mod vector;

pub use matrix::Matrix;
pub use vector::Vector;

use serde::{Deserialize, Serialize};

/// Fill policy used when (re)initialising a container.
///
/// `Identity` puts ones on the main diagonal of a matrix. A vector has no
/// diagonal of its own, so it takes the diagonal of the identity: all ones.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Fill<T> {
    Zero,
    One,
    Identity,
    Value(T),
}
