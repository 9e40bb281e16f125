//! Datastructures and utility functions shared by the
//! compiler and the VM: source code representation,
//! positions, and diagnostic text rendering.

pub mod source;
pub mod text;

pub use source::{Position, Source};
