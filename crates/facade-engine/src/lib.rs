//! facade-engine — binding to the VeriFace native recognition library.
//!
//! The engine is an opaque shared object exposing a flat C function table.
//! This crate loads it at runtime, owns the buffer-ownership rules of each
//! call, and adapts the table to [`facade_core::RecognitionEngine`]. No
//! other crate touches the C boundary.

// Require explicit `unsafe {}` blocks inside `unsafe fn` bodies.
#![warn(unsafe_op_in_unsafe_fn)]

mod binding;
mod buffers;
mod table;

pub use binding::NativeEngine;
pub use table::{LoadError, MIN_FACE_SIZE};
