//! Low-level primitives shared across the collector: address arithmetic,
//! tunable constants, and the fatal-error helper.

pub mod address;
pub mod constants;
pub mod error;
pub(crate) mod logger;
pub mod opaque;

pub use address::Address;
pub use opaque::{ObjectReference, RawPtr, VMThread};
