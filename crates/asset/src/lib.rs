//! Asset loading adapters for images and 3D models.
//!
//! Decoding is delegated entirely to the `image` and `gltf` crates; this
//! crate reshapes their in-memory output into flat, GPU-upload-ready data:
//! interleaved or planar vertex buffers, index buffers, a global bone table.

pub mod image;
pub mod mesh;
pub mod model;
pub mod pack;
