//! Roger Renderer Library
//!
//! Clock-synchronized audio renderer: streams timestamped samples into a
//! circular hardware buffer, skipping late data and padding early data.

pub mod audio;
pub mod decode;
pub mod engine;
