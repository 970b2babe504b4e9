//! Domain core for the image-operation service.
//!
//! Pure types and functions only: the job graph data model, declarative
//! graph templates, the four operation builders, and source-image
//! decoding. No I/O and no dependency on the engine transport.

pub mod error;
pub mod graph;
pub mod operations;
pub mod source_image;
pub mod template;
