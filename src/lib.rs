pub use num_complex;
/// Floating point type used for signal processing.
pub type Sample = f32;
/// Complex floating point type used for signal processing.
pub type ComplexSample = num_complex::Complex<Sample>;
/// Mathematical consts for the Sample type.
pub use std::f32::consts as sample_consts;

pub mod configuration;
pub mod demod;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod translate;

pub use error::{Error, Result};
pub use pipeline::{Modulation, Pipeline, PipelineConfig, PipelineState};
