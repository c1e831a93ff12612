//! Streaming FIR filtering with decimation.

pub mod design;
pub use design::{band_pass, low_pass, FilterSpec, Window};

use num_traits::Zero;
use std::ops::{Add, Mul};

use crate::Sample;

/// FIR filter combined with integer decimation.
///
/// Emits one output per `decimation` inputs and only computes outputs
/// that survive decimation. The delay line persists across blocks so a
/// stream can be fed in chunks of any size.
///
/// Works on real ([`Sample`]) and complex
/// ([`ComplexSample`](crate::ComplexSample)) streams; taps are always
/// real.
pub struct DecimatingFir<T> {
    taps: Vec<Sample>,
    delay_line: Vec<T>,
    write_index: usize,
    decimation: usize,
    phase: usize,
}

impl<T> DecimatingFir<T>
where
    T: Copy + Zero + Add<Output = T> + Mul<Sample, Output = T>,
{
    pub fn new(taps: Vec<Sample>, decimation: usize) -> Self {
        assert!(!taps.is_empty(), "filter needs at least one tap");
        assert!(decimation > 0, "decimation factor must be at least 1");
        Self {
            delay_line: vec![T::zero(); taps.len()],
            taps,
            write_index: 0,
            decimation,
            phase: 0,
        }
    }

    pub fn from_spec(spec: &FilterSpec) -> Self {
        Self::new(spec.taps(), spec.decimation)
    }

    /// Push one input sample. Returns the filtered output on every
    /// `decimation`th input, `None` otherwise.
    pub fn push(&mut self, sample: T) -> Option<T> {
        self.delay_line[self.write_index] = sample;
        self.write_index += 1;
        if self.write_index == self.delay_line.len() {
            self.write_index = 0;
        }
        self.phase += 1;
        if self.phase < self.decimation {
            return None;
        }
        self.phase = 0;

        // Dot product over the ring, newest sample first.
        let length = self.delay_line.len();
        let mut index = self.write_index;
        let mut accumulator = T::zero();
        for &tap in self.taps.iter() {
            index = if index == 0 { length - 1 } else { index - 1 };
            accumulator = accumulator + self.delay_line[index] * tap;
        }
        Some(accumulator)
    }

    /// Filter a block, appending outputs to `output`.
    pub fn process(&mut self, input: &[T], output: &mut Vec<T>) {
        for &sample in input {
            if let Some(filtered) = self.push(sample) {
                output.push(filtered);
            }
        }
    }

    /// Replace the tap set. The swap takes effect for the next output
    /// sample as a whole; it can never land inside the computation of
    /// one, since that computation happens entirely within `push`.
    /// Changing the tap count clears the delay line.
    pub fn set_taps(&mut self, taps: Vec<Sample>) {
        assert!(!taps.is_empty(), "filter needs at least one tap");
        if taps.len() != self.taps.len() {
            self.delay_line = vec![T::zero(); taps.len()];
            self.write_index = 0;
        }
        self.taps = taps;
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    pub fn num_taps(&self) -> usize {
        self.taps.len()
    }
}
