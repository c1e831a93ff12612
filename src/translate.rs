//! Channel selection by complex frequency translation.

use crate::filter::DecimatingFir;
use crate::{ComplexSample, Sample};

/// Rotator magnitude is corrected after this many samples to stop the
/// recurrence drifting away from the unit circle.
const RENORMALIZE_INTERVAL: u32 = 4096;

/// Frequency-translating FIR filter.
///
/// Multiplies the input stream by a complex exponential so the channel
/// `offset` Hz away from the tuned center lands at baseband, then
/// low-pass filters and decimates the result.
///
/// Retuning with [`set_offset`](Self::set_offset) replaces only the
/// per-sample phase step; the accumulated phase carries over, so the
/// discontinuity is bounded by a single sample's phase increment.
pub struct FreqXlatingFir {
    fir: DecimatingFir<ComplexSample>,
    sample_rate: f64,
    offset: f64,
    rotator: ComplexSample,
    step: ComplexSample,
    until_renormalize: u32,
}

impl FreqXlatingFir {
    pub fn new(taps: Vec<Sample>, decimation: usize, offset: f64, sample_rate: f64) -> Self {
        assert!(sample_rate > 0.0, "sample rate must be positive");
        Self {
            fir: DecimatingFir::new(taps, decimation),
            sample_rate,
            offset,
            rotator: ComplexSample::new(1.0, 0.0),
            step: Self::step_for(offset, sample_rate),
            until_renormalize: RENORMALIZE_INTERVAL,
        }
    }

    /// Per-sample rotation moving a signal at `offset` Hz down to DC.
    fn step_for(offset: f64, sample_rate: f64) -> ComplexSample {
        let phase = (-2.0 * std::f64::consts::PI * offset / sample_rate) as Sample;
        ComplexSample::new(phase.cos(), phase.sin())
    }

    /// Translation offset in Hz currently applied.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn decimation(&self) -> usize {
        self.fir.decimation()
    }

    /// Retune the translation offset, keeping the accumulated phase.
    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
        self.step = Self::step_for(offset, self.sample_rate);
    }

    /// Push one wideband sample; returns a translated, filtered,
    /// decimated output when one is due.
    pub fn push(&mut self, sample: ComplexSample) -> Option<ComplexSample> {
        let mixed = sample * self.rotator;
        self.rotator *= self.step;
        self.until_renormalize -= 1;
        if self.until_renormalize == 0 {
            self.until_renormalize = RENORMALIZE_INTERVAL;
            let norm = self.rotator.norm();
            if norm > 0.0 {
                self.rotator /= norm;
            }
        }
        self.fir.push(mixed)
    }

    /// Translate a block, appending outputs to `output`.
    pub fn process(&mut self, input: &[ComplexSample], output: &mut Vec<ComplexSample>) {
        for &sample in input {
            if let Some(translated) = self.push(sample) {
                output.push(translated);
            }
        }
    }
}
