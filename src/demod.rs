//! Demodulators for the supported modulations.
//!
//! Both demodulators consume one complex baseband sample at a time and
//! emit zero or one real audio sample, decimating internally to the
//! audio rate. All tuning happens upstream of them.

use crate::filter::{self, DecimatingFir, Window};
use crate::{ComplexSample, Sample};

/// Peak deviation the FM discriminator output is normalized to.
const FM_MAX_DEVIATION: f64 = 75e3;
/// De-emphasis time constant in seconds.
const FM_DEEMPHASIS_TAU: f64 = 75e-6;
/// Audio low-pass of the FM path, applied at the quadrature rate.
const FM_AUDIO_CUTOFF: f64 = 16e3;
const FM_AUDIO_TRANSITION: f64 = 4e3;

/// Wideband FM demodulator.
///
/// Quadrature discriminator `arg(x[n] * conj(x[n-1]))`, scaled so the
/// peak deviation maps to ±1, then de-emphasis and a decimating audio
/// low-pass down to the audio rate.
pub struct WfmDemod {
    gain: Sample,
    previous: ComplexSample,
    deemphasis_state: Sample,
    deemphasis_alpha: Sample,
    audio_filter: DecimatingFir<Sample>,
}

impl WfmDemod {
    /// `quad_rate` is the complex input rate; the audio output rate is
    /// `quad_rate / audio_decimation`.
    pub fn new(quad_rate: f64, audio_decimation: usize) -> Self {
        let gain = quad_rate / (2.0 * std::f64::consts::PI * FM_MAX_DEVIATION);
        let alpha = 1.0 - (-1.0 / (quad_rate * FM_DEEMPHASIS_TAU)).exp();
        let taps = filter::low_pass(
            1.0,
            quad_rate,
            FM_AUDIO_CUTOFF,
            FM_AUDIO_TRANSITION,
            Window::Hamming,
        );
        Self {
            gain: gain as Sample,
            previous: ComplexSample::new(1.0, 0.0),
            deemphasis_state: 0.0,
            deemphasis_alpha: alpha as Sample,
            audio_filter: DecimatingFir::new(taps, audio_decimation),
        }
    }

    /// Demodulate one quadrature-rate sample, appending an audio sample
    /// to `audio` when the internal decimation emits one.
    pub fn push(&mut self, sample: ComplexSample, audio: &mut Vec<Sample>) {
        let demodulated = (sample * self.previous.conj()).arg() * self.gain;
        self.previous = sample;
        self.deemphasis_state += self.deemphasis_alpha * (demodulated - self.deemphasis_state);
        if let Some(out) = self.audio_filter.push(self.deemphasis_state) {
            audio.push(out);
        }
    }

    pub fn audio_decimation(&self) -> usize {
        self.audio_filter.decimation()
    }
}

/// AM envelope demodulator.
///
/// Takes the magnitude of the baseband signal, then band-passes the
/// audio between the given edges to strip carrier residue and restrict
/// the band.
pub struct AmDemod {
    audio_filter: DecimatingFir<Sample>,
}

impl AmDemod {
    /// `audio_pass` is the upper passband edge, `audio_stop` the end of
    /// its transition band. The lower edge sits at 25 Hz.
    pub fn new(
        channel_rate: f64,
        audio_decimation: usize,
        audio_pass: f64,
        audio_stop: f64,
    ) -> Self {
        let taps = filter::band_pass(
            0.5,
            channel_rate,
            25.0,
            audio_pass,
            audio_stop - audio_pass,
            Window::Hamming,
        );
        Self {
            audio_filter: DecimatingFir::new(taps, audio_decimation),
        }
    }

    /// Demodulate one channel-rate sample, appending an audio sample to
    /// `audio` when the internal decimation emits one.
    pub fn push(&mut self, sample: ComplexSample, audio: &mut Vec<Sample>) {
        if let Some(out) = self.audio_filter.push(sample.norm()) {
            audio.push(out);
        }
    }

    pub fn audio_decimation(&self) -> usize {
        self.audio_filter.decimation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frequency: f64, sample_rate: f64, count: usize) -> Vec<ComplexSample> {
        let turn = 2.0 * std::f64::consts::PI;
        (0..count)
            .map(|n| {
                let phase = ((frequency * n as f64 / sample_rate).rem_euclid(1.0) * turn) as Sample;
                ComplexSample::new(phase.cos(), phase.sin())
            })
            .collect()
    }

    #[test]
    fn test_wfm_constant_deviation_gives_constant_output() {
        let quad_rate = 480e3;
        let deviation = 50e3;
        let mut demod = WfmDemod::new(quad_rate, 10);
        let mut audio = Vec::new();
        for sample in tone(deviation, quad_rate, 60_000) {
            demod.push(sample, &mut audio);
        }
        assert_eq!(audio.len(), 6000);
        // A tone `deviation` Hz off center demodulates to
        // deviation / 75 kHz once the filters settle.
        let expected = (deviation / 75e3) as Sample;
        for &sample in &audio[audio.len() - 100..] {
            assert!(
                (sample - expected).abs() < 0.02,
                "expected {expected}, got {sample}"
            );
        }
    }

    #[test]
    fn test_wfm_negative_deviation_gives_negative_output() {
        let quad_rate = 480e3;
        let mut demod = WfmDemod::new(quad_rate, 10);
        let mut audio = Vec::new();
        for sample in tone(-30e3, quad_rate, 60_000) {
            demod.push(sample, &mut audio);
        }
        let expected = (-30e3 / 75e3) as Sample;
        for &sample in &audio[audio.len() - 100..] {
            assert!((sample - expected).abs() < 0.02);
        }
    }

    #[test]
    fn test_wfm_dc_input_is_silent() {
        let mut demod = WfmDemod::new(480e3, 10);
        let mut audio = Vec::new();
        for _ in 0..20_000 {
            demod.push(ComplexSample::new(0.7, 0.0), &mut audio);
        }
        for &sample in &audio[audio.len() - 100..] {
            assert!(sample.abs() < 1e-4);
        }
    }

    #[test]
    fn test_am_envelope_recovery() {
        let channel_rate = 32e3;
        let modulation_frequency = 1e3;
        let depth = 0.8;
        let mut demod = AmDemod::new(channel_rate, 1, 5e3, 6e3);
        let mut audio = Vec::new();
        for n in 0..32_000usize {
            let t = n as f64 / channel_rate;
            let envelope = 1.0
                + depth * (2.0 * std::f64::consts::PI * modulation_frequency * t).sin();
            demod.push(ComplexSample::new(envelope as Sample, 0.0), &mut audio);
        }
        assert_eq!(audio.len(), 32_000);

        // Correlate the settled tail against the modulating tone; the
        // recovered amplitude is depth times the filter's 0.5 gain.
        let tail = &audio[16_000..];
        let mut corr = ComplexSample::new(0.0, 0.0);
        for (n, &sample) in tail.iter().enumerate() {
            let phase = (2.0 * std::f64::consts::PI * modulation_frequency * n as f64
                / channel_rate) as Sample;
            corr += ComplexSample::new(phase.cos(), -phase.sin()) * sample;
        }
        let amplitude = 2.0 * corr.norm() / tail.len() as Sample;
        let expected = (depth * 0.5) as Sample;
        assert!(
            (amplitude - expected).abs() < 0.1 * expected,
            "expected amplitude {expected}, got {amplitude}"
        );
    }

    #[test]
    fn test_am_decimation_to_audio_rate() {
        let mut demod = AmDemod::new(64e3, 2, 5e3, 6e3);
        let mut audio = Vec::new();
        for sample in tone(0.0, 64e3, 6400) {
            demod.push(sample, &mut audio);
        }
        assert_eq!(audio.len(), 3200);
    }

    #[test]
    fn test_wfm_tone_dump() {
        // Write a demodulated sweep tone for manual inspection.
        // The result is not automatically checked beyond being finite.
        use byteorder::{ByteOrder, LittleEndian};
        use std::io::Write;

        let quad_rate = 480e3;
        let mut demod = WfmDemod::new(quad_rate, 10);
        let mut audio = Vec::new();
        for sample in tone(10e3, quad_rate, 48_000) {
            demod.push(sample, &mut audio);
        }

        std::fs::create_dir_all("test_results").unwrap();
        let mut output_file = std::fs::File::create("test_results/wfm_tone.f32").unwrap();
        for &sample in &audio {
            assert!(sample.is_finite());
            let mut buf = [0u8; 4];
            LittleEndian::write_f32(&mut buf, sample);
            output_file.write_all(&buf).unwrap();
        }
    }
}
