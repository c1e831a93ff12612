//! Sample sources.
//!
//! The pipeline only sees the [`SampleSource`] trait, so real SoapySDR
//! hardware and the deterministic synthetic source are interchangeable.

use crate::error::{Error, Result};
use crate::ComplexSample;

/// Continuous producer of complex samples at a fixed rate, with tuning
/// control.
pub trait SampleSource: Send {
    /// Configured sample rate in Hz.
    fn sample_rate(&self) -> f64;

    /// Retune the center frequency.
    fn set_center_frequency(&mut self, hz: f64) -> Result<()>;

    /// Fill `buffer` with new samples, returning how many were written.
    /// Zero means nothing arrived before the internal timeout; the
    /// caller should read again.
    fn read(&mut self, buffer: &mut [ComplexSample]) -> Result<usize>;
}

#[cfg(feature = "soapy")]
pub use self::soapy::SoapySource;

#[cfg(feature = "soapy")]
mod soapy {
    use super::{Error, Result, SampleSource};
    use crate::ComplexSample;

    const READ_TIMEOUT_US: i64 = 100_000;

    /// It is annoying to repeat error handling so do that in a macro.
    /// ? could be used but then it could not print which SoapySDR call
    /// failed.
    macro_rules! soapycheck {
        ($text:literal, $soapysdr_call:expr) => {
            match $soapysdr_call {
                Ok(ret) => ret,
                Err(err) => {
                    tracing::error!("SoapySDR: failed to {}: {}", $text, err);
                    return Err(Error::device_init(format!("{}: {}", $text, err)));
                }
            }
        };
    }

    /// Receive side of a SoapySDR device.
    pub struct SoapySource {
        dev: soapysdr::Device,
        rx: soapysdr::RxStream<ComplexSample>,
        channel: usize,
        sample_rate: f64,
    }

    impl SoapySource {
        /// Open and configure a device from an opaque SoapySDR argument
        /// string such as "driver=hackrf".
        pub fn open(
            device_args: &str,
            sample_rate: f64,
            center_frequency: f64,
            gain: f64,
        ) -> Result<Self> {
            let channel = 0;
            let dev = soapycheck!("open SoapySDR device", soapysdr::Device::new(device_args));
            soapycheck!(
                "set RX sample rate",
                dev.set_sample_rate(soapysdr::Direction::Rx, channel, sample_rate)
            );
            soapycheck!(
                "set RX center frequency",
                dev.set_frequency(
                    soapysdr::Direction::Rx,
                    channel,
                    center_frequency,
                    soapysdr::Args::new()
                )
            );
            soapycheck!(
                "set RX gain",
                dev.set_gain(soapysdr::Direction::Rx, channel, gain)
            );
            let mut rx = soapycheck!("setup RX stream", dev.rx_stream::<ComplexSample>(&[channel]));
            soapycheck!("activate RX stream", rx.activate(None));
            Ok(Self {
                dev,
                rx,
                channel,
                sample_rate,
            })
        }
    }

    impl SampleSource for SoapySource {
        fn sample_rate(&self) -> f64 {
            self.sample_rate
        }

        fn set_center_frequency(&mut self, hz: f64) -> Result<()> {
            self.dev
                .set_frequency(
                    soapysdr::Direction::Rx,
                    self.channel,
                    hz,
                    soapysdr::Args::new(),
                )
                .map_err(|err| Error::stream(format!("retune to {hz} Hz failed: {err}")))
        }

        fn read(&mut self, buffer: &mut [ComplexSample]) -> Result<usize> {
            match self.rx.read(&mut [buffer], READ_TIMEOUT_US) {
                Ok(count) => Ok(count),
                Err(err) if err.code == soapysdr::ErrorCode::Timeout => Ok(0),
                Err(err) => Err(Error::stream(format!("read from SDR failed: {err}"))),
            }
        }
    }

    impl Drop for SoapySource {
        fn drop(&mut self) {
            if let Err(err) = self.rx.deactivate(None) {
                tracing::warn!("SoapySDR: failed to deactivate RX stream: {err}");
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        #[ignore = "needs the SoapySDR runtime library"]
        fn test_unknown_driver_fails_to_open() {
            let result = SoapySource::open("driver=does-not-exist", 2.4e6, 100e6, 20.0);
            assert!(matches!(result, Err(Error::DeviceInit(_))));
        }
    }
}

/// Observable handle to a [`ToneSource`]'s tuned center frequency.
///
/// The source keeps working after being moved into the pipeline; the
/// probe lets a test confirm that retune commands reached it.
#[derive(Clone)]
pub struct CenterProbe(std::sync::Arc<std::sync::atomic::AtomicU64>);

impl CenterProbe {
    pub fn hz(&self) -> f64 {
        f64::from_bits(self.0.load(std::sync::atomic::Ordering::Acquire))
    }
}

/// Deterministic synthetic source: a unit-amplitude complex exponential
/// at a fixed offset from the tuned center frequency.
///
/// Stands in for real hardware in tests and loopback experiments.
pub struct ToneSource {
    sample_rate: f64,
    rotator: ComplexSample,
    step: ComplexSample,
    center: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl ToneSource {
    /// A source tuned to `center_frequency` emitting a tone
    /// `tone_offset` Hz above it.
    pub fn new(sample_rate: f64, center_frequency: f64, tone_offset: f64) -> Self {
        let phase = (2.0 * std::f64::consts::PI * tone_offset / sample_rate) as crate::Sample;
        Self {
            sample_rate,
            rotator: ComplexSample::new(1.0, 0.0),
            step: ComplexSample::new(phase.cos(), phase.sin()),
            center: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(
                center_frequency.to_bits(),
            )),
        }
    }

    pub fn center_probe(&self) -> CenterProbe {
        CenterProbe(std::sync::Arc::clone(&self.center))
    }
}

impl SampleSource for ToneSource {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn set_center_frequency(&mut self, hz: f64) -> Result<()> {
        self.center
            .store(hz.to_bits(), std::sync::atomic::Ordering::Release);
        Ok(())
    }

    fn read(&mut self, buffer: &mut [ComplexSample]) -> Result<usize> {
        for sample in buffer.iter_mut() {
            *sample = self.rotator;
            self.rotator *= self.step;
        }
        // The recurrence drifts off the unit circle very slowly;
        // correcting once per block is plenty.
        let norm = self.rotator.norm();
        if norm > 0.0 {
            self.rotator /= norm;
        }
        Ok(buffer.len())
    }
}
