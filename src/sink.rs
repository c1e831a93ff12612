//! Audio sinks.
//!
//! The pipeline only sees the [`AudioSink`] trait, so the system audio
//! device and the discarding test sink are interchangeable.

use crate::error::Result;
use crate::Sample;

/// Consumer of the demodulated mono audio stream.
pub trait AudioSink: Send {
    /// Queue a block of audio samples for rendering. May block while
    /// the device catches up; that backpressure paces the pipeline to
    /// the audio clock.
    fn write(&mut self, samples: &[Sample]) -> Result<()>;
}

/// Discards all samples, counting them. Test double for the audio
/// device.
#[derive(Default)]
pub struct NullSink {
    written: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter of samples written, observable after the sink has
    /// been moved into a pipeline.
    pub fn counter(&self) -> std::sync::Arc<std::sync::atomic::AtomicUsize> {
        std::sync::Arc::clone(&self.written)
    }
}

impl AudioSink for NullSink {
    fn write(&mut self, samples: &[Sample]) -> Result<()> {
        self.written
            .fetch_add(samples.len(), std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(feature = "audio")]
pub use self::cpal_sink::CpalSink;

#[cfg(feature = "audio")]
mod cpal_sink {
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::thread;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::{bounded, Receiver, Sender};

    use super::AudioSink;
    use crate::error::{Error, Result};
    use crate::Sample;

    /// Audio blocks buffered between the pipeline and the render
    /// thread. At one block per source read this is a second or two of
    /// headroom.
    const CHANNEL_BLOCKS: usize = 64;

    /// System audio output through cpal.
    ///
    /// cpal streams are not `Send`, so the stream lives on a dedicated
    /// render thread; sample blocks reach it over a bounded channel and
    /// the stream callback drains them at the hardware rate.
    pub struct CpalSink {
        samples: Option<Sender<Vec<Sample>>>,
        shutdown: Option<mpsc::Sender<()>>,
        render: Option<thread::JoinHandle<()>>,
    }

    impl CpalSink {
        /// Open the default output device at the given rate.
        pub fn open(sample_rate: u32) -> Result<Self> {
            let (samples_tx, samples_rx) = bounded::<Vec<Sample>>(CHANNEL_BLOCKS);
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

            let render = thread::Builder::new()
                .name("audio-render".to_string())
                .spawn(move || render_thread(sample_rate, samples_rx, ready_tx, shutdown_rx))
                .map_err(|err| Error::device_init(format!("spawn audio thread: {err}")))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self {
                    samples: Some(samples_tx),
                    shutdown: Some(shutdown_tx),
                    render: Some(render),
                }),
                Ok(Err(err)) => {
                    let _ = render.join();
                    Err(err)
                }
                Err(_) => {
                    let _ = render.join();
                    Err(Error::device_init("audio render thread died during setup"))
                }
            }
        }
    }

    impl AudioSink for CpalSink {
        fn write(&mut self, samples: &[Sample]) -> Result<()> {
            let Some(tx) = self.samples.as_ref() else {
                return Err(Error::stream("audio sink is closed"));
            };
            tx.send(samples.to_vec())
                .map_err(|_| Error::stream("audio render thread terminated"))
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            // Closing both channels lets the render thread drop the
            // stream and exit; join so the device is released before
            // drop returns.
            self.samples.take();
            self.shutdown.take();
            if let Some(render) = self.render.take() {
                let _ = render.join();
            }
        }
    }

    fn render_thread(
        sample_rate: u32,
        samples: Receiver<Vec<Sample>>,
        ready: mpsc::Sender<Result<()>>,
        shutdown: mpsc::Receiver<()>,
    ) {
        let host = cpal::default_host();
        let Some(device) = host.default_output_device() else {
            let _ = ready.send(Err(Error::device_init("no default audio output device")));
            return;
        };
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut pending: VecDeque<Sample> = VecDeque::new();
        let stream = match device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    if pending.is_empty() {
                        if let Ok(block) = samples.try_recv() {
                            pending.extend(block);
                        }
                    }
                    // Underruns render as silence.
                    *out = pending.pop_front().unwrap_or(0.0);
                }
            },
            |err| tracing::warn!("audio stream error: {err}"),
            None,
        ) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = ready.send(Err(Error::device_init(format!(
                    "open audio stream: {err}"
                ))));
                return;
            }
        };
        if let Err(err) = stream.play() {
            let _ = ready.send(Err(Error::device_init(format!(
                "start audio stream: {err}"
            ))));
            return;
        }
        let _ = ready.send(Ok(()));

        // Park here until the sink is dropped; the stream keeps playing
        // from its callback in the meantime.
        let _ = shutdown.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_counts_samples() {
        let mut sink = NullSink::new();
        let counter = sink.counter();
        sink.write(&[0.0; 480]).unwrap();
        sink.write(&[0.5; 20]).unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 500);
    }
}
