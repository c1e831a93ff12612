//! Pipeline lifecycle tests over synthetic collaborators.
//!
//! These run the real worker thread against the deterministic tone
//! source and the discarding sink, so everything except the hardware
//! bindings is exercised end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sdradio::pipeline::{
    Modulation, Pipeline, PipelineConfig, PipelineState, AM_CENTER_FREQUENCY,
};
use sdradio::sink::NullSink;
use sdradio::source::{CenterProbe, SampleSource, ToneSource};
use sdradio::{ComplexSample, Error};

fn fm_config() -> PipelineConfig {
    PipelineConfig {
        modulation: Modulation::Fm,
        frequency: 82.5e6,
        device_args: "null-source".to_string(),
        gain: 20.0,
    }
}

fn am_config() -> PipelineConfig {
    PipelineConfig {
        modulation: Modulation::Am,
        frequency: 954e3,
        device_args: "null-source".to_string(),
        gain: 20.0,
    }
}

fn build(config: &PipelineConfig) -> (Pipeline, Arc<AtomicUsize>, CenterProbe) {
    let source = ToneSource::new(config.input_rate(), config.center_frequency(), 50e3);
    let probe = source.center_probe();
    let sink = NullSink::new();
    let counter = sink.counter();
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(sink)).unwrap();
    (pipeline, counter, probe)
}

/// Poll `condition` until it holds or the timeout expires.
fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_start_stop_wait_reaches_stopped_without_fault() {
    let (pipeline, _, _) = build(&fm_config());
    assert_eq!(pipeline.state(), PipelineState::Constructed);
    pipeline.start().unwrap();
    pipeline.stop();
    pipeline.wait().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_pipeline_produces_audio() {
    let (pipeline, counter, _) = build(&fm_config());
    pipeline.start().unwrap();
    assert!(
        eventually(Duration::from_secs(10), || counter
            .load(Ordering::Relaxed)
            > 1000),
        "no audio came out of the pipeline"
    );
    pipeline.stop();
    pipeline.wait().unwrap();
}

#[test]
fn test_stop_twice_is_a_noop() {
    let (pipeline, _, _) = build(&fm_config());
    pipeline.start().unwrap();
    pipeline.stop();
    pipeline.stop();
    pipeline.wait().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_concurrent_waiters_observe_same_result() {
    let (pipeline, _, _) = build(&fm_config());
    let pipeline = Arc::new(pipeline);
    pipeline.start().unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.wait())
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    pipeline.stop();
    for waiter in waiters {
        assert!(waiter.join().unwrap().is_ok());
    }
    assert!(pipeline.wait().is_ok());
}

#[test]
fn test_double_start_is_invalid() {
    let (pipeline, _, _) = build(&fm_config());
    pipeline.start().unwrap();
    assert!(matches!(
        pipeline.start(),
        Err(Error::InvalidState { state: PipelineState::Running, .. })
    ));
    pipeline.stop();
    pipeline.wait().unwrap();
}

#[test]
fn test_no_restart_after_stop() {
    let (pipeline, _, _) = build(&fm_config());
    pipeline.start().unwrap();
    pipeline.stop();
    pipeline.wait().unwrap();
    assert!(matches!(
        pipeline.start(),
        Err(Error::InvalidState { state: PipelineState::Stopped, .. })
    ));
}

#[test]
fn test_stop_before_start_releases_the_pipeline() {
    let (pipeline, _, _) = build(&fm_config());
    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    pipeline.wait().unwrap();
    assert!(matches!(pipeline.start(), Err(Error::InvalidState { .. })));
}

#[test]
fn test_am_channel_at_center_has_zero_offset() {
    let config = PipelineConfig {
        frequency: AM_CENTER_FREQUENCY,
        ..am_config()
    };
    let (pipeline, _, _) = build(&config);
    assert_eq!(pipeline.channel_offset(), Some(0.0));
}

#[test]
fn test_set_channel_frequency_updates_offset_while_running() {
    let (pipeline, _, _) = build(&am_config());
    assert_eq!(pipeline.channel_offset(), Some(954e3 - AM_CENTER_FREQUENCY));
    pipeline.start().unwrap();
    pipeline.set_channel_frequency(1000e3).unwrap();
    assert_eq!(
        pipeline.channel_offset(),
        Some(1000e3 - AM_CENTER_FREQUENCY)
    );
    pipeline.stop();
    pipeline.wait().unwrap();
}

#[test]
fn test_set_channel_frequency_rejected_for_fm() {
    let (pipeline, _, _) = build(&fm_config());
    assert!(matches!(
        pipeline.set_channel_frequency(954e3),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn test_set_center_frequency_reaches_source_while_running() {
    let (pipeline, counter, probe) = build(&fm_config());
    pipeline.start().unwrap();
    // Give the worker a moment to get into its loop, then retune.
    assert!(eventually(Duration::from_secs(10), || counter
        .load(Ordering::Relaxed)
        > 0));
    pipeline.set_center_frequency(90.1e6).unwrap();
    assert!(
        eventually(Duration::from_secs(10), || probe.hz() == 90.1e6),
        "retune did not reach the source"
    );
    pipeline.stop();
    pipeline.wait().unwrap();
}

#[test]
fn test_retune_does_not_interrupt_the_stream() {
    let (pipeline, counter, _) = build(&fm_config());
    pipeline.start().unwrap();
    for i in 0..5 {
        pipeline.set_center_frequency(88e6 + i as f64 * 1e6).unwrap();
        thread::sleep(Duration::from_millis(10));
    }
    let before = counter.load(Ordering::Relaxed);
    assert!(
        eventually(Duration::from_secs(10), || counter
            .load(Ordering::Relaxed)
            > before),
        "stream stalled after retuning"
    );
    pipeline.stop();
    pipeline.wait().unwrap();
}

#[test]
fn test_invalid_center_frequency_rejected() {
    let (pipeline, _, _) = build(&fm_config());
    assert!(matches!(
        pipeline.set_center_frequency(-1.0),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        pipeline.set_center_frequency(f64::NAN),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn test_construction_rejects_bad_parameters() {
    let config = PipelineConfig {
        frequency: -88e6,
        ..fm_config()
    };
    let source = ToneSource::new(config.input_rate(), 0.0, 0.0);
    let sink = NullSink::new();
    assert!(matches!(
        Pipeline::new(&config, Box::new(source), Box::new(sink)),
        Err(Error::InvalidParameter(_))
    ));
}

/// A source whose reads always fail, standing in for broken hardware.
struct FailingSource {
    sample_rate: f64,
}

impl SampleSource for FailingSource {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn set_center_frequency(&mut self, _hz: f64) -> sdradio::Result<()> {
        Ok(())
    }

    fn read(&mut self, _buffer: &mut [ComplexSample]) -> sdradio::Result<usize> {
        Err(Error::stream("simulated I/O failure"))
    }
}

#[test]
fn test_stream_fault_surfaces_through_wait() {
    let config = fm_config();
    let source = FailingSource {
        sample_rate: config.input_rate(),
    };
    let pipeline =
        Pipeline::new(&config, Box::new(source), Box::new(NullSink::new())).unwrap();
    pipeline.start().unwrap();
    // The worker gives up after its error tolerance and faults; no
    // stop() is ever called.
    let result = pipeline.wait();
    assert!(matches!(result, Err(Error::Stream(_))));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    // Waiting again returns the same fault.
    assert!(matches!(pipeline.wait(), Err(Error::Stream(_))));
}
