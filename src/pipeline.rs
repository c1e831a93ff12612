//! Pipeline construction, control and the worker loop.
//!
//! A pipeline owns one fixed stage chain per modulation:
//!
//! ```text
//! FM: source → decimating low-pass → WFM demodulator → sink
//! AM: source → frequency translation → decimating low-pass → AM demodulator → sink
//! ```
//!
//! After `start()` a single worker thread pulls blocks from the source
//! through the chain into the sink. Retune requests from other threads
//! land in a generation-counted snapshot that the worker applies between
//! blocks, so no output sample is ever computed against a half-updated
//! offset or tap set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::demod::{AmDemod, WfmDemod};
use crate::error::{Error, Result};
use crate::filter::{DecimatingFir, FilterSpec, Window};
use crate::sink::AudioSink;
use crate::source::SampleSource;
use crate::translate::FreqXlatingFir;
use crate::{ComplexSample, Sample};

/// Modulation of the received channel. Selects the pipeline topology
/// and its retuning rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Modulation {
    Fm,
    Am,
}

/// Lifecycle state of a pipeline. Stopped is terminal; construct a new
/// pipeline to receive again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Constructed,
    Running,
    Stopped,
}

/// Audio sample rate of the FM path.
pub const FM_AUDIO_RATE: u32 = 48_000;
/// Audio sample rate of the AM path.
pub const AM_AUDIO_RATE: u32 = 32_000;
/// Fixed RF tuning point of the AM path. AM channels are selected by
/// frequency translation from here, not by retuning the hardware.
pub const AM_CENTER_FREQUENCY: f64 = 2e6;

const FM_INPUT_RATE: f64 = FM_AUDIO_RATE as f64 * 50.0;
const FM_CHANNEL_DECIMATION: usize = 5;
const FM_CHANNEL_CUTOFF: f64 = 300e3;
const FM_CHANNEL_TRANSITION: f64 = 50e3;
const FM_AUDIO_DECIMATION: usize = 10;

const AM_INPUT_RATE: f64 = AM_AUDIO_RATE as f64 * 100.0;
const AM_CHANNEL_DECIMATION: usize = 100;
const AM_CHANNEL_CUTOFF: f64 = 8e3;
const AM_CHANNEL_TRANSITION: f64 = 2e3;
const AM_AUDIO_DECIMATION: usize = 1;
const AM_AUDIO_PASS: f64 = 5e3;
const AM_AUDIO_STOP: f64 = 6e3;
/// Gain applied in the AM translation stage.
const AM_CHANNEL_GAIN: Sample = 32.0;

/// Input samples requested from the source per worker iteration.
const READ_BLOCK: usize = 16 * 1024;
/// Consecutive failed reads tolerated before the stream is declared
/// faulted. Occasional errors occur with some SDRs even when they keep
/// working.
const READ_ERROR_TOLERANCE: u32 = 10;

/// Everything needed to construct a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub modulation: Modulation,
    /// Station RF center frequency for FM; channel frequency for AM.
    pub frequency: f64,
    /// Opaque SoapySDR device argument string.
    pub device_args: String,
    /// RF gain in dB, applied once at construction.
    pub gain: f64,
}

impl PipelineConfig {
    /// Input sample rate the source must deliver for this modulation.
    pub fn input_rate(&self) -> f64 {
        match self.modulation {
            Modulation::Fm => FM_INPUT_RATE,
            Modulation::Am => AM_INPUT_RATE,
        }
    }

    /// Audio rate the sink must render.
    pub fn audio_rate(&self) -> u32 {
        match self.modulation {
            Modulation::Fm => FM_AUDIO_RATE,
            Modulation::Am => AM_AUDIO_RATE,
        }
    }

    /// Frequency the source is physically tuned to.
    pub fn center_frequency(&self) -> f64 {
        match self.modulation {
            Modulation::Fm => self.frequency,
            Modulation::Am => AM_CENTER_FREQUENCY,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return Err(Error::invalid_parameter(format!(
                "frequency {} Hz is out of range",
                self.frequency
            )));
        }
        if !self.gain.is_finite() {
            return Err(Error::invalid_parameter("gain must be finite"));
        }
        if self.modulation == Modulation::Am {
            check_am_channel(self.frequency, AM_CENTER_FREQUENCY)?;
        }
        Ok(())
    }
}

/// An AM channel must sit inside the bandwidth sampled around the fixed
/// tuning point.
fn check_am_channel(channel: f64, center: f64) -> Result<()> {
    let offset = channel - center;
    if offset.abs() > AM_INPUT_RATE / 2.0 {
        return Err(Error::invalid_parameter(format!(
            "channel {channel} Hz is outside the sampled band around {center} Hz"
        )));
    }
    Ok(())
}

/// Tuning snapshot shared between callers and the worker. Writers bump
/// the generation; the worker applies any snapshot whose generation it
/// has not seen, as a whole, between blocks.
struct Tuning {
    center_frequency: f64,
    /// AM only.
    channel_frequency: Option<f64>,
    generation: u64,
}

impl Tuning {
    fn channel_offset(&self) -> Option<f64> {
        self.channel_frequency
            .map(|channel| channel - self.center_frequency)
    }
}

struct StateCell {
    state: PipelineState,
    fault: Option<Error>,
}

struct Shared {
    tuning: Mutex<Tuning>,
    cell: Mutex<StateCell>,
    stopped: Condvar,
    stop: AtomicBool,
}

impl Shared {
    /// The one place that enters Stopped. Later calls are no-ops, so
    /// the transition happens exactly once.
    fn enter_stopped(&self, fault: Option<Error>) {
        let mut cell = self.cell.lock().unwrap();
        if cell.state != PipelineState::Stopped {
            cell.state = PipelineState::Stopped;
            cell.fault = fault;
            self.stopped.notify_all();
        }
    }
}

/// The per-modulation stage graph between source and sink.
enum Chain {
    Fm {
        channel: DecimatingFir<ComplexSample>,
        demod: WfmDemod,
    },
    Am {
        selector: FreqXlatingFir,
        channel: DecimatingFir<ComplexSample>,
        demod: AmDemod,
    },
}

impl Chain {
    fn build(modulation: Modulation, tuning: &Tuning) -> Chain {
        match modulation {
            Modulation::Fm => {
                let spec = FilterSpec {
                    sample_rate: FM_INPUT_RATE,
                    cutoff: FM_CHANNEL_CUTOFF,
                    transition: FM_CHANNEL_TRANSITION,
                    window: Window::Hamming,
                    decimation: FM_CHANNEL_DECIMATION,
                };
                let quad_rate = spec.output_rate();
                Chain::Fm {
                    channel: DecimatingFir::from_spec(&spec),
                    demod: WfmDemod::new(quad_rate, FM_AUDIO_DECIMATION),
                }
            }
            Modulation::Am => {
                let spec = FilterSpec {
                    sample_rate: AM_INPUT_RATE,
                    cutoff: AM_CHANNEL_CUTOFF,
                    transition: AM_CHANNEL_TRANSITION,
                    window: Window::Hamming,
                    decimation: AM_CHANNEL_DECIMATION,
                };
                let selector = FreqXlatingFir::new(
                    vec![AM_CHANNEL_GAIN],
                    1,
                    tuning.channel_offset().unwrap_or(0.0),
                    AM_INPUT_RATE,
                );
                let channel_rate = spec.output_rate();
                Chain::Am {
                    selector,
                    channel: DecimatingFir::from_spec(&spec),
                    demod: AmDemod::new(channel_rate, AM_AUDIO_DECIMATION, AM_AUDIO_PASS, AM_AUDIO_STOP),
                }
            }
        }
    }

    /// Run a block of input samples through the chain, appending audio
    /// samples to `audio`.
    fn process(&mut self, input: &[ComplexSample], audio: &mut Vec<Sample>) {
        match self {
            Chain::Fm { channel, demod } => {
                for &sample in input {
                    if let Some(filtered) = channel.push(sample) {
                        demod.push(filtered, audio);
                    }
                }
            }
            Chain::Am {
                selector,
                channel,
                demod,
            } => {
                for &sample in input {
                    if let Some(translated) = selector.push(sample) {
                        if let Some(filtered) = channel.push(translated) {
                            demod.push(filtered, audio);
                        }
                    }
                }
            }
        }
    }

    fn set_channel_offset(&mut self, offset: f64) {
        if let Chain::Am { selector, .. } = self {
            selector.set_offset(offset);
        }
    }

    /// Input samples consumed per audio sample emitted.
    fn total_decimation(&self) -> usize {
        match self {
            Chain::Fm { channel, demod } => channel.decimation() * demod.audio_decimation(),
            Chain::Am {
                selector,
                channel,
                demod,
            } => selector.decimation() * channel.decimation() * demod.audio_decimation(),
        }
    }
}

/// The stage objects, owned by the controller until `start()` hands
/// them to the worker thread.
struct Stages {
    source: Box<dyn SampleSource>,
    sink: Box<dyn AudioSink>,
    chain: Chain,
}

/// Owns the stages, wires them per modulation, runs them on a worker
/// thread and exposes thread-safe retuning.
///
/// All methods take `&self`, so a pipeline can be shared behind an
/// `Arc` with a signal handler that calls [`stop`](Self::stop).
pub struct Pipeline {
    shared: Arc<Shared>,
    modulation: Modulation,
    stages: Mutex<Option<Stages>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Pipeline {
    /// Construct a pipeline over the given collaborators.
    ///
    /// The source must already be configured for
    /// [`input_rate`](PipelineConfig::input_rate) and tuned to
    /// [`center_frequency`](PipelineConfig::center_frequency);
    /// [`open`](Self::open) does both for real hardware. Parameters are
    /// validated before any stage is touched.
    pub fn new(
        config: &PipelineConfig,
        source: Box<dyn SampleSource>,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        config.validate()?;
        let tuning = Tuning {
            center_frequency: config.center_frequency(),
            channel_frequency: match config.modulation {
                Modulation::Fm => None,
                Modulation::Am => Some(config.frequency),
            },
            generation: 0,
        };
        let chain = Chain::build(config.modulation, &tuning);
        debug!(
            input_rate = config.input_rate(),
            audio_rate = config.audio_rate(),
            total_decimation = chain.total_decimation(),
            "pipeline constructed"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                tuning: Mutex::new(tuning),
                cell: Mutex::new(StateCell {
                    state: PipelineState::Constructed,
                    fault: None,
                }),
                stopped: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
            modulation: config.modulation,
            stages: Mutex::new(Some(Stages {
                source,
                sink,
                chain,
            })),
            worker: Mutex::new(None),
        })
    }

    /// Open the SoapySDR source and system audio sink described by the
    /// configuration and construct a pipeline over them. Fails with
    /// [`Error::DeviceInit`] if either device cannot be opened; no
    /// thread is started in that case.
    #[cfg(all(feature = "soapy", feature = "audio"))]
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let source = crate::source::SoapySource::open(
            &config.device_args,
            config.input_rate(),
            config.center_frequency(),
            config.gain,
        )?;
        let sink = crate::sink::CpalSink::open(config.audio_rate())?;
        Self::new(config, Box::new(source), Box::new(sink))
    }

    pub fn state(&self) -> PipelineState {
        self.shared.cell.lock().unwrap().state
    }

    pub fn modulation(&self) -> Modulation {
        self.modulation
    }

    /// Begin continuous processing on a worker thread and return
    /// immediately. Only valid on a Constructed pipeline.
    pub fn start(&self) -> Result<()> {
        let mut cell = self.shared.cell.lock().unwrap();
        if cell.state != PipelineState::Constructed {
            return Err(Error::InvalidState {
                operation: "start",
                state: cell.state,
            });
        }
        let Some(stages) = self.stages.lock().unwrap().take() else {
            return Err(Error::InvalidState {
                operation: "start",
                state: cell.state,
            });
        };

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("sdradio-pipeline".to_string())
            .spawn(move || {
                let result = run_worker(stages, &shared);
                match &result {
                    Ok(()) => info!("pipeline stopped"),
                    Err(err) => error!("pipeline fault: {err}"),
                }
                shared.enter_stopped(result.err());
                // The stages drop here, releasing the source and sink.
            })
            .map_err(|err| Error::stream(format!("spawn pipeline worker: {err}")))?;

        cell.state = PipelineState::Running;
        drop(cell);
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Request termination. Idempotent and callable from any thread,
    /// including a signal handler; never blocks on the worker.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        let mut cell = self.shared.cell.lock().unwrap();
        if cell.state == PipelineState::Constructed {
            // No worker exists yet; release the stages and finish the
            // transition here.
            cell.state = PipelineState::Stopped;
            self.shared.stopped.notify_all();
            drop(cell);
            self.stages.lock().unwrap().take();
        }
        // A Running pipeline transitions when the worker observes the
        // stop flag; a Stopped one is left alone.
    }

    /// Block until the pipeline reaches Stopped, whether through
    /// [`stop`](Self::stop) or an internal fault, and return the
    /// terminal result. Any number of threads may wait concurrently;
    /// they all observe the same result.
    pub fn wait(&self) -> Result<()> {
        let mut cell = self.shared.cell.lock().unwrap();
        while cell.state != PipelineState::Stopped {
            cell = self.shared.stopped.wait(cell).unwrap();
        }
        let result = match &cell.fault {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        };
        drop(cell);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        result
    }

    /// Retune the source's center frequency. For AM this also shifts
    /// the channel selector offset so the selected channel stays put.
    /// Takes effect within one block; callable any time after
    /// construction, from any thread.
    pub fn set_center_frequency(&self, hz: f64) -> Result<()> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(Error::invalid_parameter(format!(
                "center frequency {hz} Hz is out of range"
            )));
        }
        let mut tuning = self.shared.tuning.lock().unwrap();
        if let Some(channel) = tuning.channel_frequency {
            check_am_channel(channel, hz)?;
        }
        tuning.center_frequency = hz;
        tuning.generation += 1;
        debug!(center_frequency = hz, "retune requested");
        Ok(())
    }

    /// Retune the selected AM channel without touching the center
    /// frequency. Rejected for FM pipelines.
    pub fn set_channel_frequency(&self, hz: f64) -> Result<()> {
        if self.modulation != Modulation::Am {
            return Err(Error::invalid_parameter(
                "channel tuning applies only to AM pipelines",
            ));
        }
        if !hz.is_finite() || hz <= 0.0 {
            return Err(Error::invalid_parameter(format!(
                "channel frequency {hz} Hz is out of range"
            )));
        }
        let mut tuning = self.shared.tuning.lock().unwrap();
        check_am_channel(hz, tuning.center_frequency)?;
        tuning.channel_frequency = Some(hz);
        tuning.generation += 1;
        debug!(channel_frequency = hz, "retune requested");
        Ok(())
    }

    /// Current frequency-translation offset of the AM channel selector,
    /// `None` for FM.
    pub fn channel_offset(&self) -> Option<f64> {
        self.shared.tuning.lock().unwrap().channel_offset()
    }
}

/// The continuous processing loop. Runs until the stop flag is raised
/// or the stream faults.
fn run_worker(mut stages: Stages, shared: &Shared) -> Result<()> {
    let mut buffer = vec![ComplexSample::ZERO; READ_BLOCK];
    let mut audio: Vec<Sample> = Vec::with_capacity(READ_BLOCK);
    let mut seen_generation = 0u64;
    let mut consecutive_errors = 0u32;

    while !shared.stop.load(Ordering::Acquire) {
        // Apply a pending retune as a whole between blocks, so no
        // sample is processed against a half-updated snapshot.
        let pending = {
            let tuning = shared.tuning.lock().unwrap();
            (tuning.generation != seen_generation).then(|| {
                (
                    tuning.generation,
                    tuning.center_frequency,
                    tuning.channel_offset(),
                )
            })
        };
        if let Some((generation, center, offset)) = pending {
            stages.source.set_center_frequency(center)?;
            if let Some(offset) = offset {
                stages.chain.set_channel_offset(offset);
            }
            seen_generation = generation;
            debug!(center_frequency = center, "retune applied");
        }

        match stages.source.read(&mut buffer) {
            Ok(count) => {
                consecutive_errors = 0;
                audio.clear();
                stages.chain.process(&buffer[..count], &mut audio);
                if !audio.is_empty() {
                    stages.sink.write(&audio)?;
                }
            }
            Err(err) => {
                consecutive_errors += 1;
                warn!("error reading from source ({consecutive_errors}): {err}");
                if consecutive_errors >= READ_ERROR_TOLERANCE {
                    return Err(Error::stream(format!(
                        "giving up after {consecutive_errors} consecutive read errors: {err}"
                    )));
                }
            }
        }
    }
    Ok(())
}
