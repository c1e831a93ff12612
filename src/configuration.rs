pub use clap::Parser;

use crate::error::{Error, Result};
use crate::pipeline::{Modulation, PipelineConfig};

#[derive(Parser)]
#[command(name = "sdradio", about = "FM/AM broadcast receiver for SoapySDR devices")]
pub struct Cli {
    /// Frequency to receive, in MHz for FM and in kHz for AM.
    pub frequency: f64,

    /// Modulation of the received signal.
    #[arg(short, long, value_enum, default_value_t = Modulation::Fm)]
    pub modulation: Modulation,

    /// SoapySDR device arguments,
    /// for example "driver=hackrf" or "driver=rtlsdr".
    #[arg(short, long, default_value = "driver=hackrf")]
    pub device: String,

    /// RF gain in dB.
    #[arg(short, long, default_value_t = 20.0)]
    pub gain: f64,
}

impl Cli {
    /// Convert the command line values to a pipeline configuration,
    /// applying the per-modulation frequency unit.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return Err(Error::invalid_parameter(format!(
                "frequency {} is out of range",
                self.frequency
            )));
        }
        let frequency = match self.modulation {
            Modulation::Fm => self.frequency * 1e6,
            Modulation::Am => self.frequency * 1e3,
        };
        Ok(PipelineConfig {
            modulation: self.modulation,
            frequency,
            device_args: self.device.clone(),
            gain: self.gain,
        })
    }
}
