//! Filter design
//!
//! Windowed-sinc FIR design. The tap count is derived from the requested
//! transition width and the stopband attenuation of the chosen window, so
//! a narrower transition buys a longer filter.

use crate::Sample;

/// Window applied to the truncated sinc impulse response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Window {
    Rectangular,
    Hamming,
    Hann,
    Blackman,
    /// Kaiser window with shape parameter beta.
    Kaiser(f64),
}

impl Window {
    /// Stopband attenuation in dB this window can reach.
    pub fn max_attenuation(&self) -> f64 {
        match self {
            Window::Rectangular => 21.0,
            Window::Hamming => 53.0,
            Window::Hann => 44.0,
            Window::Blackman => 74.0,
            Window::Kaiser(beta) => beta / 0.1102 + 8.7,
        }
    }

    /// Window coefficients for the given length.
    pub fn generate(&self, length: usize) -> Vec<f64> {
        use std::f64::consts::PI;
        if length < 2 {
            return vec![1.0; length];
        }
        let last = (length - 1) as f64;
        match self {
            Window::Rectangular => vec![1.0; length],
            Window::Hamming => (0..length)
                .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f64 / last).cos())
                .collect(),
            Window::Hann => (0..length)
                .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f64 / last).cos()))
                .collect(),
            Window::Blackman => (0..length)
                .map(|n| {
                    let x = 2.0 * PI * n as f64 / last;
                    0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
                })
                .collect(),
            Window::Kaiser(beta) => {
                let denom = bessel_i0(*beta);
                (0..length)
                    .map(|n| {
                        let x = 2.0 * n as f64 / last - 1.0;
                        bessel_i0(beta * (1.0 - x * x).max(0.0).sqrt()) / denom
                    })
                    .collect()
            }
        }
    }
}

/// Zeroth-order modified Bessel function of the first kind,
/// by power series.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..32 {
        let factor = x / (2.0 * k as f64);
        term *= factor * factor;
        sum += term;
        if term < 1e-12 * sum {
            break;
        }
    }
    sum
}

/// Parameters of a decimating low-pass stage. Fully determines the tap
/// set through [`FilterSpec::taps`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    /// Input sample rate in Hz.
    pub sample_rate: f64,
    /// Passband edge in Hz.
    pub cutoff: f64,
    /// Transition band width in Hz.
    pub transition: f64,
    pub window: Window,
    /// Keep one sample in this many.
    pub decimation: usize,
}

impl FilterSpec {
    /// Unity-gain low-pass taps for this specification.
    pub fn taps(&self) -> Vec<Sample> {
        low_pass(
            1.0,
            self.sample_rate,
            self.cutoff,
            self.transition,
            self.window,
        )
    }

    /// Sample rate after decimation.
    pub fn output_rate(&self) -> f64 {
        self.sample_rate / self.decimation as f64
    }
}

/// Tap count reaching the window's attenuation over the given transition
/// width. Always odd so the filter has a symmetric center tap.
fn num_taps(sample_rate: f64, transition: f64, window: Window) -> usize {
    let count = (window.max_attenuation() / (22.0 * transition / sample_rate)) as usize;
    (count | 1).max(3)
}

/// Design low-pass taps with the given gain at DC.
pub fn low_pass(
    gain: f64,
    sample_rate: f64,
    cutoff: f64,
    transition: f64,
    window: Window,
) -> Vec<Sample> {
    use std::f64::consts::PI;
    assert!(sample_rate > 0.0, "sample rate must be positive");
    assert!(transition > 0.0, "transition width must be positive");
    assert!(
        cutoff > 0.0 && cutoff + transition <= sample_rate / 2.0,
        "cutoff and transition must fit below the Nyquist frequency"
    );

    let ntaps = num_taps(sample_rate, transition, window);
    let w = window.generate(ntaps);
    let middle = (ntaps / 2) as isize;
    let fc = 2.0 * PI * cutoff / sample_rate;

    let mut taps: Vec<f64> = (0..ntaps)
        .map(|i| {
            let n = i as isize - middle;
            let sinc = if n == 0 {
                fc / PI
            } else {
                (n as f64 * fc).sin() / (n as f64 * PI)
            };
            sinc * w[i]
        })
        .collect();

    let scale = gain / taps.iter().sum::<f64>();
    for tap in taps.iter_mut() {
        *tap *= scale;
    }
    taps.into_iter().map(|t| t as Sample).collect()
}

/// Design band-pass taps with the given gain at the band center.
pub fn band_pass(
    gain: f64,
    sample_rate: f64,
    low_cutoff: f64,
    high_cutoff: f64,
    transition: f64,
    window: Window,
) -> Vec<Sample> {
    use std::f64::consts::PI;
    assert!(sample_rate > 0.0, "sample rate must be positive");
    assert!(transition > 0.0, "transition width must be positive");
    assert!(
        low_cutoff >= 0.0 && low_cutoff < high_cutoff,
        "band edges must be ordered"
    );
    assert!(
        high_cutoff + transition <= sample_rate / 2.0,
        "upper edge and transition must fit below the Nyquist frequency"
    );

    let ntaps = num_taps(sample_rate, transition, window);
    let w = window.generate(ntaps);
    let middle = (ntaps / 2) as isize;
    let f0 = 2.0 * PI * low_cutoff / sample_rate;
    let f1 = 2.0 * PI * high_cutoff / sample_rate;

    let mut taps: Vec<f64> = (0..ntaps)
        .map(|i| {
            let n = i as isize - middle;
            let band = if n == 0 {
                (f1 - f0) / PI
            } else {
                ((n as f64 * f1).sin() - (n as f64 * f0).sin()) / (n as f64 * PI)
            };
            band * w[i]
        })
        .collect();

    // Normalize at the center of the passband.
    let center = (f0 + f1) / 2.0;
    let response: f64 = taps
        .iter()
        .enumerate()
        .map(|(i, t)| t * ((i as isize - middle) as f64 * center).cos())
        .sum();
    let scale = gain / response;
    for tap in taps.iter_mut() {
        *tap *= scale;
    }
    taps.into_iter().map(|t| t as Sample).collect()
}
