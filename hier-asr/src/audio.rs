//! Audio loading and filterbank feature extraction.

use crate::error::{DatasetError, Result};
use hound::{SampleFormat, WavReader, WavSpec};
use ndarray::{Array2, Axis, concatenate};
use std::f32::consts::PI;
use std::path::Path;

/// Expected sample rate of evaluation audio (16kHz)
pub const SAMPLE_RATE: u32 = 16000;

/// Half-width of the delta regression window.
const DELTA_WINDOW: usize = 2;

/// Feature extraction settings taken from the model config.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureConfig {
    /// Number of log-mel bins
    pub input_freq: usize,
    pub use_delta: bool,
    pub use_double_delta: bool,
}

impl FeatureConfig {
    /// Feature dimension after delta stacking.
    pub fn dim(&self) -> usize {
        let mut streams = 1;
        if self.use_delta {
            streams += 1;
        }
        if self.use_double_delta {
            streams += 1;
        }
        self.input_freq * streams
    }

    /// Extract normalized features of shape (frames, dim) from 16kHz mono samples.
    pub fn extract(&self, audio: &[f32]) -> Result<Array2<f32>> {
        let mel = MelSpectrogram::with_bins(self.input_freq);

        if audio.len() < mel.win_length {
            return Err(DatasetError::AudioTooShort {
                samples: audio.len(),
                min: mel.win_length,
            }
            .into());
        }

        let static_features = mel.apply(audio);

        let mut streams = vec![static_features.clone()];
        if self.use_delta || self.use_double_delta {
            let delta = deltas(&static_features, DELTA_WINDOW);
            if self.use_double_delta {
                streams.push(delta.clone());
                streams.push(deltas(&delta, DELTA_WINDOW));
            } else {
                streams.push(delta);
            }
        }

        // double delta without delta keeps only static + acceleration
        if self.use_double_delta && !self.use_delta {
            streams.remove(1);
        }

        let views: Vec<_> = streams.iter().map(|s| s.view()).collect();
        let mut features = concatenate(Axis(1), &views)?;
        normalize_columns(&mut features);

        Ok(features)
    }
}

/// Mel-spectrogram analysis parameters.
#[derive(Clone, Debug)]
pub struct MelSpectrogram {
    pub n_mels: usize,
    pub hop_length: usize,
    pub n_fft: usize,
    pub preemphasis: f32,
    pub sample_rate: usize,
    pub win_length: usize,
}

impl MelSpectrogram {
    /// 25ms window, 10ms hop at 16kHz.
    pub fn with_bins(n_mels: usize) -> Self {
        Self {
            n_mels,
            hop_length: 160,
            n_fft: 512,
            preemphasis: 0.97,
            sample_rate: SAMPLE_RATE as usize,
            win_length: 400,
        }
    }

    /// Log-mel energies of shape (frames, n_mels).
    pub fn apply(&self, audio: &[f32]) -> Array2<f32> {
        let audio = apply_preemphasis(audio, self.preemphasis);
        let spectrogram = stft(&audio, self.n_fft, self.hop_length, self.win_length);
        let filterbank = create_mel_filterbank(self.n_fft, self.n_mels, self.sample_rate);

        filterbank
            .dot(&spectrogram)
            .mapv(|x| x.max(1e-10).ln())
            .t()
            .to_owned()
    }
}

/// Load audio from a WAV file.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, WavSpec)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<hound::Result<_>>()?,
        SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / i16::MAX as f32))
            .collect::<hound::Result<_>>()?,
    };

    Ok((samples, spec))
}

/// Load audio from a WAV file as mono f32 samples at 16kHz.
///
/// Stereo input is averaged down to mono.
pub fn read_audio_mono(path: impl AsRef<Path>) -> Result<Vec<f32>> {
    let (mut audio, spec) = load_audio(path)?;

    if spec.sample_rate != SAMPLE_RATE {
        return Err(DatasetError::InvalidSampleRate {
            expected: SAMPLE_RATE,
            got: spec.sample_rate,
        }
        .into());
    }

    if spec.channels == 0 || spec.channels > 2 {
        return Err(DatasetError::InvalidChannels(spec.channels).into());
    }

    if spec.channels == 2 {
        audio = audio
            .chunks(2)
            .map(|chunk| chunk.iter().sum::<f32>() / 2.0)
            .collect();
    }

    Ok(audio)
}

/// `y[i] = x[i] - coef * x[i-1]`
fn apply_preemphasis(audio: &[f32], coef: f32) -> Vec<f32> {
    let mut result = Vec::with_capacity(audio.len());
    result.push(audio[0]);

    for i in 1..audio.len() {
        result.push(audio[i] - coef * audio[i - 1]);
    }

    result
}

fn hann_window(window_length: usize) -> Vec<f32> {
    (0..window_length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / (window_length as f32 - 1.0)).cos())
        .collect()
}

/// Power spectrogram of shape (freq_bins, frames).
fn stft(audio: &[f32], n_fft: usize, hop_length: usize, win_length: usize) -> Array2<f32> {
    use rustfft::{FftPlanner, num_complex::Complex};

    let window = hann_window(win_length);
    let num_frames = (audio.len() - win_length) / hop_length + 1;
    let freq_bins = n_fft / 2 + 1;
    let mut spectrogram = Array2::<f32>::zeros((freq_bins, num_frames));

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    for frame_idx in 0..num_frames {
        let start = frame_idx * hop_length;

        let mut frame: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n_fft];
        for i in 0..win_length.min(audio.len() - start) {
            frame[i] = Complex::new(audio[start + i] * window[i], 0.0);
        }

        fft.process(&mut frame);

        for k in 0..freq_bins {
            spectrogram[[k, frame_idx]] = frame[k].norm_sqr();
        }
    }

    spectrogram
}

fn hz_to_mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

fn create_mel_filterbank(n_fft: usize, n_mels: usize, sample_rate: usize) -> Array2<f32> {
    let freq_bins = n_fft / 2 + 1;
    let mut filterbank = Array2::<f32>::zeros((n_mels, freq_bins));

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(sample_rate as f32 / 2.0);

    let mel_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let freq_bin_width = sample_rate as f32 / n_fft as f32;

    for mel_idx in 0..n_mels {
        let left = mel_points[mel_idx];
        let center = mel_points[mel_idx + 1];
        let right = mel_points[mel_idx + 2];

        for freq_idx in 0..freq_bins {
            let freq = freq_idx as f32 * freq_bin_width;

            if freq >= left && freq <= center {
                filterbank[[mel_idx, freq_idx]] = (freq - left) / (center - left);
            } else if freq > center && freq <= right {
                filterbank[[mel_idx, freq_idx]] = (right - freq) / (right - center);
            }
        }
    }

    filterbank
}

/// Regression deltas over time with edge frames replicated.
///
/// `d[t] = sum_n n * (c[t+n] - c[t-n]) / (2 * sum_n n^2)` for `n` in `1..=window`.
fn deltas(features: &Array2<f32>, window: usize) -> Array2<f32> {
    let num_frames = features.nrows();
    let denominator = 2.0 * (1..=window).map(|n| (n * n) as f32).sum::<f32>();
    let mut out = Array2::<f32>::zeros(features.raw_dim());

    for t in 0..num_frames {
        let mut row = out.row_mut(t);
        for n in 1..=window {
            let ahead = features.row((t + n).min(num_frames - 1));
            let behind = features.row(t.saturating_sub(n));
            row.scaled_add(n as f32, &(&ahead - &behind));
        }
        row.mapv_inplace(|x| x / denominator);
    }

    out
}

/// Normalize each feature dimension to mean 0, std 1.
fn normalize_columns(features: &mut Array2<f32>) {
    let num_frames = features.nrows() as f32;

    for mut column in features.columns_mut() {
        let mean = column.sum() / num_frames;
        let variance = column.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / num_frames;
        let std = variance.sqrt().max(1e-10);
        column.mapv_inplace(|x| (x - mean) / std);
    }
}
