// Multi-resolution spectral loss
//
// For each analysis window size n (hop = n·(1 − overlap)):
//   S = |STFT(x)| with Hann-windowed frames, magnitude sqrt(re² + im² + ε)
//   L_n = lin_w · mean|S_x − S_y| + log_w · mean|ln(S_x + ε) − ln(S_y + ε)|
// and the total is Σ_n L_n. The STFT is a projection on precomputed DFT
// cosine/sine bases so the whole loss is differentiable on any backend.
// Identical inputs give exactly zero.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::analysis::features::hann_window;
use crate::config::LossConfig;
use crate::error::{InferenceError, Stage};
use crate::InferenceBackend;

const MAGNITUDE_EPS: f32 = 1e-7;

/// Windowed DFT basis for one window size
#[derive(Debug, Clone)]
struct SpectralScale {
    fft_size: usize,
    hop: usize,
    /// [n, n/2 + 1], Hann window folded in
    cos_basis: Vec<f32>,
    sin_basis: Vec<f32>,
}

impl SpectralScale {
    fn new(fft_size: usize, overlap: f32) -> Self {
        let bins = fft_size / 2 + 1;
        let window = hann_window(fft_size);
        let mut cos_basis = Vec::with_capacity(fft_size * bins);
        let mut sin_basis = Vec::with_capacity(fft_size * bins);

        for (i, w) in window.iter().enumerate() {
            for k in 0..bins {
                let angle = 2.0 * std::f64::consts::PI * (i * k % fft_size) as f64 / fft_size as f64;
                cos_basis.push(w * angle.cos() as f32);
                sin_basis.push(-w * angle.sin() as f32);
            }
        }

        let hop = ((fft_size as f32 * (1.0 - overlap)).round() as usize).max(1);
        Self {
            fft_size,
            hop,
            cos_basis,
            sin_basis,
        }
    }

    fn bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    fn frame_count(&self, num_samples: usize) -> usize {
        1 + (num_samples - self.fft_size) / self.hop
    }

    /// Magnitude spectrogram of a signal at least `fft_size` long, [F, bins]
    fn magnitudes<B: Backend>(&self, signal: Tensor<B, 1>) -> Tensor<B, 2> {
        let device = signal.device();
        let [num_samples] = signal.dims();
        let frames = self.frame_count(num_samples);
        let n = self.fft_size;

        let index: Vec<i64> = (0..frames)
            .flat_map(|f| (0..n).map(move |i| (f * self.hop + i) as i64))
            .collect();
        let index = Tensor::<B, 1, Int>::from_data(TensorData::new(index, [frames * n]), &device);
        let framed = signal.select(0, index).reshape([frames, n]);

        let basis = |values: &[f32]| {
            Tensor::<B, 2>::from_data(TensorData::new(values.to_vec(), [n, self.bins()]), &device)
        };
        let real = framed.clone().matmul(basis(&self.cos_basis));
        let imag = framed.matmul(basis(&self.sin_basis));

        (real.clone() * real + imag.clone() * imag)
            .add_scalar(MAGNITUDE_EPS)
            .sqrt()
    }
}

/// Loss values of one comparison
#[derive(Debug, Clone, PartialEq)]
pub struct LossReport {
    pub total: f32,
    /// (window size, loss) per analysis resolution
    pub per_scale: Vec<(usize, f32)>,
}

/// Multi-resolution STFT magnitude loss
#[derive(Debug, Clone)]
pub struct MultiResolutionStftLoss {
    scales: Vec<SpectralScale>,
    linear_weight: f32,
    log_weight: f32,
}

impl MultiResolutionStftLoss {
    pub fn new(config: &LossConfig) -> Self {
        Self {
            scales: config
                .fft_sizes
                .iter()
                .map(|&n| SpectralScale::new(n, config.overlap))
                .collect(),
            linear_weight: config.linear_weight,
            log_weight: config.log_weight,
        }
    }

    pub fn fft_sizes(&self) -> Vec<usize> {
        self.scales.iter().map(|s| s.fft_size).collect()
    }

    fn min_length(&self) -> usize {
        self.scales.iter().map(|s| s.fft_size).max().unwrap_or(0)
    }

    /// Truncate both signals to the shorter one, then zero-pad to the
    /// largest window
    fn align<B: Backend>(&self, x: Tensor<B, 1>, y: Tensor<B, 1>) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let len = x.dims()[0].min(y.dims()[0]);
        let x = x.narrow(0, 0, len);
        let y = y.narrow(0, 0, len);

        let target = self.min_length();
        if len >= target {
            return (x, y);
        }
        let device = x.device();
        let pad = || Tensor::<B, 1>::zeros([target - len], &device);
        if len == 0 {
            return (pad(), pad());
        }
        (Tensor::cat(vec![x, pad()], 0), Tensor::cat(vec![y, pad()], 0))
    }

    /// Loss at every resolution, each a [1] tensor
    pub fn scale_losses<B: Backend>(&self, x: Tensor<B, 1>, y: Tensor<B, 1>) -> Vec<Tensor<B, 1>> {
        let (x, y) = self.align(x, y);
        self.scales
            .iter()
            .map(|scale| {
                let sx = scale.magnitudes(x.clone());
                let sy = scale.magnitudes(y.clone());
                let linear = (sx.clone() - sy.clone()).abs().mean();
                let log = (sx.add_scalar(MAGNITUDE_EPS).log() - sy.add_scalar(MAGNITUDE_EPS).log())
                    .abs()
                    .mean();
                linear.mul_scalar(self.linear_weight) + log.mul_scalar(self.log_weight)
            })
            .collect()
    }

    /// Differentiable total loss, [1]
    ///
    /// # Arguments
    /// * `reconstruction` - Synthesized audio, [N]
    /// * `target` - Reference audio, [M]
    pub fn forward<B: Backend>(&self, reconstruction: Tensor<B, 1>, target: Tensor<B, 1>) -> Tensor<B, 1> {
        let device = reconstruction.device();
        self.scale_losses(reconstruction, target)
            .into_iter()
            .fold(Tensor::<B, 1>::zeros([1], &device), |acc, l| acc + l)
    }

    /// Evaluation metric on plain samples
    ///
    /// # Errors
    /// `NumericDivergence` (stage `loss`) if any value is not finite
    pub fn evaluate(&self, reconstruction: &[f32], target: &[f32]) -> Result<LossReport, InferenceError> {
        let device = Default::default();
        let tensor = |samples: &[f32]| {
            Tensor::<InferenceBackend, 1>::from_data(
                TensorData::new(samples.to_vec(), [samples.len()]),
                &device,
            )
        };

        let mut per_scale = Vec::with_capacity(self.scales.len());
        for (scale, loss) in self
            .scales
            .iter()
            .zip(self.scale_losses(tensor(reconstruction), tensor(target)))
        {
            let value = loss
                .into_data()
                .to_vec::<f32>()
                .map_err(|err| InferenceError::diverged(Stage::Loss, format!("{:?}", err)))?
                .first()
                .copied()
                .unwrap_or(f32::NAN);
            if !value.is_finite() {
                return Err(InferenceError::diverged(
                    Stage::Loss,
                    format!("loss at window {} is {}", scale.fft_size, value),
                ));
            }
            per_scale.push((scale.fft_size, value));
        }

        Ok(LossReport {
            total: per_scale.iter().map(|(_, v)| v).sum(),
            per_scale,
        })
    }
}
