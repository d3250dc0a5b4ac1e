// Wavetable combination in the table domain
//
// For frame t:
//   M_t[i] = Σ_k attn_{t,k} · played_{t,k}[i]
//   E_t[i] = Σ_h a_{t,h} · M_t[(h·i) mod L]       (h = 1..H)
// Reading a table at h times the phase plays its h-th harmonic
// transposition, so E_t is one single-cycle shape carrying the harmonic
// mix. Harmonics at or above Nyquist are masked and the mix renormalized.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

const RENORM_EPS: f32 = 1e-8;

/// Index table for harmonic resampling: entry h·L + i = ((h+1)·i) mod L
pub fn harmonic_indices(n_harmonic: usize, table_size: usize) -> Vec<i64> {
    (0..n_harmonic)
        .flat_map(|h| (0..table_size).map(move |i| (((h + 1) * i) % table_size) as i64))
        .collect()
}

/// 1.0 for harmonics below Nyquist at each frame's pitch, else 0.0
///
/// Unvoiced frames keep every harmonic; they are silenced by the voicing
/// gate instead.
pub fn nyquist_mask(f0_hz: &[f32], n_harmonic: usize, sample_rate: u32) -> Vec<f32> {
    let nyquist = sample_rate as f32 / 2.0;
    f0_hz
        .iter()
        .flat_map(|&f0| {
            (1..=n_harmonic).map(move |h| {
                if f0 > 0.0 && h as f32 * f0 >= nyquist {
                    0.0
                } else {
                    1.0
                }
            })
        })
        .collect()
}

/// Attention-weighted mix of the tables, [T, K, L] × [T, K] → [T, L]
pub fn mix_tables<B: Backend>(tables: Tensor<B, 3>, attention: Tensor<B, 2>) -> Tensor<B, 2> {
    let [frames, n_tables, table_size] = tables.dims();
    let weights = attention.reshape([frames, n_tables, 1]);
    (tables * weights).sum_dim(1).reshape([frames, table_size])
}

/// Apply the harmonic mix to mixed tables, [T, L] × [T, H] → [T, L]
///
/// # Arguments
/// * `mixed` - Attention-mixed tables
/// * `harmonics` - Harmonic weights (already masked and renormalized)
pub fn apply_harmonics<B: Backend>(mixed: Tensor<B, 2>, harmonics: Tensor<B, 2>) -> Tensor<B, 2> {
    let [frames, table_size] = mixed.dims();
    let n_harmonic = harmonics.dims()[1];
    let device = mixed.device();

    let indices = Tensor::<B, 1, Int>::from_data(
        TensorData::new(
            harmonic_indices(n_harmonic, table_size),
            [n_harmonic * table_size],
        ),
        &device,
    );
    let resampled = mixed
        .select(1, indices)
        .reshape([frames, n_harmonic, table_size]);
    let weights = harmonics.reshape([frames, n_harmonic, 1]);
    (resampled * weights).sum_dim(1).reshape([frames, table_size])
}

/// Zero harmonics above Nyquist and renormalize each row to sum to 1
pub fn mask_harmonics<B: Backend>(
    harmonics: Tensor<B, 2>,
    f0_hz: &[f32],
    sample_rate: u32,
) -> Tensor<B, 2> {
    let [frames, n_harmonic] = harmonics.dims();
    let mask = Tensor::<B, 2>::from_data(
        TensorData::new(
            nyquist_mask(f0_hz, n_harmonic, sample_rate),
            [frames, n_harmonic],
        ),
        &harmonics.device(),
    );
    let masked = harmonics * mask;
    let total = masked.clone().sum_dim(1).add_scalar(RENORM_EPS);
    masked / total
}

/// Combined single-cycle shape per frame, [T, L]
pub fn combined_shapes<B: Backend>(
    tables: Tensor<B, 3>,
    attention: Tensor<B, 2>,
    harmonics: Tensor<B, 2>,
) -> Tensor<B, 2> {
    apply_harmonics(mix_tables(tables, attention), harmonics)
}
