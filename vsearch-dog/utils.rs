//! Helpers for circular orientation histograms

/// Smooth a circular histogram with the [1 4 6 4 1] / 16 kernel
pub fn smooth_circular_histogram<const N: usize>(hist: &[f32; N]) -> [f32; N] {
    let mut out = [0.0f32; N];
    for i in 0..N {
        let at = |offset: isize| hist[(i as isize + offset).rem_euclid(N as isize) as usize];
        out[i] = (at(-2) + at(2)) * (1.0 / 16.0) + (at(-1) + at(1)) * (4.0 / 16.0) + at(0) * (6.0 / 16.0);
    }
    out
}

/// Offset in (-0.5, 0.5) of the vertex of the parabola through three
/// equally spaced samples, relative to the centre sample
pub fn parabolic_peak_offset(left: f32, centre: f32, right: f32) -> f32 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Indices of local maxima of a circular histogram reaching `min_value`.
/// Plateaus report their last bin.
pub fn circular_peaks<const N: usize>(hist: &[f32; N], min_value: f32) -> Vec<usize> {
    (0..N)
        .filter(|&i| {
            let left = hist[(i + N - 1) % N];
            let right = hist[(i + 1) % N];
            let centre = hist[i];
            centre >= min_value && centre >= left && centre > right
        })
        .collect()
}
