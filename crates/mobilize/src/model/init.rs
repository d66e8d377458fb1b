//! # Weight Initializers
//!
//! Keras-default initializers for the layers of [`MobileModel`](super::MobileModel).

use rand::Rng;
use rand_distr::StandardNormal;

use crate::model::matrix::Matrix;

/// Half-width of the uniform embedding initializer.
pub const EMBEDDING_INIT_LIMIT: f32 = 0.05;

/// Fill a matrix from `uniform(-limit, limit)`.
pub fn uniform<R: Rng>(
    rng: &mut R,
    rows: usize,
    cols: usize,
    limit: f32,
) -> Matrix {
    let mut m = Matrix::zeros(rows, cols);
    for v in m.as_mut_slice() {
        *v = rng.random_range(-limit..limit);
    }
    m
}

/// Glorot (Xavier) uniform initialization for a `[fan_in, fan_out]` kernel.
pub fn glorot_uniform<R: Rng>(
    rng: &mut R,
    fan_in: usize,
    fan_out: usize,
) -> Matrix {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt() as f32;
    uniform(rng, fan_in, fan_out, limit)
}

/// Orthogonal initialization.
///
/// When `rows <= cols` the rows are orthonormal; otherwise the columns are.
/// Draws a standard-normal matrix and orthonormalizes it with modified
/// Gram-Schmidt, which yields the sign-corrected `Q` of a QR decomposition.
pub fn orthogonal<R: Rng>(
    rng: &mut R,
    rows: usize,
    cols: usize,
) -> Matrix {
    let (count, dim) = if rows <= cols {
        (rows, cols)
    } else {
        (cols, rows)
    };

    let mut basis = Matrix::zeros(count, dim);
    for v in basis.as_mut_slice() {
        *v = rng.sample::<f32, _>(StandardNormal);
    }

    for i in 0..count {
        for j in 0..i {
            let (head, tail) = basis.as_mut_slice().split_at_mut(i * dim);
            let prev = &head[j * dim..(j + 1) * dim];
            let cur = &mut tail[..dim];
            let dot: f64 = prev
                .iter()
                .zip(cur.iter())
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum();
            for (c, &p) in cur.iter_mut().zip(prev) {
                *c -= (dot as f32) * p;
            }
        }

        let row = basis.row_mut(i);
        let norm = row.iter().map(|&v| v as f64 * v as f64).sum::<f64>().sqrt();
        if norm > f64::EPSILON {
            for v in row.iter_mut() {
                *v = (*v as f64 / norm) as f32;
            }
        }
    }

    if rows <= cols {
        basis
    } else {
        basis.transpose()
    }
}

/// LSTM bias of `[4 * units]` zeros with the forget-gate slice set to one.
pub fn unit_forget_bias(units: usize) -> Vec<f32> {
    let mut bias = vec![0.0; 4 * units];
    bias[units..2 * units].fill(1.0);
    bias
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn dot(
        a: &[f32],
        b: &[f32],
    ) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_glorot_limits() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = glorot_uniform(&mut rng, 10, 40);
        let limit = (6.0f32 / 50.0).sqrt() + 1e-6;
        assert_eq!(m.shape(), [10, 40]);
        assert!(m.as_slice().iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn test_orthogonal_rows() {
        let mut rng = StdRng::seed_from_u64(11);
        let m = orthogonal(&mut rng, 6, 24);
        assert_eq!(m.shape(), [6, 24]);

        for i in 0..6 {
            for j in 0..6 {
                let expected = if i == j { 1.0 } else { 0.0 };
                let got = dot(m.row(i), m.row(j));
                assert!(
                    (got - expected).abs() < 1e-4,
                    "row {i} . row {j} = {got}"
                );
            }
        }
    }

    #[test]
    fn test_orthogonal_tall() {
        let mut rng = StdRng::seed_from_u64(3);
        let m = orthogonal(&mut rng, 12, 4);
        assert_eq!(m.shape(), [12, 4]);

        let t = m.transpose();
        for i in 0..4 {
            assert!((dot(t.row(i), t.row(i)) - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_unit_forget_bias() {
        let bias = unit_forget_bias(3);
        assert_eq!(
            bias,
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
    }
}
