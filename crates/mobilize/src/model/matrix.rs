//! # Dense Row-Major Matrix

use crate::errors::{MZResult, MobilizeError};

/// A dense, row-major `f32` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Create a zero-filled matrix.
    pub fn zeros(
        rows: usize,
        cols: usize,
    ) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap a row-major buffer.
    ///
    /// ## Arguments
    /// * `rows` - the number of rows.
    /// * `cols` - the number of columns.
    /// * `data` - `rows * cols` values, row-major.
    pub fn from_vec(
        rows: usize,
        cols: usize,
        data: Vec<f32>,
    ) -> MZResult<Self> {
        if data.len() != rows * cols {
            return Err(MobilizeError::ShapeMismatch(format!(
                "expected {rows}x{cols} = {} values, got {}",
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The `[rows, cols]` shape.
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// The row-major values.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The mutable row-major values.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Borrow a row.
    pub fn row(
        &self,
        index: usize,
    ) -> &[f32] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }

    /// Mutably borrow a row.
    pub fn row_mut(
        &mut self,
        index: usize,
    ) -> &mut [f32] {
        &mut self.data[index * self.cols..(index + 1) * self.cols]
    }

    /// Get a single value.
    pub fn get(
        &self,
        row: usize,
        col: usize,
    ) -> f32 {
        self.data[row * self.cols + col]
    }

    /// The transposed matrix.
    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out.data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        out
    }

    /// Copy out the columns `[start, start + len)`.
    pub fn column_block(
        &self,
        start: usize,
        len: usize,
    ) -> Matrix {
        let mut out = Matrix::zeros(self.rows, len);
        for r in 0..self.rows {
            out.row_mut(r)
                .copy_from_slice(&self.row(r)[start..start + len]);
        }
        out
    }

    /// Accumulate the row vector `x * self` into `out`.
    ///
    /// `x` has `rows` entries; `out` has `cols` entries.
    pub fn accumulate_vec_mul(
        &self,
        x: &[f32],
        out: &mut [f32],
    ) {
        debug_assert_eq!(x.len(), self.rows);
        debug_assert_eq!(out.len(), self.cols);
        for (r, &xv) in x.iter().enumerate() {
            if xv == 0.0 {
                continue;
            }
            for (o, &w) in out.iter_mut().zip(self.row(r)) {
                *o += xv * w;
            }
        }
    }
}
