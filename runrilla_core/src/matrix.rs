//! Dense matrices sized for the calibration solve.
//!
//! `Matrix` wraps a `nalgebra::DMatrix` and exposes only what the solve
//! needs: row-wise assembly, subtraction, matrix-vector product, norms and
//! the Moore-Penrose pseudoinverse through nalgebra's SVD.

use std::ops::{Index, IndexMut};

use nalgebra::{DMatrix, DVector};

/// Upper bound on SVD iterations before declaring non-convergence.
const MAX_SVD_ITERATIONS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Vector(pub Vec<f64>);

impl Vector {
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn filled(len: usize, value: f64) -> Self {
        Self(vec![value; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f64 {
        DVector::from_column_slice(&self.0).norm()
    }

    /// Elementwise difference; `None` on length mismatch.
    #[allow(clippy::should_implement_trait)]
    pub fn sub(&self, other: &Self) -> Option<Self> {
        if self.len() != other.len() {
            return None;
        }
        Some(Self(
            self.0.iter().zip(&other.0).map(|(a, b)| a - b).collect(),
        ))
    }
}

impl From<Vec<f64>> for Vector {
    fn from(v: Vec<f64>) -> Self {
        Self(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix(DMatrix<f64>);

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self(DMatrix::zeros(rows, cols))
    }

    /// Build from row slices; `None` when rows are ragged.
    pub fn from_rows(rows: &[Vec<f64>]) -> Option<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        Some(Self(DMatrix::from_row_slice(rows.len(), cols, &rows.concat())))
    }

    pub fn rows(&self) -> usize {
        self.0.nrows()
    }

    pub fn cols(&self) -> usize {
        self.0.ncols()
    }

    pub fn row(&self, r: usize) -> Vec<f64> {
        self.0.row(r).iter().copied().collect()
    }

    /// Overwrite row `r`; `false` if out of range or the length is wrong.
    pub fn set_row(&mut self, r: usize, values: &[f64]) -> bool {
        if r >= self.rows() || values.len() != self.cols() {
            return false;
        }
        for (c, v) in values.iter().enumerate() {
            self.0[(r, c)] = *v;
        }
        true
    }

    /// Elementwise difference; `None` on shape mismatch.
    #[allow(clippy::should_implement_trait)]
    pub fn sub(&self, other: &Self) -> Option<Self> {
        if self.0.shape() != other.0.shape() {
            return None;
        }
        Some(Self(&self.0 - &other.0))
    }

    /// Matrix-vector product; `None` on shape mismatch.
    pub fn mul_vector(&self, v: &Vector) -> Option<Vector> {
        if v.len() != self.cols() {
            return None;
        }
        let out = &self.0 * DVector::from_column_slice(&v.0);
        Some(Vector(out.iter().copied().collect()))
    }

    pub fn frobenius_norm(&self) -> f64 {
        self.0.norm()
    }

    /// Moore-Penrose pseudoinverse (`cols x rows`).
    ///
    /// Returns `None` for empty, all-zero or non-finite input, when the SVD
    /// does not converge, or when the result is not finite. Singular values
    /// below `max(rows, cols) * sigma_max * eps` are treated as zero.
    pub fn pseudo_inverse(&self) -> Option<Self> {
        let (m, n) = self.0.shape();
        if m == 0 || n == 0 || self.0.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let svd = self
            .0
            .clone()
            .try_svd(true, true, f64::EPSILON, MAX_SVD_ITERATIONS)?;
        let sigma_max = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
        if sigma_max == 0.0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let tol = (m.max(n) as f64) * sigma_max * f64::EPSILON;
        let pinv = svd.pseudo_inverse(tol).ok()?;
        if pinv.iter().any(|x| !x.is_finite()) {
            return None;
        }
        Some(Self(pinv))
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, rc: (usize, usize)) -> &f64 {
        &self.0[rc]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, rc: (usize, usize)) -> &mut f64 {
        &mut self.0[rc]
    }
}

/// Big-endian IEEE-754 bits of `v` as 8 uppercase hex digits.
pub fn ieee754_hex(v: f32) -> String {
    format!("{:08X}", v.to_bits())
}

/// Inverse of [`ieee754_hex`].
pub fn from_ieee754_hex(s: &str) -> Option<f32> {
    let s = s.trim();
    if s.len() != 8 {
        return None;
    }
    u32::from_str_radix(s, 16).ok().map(f32::from_bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: &Matrix, b: &Matrix, tol: f64) -> bool {
        a.rows() == b.rows()
            && a.cols() == b.cols()
            && a.0.iter().zip(b.0.iter()).all(|(x, y)| (x - y).abs() <= tol)
    }

    fn mul(a: &Matrix, b: &Matrix) -> Matrix {
        Matrix(&a.0 * &b.0)
    }

    #[test]
    fn square_inverse() {
        let a = Matrix::from_rows(&[vec![4.0, 7.0], vec![2.0, 6.0]]).unwrap();
        let p = a.pseudo_inverse().unwrap();
        let expected = Matrix::from_rows(&[vec![0.6, -0.7], vec![-0.2, 0.4]]).unwrap();
        assert!(approx(&p, &expected, 1e-12), "{p:?}");
    }

    #[test]
    fn tall_full_rank_is_left_inverse() {
        let a = Matrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.0, 2.0],
            vec![1.0, 1.0],
        ])
        .unwrap();
        let p = a.pseudo_inverse().unwrap();
        assert_eq!((p.rows(), p.cols()), (2, 3));
        assert!(approx(&mul(&p, &a), &Matrix(DMatrix::identity(2, 2)), 1e-12));
    }

    #[test]
    fn wide_matrix_is_right_inverse() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        let p = a.pseudo_inverse().unwrap();
        assert_eq!((p.rows(), p.cols()), (3, 1));
        // a * pinv(a) = 1 for a full-row-rank single row.
        assert!((mul(&a, &p)[(0, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rank_deficient_satisfies_penrose() {
        let a = Matrix::from_rows(&[
            vec![1.0, 2.0],
            vec![2.0, 4.0],
            vec![3.0, 6.0],
        ])
        .unwrap();
        let p = a.pseudo_inverse().unwrap();
        assert!(approx(&mul(&mul(&a, &p), &a), &a, 1e-9));
        assert!(approx(&mul(&mul(&p, &a), &p), &p, 1e-9));
    }

    #[test]
    fn degenerate_inputs_fail() {
        assert!(Matrix::zeros(3, 2).pseudo_inverse().is_none());
        assert!(Matrix::zeros(0, 0).pseudo_inverse().is_none());
        let nan = Matrix::from_rows(&[vec![1.0, f64::NAN]]).unwrap();
        assert!(nan.pseudo_inverse().is_none());
    }

    #[test]
    fn shape_checks() {
        let a = Matrix::zeros(2, 3);
        assert!(a.sub(&Matrix::zeros(3, 2)).is_none());
        assert!(a.mul_vector(&Vector::zeros(2)).is_none());
        assert!(Matrix::from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_none());
        let mut b = Matrix::zeros(2, 2);
        assert!(!b.set_row(2, &[1.0, 2.0]));
        assert!(b.set_row(1, &[1.0, 2.0]));
        assert_eq!(b.row(1), vec![1.0, 2.0]);
    }

    #[test]
    fn shelf_sized_system_recovers_factors() {
        // 3 bars x 4 channels: 24 placements over 12 unknowns.
        let factors: Vec<f64> = (0..12).map(|i| 0.04 + 0.001 * f64::from(i)).collect();
        let rows: Vec<Vec<f64>> = (0..24)
            .map(|r| {
                (0..12)
                    .map(|c| {
                        let first = r % 12;
                        let share = if r < 12 {
                            if c == first { 1.0 } else { 0.0 }
                        } else if c == first || c == (first + 1) % 12 {
                            0.5
                        } else {
                            0.0
                        };
                        500.0 * share / factors[c]
                    })
                    .collect()
            })
            .collect();
        let a = Matrix::from_rows(&rows).unwrap();
        let solved = a
            .pseudo_inverse()
            .unwrap()
            .mul_vector(&Vector::filled(24, 500.0))
            .unwrap();
        for (got, want) in solved.0.iter().zip(&factors) {
            assert!((got - want).abs() / want < 1e-9, "{got} vs {want}");
        }
    }

    #[test]
    fn norms() {
        assert!((Vector(vec![3.0, 4.0]).norm() - 5.0).abs() < 1e-15);
        let m = Matrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 4.0]]).unwrap();
        assert!((m.frobenius_norm() - 5.0).abs() < 1e-15);
    }

    #[test]
    fn ieee_known_values() {
        assert_eq!(ieee754_hex(1.0), "3F800000");
        assert_eq!(ieee754_hex(0.05), "3D4CCCCD");
        assert_eq!(ieee754_hex(-2.5), "C0200000");
        assert_eq!(from_ieee754_hex("3f800000"), Some(1.0));
        assert_eq!(from_ieee754_hex("3F8000"), None);
        assert_eq!(from_ieee754_hex("XYZ00000"), None);
    }

    proptest! {
        #[test]
        fn ieee_hex_round_trips(bits in any::<u32>()) {
            let v = f32::from_bits(bits);
            let hex = ieee754_hex(v);
            prop_assert_eq!(hex.len(), 8);
            let back = from_ieee754_hex(&hex).unwrap();
            prop_assert_eq!(back.to_bits(), bits);
        }
    }
}
