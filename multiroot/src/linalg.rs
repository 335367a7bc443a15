use std::ops::{Deref, DerefMut};

use faer::{ColRef, Mat, linalg::solvers::FullPivLu, prelude::Solve};

use crate::SolverError;

/// A dense vector of `f64`, sized once per solve.
/// Dereferences to a slice for element access and iteration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vector(Vec<f64>);

impl Vector {
    /// A vector of `n` zeros.
    pub fn zeros(n: usize) -> Self {
        Self(vec![0.0; n])
    }

    /// Copy a slice into a new vector.
    pub fn from_slice(values: &[f64]) -> Self {
        Self(values.to_vec())
    }

    /// Borrow the components.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Give back the underlying storage.
    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    /// Euclidean norm.
    #[inline]
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Squared Euclidean norm.
    #[inline]
    pub fn norm_squared(&self) -> f64 {
        self.dot(self)
    }

    /// Largest absolute component, or 0 for an empty vector.
    #[inline]
    pub fn norm_inf(&self) -> f64 {
        self.iter().map(|v| v.abs()).fold(0.0, libm::fmax)
    }

    /// Sum of absolute components.
    #[inline]
    pub fn norm_l1(&self) -> f64 {
        self.iter().map(|v| v.abs()).sum()
    }

    /// Euclidean norm of `diag * self`, componentwise.
    #[inline]
    pub fn scaled_norm(&self, diag: &[f64]) -> f64 {
        debug_assert_eq!(self.len(), diag.len());
        self.iter()
            .zip(diag)
            .map(|(v, d)| (v * d).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Dot product with another slice of the same length.
    #[inline]
    pub fn dot(&self, rhs: &[f64]) -> f64 {
        debug_assert_eq!(self.len(), rhs.len());
        self.iter().zip(rhs).map(|(a, b)| a * b).sum()
    }

    /// `self += alpha * rhs`.
    #[inline]
    pub fn axpy(&mut self, alpha: f64, rhs: &[f64]) {
        debug_assert_eq!(self.len(), rhs.len());
        self.iter_mut().zip(rhs).for_each(|(a, b)| *a += alpha * b);
    }

    /// Multiply every component by `alpha`.
    #[inline]
    pub fn scale(&mut self, alpha: f64) {
        self.iter_mut().for_each(|v| *v *= alpha);
    }

    /// Overwrite with the contents of an equally sized slice.
    #[inline]
    pub fn copy_from(&mut self, rhs: &[f64]) {
        self.0.copy_from_slice(rhs);
    }

    /// Are all components finite?
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }
}

impl Deref for Vector {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Vector {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<f64>> for Vector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl From<&[f64]> for Vector {
    fn from(values: &[f64]) -> Self {
        Self::from_slice(values)
    }
}

impl<const N: usize> From<[f64; N]> for Vector {
    fn from(values: [f64; N]) -> Self {
        Self(values.to_vec())
    }
}

/// A square dense matrix, used for the Jacobian approximation.
#[derive(Clone, Debug)]
pub struct Matrix {
    inner: Mat<f64>,
}

impl Matrix {
    /// An `n` by `n` matrix of zeros.
    pub fn zeros(n: usize) -> Self {
        Self {
            inner: Mat::zeros(n, n),
        }
    }

    /// Build a square matrix from row-major nested arrays.
    pub fn from_rows<const N: usize>(rows: [[f64; N]; N]) -> Self {
        Self {
            inner: Mat::from_fn(N, N, |i, j| rows[i][j]),
        }
    }

    /// Number of rows (and columns).
    #[inline]
    pub fn dim(&self) -> usize {
        self.inner.nrows()
    }

    /// Borrow the faer matrix.
    pub fn as_faer(&self) -> &Mat<f64> {
        &self.inner
    }

    /// Overwrite column `j`.
    pub fn set_column(&mut self, j: usize, values: &[f64]) {
        debug_assert_eq!(values.len(), self.dim());
        for (i, &v) in values.iter().enumerate() {
            self.inner[(i, j)] = v;
        }
    }

    /// `out = self * v`.
    pub fn mul_vec(&self, v: &[f64], out: &mut [f64]) {
        let n = self.dim();
        debug_assert_eq!(v.len(), n);
        debug_assert_eq!(out.len(), n);
        let product = self.inner.as_ref() * ColRef::from_slice(v);
        out.iter_mut()
            .zip(product.iter())
            .for_each(|(dst, src)| *dst = *src);
    }

    /// `out = self^T * v`.
    pub fn tr_mul_vec(&self, v: &[f64], out: &mut [f64]) {
        let n = self.dim();
        debug_assert_eq!(v.len(), n);
        debug_assert_eq!(out.len(), n);
        let product = self.inner.transpose() * ColRef::from_slice(v);
        out.iter_mut()
            .zip(product.iter())
            .for_each(|(dst, src)| *dst = *src);
    }

    /// Euclidean norm of each column.
    pub fn column_norms(&self) -> Vector {
        let n = self.dim();
        (0..n)
            .map(|j| {
                (0..n)
                    .map(|i| self.inner[(i, j)].powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .collect::<Vec<_>>()
            .into()
    }

    /// `self += alpha * u v^T`.
    pub fn rank_one_update(&mut self, alpha: f64, u: &[f64], v: &[f64]) {
        let n = self.dim();
        debug_assert_eq!(u.len(), n);
        debug_assert_eq!(v.len(), n);
        for j in 0..n {
            let scaled = alpha * v[j];
            for (i, u_i) in u.iter().enumerate() {
                self.inner[(i, j)] += u_i * scaled;
            }
        }
    }

    /// Are all entries finite?
    pub fn is_finite(&self) -> bool {
        let n = self.dim();
        (0..n).all(|j| (0..n).all(|i| self.inner[(i, j)].is_finite()))
    }
}

impl std::ops::Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, idx: (usize, usize)) -> &Self::Output {
        &self.inner[idx]
    }
}

impl std::ops::IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, idx: (usize, usize)) -> &mut Self::Output {
        &mut self.inner[idx]
    }
}

/// Dense LU with full pivoting, refusing matrices that are singular to
/// working precision.
pub(crate) struct DenseLu {
    lu: Option<FullPivLu<f64>>,
    /// Smallest acceptable `sigma_min / sigma_max`.
    rcond_min: f64,
}

impl std::fmt::Debug for DenseLu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseLu")
            .field("factored", &self.lu.is_some())
            .field("rcond_min", &self.rcond_min)
            .finish()
    }
}

impl DenseLu {
    pub fn new(rcond_min: f64) -> Self {
        Self {
            lu: None,
            rcond_min,
        }
    }

    /// Reciprocal condition number `sigma_min / sigma_max` from an SVD.
    /// Zero for the zero matrix.
    pub fn reciprocal_condition(a: &Matrix) -> Result<f64, SolverError> {
        let svd = a.inner.svd().map_err(SolverError::Decomposition)?;
        let sigma = svd.S().column_vector();
        let largest = sigma.iter().copied().fold(0.0, libm::fmax);
        let smallest = sigma.iter().copied().fold(f64::INFINITY, libm::fmin);
        if largest > 0.0 {
            Ok(smallest / largest)
        } else {
            Ok(0.0)
        }
    }

    /// Factor `a`. Fails with [`SolverError::JacobianSingular`] when `a` is
    /// singular, ill-conditioned, or has non-finite entries; the previous
    /// factorization is discarded either way.
    pub fn factor(&mut self, a: &Matrix) -> Result<(), SolverError> {
        self.lu = None;
        if !a.is_finite() {
            return Err(SolverError::JacobianSingular);
        }
        let rcond = Self::reciprocal_condition(a)?;
        if rcond.is_nan() || rcond <= self.rcond_min {
            log::debug!("Jacobian rejected, reciprocal condition = {rcond:e}");
            return Err(SolverError::JacobianSingular);
        }
        self.lu = Some(a.inner.full_piv_lu());
        Ok(())
    }

    /// Overwrite `rhs` with the solution of `A x = rhs`.
    pub fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), SolverError> {
        let lu = self.lu.as_ref().ok_or(SolverError::JacobianSingular)?;

        // faer solves out of place.
        let b = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
        let solution = lu.solve(b.as_ref());
        for (i, dst) in rhs.iter_mut().enumerate() {
            *dst = solution[(i, 0)];
        }
        if rhs.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(SolverError::JacobianSingular)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn assert_all_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-15, "expected {expected:?}, got {actual:?}");
        }
    }

    #[test]
    fn vector_norms() {
        let v = Vector::from([3.0, -4.0]);
        assert!((v.norm() - 5.0).abs() < 1e-15);
        assert!((v.norm_inf() - 4.0).abs() < 1e-15);
        assert!((v.norm_l1() - 7.0).abs() < 1e-15);
        assert!((v.scaled_norm(&[2.0, 0.5]) - 40.0_f64.sqrt()).abs() < 1e-15);
        assert!(Vector::zeros(0).norm_inf().abs() < f64::MIN_POSITIVE);
    }

    #[test]
    fn axpy_and_scale() {
        let mut v = Vector::from([1.0, 2.0]);
        v.axpy(2.0, &[1.0, -1.0]);
        assert_all_close(&v, &[3.0, 0.0]);
        v.scale(-0.5);
        assert_all_close(&v, &[-1.5, 0.0]);
    }

    #[test]
    fn products_and_rank_one() {
        let mut a = Matrix::from_rows([[1.0, 2.0], [3.0, 4.0]]);
        let mut out = [0.0; 2];
        a.mul_vec(&[1.0, 1.0], &mut out);
        assert_all_close(&out, &[3.0, 7.0]);
        a.tr_mul_vec(&[1.0, 1.0], &mut out);
        assert_all_close(&out, &[4.0, 6.0]);

        a.rank_one_update(0.5, &[2.0, 0.0], &[1.0, 1.0]);
        assert_all_close(&[a[(0, 0)], a[(0, 1)], a[(1, 0)]], &[2.0, 3.0, 3.0]);

        let norms = a.column_norms();
        assert!((norms[0] - 13.0_f64.sqrt()).abs() < 1e-15);
    }

    #[test]
    fn lu_solves_well_conditioned_system() {
        let a = Matrix::from_rows([[4.0, 1.0], [2.0, 3.0]]);
        let mut lu = DenseLu::new(1e-12);
        lu.factor(&a).unwrap();
        let mut rhs = [1.0, 2.0];
        lu.solve_in_place(&mut rhs).unwrap();
        // 4x + y = 1, 2x + 3y = 2
        assert!((rhs[0] - 0.1).abs() < 1e-14);
        assert!((rhs[1] - 0.6).abs() < 1e-14);
    }

    #[test]
    fn lu_refuses_singular_matrices() {
        let mut lu = DenseLu::new(1e-12);
        let rank_one = Matrix::from_rows([[1.0, -1.0], [1.0, -1.0]]);
        assert!(matches!(
            lu.factor(&rank_one),
            Err(SolverError::JacobianSingular)
        ));
        assert!(matches!(
            lu.factor(&Matrix::zeros(3)),
            Err(SolverError::JacobianSingular)
        ));
        let mut nan = Matrix::from_rows([[1.0, 0.0], [0.0, 1.0]]);
        nan[(1, 1)] = f64::NAN;
        assert!(matches!(lu.factor(&nan), Err(SolverError::JacobianSingular)));
        // Nothing left over from a failed factorization.
        let mut rhs = [1.0, 1.0];
        assert!(lu.solve_in_place(&mut rhs).is_err());
    }
}
