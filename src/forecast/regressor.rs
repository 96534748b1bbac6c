/// The trainable forecasting capability.
///
/// The pipeline's correctness properties are independent of the learning
/// algorithm: anything that can fit feature rows to labels and infer a
/// value for a new row plugs in behind [`Forecaster`]. The reference
/// backend is ridge-regularized linear least squares solved directly on
/// the normal equations — small feature dimension, no iteration, trains in
/// microseconds on days of history.

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// A supervised model usable by the model manager.
///
/// Implementations must be `Send + Sync`: a fitted model is shared behind
/// an `Arc` and `infer` runs concurrently from forecast readers.
pub trait Forecaster: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fits the model to feature rows and labels of equal length.
    fn fit(&mut self, features: &[Vec<f64>], labels: &[f64]) -> Result<(), String>;

    /// Predicts a label for one feature row. Must be cheap and lock-free.
    fn infer(&self, features: &[f64]) -> f64;
}

// ---------------------------------------------------------------------------
// Ridge regression backend
// ---------------------------------------------------------------------------

/// Linear least squares with an L2 penalty on the non-intercept weights.
///
/// `weights[0]` is the intercept; `weights[1..]` align with feature columns.
#[derive(Debug, Clone)]
pub struct RidgeRegressor {
    lambda: f64,
    weights: Vec<f64>,
}

impl RidgeRegressor {
    pub fn new(lambda: f64) -> Self {
        RidgeRegressor {
            lambda,
            weights: Vec::new(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.weights.is_empty()
    }
}

impl Default for RidgeRegressor {
    fn default() -> Self {
        RidgeRegressor::new(1.0)
    }
}

impl Forecaster for RidgeRegressor {
    fn name(&self) -> &'static str {
        "ridge"
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[f64]) -> Result<(), String> {
        if features.is_empty() {
            return Err("no training rows".to_string());
        }
        if features.len() != labels.len() {
            return Err(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            ));
        }

        let dim = features[0].len() + 1; // augmented with the intercept column
        let mut gram = vec![vec![0.0; dim]; dim];
        let mut moment = vec![0.0; dim];

        for (row, &label) in features.iter().zip(labels) {
            if row.len() + 1 != dim {
                return Err("ragged feature row".to_string());
            }
            let x = |j: usize| if j == 0 { 1.0 } else { row[j - 1] };
            for j in 0..dim {
                moment[j] += x(j) * label;
                for k in j..dim {
                    gram[j][k] += x(j) * x(k);
                }
            }
        }
        for j in 0..dim {
            for k in 0..j {
                gram[j][k] = gram[k][j];
            }
        }
        // The intercept is not penalized.
        for j in 1..dim {
            gram[j][j] += self.lambda;
        }

        self.weights = solve(gram, moment).ok_or("singular normal equations")?;
        Ok(())
    }

    fn infer(&self, features: &[f64]) -> f64 {
        if self.weights.is_empty() {
            return 0.0;
        }
        let mut value = self.weights[0];
        for (weight, x) in self.weights[1..].iter().zip(features) {
            value += weight * x;
        }
        value
    }
}

/// Gaussian elimination with partial pivoting. Returns `None` when the
/// system is singular to working precision.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

// ---------------------------------------------------------------------------
// Validation metric
// ---------------------------------------------------------------------------

/// Coefficient of determination on held-out rows: 1.0 is a perfect fit,
/// 0.0 is no better than predicting the mean, negative is worse than that.
pub fn r_squared(model: &dyn Forecaster, features: &[Vec<f64>], labels: &[f64]) -> f64 {
    if labels.is_empty() || features.len() != labels.len() {
        return 0.0;
    }
    let mean = labels.iter().sum::<f64>() / labels.len() as f64;
    let mut ss_residual = 0.0;
    let mut ss_total = 0.0;
    for (row, &label) in features.iter().zip(labels) {
        ss_residual += (label - model.infer(row)).powi(2);
        ss_total += (label - mean).powi(2);
    }
    if ss_total < f64::EPSILON {
        // Constant labels: perfect only if the model also predicts them.
        if ss_residual < f64::EPSILON {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_residual / ss_total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
