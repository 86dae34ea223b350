use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_engine::{RunResult, SpeciesNumbers};
use tracing::warn;

/// Batch-means estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TofConfig {
    /// Number of contiguous batches each replica's time series is split into.
    #[serde(default = "default_nbatch")]
    pub nbatch: usize,
    /// Two-sided confidence level of the half-width.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Leading batches discarded as equilibration.
    #[serde(default = "default_ignore_nbatch")]
    pub ignore_nbatch: usize,
    /// Normalisation of rates per active site.
    #[serde(default = "default_active_sites")]
    pub active_sites: f64,
}

fn default_nbatch() -> usize {
    20
}

fn default_confidence() -> f64 {
    0.96
}

fn default_ignore_nbatch() -> usize {
    1
}

fn default_active_sites() -> f64 {
    1.0
}

impl Default for TofConfig {
    fn default() -> Self {
        Self {
            nbatch: default_nbatch(),
            confidence: default_confidence(),
            ignore_nbatch: default_ignore_nbatch(),
            active_sites: default_active_sites(),
        }
    }
}

impl TofConfig {
    /// Rejects configurations that cannot produce an estimate.
    pub fn validate(&self) -> Result<(), KinError> {
        let invalid = |field: &str, value: String| {
            ErrorInfo::new("tof-config", "invalid estimator setting")
                .with_context("field", field)
                .with_context("value", value)
        };
        let problem = if self.nbatch == 0 {
            Some(invalid("nbatch", self.nbatch.to_string()))
        } else if !(self.confidence > 0.0 && self.confidence < 1.0) {
            Some(invalid("confidence", self.confidence.to_string()))
        } else if self.ignore_nbatch >= self.nbatch {
            Some(
                invalid("ignore_nbatch", self.ignore_nbatch.to_string())
                    .with_hint("ignore_nbatch must be smaller than nbatch"),
            )
        } else if !(self.active_sites.is_finite() && self.active_sites > 0.0) {
            Some(invalid("active_sites", self.active_sites.to_string()))
        } else {
            None
        };
        match problem {
            Some(info) => Err(KinError::Config(info)),
            None => Ok(()),
        }
    }
}

/// Turnover frequency of one gas species with its confidence interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TofEstimate {
    /// Mean of the pooled batch rates.
    pub mean: f64,
    /// Confidence half-width; infinite when data is insufficient.
    #[serde(with = "non_finite_as_null")]
    pub half_width: f64,
    /// Confidence level the half-width refers to.
    pub confidence: f64,
    /// Number of pooled batches behind the estimate.
    pub n_batches_used: usize,
    /// Fewer than two batches were available.
    pub insufficient_data: bool,
    /// At least one replica of the group failed.
    pub degraded: bool,
}

impl TofEstimate {
    /// Half-width relative to the magnitude of the mean.
    pub fn relative_half_width(&self) -> f64 {
        if self.mean == 0.0 {
            f64::INFINITY
        } else {
            self.half_width / self.mean.abs()
        }
    }
}

/// JSON has no infinity; store it as `null` and read `null` back as infinity.
mod non_finite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Rates of the batches of one replica's series that survive equilibration
/// removal.
///
/// The `n` samples are cut at `b * (n - 1) / nbatch` into contiguous batches
/// of (near) equal sample count. Batches spanning zero simulated time are
/// skipped.
pub fn batch_rates(numbers: &SpeciesNumbers, species: &str, config: &TofConfig) -> Vec<f64> {
    let Some(counts) = numbers.column(species) else {
        return Vec::new();
    };
    let samples = counts.len().min(numbers.time.len());
    if samples < 2 || config.nbatch == 0 {
        return Vec::new();
    }
    let intervals = samples - 1;
    let cut = |b: usize| b * intervals / config.nbatch;
    (config.ignore_nbatch..config.nbatch)
        .filter_map(|b| {
            let (start, end) = (cut(b), cut(b + 1));
            if end <= start {
                return None;
            }
            let dt = numbers.time[end] - numbers.time[start];
            if dt <= 0.0 {
                return None;
            }
            Some((counts[end] - counts[start]) / dt / config.active_sites)
        })
        .collect()
}

/// Pools batch rates of every successful replica and estimates the mean
/// rate of `species`.
pub fn estimate_tof(
    results: &[&RunResult],
    species: &str,
    config: &TofConfig,
    degraded: bool,
) -> TofEstimate {
    let pooled: Vec<f64> = results
        .iter()
        .flat_map(|result| batch_rates(&result.species_numbers, species, config))
        .collect();
    let n = pooled.len();
    let mean = if n == 0 {
        0.0
    } else {
        pooled.iter().sum::<f64>() / n as f64
    };
    if n < 2 {
        warn!(
            species,
            batches = n,
            replicas = results.len(),
            "insufficient batches for a confidence interval"
        );
        return TofEstimate {
            mean,
            half_width: f64::INFINITY,
            confidence: config.confidence,
            n_batches_used: n,
            insufficient_data: true,
            degraded,
        };
    }
    let variance = pooled.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let critical = student_t_quantile(0.5 * (1.0 + config.confidence), n - 1);
    TofEstimate {
        mean,
        half_width: critical * (variance / n as f64).sqrt(),
        confidence: config.confidence,
        n_batches_used: n,
        insufficient_data: false,
        degraded,
    }
}

/// Lower-tail quantile of the standard normal distribution.
///
/// Rational approximation with relative error below 1.2e-9 on (0, 1).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

/// Degrees of freedom up to which the t quantile is solved exactly.
const EXACT_T_DF: usize = 200;

/// Lower-tail quantile of Student's t distribution with `df` degrees of
/// freedom.
///
/// Closed forms for one and two degrees of freedom. Up to 200 the quantile
/// is solved by bisection on the exact integer-df distribution function;
/// beyond that a fourth-order Cornish-Fisher expansion agrees to better
/// than 1e-9.
pub fn student_t_quantile(p: f64, df: usize) -> f64 {
    match df {
        0 => f64::NAN,
        1 => (std::f64::consts::PI * (p - 0.5)).tan(),
        2 => (2.0 * p - 1.0) / (2.0 * p * (1.0 - p)).sqrt(),
        df if df > EXACT_T_DF => cornish_fisher_t(p, df as f64),
        df => {
            if p <= 0.0 {
                return f64::NEG_INFINITY;
            }
            if p >= 1.0 {
                return f64::INFINITY;
            }
            let target = (2.0 * p - 1.0).abs();
            let (mut lo, mut hi) = (0.0, std::f64::consts::FRAC_PI_2);
            for _ in 0..100 {
                let mid = 0.5 * (lo + hi);
                if t_central_mass(mid, df) < target {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            let t = (df as f64).sqrt() * (0.5 * (lo + hi)).tan();
            if p < 0.5 {
                -t
            } else {
                t
            }
        }
    }
}

/// `P(|T| < sqrt(df) tan(theta))` for integer `df`, as a finite series in
/// `cos(theta)`.
fn t_central_mass(theta: f64, df: usize) -> f64 {
    let (sin, cos) = theta.sin_cos();
    let cos2 = cos * cos;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1usize;
    if df % 2 == 1 {
        if df == 1 {
            return theta / std::f64::consts::FRAC_PI_2;
        }
        while 2 * k + 1 < df {
            term *= (2 * k) as f64 / (2 * k + 1) as f64 * cos2;
            sum += term;
            k += 1;
        }
        (theta + sin * cos * sum) / std::f64::consts::FRAC_PI_2
    } else {
        while 2 * k < df {
            term *= (2 * k - 1) as f64 / (2 * k) as f64 * cos2;
            sum += term;
            k += 1;
        }
        sin * sum
    }
}

fn cornish_fisher_t(p: f64, nu: f64) -> f64 {
    let z = normal_quantile(p);
    let z2 = z * z;
    let g1 = (z2 + 1.0) * z / 4.0;
    let g2 = ((5.0 * z2 + 16.0) * z2 + 3.0) * z / 96.0;
    let g3 = (((3.0 * z2 + 19.0) * z2 + 17.0) * z2 - 15.0) * z / 384.0;
    let g4 = ((((79.0 * z2 + 776.0) * z2 + 1482.0) * z2 - 1920.0) * z2 - 945.0) * z / 92160.0;
    z + g1 / nu + g2 / nu.powi(2) + g3 / nu.powi(3) + g4 / nu.powi(4)
}
