// 📐 Statistical helpers for the trend analyzer
// Special functions (log-gamma, incomplete beta/gamma), the normal, Student t
// and chi-square distributions, least squares, and residual tests.

use std::f64::consts::PI;

const MAX_ITERATIONS: usize = 300;
const EPSILON: f64 = 3.0e-14;
const FPMIN: f64 = 1.0e-300;

// ============================================================================
// SPECIAL FUNCTIONS
// ============================================================================

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEF: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// ln Γ(x) for x > 0 (Lanczos approximation)
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let mut a = LANCZOS_COEF[0];
    for (i, coef) in LANCZOS_COEF.iter().enumerate().skip(1) {
        a += coef / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized incomplete beta I_x(a, b)
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = clamp_tiny(1.0 - qab * x / qap).recip();
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = clamp_tiny(1.0 + aa * d).recip();
        c = clamp_tiny(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = clamp_tiny(1.0 + aa * d).recip();
        c = clamp_tiny(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

/// Regularized lower incomplete gamma P(a, x)
pub fn regularized_gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x < a + 1.0 {
        gamma_series(a, x)
    } else {
        1.0 - gamma_continued_fraction(a, x)
    }
}

fn gamma_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut delta = 1.0 / a;
    let mut sum = delta;

    for _ in 0..MAX_ITERATIONS {
        ap += 1.0;
        delta *= x / ap;
        sum += delta;
        if delta.abs() < sum.abs() * EPSILON {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// Upper tail Q(a, x) by continued fraction
fn gamma_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / FPMIN;
    let mut d = 1.0 / b;
    let mut h = d;

    for i in 1..=MAX_ITERATIONS {
        let i = i as f64;
        let an = -i * (i - a);
        b += 2.0;
        d = clamp_tiny(an * d + b).recip();
        c = clamp_tiny(b + an / c);
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

fn clamp_tiny(v: f64) -> f64 {
    if v.abs() < FPMIN {
        FPMIN
    } else {
        v
    }
}

// ============================================================================
// DISTRIBUTIONS
// ============================================================================

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let half_erf = 0.5 * regularized_gamma_p(0.5, x * x / 2.0);
    if x >= 0.0 {
        0.5 + half_erf
    } else {
        0.5 - half_erf
    }
}

/// Upper tail 1 - Φ(x), accurate for large x
pub fn normal_sf(x: f64) -> f64 {
    if x >= 0.0 {
        0.5 * (1.0 - regularized_gamma_p(0.5, x * x / 2.0))
    } else {
        1.0 - normal_sf(-x)
    }
}

/// Standard normal quantile (Acklam's rational approximation + one Halley step)
pub fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    let x = if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    };

    // Halley refinement
    let e = normal_cdf(x) - p;
    let u = e * (2.0 * PI).sqrt() * (x * x / 2.0).exp();
    x - u / (1.0 + x * u / 2.0)
}

/// Two-tailed p-value for a t statistic with `df` degrees of freedom
pub fn student_t_two_tailed_p(t: f64, df: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t * t))
}

/// Student t CDF
pub fn student_t_cdf(t: f64, df: f64) -> f64 {
    let half_tail = 0.5 * student_t_two_tailed_p(t, df);
    if t >= 0.0 {
        1.0 - half_tail
    } else {
        half_tail
    }
}

/// Student t quantile by bracketing + bisection on the CDF
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let mut lo = -1.0;
    let mut hi = 1.0;
    while student_t_cdf(lo, df) > p {
        lo *= 2.0;
    }
    while student_t_cdf(hi, df) < p {
        hi *= 2.0;
    }

    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if student_t_cdf(mid, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if (hi - lo).abs() < 1e-12 * (1.0 + mid.abs()) {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Upper tail of the chi-square distribution
pub fn chi_square_sf(x: f64, df: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    if x / 2.0 < df / 2.0 + 1.0 {
        1.0 - regularized_gamma_p(df / 2.0, x / 2.0)
    } else {
        gamma_continued_fraction(df / 2.0, x / 2.0)
    }
}

// ============================================================================
// LEAST SQUARES
// ============================================================================

/// Simple linear fit y = intercept + slope * x
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub x_mean: f64,
    pub y_mean: f64,
    /// Σ(x - x̄)²
    pub sxx: f64,
    /// Σ(y - ȳ)²
    pub sst: f64,
    /// Σ residual²
    pub sse: f64,
    pub residuals: Vec<f64>,
    pub fitted: Vec<f64>,
}

impl LinearFit {
    pub fn r_squared(&self) -> Option<f64> {
        if self.sst > 0.0 {
            Some((1.0 - self.sse / self.sst).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}

/// Ordinary least squares on centered x. None when x has no spread or
/// lengths differ.
pub fn least_squares(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }

    let x_mean = mean(x);
    let y_mean = mean(y);

    let sxx: f64 = x.iter().map(|xi| (xi - x_mean).powi(2)).sum();
    if sxx <= 0.0 {
        return None;
    }
    let sxy: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
        .sum();
    let sst: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let fitted: Vec<f64> = x.iter().map(|xi| y_mean + slope * (xi - x_mean)).collect();
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(yi, fi)| yi - fi).collect();
    let sse = residuals.iter().map(|e| e * e).sum();

    Some(LinearFit {
        slope,
        intercept,
        x_mean,
        y_mean,
        sxx,
        sst,
        sse,
        residuals,
        fitted,
    })
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Pearson correlation; None when either side has no variance
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        sxy += (xi - mx) * (yi - my);
        sxx += (xi - mx).powi(2);
        syy += (yi - my).powi(2);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

// ============================================================================
// RESIDUAL TESTS
// ============================================================================

/// Durbin-Watson statistic; None when the residuals carry no variance
pub fn durbin_watson(residuals: &[f64]) -> Option<f64> {
    let sse: f64 = residuals.iter().map(|e| e * e).sum();
    if residuals.len() < 2 || sse <= 0.0 {
        return None;
    }
    let diff: f64 = residuals.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    Some(diff / sse)
}

/// Breusch-Pagan (Koenker form): n·R² of e² regressed on x, χ² with 1 df.
/// Returns (LM statistic, p-value).
pub fn breusch_pagan(x: &[f64], residuals: &[f64]) -> Option<(f64, f64)> {
    let squared: Vec<f64> = residuals.iter().map(|e| e * e).collect();
    let aux = least_squares(x, &squared)?;
    let r2 = aux.r_squared()?;
    let lm = residuals.len() as f64 * r2;
    Some((lm, chi_square_sf(lm, 1.0)))
}

/// Shapiro-Wilk W and p-value (Royston 1995, algorithm AS R94).
/// Defined for 3 <= n <= 5000; None outside that range or for constant data.
pub fn shapiro_wilk(data: &[f64]) -> Option<(f64, f64)> {
    let n = data.len();
    if !(3..=5000).contains(&n) {
        return None;
    }

    let mut x = data.to_vec();
    x.sort_by(|a, b| a.total_cmp(b));
    if x[n - 1] - x[0] <= 0.0 {
        return None;
    }

    let an = n as f64;
    let half = n / 2;
    let mut a = vec![0.0; half];

    if n == 3 {
        a[0] = 0.5_f64.sqrt();
    } else {
        const C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.071190, 4.434685, -2.706056];
        const C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];

        let m: Vec<f64> = (1..=half)
            .map(|i| normal_quantile((i as f64 - 0.375) / (an + 0.25)))
            .collect();
        let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
        let ssumm2 = summ2.sqrt();
        let rsn = 1.0 / an.sqrt();
        let a1 = poly(&C1, rsn) - m[0] / ssumm2;

        let (first_free, fac) = if n > 5 {
            let a2 = -m[1] / ssumm2 + poly(&C2, rsn);
            let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
                / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
                .sqrt();
            a[1] = a2;
            (2, fac)
        } else {
            let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a1 * a1)).sqrt();
            (1, fac)
        };
        a[0] = a1;
        for i in first_free..half {
            a[i] = -m[i] / fac;
        }
    }

    let x_mean = mean(&x);
    let ssq: f64 = x.iter().map(|v| (v - x_mean).powi(2)).sum();
    let numerator: f64 = (0..half).map(|i| a[i] * (x[n - 1 - i] - x[i])).sum();
    let w = (numerator * numerator / ssq).min(1.0);

    Some((w, shapiro_wilk_p(w, n)))
}

fn shapiro_wilk_p(w: f64, n: usize) -> f64 {
    if n == 3 {
        const PI6: f64 = 6.0 / PI;
        let stqr = (0.75_f64).sqrt().asin();
        return (PI6 * (w.sqrt().asin() - stqr)).clamp(0.0, 1.0);
    }

    if w >= 1.0 {
        return 1.0;
    }

    const G: [f64; 2] = [-2.273, 0.459];
    const C3: [f64; 4] = [0.5440, -0.39978, 0.025054, -6.714e-4];
    const C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
    const C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
    const C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];

    let an = n as f64;
    let mut w1 = (1.0 - w).ln();

    let (m, s) = if n <= 11 {
        let gamma = poly(&G, an);
        if w1 >= gamma {
            return 1e-99;
        }
        w1 = -(gamma - w1).ln();
        (poly(&C3, an), poly(&C4, an).exp())
    } else {
        let xx = an.ln();
        (poly(&C5, xx), poly(&C6, xx).exp())
    };

    normal_sf((w1 - m) / s)
}

/// c[0] + c[1]·x + c[2]·x² + ...
fn poly(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} ± {}, got {}",
            expected,
            tolerance,
            actual
        );
    }

    #[test]
    fn test_ln_gamma_known_values() {
        assert_close(ln_gamma(1.0), 0.0, 1e-12);
        assert_close(ln_gamma(5.0), 24.0_f64.ln(), 1e-12);
        assert_close(ln_gamma(0.5), PI.sqrt().ln(), 1e-12);
    }

    #[test]
    fn test_normal_cdf_and_quantile() {
        assert_close(normal_cdf(0.0), 0.5, 1e-12);
        assert_close(normal_cdf(1.959964), 0.975, 1e-6);
        assert_close(normal_cdf(-1.0), 0.158655, 1e-6);
        assert_close(normal_quantile(0.975), 1.959964, 1e-6);
        assert_close(normal_quantile(0.01), -2.326348, 1e-6);
        assert_close(normal_sf(3.0), 0.001349898, 1e-8);
    }

    #[test]
    fn test_student_t_known_values() {
        assert_close(student_t_quantile(0.975, 1.0), 12.7062, 1e-3);
        assert_close(student_t_quantile(0.975, 10.0), 2.2281, 1e-3);
        assert_close(student_t_two_tailed_p(2.228139, 10.0), 0.05, 1e-5);
        assert_close(student_t_cdf(0.0, 4.0), 0.5, 1e-12);
        assert_eq!(student_t_two_tailed_p(f64::INFINITY, 3.0), 0.0);
    }

    #[test]
    fn test_chi_square_sf() {
        assert_close(chi_square_sf(3.841459, 1.0), 0.05, 1e-5);
        assert_close(chi_square_sf(0.0, 1.0), 1.0, 1e-12);
        assert_close(chi_square_sf(5.991465, 2.0), 0.05, 1e-5);
    }

    #[test]
    fn test_least_squares_exact_line() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        let fit = least_squares(&x, &y).unwrap();

        assert_close(fit.slope, 2.0, 1e-12);
        assert_close(fit.intercept, 1.0, 1e-12);
        assert_close(fit.r_squared().unwrap(), 1.0, 1e-12);
        assert!(fit.sse < 1e-20);
    }

    #[test]
    fn test_least_squares_rejects_constant_x() {
        assert!(least_squares(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_durbin_watson() {
        // Alternating residuals: strong negative autocorrelation
        let dw = durbin_watson(&[1.0, -1.0, 1.0, -1.0]).unwrap();
        assert_close(dw, 3.0, 1e-12);
        assert!(durbin_watson(&[0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_pearson_correlation() {
        let r = pearson_correlation(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap();
        assert_close(r, 1.0, 1e-12);
        assert!(pearson_correlation(&[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]).is_none());
    }

    #[test]
    fn test_shapiro_wilk_three_points() {
        let (w, p) = shapiro_wilk(&[1.0, 2.0, 3.0]).unwrap();
        assert_close(w, 1.0, 1e-12);
        assert_close(p, 1.0, 1e-9);

        let (w, p) = shapiro_wilk(&[1.0, 2.0, 10.0]).unwrap();
        assert_close(w, 0.8322, 1e-3);
        assert_close(p, 0.194, 2e-3);
    }

    #[test]
    fn test_shapiro_wilk_normal_scores_pass() {
        let data: Vec<f64> = (1..=20)
            .map(|i| normal_quantile((i as f64 - 0.375) / 20.25))
            .collect();
        let (w, p) = shapiro_wilk(&data).unwrap();
        assert!(w > 0.97, "w = {}", w);
        assert!(p > 0.5, "p = {}", p);
    }

    #[test]
    fn test_shapiro_wilk_skewed_fails() {
        let data = [1.0, 1.1, 0.9, 1.0, 1.05, 0.95, 1.0, 1.02, 0.98, 50.0];
        let (w, p) = shapiro_wilk(&data).unwrap();
        assert!(w < 0.6, "w = {}", w);
        assert!(p < 0.01, "p = {}", p);
    }

    #[test]
    fn test_shapiro_wilk_domain() {
        assert!(shapiro_wilk(&[1.0, 2.0]).is_none());
        assert!(shapiro_wilk(&[4.0, 4.0, 4.0, 4.0]).is_none());
    }

    #[test]
    fn test_breusch_pagan_detects_growing_spread() {
        let x: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let residuals: Vec<f64> = x
            .iter()
            .map(|xi| if (*xi as i64) % 2 == 0 { 0.1 * (xi + 1.0) } else { -0.1 * (xi + 1.0) })
            .collect();
        let (lm, p) = breusch_pagan(&x, &residuals).unwrap();
        assert!(lm > 0.0);
        assert!(p < 0.05, "p = {}", p);
    }
}
