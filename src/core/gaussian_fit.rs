//! 高斯峰拟合引擎
//!
//! 模型：`A·exp(-(x-μ)²/(2σ²))`。先用 `peak_search` 粗定位主峰并估计σ初值，
//! 在 μ₀ ± k·σ₀ 区域内用 Levenberg–Marquardt 做有界迭代的非线性最小二乘。
//!
//! 拟合从不返回错误：空分布、退化分布、不收敛、超出时间预算都记为 `FAILED`，
//! 峰位留空并附带原因。收敛但残差或峰宽超出质量带的结果记为 `LOW_QUALITY`。
//!
//! 全过程无随机性，同一输入总是得到逐位相同的结果。

use super::peak_search::{self, CoarseSearch, PeakLocator};
use crate::input::{Bin, ChannelDistribution};
use crate::model::{FitQuality, FitResult, FitSource};
use crate::tools::constants::{fit, quality, reference_peak};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::{Duration, Instant};

/// 拟合参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// 拟合区域半宽（σ₀的倍数）
    pub window_sigmas: f64,
    pub coarse_search: CoarseSearch,
    /// 单次拟合的时间预算（毫秒）
    pub time_budget_ms: Option<u64>,
    /// 信号区拟合失败时改用噪声区重试
    pub retry_with_noise: bool,
    /// 参考通道只拟合第 `reference_peak_rank` 个显著峰
    pub isolate_reference_peak: bool,
    pub reference_peak_rank: usize,
    pub reference_min_prominence: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: fit::MAX_ITERATIONS,
            tolerance: fit::TOLERANCE,
            window_sigmas: fit::WINDOW_SIGMAS,
            coarse_search: CoarseSearch::default(),
            time_budget_ms: None,
            retry_with_noise: false,
            isolate_reference_peak: false,
            reference_peak_rank: reference_peak::PEAK_RANK,
            reference_min_prominence: reference_peak::MIN_PROMINENCE,
        }
    }
}

/// 拟合质量带
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityPolicy {
    pub max_normalized_rmse: f64,
    pub min_width: f64,
    pub max_relative_width: f64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            max_normalized_rmse: quality::MAX_NORMALIZED_RMSE,
            min_width: quality::MIN_WIDTH,
            max_relative_width: quality::MAX_RELATIVE_WIDTH,
        }
    }
}

impl QualityPolicy {
    /// 超出质量带时返回原因
    pub fn assess(&self, normalized_rmse: f64, width: f64, span: f64) -> Option<String> {
        if normalized_rmse > self.max_normalized_rmse {
            Some(format!(
                "残差超出质量带 / normalized RMSE {normalized_rmse:.4} > {}",
                self.max_normalized_rmse
            ))
        } else if width < self.min_width {
            Some(format!(
                "峰过窄 / peak width {width:.4} < {}",
                self.min_width
            ))
        } else if span > 0.0 && width / span > self.max_relative_width {
            Some(format!(
                "峰过宽 / peak width {width:.4} exceeds {} of data span {span}",
                self.max_relative_width
            ))
        } else {
            None
        }
    }
}

/// 通道估计：拟合结果 + 计数加权均值
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEstimate {
    pub fit: FitResult,
    pub weighted_mean: Option<f64>,
    pub total_counts: f64,
}

/// 高斯拟合器
#[derive(Debug, Clone, Default)]
pub struct GaussianFitter {
    config: FitConfig,
    quality: QualityPolicy,
}

struct Converged {
    params: Vector3<f64>,
    sse: f64,
    iterations: usize,
}

impl GaussianFitter {
    pub fn new(config: FitConfig, quality: QualityPolicy) -> Self {
        Self { config, quality }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// 估计一个通道：参考峰隔离、信号区拟合、可选的噪声区重试
    pub fn estimate(&self, distribution: &ChannelDistribution) -> ChannelEstimate {
        let signal: Cow<'_, [Bin]> = if distribution.is_reference && self.config.isolate_reference_peak
        {
            match peak_search::isolate_peak(
                &distribution.signal,
                self.config.reference_peak_rank,
                self.config.reference_min_prominence,
            ) {
                Some(isolated) => Cow::Owned(isolated),
                None => {
                    tracing::warn!(
                        channel = %distribution.key,
                        rank = self.config.reference_peak_rank,
                        "参考峰隔离失败 / reference peak isolation failed"
                    );
                    return ChannelEstimate {
                        fit: FitResult::failed(
                            format!(
                                "reference peak isolation failed: fewer than {} prominent peaks",
                                self.config.reference_peak_rank
                            ),
                            0,
                        ),
                        weighted_mean: peak_search::weighted_mean(&distribution.signal),
                        total_counts: total_counts(&distribution.signal),
                    };
                }
            }
        } else {
            Cow::Borrowed(distribution.signal.as_slice())
        };

        let mut result = self.fit(&signal);
        if result.quality == FitQuality::Failed
            && self.config.retry_with_noise
            && !distribution.noise.is_empty()
        {
            let retry = self.fit(&distribution.noise).with_source(FitSource::Noise);
            if retry.quality.is_usable() {
                tracing::debug!(channel = %distribution.key, "噪声区重试成功 / noise-region retry succeeded");
                result = retry;
            }
        }

        if result.quality == FitQuality::Failed {
            tracing::warn!(
                channel = %distribution.key,
                reason = result.reason.as_deref().unwrap_or(""),
                "拟合失败 / fit failed"
            );
        }

        ChannelEstimate {
            fit: result,
            weighted_mean: peak_search::weighted_mean(&signal),
            total_counts: total_counts(&signal),
        }
    }

    /// 对单个分布做高斯拟合
    pub fn fit(&self, bins: &[Bin]) -> FitResult {
        let started = Instant::now();

        if bins.is_empty() {
            return FitResult::failed("empty distribution", 0);
        }

        let mut sorted = bins.to_vec();
        sorted.sort_by(|a, b| a.position.total_cmp(&b.position));

        if total_counts(&sorted) <= 0.0 {
            return FitResult::failed("zero total counts", 0);
        }
        let populated = sorted.iter().filter(|bin| bin.count > 0.0).count();
        if populated < fit::MIN_POPULATED_BINS {
            return FitResult::failed(
                format!("degenerate distribution: {populated} populated bin(s)"),
                0,
            );
        }

        let Some(coarse) = self.config.coarse_search.locate(&sorted) else {
            return FitResult::failed("no peak located", 0);
        };

        let half_window = self.config.window_sigmas * coarse.sigma;
        let mut region: Vec<Bin> = sorted
            .iter()
            .copied()
            .filter(|bin| (bin.position - coarse.center).abs() <= half_window)
            .collect();
        if region.iter().filter(|bin| bin.count > 0.0).count() < fit::MIN_POPULATED_BINS {
            region = sorted.clone();
        }

        let initial = Vector3::new(
            coarse.height,
            peak_search::weighted_mean(&region).unwrap_or(coarse.center),
            coarse.sigma,
        );

        let converged = match self.levenberg_marquardt(&region, initial, started) {
            Ok(converged) => converged,
            Err((reason, iterations)) => return FitResult::failed(reason, iterations),
        };

        let amplitude = converged.params[0];
        let mean = converged.params[1];
        let width = converged.params[2].abs();
        let iterations = converged.iterations;

        if !(amplitude.is_finite() && mean.is_finite() && width.is_finite()) {
            return FitResult::failed("non-finite fit parameters", iterations);
        }
        if amplitude <= 0.0 {
            return FitResult::failed("non-positive fitted amplitude", iterations);
        }

        let (x_min, x_max) = (sorted[0].position, sorted[sorted.len() - 1].position);
        if mean < x_min || mean > x_max {
            return FitResult::failed(
                format!("fitted peak {mean:.3} outside data range [{x_min}, {x_max}]"),
                iterations,
            );
        }

        let normalized_rmse = (converged.sse / region.len() as f64).sqrt() / amplitude;
        let reason = self.quality.assess(normalized_rmse, width, x_max - x_min);

        FitResult {
            quality: if reason.is_some() {
                FitQuality::LowQuality
            } else {
                FitQuality::Converged
            },
            peak_position: Some(mean),
            peak_width: Some(width),
            amplitude: Some(amplitude),
            iterations,
            normalized_rmse: Some(normalized_rmse),
            reason,
            source: FitSource::Signal,
        }
    }

    /// 阻尼最小二乘迭代；失败时返回 (原因, 已用迭代数)
    fn levenberg_marquardt(
        &self,
        points: &[Bin],
        initial: Vector3<f64>,
        started: Instant,
    ) -> Result<Converged, (String, usize)> {
        let budget = self.config.time_budget_ms.map(Duration::from_millis);
        let tolerance = self.config.tolerance;

        let mut params = initial;
        let mut sse = sum_squared_residuals(points, &params);
        if !sse.is_finite() {
            return Err(("non-finite residuals at initial guess".to_string(), 0));
        }
        let mut lambda = fit::INITIAL_DAMPING;

        for iteration in 1..=self.config.max_iterations {
            if let Some(budget) = budget
                && started.elapsed() >= budget
            {
                return Err(("time budget exceeded".to_string(), iteration - 1));
            }

            let (jtj, jtr) = normal_equations(points, &params);
            let mut damped = jtj;
            for i in 0..3 {
                damped[(i, i)] += lambda * jtj[(i, i)].max(f64::EPSILON);
            }

            let Some(step) = damped.lu().solve(&jtr) else {
                lambda *= 10.0;
                if lambda > fit::MAX_DAMPING {
                    return Err(("singular normal equations".to_string(), iteration));
                }
                continue;
            };

            let candidate = params + step;
            let candidate_sse = if candidate[2].abs() > f64::EPSILON {
                sum_squared_residuals(points, &candidate)
            } else {
                f64::INFINITY
            };

            if candidate_sse.is_finite() && candidate_sse <= sse {
                let improvement = (sse - candidate_sse) / sse.max(f64::MIN_POSITIVE);
                let small_step =
                    (0..3).all(|i| step[i].abs() <= tolerance * (params[i].abs() + tolerance));
                params = candidate;
                sse = candidate_sse;
                lambda = (lambda / 10.0).max(f64::EPSILON);

                if sse == 0.0 || improvement < tolerance || small_step {
                    return Ok(Converged {
                        params,
                        sse,
                        iterations: iteration,
                    });
                }
            } else {
                lambda *= 10.0;
                // 任何方向都无法再降低残差：已处于驻点
                if lambda > fit::MAX_DAMPING {
                    return Ok(Converged {
                        params,
                        sse,
                        iterations: iteration,
                    });
                }
            }
        }

        Err((
            format!(
                "no convergence within {} iterations",
                self.config.max_iterations
            ),
            self.config.max_iterations,
        ))
    }
}

/// 高斯模型值
#[inline]
pub fn gaussian(x: f64, amplitude: f64, mean: f64, sigma: f64) -> f64 {
    let z = (x - mean) / sigma;
    amplitude * (-0.5 * z * z).exp()
}

fn total_counts(bins: &[Bin]) -> f64 {
    bins.iter().map(|bin| bin.count).sum()
}

fn sum_squared_residuals(points: &[Bin], params: &Vector3<f64>) -> f64 {
    points
        .iter()
        .map(|bin| {
            let residual = bin.count - gaussian(bin.position, params[0], params[1], params[2]);
            residual * residual
        })
        .sum()
}

/// JᵀJ 与 Jᵀr，J 为模型对 (A, μ, σ) 的偏导
fn normal_equations(points: &[Bin], params: &Vector3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let (amplitude, mean, sigma) = (params[0], params[1], params[2]);
    let mut jtj = Matrix3::zeros();
    let mut jtr = Vector3::zeros();

    for bin in points {
        let dx = bin.position - mean;
        let e = (-0.5 * dx * dx / (sigma * sigma)).exp();
        let model = amplitude * e;
        let j = Vector3::new(
            e,
            model * dx / (sigma * sigma),
            model * dx * dx / (sigma * sigma * sigma),
        );
        jtj += j * j.transpose();
        jtr += j * (bin.count - model);
    }
    (jtj, jtr)
}
