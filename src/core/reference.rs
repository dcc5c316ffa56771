//! 参考通道均值
//!
//! 每个模块每个数据集一个参考均值：参考通道中 CONVERGED / LOW_QUALITY 的峰位取平均。
//! 没有可用参考通道时结果为 UNAVAILABLE，从不以 0 或 NaN 代替。

use crate::model::{Factor, ReferenceMean, UnavailableReason};
use serde::{Deserialize, Serialize};

/// 参考通道加权方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceWeighting {
    /// 算术平均
    #[default]
    Unweighted,
    /// 以拟合幅度（加权均值家族以总计数）为权重
    AmplitudeWeighted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencePolicy {
    pub weighting: ReferenceWeighting,
}

/// 参考聚合的单通道输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceCandidate {
    pub channel: u32,
    /// 可用的峰位估计；FAILED 通道为 None
    pub position: Option<f64>,
    pub weight: f64,
}

/// 计算一个模块的参考均值
pub fn resolve_reference_mean(
    module: &str,
    candidates: &[ReferenceCandidate],
    policy: &ReferencePolicy,
) -> ReferenceMean {
    if candidates.is_empty() {
        return ReferenceMean::unavailable(
            module,
            UnavailableReason::ReferenceUnavailable("no reference channels designated".to_string()),
        );
    }

    let (usable, excluded): (Vec<&ReferenceCandidate>, Vec<&ReferenceCandidate>) = candidates
        .iter()
        .partition(|candidate| candidate.position.is_some_and(f64::is_finite));
    let excluded_channels: Vec<u32> = excluded.iter().map(|c| c.channel).collect();

    if usable.is_empty() {
        tracing::warn!(
            module,
            channels = candidates.len(),
            "参考通道全部不可用 / all reference channels unusable"
        );
        return ReferenceMean {
            excluded_channels,
            ..ReferenceMean::unavailable(
                module,
                UnavailableReason::ReferenceUnavailable(format!(
                    "all {} reference channel(s) failed",
                    candidates.len()
                )),
            )
        };
    }

    let unweighted =
        usable.iter().filter_map(|c| c.position).sum::<f64>() / usable.len() as f64;

    let mean = match policy.weighting {
        ReferenceWeighting::Unweighted => unweighted,
        ReferenceWeighting::AmplitudeWeighted => {
            let total_weight: f64 = usable.iter().map(|c| c.weight.max(0.0)).sum();
            if total_weight > 0.0 {
                usable
                    .iter()
                    .filter_map(|c| c.position.map(|p| p * c.weight.max(0.0)))
                    .sum::<f64>()
                    / total_weight
            } else {
                unweighted
            }
        }
    };

    let value = if mean.is_finite() {
        Factor::available(mean)
    } else {
        Factor::unavailable(UnavailableReason::NonFinite)
    };

    tracing::debug!(
        module,
        mean,
        contributing = usable.len(),
        excluded = excluded_channels.len(),
        "参考均值 / reference mean resolved"
    );

    ReferenceMean {
        value,
        source_module: module.to_string(),
        contributing_channels: usable.iter().map(|c| c.channel).collect(),
        excluded_channels,
    }
}
