//! 原始老化因子计算
//!
//! 原始老化因子 = 通道峰位 / 所在模块参考均值。纯函数，与通道顺序无关。

use crate::model::{Factor, FitResult, ReferenceMean, UnavailableReason};

/// 由峰位与参考均值计算原始老化因子
///
/// 原因优先级：参考不可用 → 拟合失败 → 参考为零 → 非有限比值
pub fn raw_ageing_factor(
    position: Result<f64, UnavailableReason>,
    reference: &ReferenceMean,
) -> Factor {
    let reference_value = match &reference.value {
        Factor::Available { value } => *value,
        Factor::Unavailable { reason } => {
            let detail = match reason {
                UnavailableReason::ReferenceUnavailable(detail) => detail.clone(),
                other => other.to_string(),
            };
            return Factor::unavailable(UnavailableReason::ReferenceUnavailable(detail));
        }
    };

    let position = match position {
        Ok(position) => position,
        Err(reason) => return Factor::unavailable(reason),
    };

    if reference_value == 0.0 {
        return Factor::unavailable(UnavailableReason::ZeroReference);
    }

    let ratio = position / reference_value;
    if ratio.is_finite() {
        Factor::available(ratio)
    } else {
        Factor::unavailable(UnavailableReason::NonFinite)
    }
}

/// 高斯家族：FAILED 拟合不参与计算
pub fn gaussian_factor(fit: &FitResult, reference: &ReferenceMean) -> Factor {
    let position = fit
        .usable_position()
        .ok_or_else(|| UnavailableReason::FitFailed(fit.failure_reason()));
    raw_ageing_factor(position, reference)
}

/// 加权均值家族：分布无计数时不可用
pub fn weighted_factor(weighted_mean: Option<f64>, reference: &ReferenceMean) -> Factor {
    let position = weighted_mean
        .ok_or_else(|| UnavailableReason::FitFailed("no counts for weighted mean".to_string()));
    raw_ageing_factor(position, reference)
}
