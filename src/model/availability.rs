//! 可用性标记
//!
//! 数值结果要么可用，要么带着明确原因不可用。不可用从不以 0 或 NaN 表示。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 数值结果不可用的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UnavailableReason {
    /// 通道自身拟合失败
    FitFailed(String),
    /// 所在模块的参考均值不可用
    ReferenceUnavailable(String),
    /// 参考均值为零，除法无定义
    ZeroReference,
    /// 比值为非有限数
    NonFinite,
    /// 基准数据集中该通道的原始老化因子不可用
    BaselineUnavailable,
    /// 该通道不在此数据集中
    ChannelAbsent,
    /// 整个数据集因结构性输入错误失败
    DatasetFailed(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FitFailed(detail) => write!(f, "拟合失败 / fit failed: {detail}"),
            Self::ReferenceUnavailable(detail) => {
                write!(f, "参考不可用 / reference unavailable: {detail}")
            }
            Self::ZeroReference => write!(f, "参考均值为零 / zero reference mean"),
            Self::NonFinite => write!(f, "非有限数值 / non-finite ratio"),
            Self::BaselineUnavailable => write!(f, "基准不可用 / baseline unavailable"),
            Self::ChannelAbsent => write!(f, "通道缺失 / channel absent from dataset"),
            Self::DatasetFailed(detail) => write!(f, "数据集失败 / dataset failed: {detail}"),
        }
    }
}

/// 可用 / 不可用（带原因）的数值容器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability<T> {
    Available { value: T },
    Unavailable { reason: UnavailableReason },
}

/// 老化因子（原始或归一化）
pub type Factor = Availability<f64>;

impl<T> Availability<T> {
    #[inline]
    pub fn available(value: T) -> Self {
        Self::Available { value }
    }

    #[inline]
    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self::Unavailable { reason }
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    /// 可用时返回数值引用
    #[inline]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Available { value } => Some(value),
            Self::Unavailable { .. } => None,
        }
    }

    /// 不可用时返回原因
    #[inline]
    pub fn reason(&self) -> Option<&UnavailableReason> {
        match self {
            Self::Available { .. } => None,
            Self::Unavailable { reason } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Availability<U> {
        match self {
            Self::Available { value } => Availability::Available { value: f(value) },
            Self::Unavailable { reason } => Availability::Unavailable { reason },
        }
    }
}

impl Availability<f64> {
    /// 可用时返回数值副本
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.value().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let ok = Factor::available(0.95);
        assert!(ok.is_available());
        assert_eq!(ok.as_f64(), Some(0.95));
        assert!(ok.reason().is_none());

        let missing = Factor::unavailable(UnavailableReason::ZeroReference);
        assert!(!missing.is_available());
        assert_eq!(missing.as_f64(), None);
        assert_eq!(missing.reason(), Some(&UnavailableReason::ZeroReference));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(Factor::unavailable(UnavailableReason::FitFailed(
            "empty distribution".to_string(),
        )))
        .unwrap();
        assert_eq!(json["status"], "UNAVAILABLE");
        assert_eq!(json["reason"]["kind"], "fit_failed");
        assert_eq!(json["reason"]["detail"], "empty distribution");

        let json = serde_json::to_value(Factor::available(1.0)).unwrap();
        assert_eq!(json["status"], "AVAILABLE");
        assert_eq!(json["value"], 1.0);
    }
}
