//! 跨数据集归一化
//!
//! 归一化老化因子 = 原始因子 / 同一通道在基准数据集中的原始因子。
//! 基准数据集的归一化值严格为 1.0；基准不可用时整条序列不可用，不做替代。

use crate::error::{AnalysisError, AnalysisResult};
use crate::model::{ChannelKey, Factor, UnavailableReason};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// 选择基准数据集索引（`dates` 须已按时间升序）
///
/// 指定的基准日期不在活动中时返回配置错误；未指定时取最早的数据集。
pub fn select_baseline(dates: &[NaiveDate], requested: Option<NaiveDate>) -> AnalysisResult<usize> {
    if dates.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "活动中没有数据集 / campaign has no datasets".to_string(),
        ));
    }
    match requested {
        Some(date) => dates.iter().position(|d| *d == date).ok_or_else(|| {
            AnalysisError::Config(format!(
                "基准日期 {date} 不在活动中 / baseline date not found among datasets"
            ))
        }),
        None => Ok(0),
    }
}

/// 归一化单通道按时间排列的原始因子序列；输出长度与输入一致
pub fn normalize_series(raw: &[Factor], baseline: usize) -> Vec<Factor> {
    let base = match raw.get(baseline).and_then(Factor::as_f64) {
        Some(base) => base,
        None => {
            return vec![Factor::unavailable(UnavailableReason::BaselineUnavailable); raw.len()];
        }
    };

    raw.iter()
        .enumerate()
        .map(|(index, factor)| {
            if index == baseline {
                return Factor::available(1.0);
            }
            match factor {
                Factor::Available { value } => {
                    let ratio = value / base;
                    if ratio.is_finite() {
                        Factor::available(ratio)
                    } else {
                        Factor::unavailable(UnavailableReason::NonFinite)
                    }
                }
                Factor::Unavailable { reason } => Factor::unavailable(reason.clone()),
            }
        })
        .collect()
}

/// 归一化整个活动：输入为每个数据集（时间顺序）的 通道 → 原始因子 表
///
/// 某数据集缺少的通道以 `ChannelAbsent` 占位后参与归一化。
pub fn normalize_campaign(
    raw: &[BTreeMap<ChannelKey, Factor>],
    baseline: usize,
) -> Vec<BTreeMap<ChannelKey, Factor>> {
    let keys: BTreeSet<&ChannelKey> = raw.iter().flat_map(|dataset| dataset.keys()).collect();
    let mut normalized = vec![BTreeMap::new(); raw.len()];

    for key in keys {
        let series: Vec<Factor> = raw
            .iter()
            .map(|dataset| {
                dataset
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| Factor::unavailable(UnavailableReason::ChannelAbsent))
            })
            .collect();

        for (dataset, factor) in normalized.iter_mut().zip(normalize_series(&series, baseline)) {
            dataset.insert(key.clone(), factor);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_baseline_selection() {
        let dates = [date(1), date(8), date(15)];
        assert_eq!(select_baseline(&dates, None).unwrap(), 0);
        assert_eq!(select_baseline(&dates, Some(date(8))).unwrap(), 1);
        assert!(matches!(
            select_baseline(&dates, Some(date(2))),
            Err(AnalysisError::Config(_))
        ));
        assert!(select_baseline(&[], None).is_err());
    }

    #[test]
    fn test_scenario_95_then_90() {
        // 基准原始因子 0.95，之后 0.90 → 归一化 ≈ 0.9474
        let series = normalize_series(&[Factor::available(0.95), Factor::available(0.90)], 0);
        assert_eq!(series[0].as_f64(), Some(1.0));
        assert!((series[1].as_f64().unwrap() - 0.947_368_421).abs() < 1e-6);
    }

    #[test]
    fn test_baseline_is_exactly_one() {
        let raw = [
            Factor::available(0.8),
            Factor::available(1.0 / 3.0),
            Factor::available(0.7),
        ];
        let series = normalize_series(&raw, 1);
        assert_eq!(series[1].as_f64().unwrap().to_bits(), 1.0f64.to_bits());
    }

    #[test]
    fn test_unavailable_baseline_poisons_series() {
        let raw = [
            Factor::unavailable(UnavailableReason::ZeroReference),
            Factor::available(0.9),
            Factor::available(0.8),
        ];
        let series = normalize_series(&raw, 0);
        assert_eq!(series.len(), 3);
        assert!(
            series
                .iter()
                .all(|f| f.reason() == Some(&UnavailableReason::BaselineUnavailable))
        );
    }

    #[test]
    fn test_unavailable_entries_keep_reason() {
        let raw = [
            Factor::available(0.9),
            Factor::unavailable(UnavailableReason::FitFailed("empty distribution".to_string())),
        ];
        let series = normalize_series(&raw, 0);
        assert!(matches!(series[1].reason(), Some(UnavailableReason::FitFailed(_))));
    }

    #[test]
    fn test_campaign_placeholders() {
        let a = ChannelKey::new("PMA0", 1);
        let b = ChannelKey::new("PMA0", 2);
        let raw = vec![
            BTreeMap::from([(a.clone(), Factor::available(0.5))]),
            BTreeMap::from([
                (a.clone(), Factor::available(0.25)),
                (b.clone(), Factor::available(0.9)),
            ]),
        ];
        let normalized = normalize_campaign(&raw, 0);

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[1][&a].as_f64(), Some(0.5));
        // 基准中缺少的通道整条序列不可用
        assert_eq!(
            normalized[0][&b].reason(),
            Some(&UnavailableReason::BaselineUnavailable)
        );
        assert_eq!(
            normalized[1][&b].reason(),
            Some(&UnavailableReason::BaselineUnavailable)
        );
    }
}
