//! 电荷 / 速率富集
//!
//! 对按时间排序的采样取绝对值后做梯形积分（Δt 以秒计），可选乘以分段常数的速率修正乘数。
//! 跨越窗口边界的采样区间按线性插值裁剪。与拟合质量无关；窗口内没有采样且没有区间与之重叠时
//! 电荷为0并标记 `NO_DATA`，区别于 UNAVAILABLE。

use crate::model::{
    ChannelKey, ChargeOrigin, ChargeRecord, ChargeStatus, ChargeWindow, CumulativeChargeSource,
    RateCorrection, RateSample,
};
use crate::tools::constants::charge::CFD_RATE_TO_CHARGE;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;

#[inline]
fn seconds_between(start: NaiveDateTime, end: NaiveDateTime) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// 梯形积分 ∫|v|dt；少于两个采样时为0
pub fn trapezoid_magnitude(samples: &[RateSample]) -> f64 {
    samples
        .windows(2)
        .map(|pair| {
            let dt = seconds_between(pair[0].timestamp, pair[1].timestamp);
            0.5 * (pair[0].value.abs() + pair[1].value.abs()) * dt
        })
        .sum()
}

/// CFD触发率积分（触发数）换算为电荷（库仑）
#[inline]
pub fn cfd_rate_to_charge(rate_integral: f64) -> f64 {
    rate_integral * CFD_RATE_TO_CHARGE
}

/// 带速率修正的梯形积分：在乘数变化点处按线性插值切分区间
pub fn corrected_trapezoid(samples: &[RateSample], correction: &RateCorrection) -> f64 {
    samples
        .windows(2)
        .map(|pair| corrected_segment(&pair[0], &pair[1], correction))
        .sum()
}

/// 区间内时刻 `t` 处的线性插值幅值
fn magnitude_at(a: &RateSample, b: &RateSample, t: NaiveDateTime) -> f64 {
    let span = seconds_between(a.timestamp, b.timestamp);
    let (va, vb) = (a.value.abs(), b.value.abs());
    if span <= 0.0 {
        return va;
    }
    va + (vb - va) * seconds_between(a.timestamp, t) / span
}

fn corrected_segment(a: &RateSample, b: &RateSample, correction: &RateCorrection) -> f64 {
    let mut cuts: Vec<NaiveDateTime> = correction
        .changes
        .iter()
        .map(|change| change.from)
        .filter(|t| *t > a.timestamp && *t < b.timestamp)
        .collect();
    cuts.sort();
    cuts.dedup();

    let mut points = Vec::with_capacity(cuts.len() + 2);
    points.push((a.timestamp, a.value.abs()));
    for t in cuts {
        points.push((t, magnitude_at(a, b, t)));
    }
    points.push((b.timestamp, b.value.abs()));

    points
        .windows(2)
        .map(|pair| {
            let ((t0, v0), (t1, v1)) = (pair[0], pair[1]);
            0.5 * (v0 + v1) * seconds_between(t0, t1) * correction.multiplier_at(t0)
        })
        .sum()
}

/// 把相邻采样构成的区间裁剪到窗口内，边界处线性插值；与窗口无重叠时为 None
fn clip_segment(
    a: &RateSample,
    b: &RateSample,
    window: &ChargeWindow,
) -> Option<(RateSample, RateSample)> {
    let start = a.timestamp.max(window.start);
    let end = b.timestamp.min(window.end);
    (start < end).then(|| {
        (
            RateSample {
                timestamp: start,
                value: magnitude_at(a, b, start),
            },
            RateSample {
                timestamp: end,
                value: magnitude_at(a, b, end),
            },
        )
    })
}

/// 窗口边界的开闭
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bounds {
    Inclusive,
    HalfOpen,
}

/// 对整条序列在窗口内积分：跨越窗口边界的区间按插值裁剪后计入
fn integrate_clipped(
    samples: &[RateSample],
    window: &ChargeWindow,
    correction: Option<&RateCorrection>,
    bounds: Bounds,
    origin: ChargeOrigin,
) -> ChargeRecord {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|sample| sample.timestamp);

    let samples_used = sorted
        .iter()
        .filter(|sample| match bounds {
            Bounds::Inclusive => window.contains(sample.timestamp),
            Bounds::HalfOpen => window.contains_half_open(sample.timestamp),
        })
        .count();
    let segments: Vec<(RateSample, RateSample)> = sorted
        .windows(2)
        .filter_map(|pair| clip_segment(&pair[0], &pair[1], window))
        .collect();

    if samples_used == 0 && segments.is_empty() {
        return ChargeRecord::no_data(origin, correction.is_some());
    }

    ChargeRecord {
        integrated_charge: segments
            .iter()
            .map(|(a, b)| trapezoid_magnitude(&[*a, *b]))
            .sum(),
        rate_corrected_charge: correction.map(|c| {
            segments
                .iter()
                .map(|(a, b)| corrected_segment(a, b, c))
                .sum()
        }),
        samples_used,
        status: ChargeStatus::Measured,
        origin,
    }
}

/// 在窗口（两端包含）内积分单通道的时间序列
///
/// 窗口内没有采样、也没有任何采样区间与窗口重叠时为 `NO_DATA`。
pub fn integrate_window(
    samples: &[RateSample],
    window: &ChargeWindow,
    correction: Option<&RateCorrection>,
) -> ChargeRecord {
    integrate_clipped(samples, window, correction, Bounds::Inclusive, ChargeOrigin::Window)
}

/// 数据集级：为每个声明的通道计算窗口电荷（无时间序列的通道为 NO_DATA）
pub fn window_charges(
    keys: &[ChannelKey],
    series: &BTreeMap<ChannelKey, Vec<RateSample>>,
    window: &ChargeWindow,
    correction: Option<&RateCorrection>,
) -> BTreeMap<ChannelKey, ChargeRecord> {
    keys.iter()
        .map(|key| {
            let samples = series.get(key).map(Vec::as_slice).unwrap_or(&[]);
            (key.clone(), integrate_window(samples, window, correction))
        })
        .collect()
}

/// 数据集级：附加预先计算好的电荷（表中没有的通道不附加）
pub fn precomputed_charges(
    keys: &[ChannelKey],
    values: &BTreeMap<ChannelKey, f64>,
) -> BTreeMap<ChannelKey, ChargeRecord> {
    keys.iter()
        .filter_map(|key| {
            values.get(key).map(|&charge| {
                (
                    key.clone(),
                    ChargeRecord {
                        integrated_charge: charge,
                        rate_corrected_charge: None,
                        samples_used: 0,
                        status: ChargeStatus::Measured,
                        origin: ChargeOrigin::Precomputed,
                    },
                )
            })
        })
        .collect()
}

/// 活动级累积电荷
///
/// 数据集 i 的积分窗口为 (锚点(i-1), 锚点(i)]，锚点为测量日的 `anchor_hour` 点整；
/// 跨越锚点的采样区间按插值切分，各窗口首尾相接，累计值等于连续序列积分到锚点(i)。
/// 记录携带累计值，第一个数据集为0。`keys[i]` 为数据集 i 声明的通道。
/// `convert_to_charge` 为真时积分结果乘以 `CFD_RATE_TO_CHARGE`。
pub fn cumulative_charges(
    dates: &[NaiveDate],
    keys: &[Vec<ChannelKey>],
    source: &CumulativeChargeSource,
) -> Vec<BTreeMap<ChannelKey, ChargeRecord>> {
    let anchor = NaiveTime::from_hms_opt(source.anchor_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let anchors: Vec<NaiveDateTime> = dates.iter().map(|date| date.and_time(anchor)).collect();
    let correction = source.correction.as_ref();
    let scale = |value: f64| {
        if source.convert_to_charge {
            cfd_rate_to_charge(value)
        } else {
            value
        }
    };

    let mut running: BTreeMap<ChannelKey, (f64, f64)> = BTreeMap::new();
    let mut results = Vec::with_capacity(dates.len());

    for (index, dataset_keys) in keys.iter().enumerate().take(dates.len()) {
        let mut records = BTreeMap::new();
        for key in dataset_keys {
            let (total, corrected_total) = running.entry(key.clone()).or_insert((0.0, 0.0));

            let (status, samples_used) = if index == 0 {
                (ChargeStatus::Measured, 0)
            } else {
                let window = ChargeWindow {
                    start: anchors[index - 1],
                    end: anchors[index],
                };
                let samples = source.series.get(key).map(Vec::as_slice).unwrap_or(&[]);
                let record = integrate_clipped(
                    samples,
                    &window,
                    correction,
                    Bounds::HalfOpen,
                    ChargeOrigin::Cumulative,
                );
                *total += scale(record.integrated_charge);
                *corrected_total += scale(record.rate_corrected_charge.unwrap_or(0.0));
                (record.status, record.samples_used)
            };

            records.insert(
                key.clone(),
                ChargeRecord {
                    integrated_charge: *total,
                    rate_corrected_charge: correction.map(|_| *corrected_total),
                    samples_used,
                    status,
                    origin: ChargeOrigin::Cumulative,
                },
            );
        }
        results.push(records);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MultiplierChange;

    fn at(day: u32, hour: u32, second: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            + chrono::TimeDelta::seconds(second)
    }

    fn sample(timestamp: NaiveDateTime, value: f64) -> RateSample {
        RateSample { timestamp, value }
    }

    #[test]
    fn test_trapezoid_uses_magnitude() {
        let samples = [sample(at(1, 0, 0), 2.0), sample(at(1, 0, 10), -4.0)];
        assert_eq!(trapezoid_magnitude(&samples), 30.0);
        assert_eq!(trapezoid_magnitude(&samples[..1]), 0.0);
    }

    #[test]
    fn test_cfd_rate_conversion() {
        // 1000 Hz 持续 10 秒
        let samples = [sample(at(1, 0, 0), 1000.0), sample(at(1, 0, 10), 1000.0)];
        let charge = cfd_rate_to_charge(trapezoid_magnitude(&samples));
        assert!((charge - 4.3e-10).abs() < 1e-22);
    }

    #[test]
    fn test_empty_window_is_no_data() {
        let samples = [sample(at(1, 0, 0), 2.0), sample(at(1, 0, 10), 4.0)];
        let window = ChargeWindow {
            start: at(2, 0, 0),
            end: at(3, 0, 0),
        };
        let record = integrate_window(&samples, &window, None);
        assert_eq!(record.status, ChargeStatus::NoData);
        assert_eq!(record.integrated_charge, 0.0);
        assert_eq!(record.samples_used, 0);
    }

    #[test]
    fn test_window_filters_and_sorts() {
        let samples = [
            sample(at(1, 0, 10), 4.0),
            sample(at(1, 0, 0), 2.0),
            sample(at(1, 5, 0), 100.0),
        ];
        let window = ChargeWindow {
            start: at(1, 0, 0),
            end: at(1, 0, 10),
        };
        let record = integrate_window(&samples, &window, None);
        assert_eq!(record.status, ChargeStatus::Measured);
        assert_eq!(record.samples_used, 2);
        assert_eq!(record.integrated_charge, 30.0);
    }

    #[test]
    fn test_window_edges_are_interpolated() {
        // 区间 [0s,10s] 幅值 2→4，窗口结束于5s处（插值为3）：(2+3)/2*5 = 12.5
        let samples = [sample(at(1, 0, 0), 2.0), sample(at(1, 0, 10), 4.0)];
        let window = ChargeWindow {
            start: at(1, 0, 0),
            end: at(1, 0, 5),
        };
        let record = integrate_window(&samples, &window, None);
        assert_eq!(record.integrated_charge, 12.5);
        assert_eq!(record.samples_used, 1);
    }

    #[test]
    fn test_window_inside_sampled_span_is_measured() {
        // 11:00 与 13:00 两个采样之间恒定速率1，窗口 11:30–12:30 内没有采样
        let samples = [sample(at(1, 11, 0), 1.0), sample(at(1, 13, 0), 1.0)];
        let window = ChargeWindow {
            start: at(1, 11, 1800),
            end: at(1, 12, 1800),
        };
        let record = integrate_window(&samples, &window, None);
        assert_eq!(record.status, ChargeStatus::Measured);
        assert_eq!(record.samples_used, 0);
        assert_eq!(record.integrated_charge, 3600.0);

        let correction = RateCorrection::constant(2.0);
        let record = integrate_window(&samples, &window, Some(&correction));
        assert_eq!(record.rate_corrected_charge, Some(7200.0));
    }

    #[test]
    fn test_rate_correction_splits_interval() {
        let samples = [sample(at(1, 0, 0), 2.0), sample(at(1, 0, 10), 4.0)];
        let correction = RateCorrection {
            multiplier: 1.0,
            changes: vec![MultiplierChange {
                from: at(1, 0, 5),
                multiplier: 2.0,
            }],
        };
        // [0,5]: (2+3)/2*5 = 12.5；[5,10]: (3+4)/2*5*2 = 35
        assert_eq!(corrected_trapezoid(&samples, &correction), 47.5);
        assert_eq!(
            corrected_trapezoid(&samples, &RateCorrection::constant(1.0)),
            30.0
        );
    }

    fn close(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() <= expected.abs() * 1e-12
    }

    #[test]
    fn test_cumulative_charges() {
        let key = ChannelKey::new("PMA0", 1);
        let dates = [
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 4).unwrap(),
        ];
        // 6月1日正午到6月2日正午之间 1000 Hz 持续10秒；之后无采样
        let series = BTreeMap::from([(
            key.clone(),
            vec![sample(at(1, 18, 0), 1000.0), sample(at(1, 18, 10), 1000.0)],
        )]);
        let keys = vec![vec![key.clone()]; 3];
        let records = cumulative_charges(&dates, &keys, &CumulativeChargeSource::new(series));

        assert_eq!(records.len(), 3);
        assert_eq!(records[0][&key].integrated_charge, 0.0);
        // 1e4 次触发 × 43e-15 C = 4.3e-10 C
        assert!(close(records[1][&key].integrated_charge, 4.3e-10));
        assert_eq!(records[1][&key].status, ChargeStatus::Measured);
        // 第三个窗口无采样：累计值不变，标记 NO_DATA
        assert!(close(records[2][&key].integrated_charge, 4.3e-10));
        assert_eq!(records[2][&key].status, ChargeStatus::NoData);
    }

    #[test]
    fn test_cumulative_interval_straddling_anchor_is_split() {
        let key = ChannelKey::new("PMC2", 5);
        let dates = [
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        ];
        // 6月2日 11:00–13:00 恒定速率1，跨越当天正午锚点
        let series = BTreeMap::from([(
            key.clone(),
            vec![sample(at(2, 11, 0), 1.0), sample(at(2, 13, 0), 1.0)],
        )]);
        let mut source = CumulativeChargeSource::new(series);
        source.convert_to_charge = false;
        let keys = vec![vec![key.clone()]; 3];
        let records = cumulative_charges(&dates, &keys, &source);

        assert_eq!(records[1][&key].integrated_charge, 3600.0);
        assert_eq!(records[1][&key].samples_used, 1);
        assert_eq!(records[2][&key].integrated_charge, 7200.0);
        assert_eq!(records[2][&key].samples_used, 1);
        assert_eq!(records[2][&key].status, ChargeStatus::Measured);
    }

    #[test]
    fn test_cumulative_window_is_half_open() {
        let key = ChannelKey::new("PMA0", 1);
        let dates = [
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        ];
        // 恰好落在6月2日锚点上的采样只计入以该锚点结束的窗口
        let series = BTreeMap::from([(key.clone(), vec![sample(at(2, 12, 0), 5.0)])]);
        let keys = vec![vec![key.clone()]; 3];
        let records = cumulative_charges(&dates, &keys, &CumulativeChargeSource::new(series));

        assert_eq!(records[1][&key].samples_used, 1);
        assert_eq!(records[1][&key].status, ChargeStatus::Measured);
        assert_eq!(records[2][&key].samples_used, 0);
        assert_eq!(records[2][&key].status, ChargeStatus::NoData);
    }

    #[test]
    fn test_precomputed_only_attaches_known_channels() {
        let a = ChannelKey::new("PMA0", 1);
        let b = ChannelKey::new("PMA0", 2);
        let values = BTreeMap::from([(a.clone(), 1.5)]);
        let records = precomputed_charges(&[a.clone(), b.clone()], &values);
        assert_eq!(records[&a].integrated_charge, 1.5);
        assert!(!records.contains_key(&b));
    }
}
