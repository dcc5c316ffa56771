//! 峰值搜索模块
//!
//! 为高斯拟合提供初值：粗定位主峰（最大值或质心）、半高宽估计σ，
//! 以及基于显著度(prominence)的多峰检测，用于隔离参考通道的光源峰。
//!
//! ## 职责边界
//!
//! 本模块仅负责：**在分布中找到峰并给出初始估计**。
//!
//! - ✅ 粗定位策略（`CoarseSearch::Maximum` / `CoarseSearch::Centroid`）
//! - ✅ 半高宽 → σ 初值
//! - ✅ 显著峰检测与峰基线（left/right base）
//! - ❌ 非线性拟合本身（由 `gaussian_fit` 负责）
//! - ❌ 拟合质量判定（由 `gaussian_fit::QualityPolicy` 负责）

use crate::input::Bin;
use crate::tools::constants::fit;
use serde::{Deserialize, Serialize};

/// 粗定位策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarseSearch {
    /// 计数最大的bin（并列时取第一个）
    #[default]
    Maximum,
    /// 计数加权质心
    Centroid,
}

/// 粗定位结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoarsePeak {
    /// 最接近中心的bin索引
    pub index: usize,
    pub center: f64,
    /// 最大计数
    pub height: f64,
    /// 由半高宽估计的σ
    pub sigma: f64,
}

/// 峰定位trait
pub trait PeakLocator {
    /// 在按位置升序排列的分布中定位主峰；分布为空或总计数为0时返回None
    fn locate(&self, bins: &[Bin]) -> Option<CoarsePeak>;

    /// 获取策略描述（用于日志输出）
    fn strategy_name(&self) -> &'static str;
}

impl PeakLocator for CoarseSearch {
    fn locate(&self, bins: &[Bin]) -> Option<CoarsePeak> {
        let max_index = argmax(bins)?;
        let height = bins[max_index].count;
        if height <= 0.0 {
            return None;
        }

        let sigma = half_max_sigma(bins, max_index);
        let (index, center) = match self {
            Self::Maximum => (max_index, bins[max_index].position),
            Self::Centroid => {
                let center = weighted_mean(bins)?;
                (nearest_index(bins, center), center)
            }
        };

        Some(CoarsePeak {
            index,
            center,
            height,
            sigma,
        })
    }

    fn strategy_name(&self) -> &'static str {
        match self {
            Self::Maximum => "Maximum",
            Self::Centroid => "Centroid",
        }
    }
}

/// 计数加权均值 Σxy/Σy；总计数非正时返回None
pub fn weighted_mean(bins: &[Bin]) -> Option<f64> {
    let (sum_xy, sum_y) = bins.iter().fold((0.0, 0.0), |(sxy, sy), bin| {
        (sxy + bin.position * bin.count, sy + bin.count)
    });
    if sum_y > 0.0 {
        Some(sum_xy / sum_y).filter(|mean| mean.is_finite())
    } else {
        None
    }
}

/// 相邻bin的最小正间距；不足两个bin时为1
pub fn bin_spacing(bins: &[Bin]) -> f64 {
    let spacing = bins
        .windows(2)
        .map(|pair| pair[1].position - pair[0].position)
        .filter(|gap| *gap > 0.0)
        .fold(f64::INFINITY, f64::min);
    if spacing.is_finite() { spacing } else { 1.0 }
}

fn argmax(bins: &[Bin]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, bin) in bins.iter().enumerate() {
        match best {
            Some(current) if bins[current].count >= bin.count => {}
            _ => best = Some(index),
        }
    }
    best
}

fn nearest_index(bins: &[Bin], center: f64) -> usize {
    let mut best = 0;
    for (index, bin) in bins.iter().enumerate() {
        if (bin.position - center).abs() < (bins[best].position - center).abs() {
            best = index;
        }
    }
    best
}

/// 从峰顶向两侧扩展到计数低于半高处，以半高宽换算σ
fn half_max_sigma(bins: &[Bin], peak: usize) -> f64 {
    let half = bins[peak].count / 2.0;
    let mut left = peak;
    while left > 0 && bins[left - 1].count >= half {
        left -= 1;
    }
    let mut right = peak;
    while right + 1 < bins.len() && bins[right + 1].count >= half {
        right += 1;
    }

    let spacing = bin_spacing(bins);
    let fwhm = bins[right].position - bins[left].position + spacing;
    (fwhm / fit::FWHM_TO_SIGMA).max(spacing * 0.5)
}

// ==================== 显著峰检测 ====================

/// 显著峰
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProminentPeak {
    pub index: usize,
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
}

/// 检测局部极大值并计算显著度，按位置顺序返回显著度不低于阈值的峰
///
/// 平台型峰取平台中点。
pub fn find_prominent_peaks(counts: &[f64], min_prominence: f64) -> Vec<ProminentPeak> {
    let n = counts.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    while i < n - 1 {
        if counts[i - 1] < counts[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && counts[ahead] == counts[i] {
                ahead += 1;
            }
            if counts[ahead] < counts[i] {
                let index = (i + ahead - 1) / 2;
                let peak = prominence_of(counts, index);
                if peak.prominence >= min_prominence {
                    peaks.push(peak);
                }
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

fn prominence_of(counts: &[f64], index: usize) -> ProminentPeak {
    let height = counts[index];

    let mut left_min = height;
    let mut left_base = index;
    for j in (0..index).rev() {
        if counts[j] > height {
            break;
        }
        if counts[j] < left_min {
            left_min = counts[j];
            left_base = j;
        }
    }

    let mut right_min = height;
    let mut right_base = index;
    for (j, &count) in counts.iter().enumerate().skip(index + 1) {
        if count > height {
            break;
        }
        if count < right_min {
            right_min = count;
            right_base = j;
        }
    }

    ProminentPeak {
        index,
        prominence: height - left_min.max(right_min),
        left_base,
        right_base,
    }
}

/// 截取第 `rank` 个显著峰（1基，按位置顺序）两侧基线之间的分布
pub fn isolate_peak(bins: &[Bin], rank: usize, min_prominence: f64) -> Option<Vec<Bin>> {
    let counts: Vec<f64> = bins.iter().map(|bin| bin.count).collect();
    let peaks = find_prominent_peaks(&counts, min_prominence);
    let peak = peaks.get(rank.checked_sub(1)?)?;

    let slice = &bins[peak.left_base..peak.right_base];
    (!slice.is_empty()).then(|| slice.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bins(counts: &[f64]) -> Vec<Bin> {
        counts
            .iter()
            .enumerate()
            .map(|(i, &c)| Bin::new(i as f64, c))
            .collect()
    }

    #[test]
    fn test_maximum_strategy() {
        let data = bins(&[0.0, 1.0, 4.0, 9.0, 4.0, 1.0, 0.0]);
        let peak = CoarseSearch::Maximum.locate(&data).unwrap();
        assert_eq!(peak.index, 3);
        assert_eq!(peak.center, 3.0);
        assert_eq!(peak.height, 9.0);
        assert!(peak.sigma > 0.0);
    }

    #[test]
    fn test_maximum_ties_take_first() {
        let data = bins(&[0.0, 5.0, 5.0, 0.0]);
        assert_eq!(CoarseSearch::Maximum.locate(&data).unwrap().index, 1);
    }

    #[test]
    fn test_centroid_strategy() {
        let data = bins(&[0.0, 2.0, 2.0, 0.0]);
        let peak = CoarseSearch::Centroid.locate(&data).unwrap();
        assert!((peak.center - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_and_zero_distributions() {
        assert!(CoarseSearch::Maximum.locate(&[]).is_none());
        assert!(CoarseSearch::Centroid.locate(&bins(&[0.0, 0.0])).is_none());
        assert!(weighted_mean(&bins(&[0.0, 0.0, 0.0])).is_none());
    }

    #[test]
    fn test_prominent_peaks() {
        // 两个峰：索引2（显著度3）与索引6（显著度7）
        let counts = [2.0, 1.0, 4.0, 1.0, 0.0, 5.0, 8.0, 3.0, 1.0];
        let peaks = find_prominent_peaks(&counts, 0.1);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].index, 2);
        assert_eq!(peaks[0].prominence, 3.0);
        assert_eq!(peaks[1].index, 6);
        assert_eq!(peaks[1].prominence, 7.0);
        assert_eq!(peaks[1].left_base, 4);
        assert_eq!(peaks[1].right_base, 8);

        // 阈值过滤掉较弱的峰
        assert_eq!(find_prominent_peaks(&counts, 5.0).len(), 1);
    }

    #[test]
    fn test_plateau_peak_uses_midpoint() {
        let peaks = find_prominent_peaks(&[0.0, 3.0, 3.0, 3.0, 0.0], 0.1);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 2);
    }

    #[test]
    fn test_isolate_second_peak() {
        let data = bins(&[2.0, 1.0, 4.0, 1.0, 0.0, 5.0, 8.0, 3.0, 1.0]);
        let isolated = isolate_peak(&data, 2, 0.1).unwrap();
        let positions: Vec<f64> = isolated.iter().map(|bin| bin.position).collect();
        assert_eq!(positions, vec![4.0, 5.0, 6.0, 7.0]);

        // 只有一个峰时无法隔离第二个
        assert!(isolate_peak(&bins(&[0.0, 3.0, 0.0]), 2, 0.1).is_none());
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(CoarseSearch::Maximum.strategy_name(), "Maximum");
        assert_eq!(CoarseSearch::Centroid.strategy_name(), "Centroid");
    }
}
