//! 运行描述符
//!
//! 调用方传给流水线的输入：数据集、模块、通道列映射以及可选的电荷富集输入。

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// 通道标识：(模块标识, 通道序号)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub module: String,
    pub channel: u32,
}

impl ChannelKey {
    pub fn new(module: impl Into<String>, channel: u32) -> Self {
        Self {
            module: module.into(),
            channel,
        }
    }

    /// 规范化通道名，例如 `CH01`
    pub fn channel_name(&self) -> String {
        format!("CH{:02}", self.channel)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.channel_name())
    }
}

/// 单个通道的列映射
///
/// `columns` 为数据列的0基索引（不含首列bin编号），多列求和得到通道计数。
/// `headers` 非空时用于表头校验，长度须与 `columns` 一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub channel: u32,
    pub columns: Vec<usize>,
    #[serde(default)]
    pub headers: Vec<String>,
}

impl ChannelMapping {
    /// 标准布局：通道n（1基）= 数据列 2n-2 与 2n-1 之和
    pub fn paired(channel: u32) -> Self {
        let first = (channel.saturating_sub(1) as usize) * 2;
        Self {
            channel,
            columns: vec![first, first + 1],
            headers: Vec::new(),
        }
    }

    /// 整块模块的标准布局
    pub fn standard_layout(channel_count: u32) -> Vec<Self> {
        (1..=channel_count).map(Self::paired).collect()
    }

    /// 附带期望表头
    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }
}

/// 一个模块（板卡）在某数据集中的输入
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// 板卡标识，例如 `PMA0`
    pub identifier: String,
    pub path: PathBuf,
    pub channels: Vec<ChannelMapping>,
    /// 参考通道序号（可为空，此时借用数据集参考模块）
    pub reference_channels: Vec<u32>,
}

impl ModuleDescriptor {
    pub fn new(identifier: impl Into<String>, path: impl Into<PathBuf>, channel_count: u32) -> Self {
        Self {
            identifier: identifier.into(),
            path: path.into(),
            channels: ChannelMapping::standard_layout(channel_count),
            reference_channels: Vec::new(),
        }
    }

    pub fn with_reference_channels(mut self, channels: Vec<u32>) -> Self {
        self.reference_channels = channels;
        self
    }
}

/// 一次测量（一个日期）的输入
#[derive(Debug, Clone)]
pub struct DatasetDescriptor {
    pub date: NaiveDate,
    pub modules: Vec<ModuleDescriptor>,
    /// 未指定参考通道的模块借用此模块的参考均值
    pub reference_module: Option<String>,
    pub validate_header: bool,
    /// 数据集级电荷富集输入
    pub charge: Option<ChargeSource>,
}

impl DatasetDescriptor {
    pub fn new(date: NaiveDate, modules: Vec<ModuleDescriptor>) -> Self {
        Self {
            date,
            modules,
            reference_module: None,
            validate_header: false,
            charge: None,
        }
    }

    /// 所有声明的通道键（按模块、通道顺序）
    pub fn declared_channels(&self) -> Vec<ChannelKey> {
        self.modules
            .iter()
            .flat_map(|module| {
                module
                    .channels
                    .iter()
                    .map(|mapping| ChannelKey::new(module.identifier.clone(), mapping.channel))
            })
            .collect()
    }
}

/// 整个分析活动的输入
#[derive(Debug, Clone, Default)]
pub struct CampaignDescriptor {
    pub datasets: Vec<DatasetDescriptor>,
    /// 显式指定的基准日期；缺省为最早的数据集
    pub baseline: Option<NaiveDate>,
    /// 活动级累积电荷输入
    pub cumulative_charge: Option<CumulativeChargeSource>,
}

// ==================== 电荷富集输入 ====================

/// 时间序列中的单个采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// 积分窗口（两端包含）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ChargeWindow {
    #[inline]
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t <= self.end
    }

    /// 左开右闭 `(start, end]`，用于首尾相接的累积窗口
    #[inline]
    pub fn contains_half_open(&self, t: NaiveDateTime) -> bool {
        t > self.start && t <= self.end
    }
}

/// 速率修正乘数变化点：从 `from` 起生效
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiplierChange {
    pub from: NaiveDateTime,
    pub multiplier: f64,
}

/// 分段常数的速率修正乘数
#[derive(Debug, Clone, PartialEq)]
pub struct RateCorrection {
    /// 首个变化点之前生效的乘数
    pub multiplier: f64,
    pub changes: Vec<MultiplierChange>,
}

impl RateCorrection {
    pub fn constant(multiplier: f64) -> Self {
        Self {
            multiplier,
            changes: Vec::new(),
        }
    }

    /// 时刻 `t` 生效的乘数
    pub fn multiplier_at(&self, t: NaiveDateTime) -> f64 {
        self.changes
            .iter()
            .filter(|change| change.from <= t)
            .max_by_key(|change| change.from)
            .map_or(self.multiplier, |change| change.multiplier)
    }
}

/// 数据集级电荷输入
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeSource {
    /// 对每通道时间序列在窗口内积分
    Samples {
        window: ChargeWindow,
        correction: Option<RateCorrection>,
        series: BTreeMap<ChannelKey, Vec<RateSample>>,
    },
    /// 已预先计算好的积分电荷
    Precomputed(BTreeMap<ChannelKey, f64>),
}

/// 活动级累积电荷输入：每通道一条覆盖整个活动的时间序列
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeChargeSource {
    pub series: BTreeMap<ChannelKey, Vec<RateSample>>,
    pub correction: Option<RateCorrection>,
    /// 每天的积分锚点时刻（小时），相邻数据集之间按锚点切分窗口
    pub anchor_hour: u32,
    /// 序列为CFD触发率时把积分换算为电荷（库仑）
    pub convert_to_charge: bool,
}

impl CumulativeChargeSource {
    /// 默认锚点（正午）、无速率修正、换算为电荷
    pub fn new(series: BTreeMap<ChannelKey, Vec<RateSample>>) -> Self {
        Self {
            series,
            correction: None,
            anchor_hour: crate::tools::constants::charge::INTEGRATION_ANCHOR_HOUR,
            convert_to_charge: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paired_mapping() {
        // 通道1 -> 数据列0,1；通道12 -> 数据列22,23
        assert_eq!(ChannelMapping::paired(1).columns, vec![0, 1]);
        assert_eq!(ChannelMapping::paired(12).columns, vec![22, 23]);
        assert_eq!(ChannelMapping::standard_layout(12).len(), 12);
    }

    #[test]
    fn test_channel_key_name() {
        let key = ChannelKey::new("PMA0", 3);
        assert_eq!(key.channel_name(), "CH03");
        assert_eq!(key.to_string(), "PMA0/CH03");
    }

    #[test]
    fn test_multiplier_at() {
        let t = |h: u32| {
            NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
        };
        let correction = RateCorrection {
            multiplier: 1.0,
            changes: vec![
                MultiplierChange { from: t(12), multiplier: 3.0 },
                MultiplierChange { from: t(6), multiplier: 2.0 },
            ],
        };
        assert_eq!(correction.multiplier_at(t(1)), 1.0);
        assert_eq!(correction.multiplier_at(t(6)), 2.0);
        assert_eq!(correction.multiplier_at(t(11)), 2.0);
        assert_eq!(correction.multiplier_at(t(20)), 3.0);
    }
}
