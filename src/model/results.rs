//! 流水线输出记录
//!
//! 结果树：`CampaignResult → DatasetResult → ModuleResult → ChannelRecord`。
//! 所有记录构造后不再修改；每个阶段产出新的记录。

use super::availability::{Factor, UnavailableReason};
use super::descriptor::ChannelKey;
use chrono::NaiveDate;
use serde::Serialize;

/// 拟合质量标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FitQuality {
    Converged,
    Failed,
    LowQuality,
}

impl FitQuality {
    /// CONVERGED 与 LOW_QUALITY 均参与参考聚合与老化计算
    #[inline]
    pub fn is_usable(self) -> bool {
        !matches!(self, Self::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Converged => "CONVERGED",
            Self::Failed => "FAILED",
            Self::LowQuality => "LOW_QUALITY",
        }
    }
}

/// 产生拟合结果的数据区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitSource {
    Signal,
    Noise,
}

/// 单通道峰值拟合结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitResult {
    pub quality: FitQuality,
    /// FAILED 时为 None
    pub peak_position: Option<f64>,
    pub peak_width: Option<f64>,
    pub amplitude: Option<f64>,
    pub iterations: usize,
    /// √(SSE/n)/A
    pub normalized_rmse: Option<f64>,
    /// FAILED / LOW_QUALITY 的原因
    pub reason: Option<String>,
    pub source: FitSource,
}

impl FitResult {
    pub fn failed(reason: impl Into<String>, iterations: usize) -> Self {
        Self {
            quality: FitQuality::Failed,
            peak_position: None,
            peak_width: None,
            amplitude: None,
            iterations,
            normalized_rmse: None,
            reason: Some(reason.into()),
            source: FitSource::Signal,
        }
    }

    pub fn with_source(mut self, source: FitSource) -> Self {
        self.source = source;
        self
    }

    /// 可参与下游计算的峰位
    #[inline]
    pub fn usable_position(&self) -> Option<f64> {
        if self.quality.is_usable() {
            self.peak_position
        } else {
            None
        }
    }

    pub fn failure_reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "unspecified".to_string())
    }
}

/// 一个模块在一个数据集中的参考均值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceMean {
    pub value: Factor,
    /// 提供参考通道的模块（借用参考模块时与所属模块不同）
    pub source_module: String,
    pub contributing_channels: Vec<u32>,
    pub excluded_channels: Vec<u32>,
}

impl ReferenceMean {
    pub fn unavailable(source_module: impl Into<String>, reason: UnavailableReason) -> Self {
        Self {
            value: Factor::unavailable(reason),
            source_module: source_module.into(),
            contributing_channels: Vec::new(),
            excluded_channels: Vec::new(),
        }
    }
}

/// 两个估计量家族的老化因子：高斯拟合峰位、计数加权均值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeingFactors {
    pub gaussian: Factor,
    pub weighted: Factor,
}

impl AgeingFactors {
    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self {
            gaussian: Factor::unavailable(reason.clone()),
            weighted: Factor::unavailable(reason),
        }
    }
}

/// 电荷积分状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Measured,
    /// 窗口内没有任何采样，电荷记为0
    NoData,
}

/// 电荷数值来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeOrigin {
    Window,
    Cumulative,
    Precomputed,
}

/// 单通道单数据集的电荷富集结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeRecord {
    pub integrated_charge: f64,
    pub rate_corrected_charge: Option<f64>,
    pub samples_used: usize,
    pub status: ChargeStatus,
    pub origin: ChargeOrigin,
}

impl ChargeRecord {
    pub fn no_data(origin: ChargeOrigin, with_correction: bool) -> Self {
        Self {
            integrated_charge: 0.0,
            rate_corrected_charge: with_correction.then_some(0.0),
            samples_used: 0,
            status: ChargeStatus::NoData,
            origin,
        }
    }
}

/// 单通道完整记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRecord {
    pub module: String,
    pub channel: u32,
    /// 规范化名称，例如 `CH01`
    pub name: String,
    pub is_reference: bool,
    pub dropped_rows: usize,
    /// 数据集失败时为 None
    pub fit: Option<FitResult>,
    pub weighted_mean: Option<f64>,
    pub raw: AgeingFactors,
    pub normalized: AgeingFactors,
    pub charge: Option<ChargeRecord>,
}

impl ChannelRecord {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.module.clone(), self.channel)
    }
}

/// 单模块结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleResult {
    pub identifier: String,
    pub reference: ReferenceMean,
    pub weighted_reference: ReferenceMean,
    pub channels: Vec<ChannelRecord>,
}

/// 数据集处理状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetStatus {
    Complete,
    Failed { reason: String },
}

/// 单数据集结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetResult {
    pub date: NaiveDate,
    pub is_baseline: bool,
    pub status: DatasetStatus,
    pub modules: Vec<ModuleResult>,
}

impl DatasetResult {
    pub fn channels(&self) -> impl Iterator<Item = &ChannelRecord> {
        self.modules.iter().flat_map(|module| module.channels.iter())
    }

    pub fn channel(&self, module: &str, channel: u32) -> Option<&ChannelRecord> {
        self.channels()
            .find(|record| record.module == module && record.channel == channel)
    }

    pub fn module(&self, identifier: &str) -> Option<&ModuleResult> {
        self.modules.iter().find(|module| module.identifier == identifier)
    }
}

/// 整个活动的结果，数据集按日期升序
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignResult {
    pub baseline: Option<NaiveDate>,
    pub datasets: Vec<DatasetResult>,
}

impl CampaignResult {
    pub fn dataset(&self, date: NaiveDate) -> Option<&DatasetResult> {
        self.datasets.iter().find(|dataset| dataset.date == date)
    }

    /// 某通道按时间顺序的记录序列（缺失的数据集为 None）
    pub fn channel_series(&self, module: &str, channel: u32) -> Vec<Option<&ChannelRecord>> {
        self.datasets
            .iter()
            .map(|dataset| dataset.channel(module, channel))
            .collect()
    }
}
