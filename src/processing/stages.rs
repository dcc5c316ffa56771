//! 流水线各阶段
//!
//! 每个阶段只读取上一阶段的不可变输出并产出新的记录：
//! 解析 → 拟合 → 参考均值 → 原始老化因子（逐数据集），
//! 然后跨数据集归一化，电荷富集独立计算后合并到同一通道记录。

use super::progress::CancellationToken;
use crate::core::ageing;
use crate::core::charge;
use crate::core::normalizer;
use crate::core::reference::{self, ReferenceCandidate, ReferencePolicy};
use crate::core::{ChannelEstimate, GaussianFitter};
use crate::input::{ChannelDistribution, ParsedDataset};
use crate::model::{
    AgeingFactors, CampaignDescriptor, ChannelKey, ChannelRecord, ChargeRecord, ChargeSource,
    DatasetDescriptor, DatasetResult, DatasetStatus, Factor, ModuleResult, ReferenceMean,
    UnavailableReason,
};
use chrono::NaiveDate;
use rayon::ThreadPool;
use rayon::prelude::*;
use std::collections::BTreeMap;

// ==================== 中间记录 ====================

/// 拟合阶段输出的单通道记录
#[derive(Debug, Clone, PartialEq)]
pub struct FittedChannel {
    pub key: ChannelKey,
    pub is_reference: bool,
    pub dropped_rows: usize,
    pub estimate: ChannelEstimate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedModule {
    pub identifier: String,
    pub reference_channels: Vec<u32>,
    pub channels: Vec<FittedChannel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedDataset {
    pub date: NaiveDate,
    pub reference_module: Option<String>,
    pub modules: Vec<FittedModule>,
}

/// 一个模块两个估计量家族的参考均值
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleReferences {
    pub gaussian: ReferenceMean,
    pub weighted: ReferenceMean,
}

impl ModuleReferences {
    fn unavailable(module: &str, reason: UnavailableReason) -> Self {
        Self {
            gaussian: ReferenceMean::unavailable(module, reason.clone()),
            weighted: ReferenceMean::unavailable(module, reason),
        }
    }
}

/// 完成逐数据集阶段的数据集
#[derive(Debug, Clone, PartialEq)]
pub struct AgedDataset {
    pub fitted: FittedDataset,
    pub references: Vec<ModuleReferences>,
    /// 与 `fitted.modules[i].channels[j]` 一一对应
    pub factors: Vec<Vec<AgeingFactors>>,
}

/// 声明但未能处理的模块
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredModule {
    pub identifier: String,
    pub channels: Vec<u32>,
    pub reference_channels: Vec<u32>,
}

/// 逐数据集阶段的结果
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetOutcome {
    Processed(AgedDataset),
    /// 结构性输入错误：该数据集所有声明通道都标记为不可用
    Failed {
        date: NaiveDate,
        modules: Vec<DeclaredModule>,
        reason: String,
    },
}

impl DatasetOutcome {
    pub fn failed(descriptor: &DatasetDescriptor, reason: String) -> Self {
        Self::Failed {
            date: descriptor.date,
            modules: descriptor
                .modules
                .iter()
                .map(|module| DeclaredModule {
                    identifier: module.identifier.clone(),
                    channels: module.channels.iter().map(|m| m.channel).collect(),
                    reference_channels: module.reference_channels.clone(),
                })
                .collect(),
            reason,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Processed(aged) => aged.fitted.date,
            Self::Failed { date, .. } => *date,
        }
    }

    /// 每个通道的原始因子（两个家族）
    fn raw_factors(&self) -> BTreeMap<ChannelKey, AgeingFactors> {
        match self {
            Self::Processed(aged) => aged
                .fitted
                .modules
                .iter()
                .zip(&aged.factors)
                .flat_map(|(module, factors)| {
                    module
                        .channels
                        .iter()
                        .zip(factors)
                        .map(|(channel, factors)| (channel.key.clone(), factors.clone()))
                })
                .collect(),
            Self::Failed {
                modules, reason, ..
            } => modules
                .iter()
                .flat_map(|module| {
                    module.channels.iter().map(|&channel| {
                        (
                            ChannelKey::new(module.identifier.clone(), channel),
                            AgeingFactors::unavailable(UnavailableReason::DatasetFailed(
                                reason.clone(),
                            )),
                        )
                    })
                })
                .collect(),
        }
    }
}

// ==================== 拟合阶段 ====================

/// 拟合一个数据集的全部通道；取消时返回 None
///
/// 通道之间轮询取消标志；给定线程池时模块内通道并行拟合，输出顺序与输入一致。
pub fn fit_stage(
    parsed: &ParsedDataset,
    fitter: &GaussianFitter,
    pool: Option<&ThreadPool>,
    cancel: &CancellationToken,
) -> Option<FittedDataset> {
    let fit_one = |distribution: &ChannelDistribution| -> Option<FittedChannel> {
        if cancel.is_cancelled() {
            return None;
        }
        Some(FittedChannel {
            key: distribution.key.clone(),
            is_reference: distribution.is_reference,
            dropped_rows: distribution.dropped_rows,
            estimate: fitter.estimate(distribution),
        })
    };

    let mut modules = Vec::with_capacity(parsed.modules.len());
    for module in &parsed.modules {
        let channels: Option<Vec<FittedChannel>> = match pool {
            Some(pool) => pool.install(|| module.channels.par_iter().map(&fit_one).collect()),
            None => module.channels.iter().map(&fit_one).collect(),
        };
        modules.push(FittedModule {
            identifier: module.identifier.clone(),
            reference_channels: module.reference_channels.clone(),
            channels: channels?,
        });
    }

    Some(FittedDataset {
        date: parsed.date,
        reference_module: parsed.reference_module.clone(),
        modules,
    })
}

// ==================== 参考阶段 ====================

/// 为每个模块计算参考均值；未指定参考通道的模块借用数据集参考模块
pub fn reference_stage(fitted: &FittedDataset, policy: &ReferencePolicy) -> Vec<ModuleReferences> {
    let own: Vec<Option<ModuleReferences>> = fitted
        .modules
        .iter()
        .map(|module| {
            if module.reference_channels.is_empty() {
                return None;
            }
            let references = module.channels.iter().filter(|channel| channel.is_reference);

            let gaussian: Vec<ReferenceCandidate> = references
                .clone()
                .map(|channel| ReferenceCandidate {
                    channel: channel.key.channel,
                    position: channel.estimate.fit.usable_position(),
                    weight: channel.estimate.fit.amplitude.unwrap_or(0.0),
                })
                .collect();
            let weighted: Vec<ReferenceCandidate> = references
                .map(|channel| ReferenceCandidate {
                    channel: channel.key.channel,
                    position: channel.estimate.weighted_mean,
                    weight: channel.estimate.total_counts,
                })
                .collect();

            Some(ModuleReferences {
                gaussian: reference::resolve_reference_mean(&module.identifier, &gaussian, policy),
                weighted: reference::resolve_reference_mean(&module.identifier, &weighted, policy),
            })
        })
        .collect();

    let lender: Option<&ModuleReferences> = fitted.reference_module.as_ref().and_then(|id| {
        fitted
            .modules
            .iter()
            .position(|module| &module.identifier == id)
            .and_then(|index| own[index].as_ref())
    });

    fitted
        .modules
        .iter()
        .zip(&own)
        .map(|(module, references)| match (references, lender) {
            (Some(references), _) => references.clone(),
            (None, Some(lender)) => {
                tracing::debug!(
                    module = %module.identifier,
                    lender = %lender.gaussian.source_module,
                    "借用参考模块均值 / borrowing reference module mean"
                );
                lender.clone()
            }
            (None, None) => ModuleReferences::unavailable(
                &module.identifier,
                UnavailableReason::ReferenceUnavailable(
                    "no reference channels designated".to_string(),
                ),
            ),
        })
        .collect()
}

// ==================== 老化因子阶段 ====================

/// 逐通道计算原始老化因子（纯函数，与通道顺序无关）
pub fn ageing_stage(
    fitted: &FittedDataset,
    references: &[ModuleReferences],
) -> Vec<Vec<AgeingFactors>> {
    fitted
        .modules
        .iter()
        .zip(references)
        .map(|(module, references)| {
            module
                .channels
                .iter()
                .map(|channel| AgeingFactors {
                    gaussian: ageing::gaussian_factor(&channel.estimate.fit, &references.gaussian),
                    weighted: ageing::weighted_factor(
                        channel.estimate.weighted_mean,
                        &references.weighted,
                    ),
                })
                .collect()
        })
        .collect()
}

// ==================== 归一化阶段 ====================

/// 两个家族各自的 通道 → 归一化因子 表，按数据集顺序
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFactors {
    pub gaussian: Vec<BTreeMap<ChannelKey, Factor>>,
    pub weighted: Vec<BTreeMap<ChannelKey, Factor>>,
}

impl NormalizedFactors {
    fn get(&self, dataset: usize, key: &ChannelKey) -> AgeingFactors {
        let lookup = |maps: &[BTreeMap<ChannelKey, Factor>]| {
            maps.get(dataset)
                .and_then(|map| map.get(key))
                .cloned()
                .unwrap_or_else(|| Factor::unavailable(UnavailableReason::ChannelAbsent))
        };
        AgeingFactors {
            gaussian: lookup(&self.gaussian),
            weighted: lookup(&self.weighted),
        }
    }
}

pub fn normalization_stage(outcomes: &[DatasetOutcome], baseline: usize) -> NormalizedFactors {
    let raw: Vec<BTreeMap<ChannelKey, AgeingFactors>> =
        outcomes.iter().map(DatasetOutcome::raw_factors).collect();

    let family = |select: fn(&AgeingFactors) -> &Factor| -> Vec<BTreeMap<ChannelKey, Factor>> {
        let series: Vec<BTreeMap<ChannelKey, Factor>> = raw
            .iter()
            .map(|dataset| {
                dataset
                    .iter()
                    .map(|(key, factors)| (key.clone(), select(factors).clone()))
                    .collect()
            })
            .collect();
        normalizer::normalize_campaign(&series, baseline)
    };

    NormalizedFactors {
        gaussian: family(gaussian_of),
        weighted: family(weighted_of),
    }
}

fn gaussian_of(factors: &AgeingFactors) -> &Factor {
    &factors.gaussian
}

fn weighted_of(factors: &AgeingFactors) -> &Factor {
    &factors.weighted
}

// ==================== 电荷富集阶段 ====================

/// 为每个数据集计算电荷记录；没有富集输入时为空表
pub fn enrichment_stage(campaign: &CampaignDescriptor) -> Vec<BTreeMap<ChannelKey, ChargeRecord>> {
    let keys: Vec<Vec<ChannelKey>> = campaign
        .datasets
        .iter()
        .map(DatasetDescriptor::declared_channels)
        .collect();
    let dates: Vec<NaiveDate> = campaign.datasets.iter().map(|d| d.date).collect();

    let cumulative = campaign
        .cumulative_charge
        .as_ref()
        .map(|source| charge::cumulative_charges(&dates, &keys, source));

    campaign
        .datasets
        .iter()
        .enumerate()
        .map(|(index, dataset)| match &dataset.charge {
            Some(ChargeSource::Samples {
                window,
                correction,
                series,
            }) => charge::window_charges(&keys[index], series, window, correction.as_ref()),
            Some(ChargeSource::Precomputed(values)) => {
                charge::precomputed_charges(&keys[index], values)
            }
            None => cumulative
                .as_ref()
                .and_then(|records| records.get(index).cloned())
                .unwrap_or_default(),
        })
        .collect()
}

// ==================== 结果组装 ====================

/// 把逐数据集结果、归一化因子与电荷记录合并成输出记录
pub fn assemble_dataset(
    index: usize,
    outcome: &DatasetOutcome,
    normalized: &NormalizedFactors,
    charges: &BTreeMap<ChannelKey, ChargeRecord>,
    is_baseline: bool,
) -> DatasetResult {
    match outcome {
        DatasetOutcome::Processed(aged) => {
            let modules = aged
                .fitted
                .modules
                .iter()
                .zip(&aged.references)
                .zip(&aged.factors)
                .map(|((module, references), factors)| ModuleResult {
                    identifier: module.identifier.clone(),
                    reference: references.gaussian.clone(),
                    weighted_reference: references.weighted.clone(),
                    channels: module
                        .channels
                        .iter()
                        .zip(factors)
                        .map(|(channel, raw)| ChannelRecord {
                            module: channel.key.module.clone(),
                            channel: channel.key.channel,
                            name: channel.key.channel_name(),
                            is_reference: channel.is_reference,
                            dropped_rows: channel.dropped_rows,
                            fit: Some(channel.estimate.fit.clone()),
                            weighted_mean: channel.estimate.weighted_mean,
                            raw: raw.clone(),
                            normalized: normalized.get(index, &channel.key),
                            charge: charges.get(&channel.key).cloned(),
                        })
                        .collect(),
                })
                .collect();

            DatasetResult {
                date: aged.fitted.date,
                is_baseline,
                status: DatasetStatus::Complete,
                modules,
            }
        }
        DatasetOutcome::Failed {
            date,
            modules,
            reason,
        } => {
            let failed = || UnavailableReason::DatasetFailed(reason.clone());
            let modules = modules
                .iter()
                .map(|module| ModuleResult {
                    identifier: module.identifier.clone(),
                    reference: ReferenceMean::unavailable(&module.identifier, failed()),
                    weighted_reference: ReferenceMean::unavailable(&module.identifier, failed()),
                    channels: module
                        .channels
                        .iter()
                        .map(|&channel| {
                            let key = ChannelKey::new(module.identifier.clone(), channel);
                            ChannelRecord {
                                module: module.identifier.clone(),
                                channel,
                                name: key.channel_name(),
                                is_reference: module.reference_channels.contains(&channel),
                                dropped_rows: 0,
                                fit: None,
                                weighted_mean: None,
                                raw: AgeingFactors::unavailable(failed()),
                                normalized: normalized.get(index, &key),
                                charge: charges.get(&key).cloned(),
                            }
                        })
                        .collect(),
                })
                .collect();

            DatasetResult {
                date: *date,
                is_baseline,
                status: DatasetStatus::Failed {
                    reason: reason.clone(),
                },
                modules,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FitQuality, FitResult, FitSource};

    fn converged(position: f64) -> FitResult {
        FitResult {
            quality: FitQuality::Converged,
            peak_position: Some(position),
            peak_width: Some(5.0),
            amplitude: Some(100.0),
            iterations: 4,
            normalized_rmse: Some(0.01),
            reason: None,
            source: FitSource::Signal,
        }
    }

    fn channel(module: &str, channel: u32, is_reference: bool, fit: FitResult) -> FittedChannel {
        let weighted_mean = fit.peak_position;
        FittedChannel {
            key: ChannelKey::new(module, channel),
            is_reference,
            dropped_rows: 0,
            estimate: ChannelEstimate {
                fit,
                weighted_mean,
                total_counts: 1000.0,
            },
        }
    }

    fn dataset(modules: Vec<FittedModule>, reference_module: Option<&str>) -> FittedDataset {
        FittedDataset {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            reference_module: reference_module.map(str::to_string),
            modules,
        }
    }

    #[test]
    fn test_all_reference_channels_failed_marks_module_unavailable() {
        let module = FittedModule {
            identifier: "PMA0".to_string(),
            reference_channels: vec![1, 2],
            channels: vec![
                channel("PMA0", 1, true, FitResult::failed("empty distribution", 0)),
                channel("PMA0", 2, true, FitResult::failed("empty distribution", 0)),
                channel("PMA0", 3, false, converged(95.0)),
            ],
        };
        let fitted = dataset(vec![module], None);
        let references = reference_stage(&fitted, &ReferencePolicy::default());
        let factors = ageing_stage(&fitted, &references);

        assert!(!references[0].gaussian.value.is_available());
        assert!(factors[0].iter().all(|f| !f.gaussian.is_available()));
        assert!(factors[0].iter().all(|f| matches!(
            f.gaussian.reason(),
            Some(UnavailableReason::ReferenceUnavailable(_))
        )));
    }

    #[test]
    fn test_module_without_references_borrows_reference_module() {
        let reference_module = FittedModule {
            identifier: "PMA0".to_string(),
            reference_channels: vec![1],
            channels: vec![channel("PMA0", 1, true, converged(100.0))],
        };
        let plain = FittedModule {
            identifier: "PMC1".to_string(),
            reference_channels: Vec::new(),
            channels: vec![channel("PMC1", 1, false, converged(90.0))],
        };

        let borrowed = dataset(vec![reference_module.clone(), plain.clone()], Some("PMA0"));
        let references = reference_stage(&borrowed, &ReferencePolicy::default());
        assert_eq!(references[1].gaussian.source_module, "PMA0");
        let factors = ageing_stage(&borrowed, &references);
        assert_eq!(factors[1][0].gaussian.as_f64(), Some(0.9));

        let isolated = dataset(vec![reference_module, plain], None);
        let references = reference_stage(&isolated, &ReferencePolicy::default());
        assert!(!references[1].gaussian.value.is_available());
    }
}
