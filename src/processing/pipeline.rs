//! 老化分析流水线
//!
//! 按时间顺序逐个数据集执行 解析 → 拟合 → 参考均值 → 原始老化因子，
//! 然后做跨数据集归一化与电荷富集，最后组装 `CampaignResult`。
//! 单个数据集的结构性输入错误只让该数据集失败，其余数据集照常处理。

use super::progress::{CancellationToken, NullProgress, ProgressEvent, ProgressSink, Stage};
use super::stages::{self, AgedDataset, DatasetOutcome};
use crate::core::GaussianFitter;
use crate::core::normalizer;
use crate::error::{AnalysisError, AnalysisResult, resource_error};
use crate::input;
use crate::model::{CampaignDescriptor, CampaignResult, DatasetDescriptor};
use crate::tools::config::AnalysisConfig;
use crate::tools::utils;
use chrono::NaiveDate;
use rayon::ThreadPool;
use std::collections::BTreeMap;

/// 逐数据集阶段占总进度的比例
const PER_DATASET_SHARE: f64 = 0.85;
const NORMALIZATION_FRACTION: f64 = 0.9;
const ENRICHMENT_FRACTION: f64 = 0.95;

/// 老化分析流水线
///
/// 持有配置、拟合器与（可选的）rayon线程池；同一个流水线可以重复运行，
/// 相同输入与配置得到逐位相同的结果。
pub struct Pipeline {
    config: AnalysisConfig,
    fitter: GaussianFitter,
    pool: Option<ThreadPool>,
}

impl Pipeline {
    pub fn new(config: AnalysisConfig) -> AnalysisResult<Self> {
        let fitter = GaussianFitter::new(config.fit.clone(), config.quality.clone());

        let pool = if config.parallel.enabled {
            let threads = utils::effective_parallel_degree(config.parallel.threads);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("ageing-worker-{i}"))
                .build()
                .map_err(|e| resource_error("线程池创建失败 / thread pool creation failed", e))?;
            tracing::debug!(threads, "通道拟合线程池已创建 / fitting pool ready");
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            config,
            fitter,
            pool,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// 同步运行，不报告进度、不可取消
    pub fn run(&self, campaign: &CampaignDescriptor) -> AnalysisResult<CampaignResult> {
        self.run_with(campaign, &NullProgress, &CancellationToken::new())
    }

    /// 同步运行，向 `progress` 报告阶段切换并轮询 `cancel`
    ///
    /// 事件序列总以恰好一个终态事件结束（COMPLETED / CANCELLED / FAILED）。
    pub fn run_with(
        &self,
        campaign: &CampaignDescriptor,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> AnalysisResult<CampaignResult> {
        match self.execute(campaign, progress, cancel) {
            Ok(result) => {
                progress.emit(ProgressEvent::new(Stage::Completed, 1.0, None));
                Ok(result)
            }
            Err(AnalysisError::Cancelled) => {
                tracing::info!("分析已取消 / analysis cancelled");
                progress.emit(ProgressEvent::new(Stage::Cancelled, 1.0, None));
                Err(AnalysisError::Cancelled)
            }
            Err(e) => {
                progress.emit(ProgressEvent::new(Stage::Failed, 1.0, Some(e.to_string())));
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        campaign: &CampaignDescriptor,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> AnalysisResult<CampaignResult> {
        let campaign = chronological(campaign)?;
        if campaign.datasets.is_empty() {
            return Ok(CampaignResult {
                baseline: None,
                datasets: Vec::new(),
            });
        }

        let dates: Vec<NaiveDate> = campaign.datasets.iter().map(|d| d.date).collect();
        let baseline = normalizer::select_baseline(&dates, campaign.baseline)?;
        tracing::info!(
            datasets = dates.len(),
            baseline = %dates[baseline],
            "开始老化分析 / starting ageing analysis"
        );

        let total = campaign.datasets.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, dataset) in campaign.datasets.iter().enumerate() {
            check_cancelled(cancel)?;
            outcomes.push(self.process_dataset(index, total, dataset, progress, cancel)?);
        }

        check_cancelled(cancel)?;
        progress.emit(ProgressEvent::new(Stage::Normalization, NORMALIZATION_FRACTION, None));
        let normalized = stages::normalization_stage(&outcomes, baseline);

        check_cancelled(cancel)?;
        progress.emit(ProgressEvent::new(Stage::Enrichment, ENRICHMENT_FRACTION, None));
        let charges = stages::enrichment_stage(&campaign);

        let empty = BTreeMap::new();
        let datasets = outcomes
            .iter()
            .enumerate()
            .map(|(index, outcome)| {
                stages::assemble_dataset(
                    index,
                    outcome,
                    &normalized,
                    charges.get(index).unwrap_or(&empty),
                    index == baseline,
                )
            })
            .collect();

        Ok(CampaignResult {
            baseline: Some(dates[baseline]),
            datasets,
        })
    }

    /// 单个数据集的 解析 → 拟合 → 参考 → 老化因子
    fn process_dataset(
        &self,
        index: usize,
        total: usize,
        dataset: &DatasetDescriptor,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> AnalysisResult<DatasetOutcome> {
        let share = PER_DATASET_SHARE / total as f64;
        let start = share * index as f64;
        let emit = |stage: Stage, offset: f64| {
            progress.emit(ProgressEvent::new(
                stage,
                start + share * offset,
                Some(dataset.date.to_string()),
            ));
        };

        emit(Stage::Parsing, 0.0);
        let parsed = match input::parse_dataset(dataset, &self.config.parser) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(
                    date = %dataset.date,
                    error = %e,
                    "数据集处理失败，继续处理其余数据集 / dataset failed, continuing"
                );
                return Ok(DatasetOutcome::failed(dataset, e.to_string()));
            }
        };

        emit(Stage::Fitting, 0.1);
        let fitted = stages::fit_stage(&parsed, &self.fitter, self.pool.as_ref(), cancel)
            .ok_or(AnalysisError::Cancelled)?;
        check_cancelled(cancel)?;

        emit(Stage::ReferenceResolution, 0.8);
        let references = stages::reference_stage(&fitted, &self.config.reference);

        emit(Stage::AgeingCalculation, 0.9);
        let factors = stages::ageing_stage(&fitted, &references);

        tracing::debug!(date = %dataset.date, "数据集处理完成 / dataset processed");
        Ok(DatasetOutcome::Processed(AgedDataset {
            fitted,
            references,
            factors,
        }))
    }
}

#[inline]
fn check_cancelled(cancel: &CancellationToken) -> AnalysisResult<()> {
    if cancel.is_cancelled() {
        Err(AnalysisError::Cancelled)
    } else {
        Ok(())
    }
}

/// 按日期升序排列数据集；重复日期视为配置错误
fn chronological(campaign: &CampaignDescriptor) -> AnalysisResult<CampaignDescriptor> {
    let mut ordered = campaign.clone();
    ordered.datasets.sort_by_key(|dataset| dataset.date);

    if let Some(pair) = ordered
        .datasets
        .windows(2)
        .find(|pair| pair[0].date == pair[1].date)
    {
        return Err(AnalysisError::Config(format!(
            "数据集日期重复 / duplicate dataset date: {}",
            pair[0].date
        )));
    }
    Ok(ordered)
}
