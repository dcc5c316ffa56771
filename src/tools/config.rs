//! 配置加载模块
//!
//! 两类配置：
//! - 分析参数（TOML）：解析、拟合、质量阈值、参考加权与并行度，所有字段都有默认值；
//! - 活动描述（JSON）：数据集日期、目录、模块文件、参考通道与电荷富集输入。

use super::constants::detector;
use super::scanner;
use crate::core::{FitConfig, QualityPolicy, ReferencePolicy};
use crate::error::{AnalysisError, AnalysisResult, config_error};
use crate::input::{self, ParserConfig};
use crate::model::{
    CampaignDescriptor, ChannelKey, ChargeSource, CumulativeChargeSource, DatasetDescriptor,
    ModuleDescriptor, MultiplierChange, RateCorrection,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ==================== 分析参数 ====================

/// 通道拟合并行配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,
    /// 未指定时使用可用CPU核心数
    pub threads: Option<usize>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threads: None,
        }
    }
}

/// 分析参数总配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub parser: ParserConfig,
    pub fit: FitConfig,
    pub quality: QualityPolicy,
    pub reference: ReferencePolicy,
    pub parallel: ParallelConfig,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> AnalysisResult<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// 从TOML文件加载分析参数
pub fn load_analysis_config(path: &Path) -> AnalysisResult<AnalysisConfig> {
    let text = fs::read_to_string(path)
        .map_err(|e| config_error(&format!("无法读取配置文件 {}", path.display()), e))?;
    AnalysisConfig::from_toml_str(&text)
}

// ==================== 活动描述文件 ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CampaignFile {
    #[serde(default)]
    base_path: Option<PathBuf>,
    inputs: Vec<InputGroup>,
    #[serde(default)]
    baseline: Option<NaiveDate>,
    #[serde(default)]
    channels_per_module: Option<u32>,
    #[serde(default)]
    rate_series: Option<RateSeriesFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputGroup {
    date: NaiveDate,
    #[serde(default)]
    base_path: Option<PathBuf>,
    /// 模块标识 → 文件名；为空时扫描数据集目录
    #[serde(default)]
    files: BTreeMap<String, String>,
    #[serde(default, rename = "refCH")]
    ref_ch: Option<ReferenceChannels>,
    #[serde(default)]
    validate_header: bool,
    /// 模块 → 通道 → 积分电荷
    #[serde(default)]
    integrated_charge: Option<BTreeMap<String, BTreeMap<String, f64>>>,
}

#[derive(Debug, Deserialize)]
struct ReferenceChannels {
    #[serde(rename = "PM")]
    module: Option<String>,
    #[serde(rename = "CH", default)]
    channels: Vec<ChannelName>,
}

/// 通道既可以写成数字也可以写成 "CH01" 之类的名称
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChannelName {
    Number(u32),
    Name(String),
}

impl ChannelName {
    fn resolve(&self) -> AnalysisResult<u32> {
        match self {
            Self::Number(n) if *n > 0 => Ok(*n),
            Self::Number(n) => Err(AnalysisError::Config(format!(
                "通道编号必须从1开始 / channel numbers start at 1, got {n}"
            ))),
            Self::Name(name) => input::parse_channel_name(name).ok_or_else(|| {
                AnalysisError::Config(format!("无法识别的通道名 / unrecognised channel: {name}"))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateSeriesFile {
    path: PathBuf,
    #[serde(default)]
    multiplier: Option<f64>,
    #[serde(default)]
    changes: Vec<MultiplierChangeFile>,
    #[serde(default)]
    anchor_hour: Option<u32>,
    #[serde(default)]
    convert_to_charge: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MultiplierChangeFile {
    from: NaiveDateTime,
    multiplier: f64,
}

/// 加载活动描述文件；相对路径以该文件所在目录为根
pub fn load_campaign(path: &Path) -> AnalysisResult<CampaignDescriptor> {
    let text = fs::read_to_string(path)
        .map_err(|e| config_error(&format!("无法读取活动文件 {}", path.display()), e))?;
    let root = path.parent().unwrap_or_else(|| Path::new("."));
    parse_campaign(&text, root)
}

/// 解析活动描述JSON
pub fn parse_campaign(text: &str, root: &Path) -> AnalysisResult<CampaignDescriptor> {
    let file: CampaignFile = serde_json::from_str(text)?;
    let global = match &file.base_path {
        Some(base) => root.join(base),
        None => root.to_path_buf(),
    };
    let channel_count = file
        .channels_per_module
        .unwrap_or(detector::CHANNELS_PER_MODULE);
    if channel_count == 0 {
        return Err(AnalysisError::Config(
            "channelsPerModule 必须大于0 / must be positive".to_string(),
        ));
    }

    let datasets = file
        .inputs
        .iter()
        .map(|group| dataset_descriptor(group, &global, channel_count))
        .collect::<AnalysisResult<Vec<_>>>()?;

    let cumulative_charge = file
        .rate_series
        .as_ref()
        .map(|rate_file| cumulative_source(rate_file, root))
        .transpose()?;

    tracing::debug!(
        datasets = datasets.len(),
        rate_series = cumulative_charge.is_some(),
        "活动文件已加载 / campaign file loaded"
    );

    Ok(CampaignDescriptor {
        datasets,
        baseline: file.baseline,
        cumulative_charge,
    })
}

fn dataset_descriptor(
    group: &InputGroup,
    global: &Path,
    channel_count: u32,
) -> AnalysisResult<DatasetDescriptor> {
    let dir = match &group.base_path {
        Some(base) => global.join(base),
        None => global.to_path_buf(),
    };

    let files: Vec<(String, PathBuf)> = if group.files.is_empty() {
        if dir.is_dir() {
            scanner::discover_module_files(&dir)?
        } else {
            tracing::warn!(
                date = %group.date,
                dir = %dir.display(),
                "数据集目录不存在且未声明文件 / dataset directory missing and no files declared"
            );
            Vec::new()
        }
    } else {
        group
            .files
            .iter()
            .map(|(module, file)| {
                Ok((
                    input::validate_module_identifier(module)?,
                    dir.join(file.trim()),
                ))
            })
            .collect::<AnalysisResult<_>>()?
    };

    let reference_module = match &group.ref_ch {
        Some(ReferenceChannels {
            module: Some(module),
            ..
        }) if !module.trim().is_empty() && !module.eq_ignore_ascii_case("none") => {
            Some(input::validate_module_identifier(module)?)
        }
        _ => None,
    };
    let reference_channels: Vec<u32> = match &group.ref_ch {
        Some(ReferenceChannels { channels, .. }) => channels
            .iter()
            .map(ChannelName::resolve)
            .collect::<AnalysisResult<_>>()?,
        None => Vec::new(),
    };

    let modules = files
        .into_iter()
        .map(|(identifier, path)| {
            let module = ModuleDescriptor::new(identifier.clone(), path, channel_count);
            if reference_module.as_deref() == Some(identifier.as_str()) {
                module.with_reference_channels(reference_channels.clone())
            } else {
                module
            }
        })
        .collect();

    let charge = group
        .integrated_charge
        .as_ref()
        .map(precomputed_charge)
        .transpose()?;

    Ok(DatasetDescriptor {
        date: group.date,
        modules,
        reference_module,
        validate_header: group.validate_header,
        charge,
    })
}

fn precomputed_charge(
    table: &BTreeMap<String, BTreeMap<String, f64>>,
) -> AnalysisResult<ChargeSource> {
    let mut values = BTreeMap::new();
    for (module, channels) in table {
        let module = input::validate_module_identifier(module)?;
        for (channel, &charge) in channels {
            let channel = ChannelName::Name(channel.clone()).resolve()?;
            values.insert(ChannelKey::new(module.clone(), channel), charge);
        }
    }
    Ok(ChargeSource::Precomputed(values))
}

fn cumulative_source(rate_file: &RateSeriesFile, root: &Path) -> AnalysisResult<CumulativeChargeSource> {
    let series = input::load_rate_series(&root.join(&rate_file.path))?;
    let mut source = CumulativeChargeSource::new(series.series);
    if rate_file.multiplier.is_some() || !rate_file.changes.is_empty() {
        source.correction = Some(RateCorrection {
            multiplier: rate_file.multiplier.unwrap_or(1.0),
            changes: rate_file
                .changes
                .iter()
                .map(|change| MultiplierChange {
                    from: change.from,
                    multiplier: change.multiplier,
                })
                .collect(),
        });
    }
    if let Some(hour) = rate_file.anchor_hour {
        if hour > 23 {
            return Err(AnalysisError::Config(format!(
                "anchorHour 超出范围 / out of range: {hour}"
            )));
        }
        source.anchor_hour = hour;
    }
    if let Some(convert) = rate_file.convert_to_charge {
        source.convert_to_charge = convert;
    }
    Ok(source)
}
