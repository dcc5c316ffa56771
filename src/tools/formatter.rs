//! 输出格式化模块
//!
//! 负责分析结果的表格输出与JSON导出。

use super::utils;
use crate::error::AnalysisResult;
use crate::model::{
    CampaignResult, ChannelRecord, ChargeStatus, DatasetResult, DatasetStatus, Factor, FitQuality,
};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;
use std::path::Path;

/// 应用程序版本信息
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 导出文件的顶层结构
#[derive(Debug, Serialize)]
struct Report<'a> {
    tool: &'static str,
    version: &'static str,
    generated_at: String,
    #[serde(flatten)]
    result: &'a CampaignResult,
}

/// 老化因子显示：可用时保留4位小数，否则显示 N/A
pub fn format_factor(factor: &Factor) -> String {
    match factor {
        Factor::Available { value } => format!("{value:.4}"),
        Factor::Unavailable { .. } => "N/A".to_string(),
    }
}

fn format_fit(record: &ChannelRecord) -> String {
    match &record.fit {
        Some(fit) => match (fit.quality, fit.peak_position) {
            (FitQuality::Failed, _) | (_, None) => fit.quality.label().to_string(),
            (_, Some(position)) => format!("{position:.2} ({})", fit.quality.label()),
        },
        None => "-".to_string(),
    }
}

fn format_charge(record: &ChannelRecord) -> String {
    match &record.charge {
        Some(charge) if charge.status == ChargeStatus::NoData => {
            format!("{:.4e} (NO_DATA)", charge.integrated_charge)
        }
        Some(charge) => format!("{:.4e}", charge.integrated_charge),
        None => "-".to_string(),
    }
}

fn right(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

/// 数据集概览表
pub fn dataset_overview(result: &CampaignResult) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Date / 日期",
        "Status / 状态",
        "Modules / 模块",
        "Channels / 通道",
        "Usable fits / 可用拟合",
    ]);

    for dataset in &result.datasets {
        let status = match &dataset.status {
            DatasetStatus::Complete if dataset.is_baseline => "COMPLETE (baseline)".to_string(),
            DatasetStatus::Complete => "COMPLETE".to_string(),
            DatasetStatus::Failed { reason } => format!("FAILED: {reason}"),
        };
        let usable = dataset
            .channels()
            .filter(|c| c.fit.as_ref().is_some_and(|f| f.quality.is_usable()))
            .count();

        table.add_row(vec![
            Cell::new(dataset.date.to_string()),
            Cell::new(status),
            right(dataset.modules.len().to_string()),
            right(dataset.channels().count().to_string()),
            right(usable.to_string()),
        ]);
    }
    table
}

/// 单个数据集的逐通道明细表
pub fn channel_table(dataset: &DatasetResult) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Module / 模块",
        "Channel / 通道",
        "Peak / 峰位",
        "Raw / 原始",
        "Normalized / 归一化",
        "Weighted / 加权",
        "Charge / 电荷",
    ]);

    for record in dataset.channels() {
        let name = if record.is_reference {
            format!("{} (ref)", record.name)
        } else {
            record.name.clone()
        };
        table.add_row(vec![
            Cell::new(&record.module),
            Cell::new(name),
            right(format_fit(record)),
            right(format_factor(&record.raw.gaussian)),
            right(format_factor(&record.normalized.gaussian)),
            right(format_factor(&record.normalized.weighted)),
            right(format_charge(record)),
        ]);
    }
    table
}

/// 序列化为带版本信息的JSON
pub fn render_json(result: &CampaignResult) -> AnalysisResult<String> {
    let report = Report {
        tool: env!("CARGO_PKG_NAME"),
        version: VERSION,
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        result,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

/// 把结果写入JSON文件
pub fn write_json(result: &CampaignResult, output_path: &Path) -> AnalysisResult<()> {
    std::fs::write(output_path, render_json(result)?)?;
    println!(
        "📄 结果已保存到: {} / results saved",
        utils::extract_filename_lossy(output_path)
    );
    Ok(())
}
