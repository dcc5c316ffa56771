//! 直方图测量文件解析器
//!
//! 每个模块一个分隔符文本文件：首行表头，首列为bin编号，其余为数据列。
//! 通道计数 = 映射列之和；前 `signal_start_row` 行为噪声区，其余为信号分布。
//!
//! 结构性问题（文件缺失、列缺失、表头不符）返回错误并使整个数据集失败；
//! 单行数值问题只丢弃该行并按通道计数。

use crate::error::{AnalysisError, AnalysisResult, malformed_input};
use crate::model::{ChannelKey, ChannelMapping, DatasetDescriptor, ModuleDescriptor};
use crate::tools::constants::parser;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;

/// 分布中的一个bin
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bin {
    pub position: f64,
    pub count: f64,
}

impl Bin {
    #[inline]
    pub fn new(position: f64, count: f64) -> Self {
        Self { position, count }
    }
}

/// 解析器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub delimiter: char,
    /// 信号区起始数据行（0基，不含表头）
    pub signal_start_row: usize,
    pub has_header: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            delimiter: parser::DEFAULT_DELIMITER,
            signal_start_row: parser::SIGNAL_START_ROW,
            has_header: true,
        }
    }
}

/// 单通道解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDistribution {
    pub key: ChannelKey,
    pub is_reference: bool,
    pub signal: Vec<Bin>,
    pub noise: Vec<Bin>,
    /// 因非数值/越界被丢弃的行数
    pub dropped_rows: usize,
}

/// 单模块解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedModule {
    pub identifier: String,
    pub reference_channels: Vec<u32>,
    pub channels: Vec<ChannelDistribution>,
}

/// 单数据集解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDataset {
    pub date: NaiveDate,
    pub reference_module: Option<String>,
    pub modules: Vec<ParsedModule>,
}

/// 解析一个数据集的所有模块文件
pub fn parse_dataset(
    descriptor: &DatasetDescriptor,
    config: &ParserConfig,
) -> AnalysisResult<ParsedDataset> {
    let mut seen = HashSet::new();
    for module in &descriptor.modules {
        if !seen.insert(module.identifier.as_str()) {
            return Err(AnalysisError::MalformedInput(format!(
                "模块重复声明 / module {} declared twice",
                module.identifier
            )));
        }
    }

    if let Some(reference) = &descriptor.reference_module
        && !seen.contains(reference.as_str())
    {
        return Err(AnalysisError::MalformedInput(format!(
            "参考模块未声明 / reference module {reference} is not part of dataset {}",
            descriptor.date
        )));
    }

    let modules = descriptor
        .modules
        .iter()
        .map(|module| parse_module(module, descriptor.validate_header, config))
        .collect::<AnalysisResult<Vec<_>>>()?;

    Ok(ParsedDataset {
        date: descriptor.date,
        reference_module: descriptor.reference_module.clone(),
        modules,
    })
}

/// 读取并解析一个模块文件
pub fn parse_module(
    descriptor: &ModuleDescriptor,
    validate_header: bool,
    config: &ParserConfig,
) -> AnalysisResult<ParsedModule> {
    let text = fs::read_to_string(&descriptor.path).map_err(|err| {
        let context = format!("{} ({})", descriptor.identifier, descriptor.path.display());
        match err.kind() {
            io::ErrorKind::NotFound => malformed_input(&context, "声明的文件不存在 / declared file missing"),
            _ => malformed_input(&context, err),
        }
    })?;

    parse_module_text(descriptor, &text, validate_header, config)
}

/// 解析已读入内存的模块文件内容
pub fn parse_module_text(
    descriptor: &ModuleDescriptor,
    text: &str,
    validate_header: bool,
    config: &ParserConfig,
) -> AnalysisResult<ParsedModule> {
    let id = descriptor.identifier.as_str();
    validate_mapping(descriptor)?;

    let mut lines = text.lines().filter(|line| !line.trim().is_empty()).peekable();

    let header: Option<Vec<String>> = if config.has_header {
        let line = lines
            .next()
            .ok_or_else(|| malformed_input(id, "空文件 / empty file"))?;
        Some(split_fields(line, config.delimiter).map(str::to_string).collect())
    } else {
        None
    };

    // 数据列数（不含bin列）
    let column_count = match &header {
        Some(fields) => fields.len().saturating_sub(1),
        None => {
            let first = lines
                .peek()
                .ok_or_else(|| malformed_input(id, "空文件 / empty file"))?;
            split_fields(first, config.delimiter).count().saturating_sub(1)
        }
    };

    if column_count == 0 {
        return Err(malformed_input(id, "没有数据列 / no data columns"));
    }

    for mapping in &descriptor.channels {
        if let Some(&column) = mapping.columns.iter().find(|&&c| c >= column_count) {
            return Err(malformed_input(
                id,
                format!(
                    "通道 CH{:02} 声明的数据列 {column} 不存在（共 {column_count} 列） / declared column absent",
                    mapping.channel
                ),
            ));
        }
    }

    if validate_header {
        check_header(id, header.as_deref(), &descriptor.channels, column_count)?;
    }

    let mut signal: Vec<Vec<Bin>> = vec![Vec::new(); descriptor.channels.len()];
    let mut noise: Vec<Vec<Bin>> = vec![Vec::new(); descriptor.channels.len()];
    let mut dropped = vec![0usize; descriptor.channels.len()];

    for (row, line) in lines.enumerate() {
        let fields: Vec<&str> = split_fields(line, config.delimiter).collect();
        let position = fields.first().and_then(|field| parse_value(field));

        for (index, mapping) in descriptor.channels.iter().enumerate() {
            let count = position.and_then(|_| {
                mapping.columns.iter().try_fold(0.0, |sum, &column| {
                    fields
                        .get(column + 1)
                        .and_then(|field| parse_value(field))
                        .filter(|value| *value >= 0.0)
                        .map(|value| sum + value)
                })
            });

            match (position, count) {
                (Some(position), Some(count)) => {
                    let bin = Bin::new(position, count);
                    if row < config.signal_start_row {
                        noise[index].push(bin);
                    } else {
                        signal[index].push(bin);
                    }
                }
                _ => dropped[index] += 1,
            }
        }
    }

    let reference: HashSet<u32> = descriptor.reference_channels.iter().copied().collect();
    let channels = descriptor
        .channels
        .iter()
        .zip(signal.into_iter().zip(noise).zip(dropped))
        .map(|(mapping, ((signal, noise), dropped_rows))| {
            if dropped_rows > 0 {
                tracing::warn!(
                    module = id,
                    channel = mapping.channel,
                    dropped_rows,
                    "丢弃非数值/越界行 / dropped non-numeric or out-of-range rows"
                );
            }
            ChannelDistribution {
                key: ChannelKey::new(id, mapping.channel),
                is_reference: reference.contains(&mapping.channel),
                signal,
                noise,
                dropped_rows,
            }
        })
        .collect();

    tracing::debug!(module = id, column_count, "模块文件解析完成 / module file parsed");

    Ok(ParsedModule {
        identifier: descriptor.identifier.clone(),
        reference_channels: descriptor.reference_channels.clone(),
        channels,
    })
}

#[inline]
fn split_fields(line: &str, delimiter: char) -> impl Iterator<Item = &str> {
    line.split(delimiter).map(str::trim)
}

/// 有限数值才视为有效
#[inline]
fn parse_value(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn validate_mapping(descriptor: &ModuleDescriptor) -> AnalysisResult<()> {
    let id = descriptor.identifier.as_str();
    let mut channels = HashSet::new();

    for mapping in &descriptor.channels {
        if !channels.insert(mapping.channel) {
            return Err(malformed_input(
                id,
                format!("通道 CH{:02} 重复声明 / channel declared twice", mapping.channel),
            ));
        }
        if mapping.columns.is_empty() {
            return Err(malformed_input(
                id,
                format!("通道 CH{:02} 未映射任何列 / channel maps no columns", mapping.channel),
            ));
        }
        if !mapping.headers.is_empty() && mapping.headers.len() != mapping.columns.len() {
            return Err(malformed_input(
                id,
                format!(
                    "通道 CH{:02} 表头数量与列数量不一致 / header count differs from column count",
                    mapping.channel
                ),
            ));
        }
    }

    if let Some(missing) = descriptor
        .reference_channels
        .iter()
        .find(|channel| !channels.contains(channel))
    {
        return Err(malformed_input(
            id,
            format!("参考通道 CH{missing:02} 未在通道映射中声明 / reference channel not mapped"),
        ));
    }

    Ok(())
}

/// 表头校验：声明了表头的列逐一比对；完全未声明表头时检查成对列布局
fn check_header(
    id: &str,
    header: Option<&[String]>,
    mappings: &[ChannelMapping],
    column_count: usize,
) -> AnalysisResult<()> {
    let header = header.ok_or_else(|| {
        AnalysisError::HeaderMismatch(format!("{id}: 请求表头校验但文件无表头 / no header row"))
    })?;

    let mut declared_any = false;
    for mapping in mappings {
        for (column, expected) in mapping.columns.iter().zip(&mapping.headers) {
            declared_any = true;
            let actual = header.get(column + 1).map(String::as_str).unwrap_or("");
            if actual != expected.trim() {
                return Err(AnalysisError::HeaderMismatch(format!(
                    "{id}: 列 {column} 表头为 '{actual}'，期望 '{}' / column header differs from mapping",
                    expected.trim()
                )));
            }
        }
    }

    if !declared_any && column_count % 2 != 0 {
        return Err(AnalysisError::HeaderMismatch(format!(
            "{id}: 数据列数为奇数 ({column_count})，不符合成对读出布局 / odd data column count"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn descriptor(channels: u32) -> ModuleDescriptor {
        ModuleDescriptor::new("PMA0", PathBuf::from("unused.csv"), channels)
    }

    fn config() -> ParserConfig {
        ParserConfig {
            signal_start_row: 1,
            ..ParserConfig::default()
        }
    }

    #[test]
    fn test_paired_columns_are_summed() {
        let text = "bin:a1:b1:a2:b2\n0:1:1:0:0\n1:2:3:4:5\n2:0:1:1:1\n";
        let module = parse_module_text(&descriptor(2), text, false, &config()).unwrap();

        assert_eq!(module.channels.len(), 2);
        // 第0行进入噪声区
        assert_eq!(module.channels[0].noise, vec![Bin::new(0.0, 2.0)]);
        assert_eq!(
            module.channels[0].signal,
            vec![Bin::new(1.0, 5.0), Bin::new(2.0, 1.0)]
        );
        assert_eq!(
            module.channels[1].signal,
            vec![Bin::new(1.0, 9.0), Bin::new(2.0, 2.0)]
        );
    }

    #[test]
    fn test_bad_rows_are_dropped_per_channel() {
        let text = "bin:a1:b1:a2:b2\n0:1:1:1:1\n1:x:1:1:1\n2:1:-1:1:1\n3:1:1:1:inf\n4:1:1:1:1\n";
        let module = parse_module_text(&descriptor(2), text, false, &config()).unwrap();

        assert_eq!(module.channels[0].dropped_rows, 2);
        assert_eq!(module.channels[1].dropped_rows, 1);
        assert_eq!(module.channels[0].signal.len(), 2);
        assert_eq!(module.channels[1].signal.len(), 3);
    }

    #[test]
    fn test_absent_column_is_malformed() {
        let text = "bin:a1:b1\n0:1:1\n";
        let err = parse_module_text(&descriptor(2), text, false, &config()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput(_)));
    }

    #[test]
    fn test_empty_file_is_malformed() {
        let err = parse_module_text(&descriptor(1), "\n\n", false, &config()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput(_)));
    }

    #[test]
    fn test_header_mismatch_only_when_requested() {
        let mut module = descriptor(1);
        module.channels[0] = ChannelMapping::paired(1)
            .with_headers(vec!["ADC0_CH1".to_string(), "ADC1_CH1".to_string()]);
        let text = "bin:ADC0_CH1:ADC1_CHX\n0:1:1\n1:1:1\n";

        assert!(parse_module_text(&module, text, false, &config()).is_ok());
        let err = parse_module_text(&module, text, true, &config()).unwrap_err();
        assert!(matches!(err, AnalysisError::HeaderMismatch(_)));
    }

    #[test]
    fn test_reference_channel_must_be_mapped() {
        let module = descriptor(2).with_reference_channels(vec![3]);
        let err = parse_module_text(&module, "bin:a:b:c:d\n0:1:1:1:1\n", false, &config())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput(_)));
    }

    #[test]
    fn test_custom_delimiter_without_header() {
        let cfg = ParserConfig {
            delimiter: ',',
            signal_start_row: 0,
            has_header: false,
        };
        let module = parse_module_text(&descriptor(1), "0,1,2\n1,3,4\n", false, &cfg).unwrap();
        assert_eq!(
            module.channels[0].signal,
            vec![Bin::new(0.0, 3.0), Bin::new(1.0, 7.0)]
        );
    }
}
