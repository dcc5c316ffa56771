//! 速率时间序列解析
//!
//! 电荷富集的输入：逗号分隔，每行一个采样。支持两种行格式：
//! - `timestamp,module,channel,value`
//! - `timestamp,element,value`，element 形如 `ft0_dcs:FEE/PMA0/Ch01.actual.CFD_RATE`
//!
//! 时间戳接受 `2024-05-01 12:00:00` 与 `2024-05-01T12:00:00`（可带小数秒）。

use super::validation::{normalize_module_name, parse_channel_name, validate_module_identifier};
use crate::error::{AnalysisResult, malformed_input};
use crate::model::{ChannelKey, RateSample};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// 解析后的速率时间序列（每通道按时间排序）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateSeries {
    pub series: BTreeMap<ChannelKey, Vec<RateSample>>,
    pub dropped_rows: usize,
}

/// 读取速率时间序列文件
pub fn load_rate_series(path: &Path) -> AnalysisResult<RateSeries> {
    let text = fs::read_to_string(path)
        .map_err(|err| malformed_input(&format!("速率序列 / rate series {}", path.display()), err))?;
    Ok(parse_rate_series(&text))
}

/// 解析速率时间序列文本；无法解析的行计入 `dropped_rows`
pub fn parse_rate_series(text: &str) -> RateSeries {
    let mut result = RateSeries::default();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if index == 0 && fields[0].eq_ignore_ascii_case("timestamp") {
            continue;
        }

        match parse_row(&fields) {
            Some((key, sample)) => result.series.entry(key).or_default().push(sample),
            None => result.dropped_rows += 1,
        }
    }

    for samples in result.series.values_mut() {
        samples.sort_by_key(|sample| sample.timestamp);
    }

    if result.dropped_rows > 0 {
        tracing::warn!(
            dropped_rows = result.dropped_rows,
            "速率序列中有无法解析的行 / unparsable rate series rows dropped"
        );
    }
    result
}

fn parse_row(fields: &[&str]) -> Option<(ChannelKey, RateSample)> {
    let (timestamp, key, value) = match fields {
        [timestamp, module, channel, value] => {
            let module = validate_module_identifier(module).ok()?;
            (*timestamp, ChannelKey::new(module, parse_channel_name(channel)?), *value)
        }
        [timestamp, element, value] => (*timestamp, parse_element_name(element)?, *value),
        _ => return None,
    };

    let timestamp = parse_timestamp(timestamp)?;
    let value = value.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((key, RateSample { timestamp, value }))
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

/// 从DCS元素名中提取通道键，例如 `ft0_dcs:FEE/PMA0/Ch01.actual.CFD_RATE`
pub fn parse_element_name(element: &str) -> Option<ChannelKey> {
    let mut segments = element.split('/');
    while let Some(segment) = segments.next() {
        let candidate = normalize_module_name(segment);
        if let Ok(module) = validate_module_identifier(&candidate) {
            let channel_segment = segments.next()?;
            let channel = channel_segment.split('.').next()?;
            return Some(ChannelKey::new(module, parse_channel_name(channel)?));
        }
    }
    None
}
