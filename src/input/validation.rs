//! 标识符校验与名称规范化
//!
//! 外部来源（配置表、速率时间序列）的模块名/通道名写法不统一，
//! 例如 `Ch1`、`ch01`、`CH-1`，匹配前统一规范化。

use crate::error::{AnalysisError, AnalysisResult};
use crate::tools::constants::detector;

/// 规范化模块名：去空白并转大写
pub fn normalize_module_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// 校验模块标识（`PM[AC][0-9]`），返回规范化后的标识
pub fn validate_module_identifier(name: &str) -> AnalysisResult<String> {
    let normalized = normalize_module_name(name);
    let valid = normalized
        .strip_prefix(detector::MODULE_PREFIX)
        .is_some_and(|rest| {
            let mut chars = rest.chars();
            matches!(chars.next(), Some(c) if detector::MODULE_SIDES.contains(&c))
                && matches!(chars.next(), Some(c) if c.is_ascii_digit())
                && chars.next().is_none()
        });

    if valid {
        Ok(normalized)
    } else {
        Err(AnalysisError::InvalidInput(format!(
            "无效的模块标识 / invalid module identifier '{name}' (expected PM[AC][0-9])"
        )))
    }
}

/// 解析通道名为通道序号：`Ch1` / `ch01` / `CH-1` / `7` → 序号
pub fn parse_channel_name(name: &str) -> Option<u32> {
    let upper = name.trim().to_uppercase();
    let digits = upper
        .strip_prefix("CH")
        .unwrap_or(upper.as_str())
        .trim_start_matches(['-', '_', ' ']);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|&channel| channel > 0)
}

/// 规范化通道名，例如 `ch1` → `CH01`
pub fn normalize_channel_name(name: &str) -> Option<String> {
    parse_channel_name(name).map(|channel| format!("CH{channel:02}"))
}
