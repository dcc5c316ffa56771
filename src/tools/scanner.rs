//! 模块文件扫描
//!
//! 活动文件没有声明 `files` 时，在数据集目录中查找以 `PM[AC][0-9]` 开头的文件。

use crate::error::{AnalysisError, AnalysisResult};
use crate::input;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 文件名中模块标识的长度（如 `PMA0`）
const IDENTIFIER_LEN: usize = 4;

/// 扫描数据集目录（不递归），返回 (模块标识, 文件路径)，按标识排序
///
/// 同一模块匹配到多个文件时保留文件名排序最靠前的一个。
pub fn discover_module_files(dir: &Path) -> AnalysisResult<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Err(AnalysisError::InvalidInput(format!(
            "路径不是目录 / not a directory: {}",
            dir.display()
        )));
    }

    let mut candidates: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    candidates.sort();

    let mut modules: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in candidates {
        let Some(identifier) = module_identifier(&path) else {
            continue;
        };
        if let Some(existing) = modules.get(&identifier) {
            tracing::warn!(
                module = %identifier,
                kept = %existing.display(),
                ignored = %path.display(),
                "同一模块匹配到多个文件 / multiple files for one module"
            );
            continue;
        }
        modules.insert(identifier, path);
    }

    tracing::debug!(
        dir = %dir.display(),
        modules = modules.len(),
        "模块文件扫描完成 / module scan finished"
    );
    Ok(modules.into_iter().collect())
}

/// 从文件名前缀提取模块标识
fn module_identifier(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let prefix = name.get(..IDENTIFIER_LEN)?;
    input::validate_module_identifier(prefix).ok()
}
