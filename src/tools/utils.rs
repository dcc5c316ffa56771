//! 工具函数模块
//!
//! 并行度计算、文件路径处理等通用工具函数。

use super::constants::parallel_limits;

/// 计算有效并行度：用户指定值或CPU核心数，限制在安全范围内
pub fn effective_parallel_degree(requested: Option<usize>) -> usize {
    let degree = requested.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(parallel_limits::MIN_PARALLEL_DEGREE)
    });
    degree.clamp(
        parallel_limits::MIN_PARALLEL_DEGREE,
        parallel_limits::MAX_PARALLEL_DEGREE,
    )
}

/// 文件路径处理工具函数
pub mod path {
    use std::path::Path;

    /// 提取文件名（返回String，用于日志显示）
    #[inline]
    pub fn extract_filename_lossy(path: &Path) -> String {
        path.file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

pub use path::extract_filename_lossy;
