//! 统一错误处理框架
//!
//! 老化分析流水线的结构性错误类型定义。
//!
//! 数值层面的问题（拟合失败、参考不可用、窗口无数据）不在这里：
//! 它们以类型化字段值的形式写入结果记录，只有结构性输入错误才会中止一个数据集。

use std::fmt;
use std::io;
use thiserror::Error;

/// 老化分析相关的统一错误类型
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// 声明的文件缺失、声明的列不存在、文件结构无法解析
    #[error("输入数据格式错误 / Malformed input: {0}")]
    MalformedInput(String),

    /// 请求了表头校验且表头与声明的通道映射不一致
    #[error("表头不匹配 / Header mismatch: {0}")]
    HeaderMismatch(String),

    /// 调用方传入的参数无效
    #[error("输入验证失败 / Invalid input: {0}")]
    InvalidInput(String),

    /// 配置文件或运行策略错误（例如指定的基准日期不存在）
    #[error("配置错误 / Configuration error: {0}")]
    Config(String),

    #[error("文件I/O错误 / I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON解析错误 / JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML解析错误 / TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// 运行被调用方取消，部分结果已丢弃
    #[error("分析已取消 / Analysis cancelled")]
    Cancelled,

    /// 线程池、工作线程等资源不可用
    #[error("资源访问错误 / Resource error: {0}")]
    ResourceError(String),
}

/// 老化分析操作的标准Result类型
pub type AnalysisResult<T> = Result<T, AnalysisError>;

// ==================== 错误转换Helper函数 ====================
// 消除重复的 .map_err(|e| AnalysisError::XXX(format!(...))) 模式

/// 创建输入格式错误的helper函数
#[inline]
pub fn malformed_input<E: fmt::Display>(context: &str, err: E) -> AnalysisError {
    AnalysisError::MalformedInput(format!("{context}: {err}"))
}

/// 创建配置错误的helper函数
#[inline]
pub fn config_error<E: fmt::Display>(context: &str, err: E) -> AnalysisError {
    AnalysisError::Config(format!("{context}: {err}"))
}

/// 创建资源错误的helper函数
#[inline]
pub fn resource_error<E: fmt::Display>(context: &str, err: E) -> AnalysisError {
    AnalysisError::ResourceError(format!("{context}: {err}"))
}

// ==================== 错误分类系统 ====================
// 用于CLI退出码映射和失败数据集统计

/// 错误类别枚举
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ErrorCategory {
    /// 输入数据相关错误（文件缺失、列缺失、表头不匹配）
    Input,
    /// 配置相关错误（配置文件解析、无效参数）
    Config,
    /// I/O相关错误（权限不足、写入失败等）
    Io,
    /// 用户取消
    Cancelled,
    /// 资源/并发错误
    Resource,
}

impl ErrorCategory {
    /// 从AnalysisError提取错误类别
    pub fn from_analysis_error(e: &AnalysisError) -> Self {
        match e {
            AnalysisError::MalformedInput(_) | AnalysisError::HeaderMismatch(_) => Self::Input,
            AnalysisError::InvalidInput(_)
            | AnalysisError::Config(_)
            | AnalysisError::Json(_)
            | AnalysisError::Toml(_) => Self::Config,
            AnalysisError::Io(_) => Self::Io,
            AnalysisError::Cancelled => Self::Cancelled,
            AnalysisError::ResourceError(_) => Self::Resource,
        }
    }

    /// 获取错误类别的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Input => "输入错误",
            Self::Config => "配置错误",
            Self::Io => "I/O错误",
            Self::Cancelled => "已取消",
            Self::Resource => "资源错误",
        }
    }
}
