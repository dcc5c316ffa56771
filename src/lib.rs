//! Ageing Analysis Tool
//!
//! 光电探测器通道老化因子分析：从每个测量日期的直方图文件中拟合峰位，
//! 以参考通道均值做同日归一化得到原始老化因子，再以基准数据集做跨日期归一化。
//!
//! ## 核心特性
//! - 高斯峰拟合（Levenberg–Marquardt）与计数加权均值两种峰位估计
//! - 参考通道失败时显式标记 UNAVAILABLE，从不以 0 或 NaN 代替
//! - 基准数据集归一化值严格为 1.0
//! - 可选的积分电荷富集（窗口积分、累积积分、预计算值）
//! - 通道级rayon并行、进度事件与协作式取消

pub mod core;
pub mod error;
pub mod input;
pub mod model;
pub mod processing;
pub mod tools;

// 重新导出核心类型
pub use core::{FitConfig, GaussianFitter, QualityPolicy, ReferencePolicy};
pub use error::{AnalysisError, AnalysisResult};
pub use model::{CampaignDescriptor, CampaignResult, DatasetDescriptor, ModuleDescriptor};
pub use processing::{AnalysisHandle, CancellationToken, Pipeline, ProgressEvent, Stage};
pub use tools::config::AnalysisConfig;
