//! 核心算法模块
//!
//! 峰值拟合、参考均值、老化因子、跨数据集归一化与电荷积分。均为纯函数，不做I/O。

pub mod ageing;
pub mod charge;
pub mod gaussian_fit;
pub mod normalizer;
pub mod peak_search;
pub mod reference;

// 重新导出公共接口
pub use gaussian_fit::{ChannelEstimate, FitConfig, GaussianFitter, QualityPolicy};
pub use peak_search::{CoarseSearch, PeakLocator};
pub use reference::{ReferenceCandidate, ReferencePolicy, ReferenceWeighting};
