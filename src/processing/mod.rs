//! 分析流水线模块
//!
//! 把核心算法串成按阶段推进的流水线：进度事件、协作式取消、
//! 通道级rayon并行，以及可选的后台工作线程。

pub mod pipeline;
pub mod progress;
pub mod stages;
pub mod worker;

// 重新导出公共接口
pub use pipeline::Pipeline;
pub use progress::{CancellationToken, NullProgress, ProgressEvent, ProgressSink, Stage};
pub use worker::{AnalysisHandle, spawn_analysis, spawn_analysis_with};
