//! 进度事件与协作式取消
//!
//! 流水线在每个有意义的阶段切换时发出一个 `ProgressEvent`；
//! 取消标志只在通道之间、数据集之间轮询，单次拟合内部不检查。

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Parsing,
    Fitting,
    ReferenceResolution,
    AgeingCalculation,
    Normalization,
    Enrichment,
    /// 终态
    Completed,
    /// 终态
    Cancelled,
    /// 终态
    Failed,
}

impl Stage {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Parsing => "解析 / parsing",
            Self::Fitting => "拟合 / fitting",
            Self::ReferenceResolution => "参考均值 / reference",
            Self::AgeingCalculation => "老化因子 / ageing",
            Self::Normalization => "归一化 / normalization",
            Self::Enrichment => "电荷富集 / enrichment",
            Self::Completed => "完成 / completed",
            Self::Cancelled => "已取消 / cancelled",
            Self::Failed => "失败 / failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 进度事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 总体完成比例 [0, 1]
    pub fraction: f64,
    pub detail: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, fraction: f64, detail: Option<String>) -> Self {
        Self {
            stage,
            fraction: fraction.clamp(0.0, 1.0),
            detail,
        }
    }
}

/// 进度接收方
pub trait ProgressSink: Sync {
    fn emit(&self, event: ProgressEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for crossbeam_channel::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // 接收方已断开时静默丢弃
        let _ = self.send(event);
    }
}

/// 协作式取消标志（克隆共享同一状态）
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_fraction_is_clamped() {
        assert_eq!(ProgressEvent::new(Stage::Fitting, 1.5, None).fraction, 1.0);
        assert_eq!(ProgressEvent::new(Stage::Fitting, -0.1, None).fraction, 0.0);
    }

    #[test]
    fn test_channel_sink() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        sender.emit(ProgressEvent::new(Stage::Parsing, 0.1, Some("2024-01-01".to_string())));
        drop(sender);
        let events: Vec<ProgressEvent> = receiver.iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, Stage::Parsing);
        assert!(!events[0].stage.is_terminal());
        assert!(Stage::Cancelled.is_terminal());
    }
}
