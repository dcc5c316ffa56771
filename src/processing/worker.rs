//! 后台分析工作线程
//!
//! 在独立线程上运行流水线，通过 crossbeam 通道把进度事件交给调用方。
//! 事件流是有限的、不可重启的：工作线程结束后通道关闭，迭代随之结束。

use super::pipeline::Pipeline;
use super::progress::{CancellationToken, ProgressEvent};
use crate::error::{AnalysisError, AnalysisResult, resource_error};
use crate::model::{CampaignDescriptor, CampaignResult};
use crossbeam_channel::Receiver;
use std::thread::{self, JoinHandle};

/// 一次后台运行的句柄
pub struct AnalysisHandle {
    events: Receiver<ProgressEvent>,
    cancel: CancellationToken,
    worker: JoinHandle<AnalysisResult<CampaignResult>>,
}

impl AnalysisHandle {
    /// 阻塞迭代进度事件，直到工作线程发出终态事件并退出
    pub fn events(&self) -> crossbeam_channel::Iter<'_, ProgressEvent> {
        self.events.iter()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 等待工作线程结束并取回结果
    pub fn wait(self) -> AnalysisResult<CampaignResult> {
        self.worker.join().map_err(|_| {
            AnalysisError::ResourceError("分析线程异常退出 / analysis thread panicked".to_string())
        })?
    }
}

pub fn spawn_analysis(
    pipeline: Pipeline,
    campaign: CampaignDescriptor,
) -> AnalysisResult<AnalysisHandle> {
    spawn_analysis_with(pipeline, campaign, CancellationToken::new())
}

/// 使用调用方提供的取消标志启动后台运行
pub fn spawn_analysis_with(
    pipeline: Pipeline,
    campaign: CampaignDescriptor,
    cancel: CancellationToken,
) -> AnalysisResult<AnalysisHandle> {
    let (sender, events) = crossbeam_channel::unbounded();
    let token = cancel.clone();

    let worker = thread::Builder::new()
        .name("ageing-pipeline".to_string())
        .spawn(move || pipeline.run_with(&campaign, &sender, &token))
        .map_err(|e| resource_error("分析线程创建失败 / failed to spawn analysis thread", e))?;

    Ok(AnalysisHandle {
        events,
        cancel,
        worker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::Stage;
    use crate::tools::config::AnalysisConfig;

    #[test]
    fn test_event_stream_is_finite() {
        let pipeline = Pipeline::new(AnalysisConfig::default()).unwrap();
        let handle = spawn_analysis(pipeline, CampaignDescriptor::default()).unwrap();

        let stages: Vec<Stage> = handle.events().map(|event| event.stage).collect();
        assert_eq!(stages, vec![Stage::Completed]);
        assert!(handle.wait().unwrap().datasets.is_empty());
    }
}
