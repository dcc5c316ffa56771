//! Ageing Analysis Tool - 主程序入口
//!
//! 纯流程控制器，负责协调各个工具模块完成老化分析任务。

use ageing_analysis_tool::{
    error::{AnalysisError, ErrorCategory},
    processing::{self, Pipeline, Stage},
    tools::{self, AppConfig},
};
use anyhow::Context;
use std::process;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 错误退出码定义
mod exit_codes {
    /// 通用错误
    pub const GENERAL_ERROR: i32 = 1;
    /// 输入数据错误
    pub const INPUT_ERROR: i32 = 2;
    /// 配置/参数错误
    pub const CONFIG_ERROR: i32 = 3;
    /// I/O错误
    pub const IO_ERROR: i32 = 4;
    /// 资源/并发错误
    pub const RESOURCE_ERROR: i32 = 5;
    /// 用户取消
    pub const CANCELLED: i32 = 130;
}

/// 获取错误建议文本
fn get_error_suggestion(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Input => {
            "检查测量文件是否存在、列数与通道映射是否一致 / Check that measurement files exist and match the channel mapping"
        }
        ErrorCategory::Config => {
            "检查活动文件与参数文件，使用 --help 查看完整用法 / Check the campaign and parameter files, use --help to see full usage"
        }
        ErrorCategory::Io => {
            "检查文件路径是否正确，文件是否存在且可读写 / Check that paths are correct and files are readable/writable"
        }
        ErrorCategory::Cancelled => "分析已被取消 / Analysis was cancelled",
        ErrorCategory::Resource => {
            "资源不可用，尝试 --serial 或降低 --threads / Resource unavailable, try --serial or fewer --threads"
        }
    }
}

/// 错误处理和建议
fn handle_error(error: anyhow::Error) -> ! {
    eprintln!("[ERROR] 错误 / Error: {error:#}");

    let Some(analysis_error) = error.downcast_ref::<AnalysisError>() else {
        process::exit(exit_codes::GENERAL_ERROR);
    };

    let category = ErrorCategory::from_analysis_error(analysis_error);
    eprintln!("[INFO] 类别 / Category: {}", category.display_name());
    eprintln!("[INFO] 建议 / Suggestion: {}", get_error_suggestion(category));

    let exit_code = match category {
        ErrorCategory::Input => exit_codes::INPUT_ERROR,
        ErrorCategory::Config => exit_codes::CONFIG_ERROR,
        ErrorCategory::Io => exit_codes::IO_ERROR,
        ErrorCategory::Cancelled => exit_codes::CANCELLED,
        ErrorCategory::Resource => exit_codes::RESOURCE_ERROR,
    };
    process::exit(exit_code);
}

/// 安装日志订阅器：RUST_LOG 优先，否则按 verbose 选择级别
fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "ageing_analysis_tool=debug"
    } else {
        "ageing_analysis_tool=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 重复初始化时静默忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

/// 运行分析并输出结果
fn analyze(config: &AppConfig) -> anyhow::Result<()> {
    let mut campaign = tools::load_campaign(&config.campaign_path).with_context(|| {
        format!("加载活动文件失败 / failed to load {}", config.campaign_path.display())
    })?;
    if config.baseline.is_some() {
        campaign.baseline = config.baseline;
    }
    println!("📁 数据集 / datasets: {}", campaign.datasets.len());

    let pipeline = Pipeline::new(config.analysis_config()?)?;
    let handle = processing::spawn_analysis(pipeline, campaign)?;

    for event in handle.events() {
        if config.verbose || event.stage.is_terminal() || event.stage == Stage::Parsing {
            match &event.detail {
                Some(detail) => println!(
                    "[{:>3.0}%] {} ({detail})",
                    event.fraction * 100.0,
                    event.stage
                ),
                None => println!("[{:>3.0}%] {}", event.fraction * 100.0, event.stage),
            }
        }
    }
    let result = handle.wait()?;

    println!();
    println!("{}", tools::dataset_overview(&result));
    if config.verbose {
        for dataset in &result.datasets {
            println!();
            println!("📊 {}", dataset.date);
            println!("{}", tools::channel_table(dataset));
        }
    }

    if let Some(output_path) = &config.output_path {
        tools::write_json(&result, output_path)
            .with_context(|| format!("写入结果失败 / failed to write {}", output_path.display()))?;
    }
    Ok(())
}

/// 应用程序主逻辑（便于测试和复用）
fn run() -> anyhow::Result<()> {
    // 1. 解析命令行参数
    let config = tools::parse_args()?;
    init_tracing(config.verbose);

    // 2. 显示启动信息
    tools::show_startup_info(&config);

    // 3. 运行分析
    analyze(&config)?;

    tools::show_completion_info(&config);
    Ok(())
}

fn main() {
    if let Err(error) = run() {
        handle_error(error);
    }
}
