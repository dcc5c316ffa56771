//! 工具模块集合
//!
//! 包含CLI、配置加载、文件扫描、格式化等工具模块，支持main.rs的流程控制。

pub mod cli;
pub mod config;
pub mod constants;
pub mod formatter;
pub mod scanner;
pub mod utils;

// 重新导出主要的公共接口
pub use cli::{AppConfig, parse_args, show_completion_info, show_startup_info};
pub use config::{
    AnalysisConfig, ParallelConfig, load_analysis_config, load_campaign, parse_campaign,
};
pub use formatter::{channel_table, dataset_overview, format_factor, render_json, write_json};
pub use scanner::discover_module_files;
