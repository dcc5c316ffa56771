//! 命令行接口模块
//!
//! 负责命令行参数解析、运行配置组装和程序信息展示。

use super::config::{self, AnalysisConfig};
use crate::error::{AnalysisError, AnalysisResult};
use chrono::NaiveDate;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// 应用程序版本信息
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// 应用程序配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 活动描述文件（JSON）
    pub campaign_path: PathBuf,

    /// 分析参数文件（TOML，可选）
    pub config_path: Option<PathBuf>,

    /// 命令行指定的基准日期，覆盖活动文件中的设置
    pub baseline: Option<NaiveDate>,

    /// 输出JSON路径（可选）
    pub output_path: Option<PathBuf>,

    /// 禁用通道并行拟合
    pub serial: bool,

    /// 拟合线程数
    pub threads: Option<usize>,

    /// 是否显示详细信息
    pub verbose: bool,
}

impl AppConfig {
    /// 读取分析参数并套用命令行覆盖项
    pub fn analysis_config(&self) -> AnalysisResult<AnalysisConfig> {
        let mut analysis = match &self.config_path {
            Some(path) => config::load_analysis_config(path)?,
            None => AnalysisConfig::default(),
        };
        if self.serial {
            analysis.parallel.enabled = false;
        }
        if self.threads.is_some() {
            analysis.parallel.threads = self.threads;
        }
        Ok(analysis)
    }
}

fn build_command() -> Command {
    Command::new("ageing-analysis")
        .version(VERSION)
        .about(DESCRIPTION)
        .author("Ageing Analysis Team")
        .arg(
            Arg::new("CAMPAIGN")
                .help("活动描述文件路径（JSON） / campaign description file")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("分析参数文件（TOML） / analysis parameter file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("baseline")
                .long("baseline")
                .help("基准数据集日期 YYYY-MM-DD / baseline dataset date")
                .value_name("DATE"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .help("输出结果到JSON文件 / write results as JSON")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("serial")
                .long("serial")
                .help("禁用通道并行拟合 / disable parallel channel fitting")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .help("拟合线程数 / fitting threads")
                .value_name("N")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("显示详细处理信息 / verbose output")
                .action(ArgAction::SetTrue),
        )
}

/// 解析命令行参数并创建配置
pub fn parse_args() -> AnalysisResult<AppConfig> {
    app_config_from(&build_command().get_matches())
}

/// 从给定参数列表解析（首个元素为程序名）
pub fn parse_from<I, T>(args: I) -> AnalysisResult<AppConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = build_command()
        .try_get_matches_from(args)
        .map_err(|e| AnalysisError::InvalidInput(e.to_string()))?;
    app_config_from(&matches)
}

fn app_config_from(matches: &ArgMatches) -> AnalysisResult<AppConfig> {
    let baseline = matches
        .get_one::<String>("baseline")
        .map(|text| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| {
                AnalysisError::InvalidInput(format!("无效的基准日期 / invalid baseline '{text}': {e}"))
            })
        })
        .transpose()?;

    Ok(AppConfig {
        campaign_path: matches
            .get_one::<String>("CAMPAIGN")
            .map(PathBuf::from)
            .unwrap_or_default(),
        config_path: matches.get_one::<String>("config").map(PathBuf::from),
        baseline,
        output_path: matches.get_one::<String>("output").map(PathBuf::from),
        serial: matches.get_flag("serial"),
        threads: matches.get_one::<usize>("threads").copied(),
        verbose: matches.get_flag("verbose"),
    })
}

/// 显示程序启动信息
pub fn show_startup_info(config: &AppConfig) {
    println!("🚀 Ageing Analysis Tool v{VERSION} 启动");
    println!("📝 {DESCRIPTION}");
    if config.verbose {
        println!("📁 活动文件 / campaign: {}", config.campaign_path.display());
        if let Some(path) = &config.config_path {
            println!("⚙️  参数文件 / config: {}", path.display());
        }
    }
    println!();
}

/// 显示程序完成信息
pub fn show_completion_info(config: &AppConfig) {
    if config.verbose {
        println!("✅ 所有任务处理完成！");
    }
}
