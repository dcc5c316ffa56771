//! 老化分析测试固件生成器
//!
//! 在临时目录中生成合成的高斯直方图模块文件，以及对应的活动描述。

#![allow(dead_code)]

use ageing_analysis_tool::AnalysisConfig;
use ageing_analysis_tool::model::{DatasetDescriptor, ModuleDescriptor};
use chrono::NaiveDate;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// 固件模块的通道数（每通道两列，共8个数据列）
pub const CHANNELS: u32 = 4;

/// 直方图bin范围
const BIN_COUNT: usize = 251;
const AMPLITUDE: f64 = 500.0;
const SIGMA: f64 = 6.0;

fn log(msg_zh: impl AsRef<str>, msg_en: impl AsRef<str>) {
    println!("{} / {}", msg_zh.as_ref(), msg_en.as_ref());
}

pub fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).expect("有效日期")
}

/// 测试用分析参数：整个文件都是信号区，两线程拟合
pub fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.parser.signal_start_row = 0;
    config.parallel.enabled = true;
    config.parallel.threads = Some(2);
    config
}

/// 串行版本，用于对比并行输出
pub fn serial_config() -> AnalysisConfig {
    let mut config = test_config();
    config.parallel.enabled = false;
    config
}

fn gaussian(x: f64, mean: f64) -> f64 {
    let z = (x - mean) / SIGMA;
    AMPLITUDE * (-0.5 * z * z).exp()
}

/// 生成模块文件内容：`peaks[i]` 为通道 i+1 的峰位，None 表示该通道全零
pub fn module_text(peaks: &[Option<f64>]) -> String {
    let mut text = String::from("bin");
    for channel in 1..=peaks.len() {
        let _ = write!(text, ":CH{channel:02}_1:CH{channel:02}_2");
    }
    text.push('\n');

    for bin in 0..BIN_COUNT {
        let x = bin as f64;
        let _ = write!(text, "{bin}");
        for peak in peaks {
            let count = peak.map_or(0.0, |mean| gaussian(x, mean));
            // 每个通道的计数平分到两列
            let _ = write!(text, ":{:.9}:{:.9}", count / 2.0, count / 2.0);
        }
        text.push('\n');
    }
    text
}

/// 写入模块文件并返回路径
pub fn write_module_file(dir: &Path, identifier: &str, peaks: &[Option<f64>]) -> PathBuf {
    fs::create_dir_all(dir).expect("无法创建固件目录");
    let path = dir.join(format!("{identifier}.txt"));
    fs::write(&path, module_text(peaks)).expect("无法写入固件文件");
    log(
        format!("生成模块文件: {}", path.display()),
        format!("Generated module file: {}", path.display()),
    );
    path
}

/// 写入模块文件并构造描述
pub fn module(
    dir: &Path,
    identifier: &str,
    peaks: &[Option<f64>],
    reference_channels: &[u32],
) -> ModuleDescriptor {
    assert_eq!(peaks.len(), CHANNELS as usize, "固件通道数不符 / fixture channel count");
    let path = write_module_file(dir, identifier, peaks);
    ModuleDescriptor::new(identifier, path, CHANNELS)
        .with_reference_channels(reference_channels.to_vec())
}

/// 参考通道1、2位于 `reference`，通道3、4位于给定峰位的 PMA0 数据集
pub fn standard_dataset(
    root: &Path,
    date: NaiveDate,
    reference: f64,
    channel3: Option<f64>,
    channel4: Option<f64>,
) -> DatasetDescriptor {
    let dir = root.join(date.to_string());
    let pma0 = module(
        &dir,
        "PMA0",
        &[Some(reference), Some(reference), channel3, channel4],
        &[1, 2],
    );
    let mut dataset = DatasetDescriptor::new(date, vec![pma0]);
    dataset.reference_module = Some("PMA0".to_string());
    dataset
}
