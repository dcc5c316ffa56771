//! 输入层
//!
//! 测量文件与富集时间序列的解析，以及外部名称的规范化。不写文件系统。

pub mod histogram_parser;
pub mod rate_series;
pub mod validation;

pub use histogram_parser::{
    Bin, ChannelDistribution, ParsedDataset, ParsedModule, ParserConfig, parse_dataset,
    parse_module, parse_module_text,
};
pub use rate_series::{RateSeries, load_rate_series, parse_rate_series};
pub use validation::{
    normalize_channel_name, normalize_module_name, parse_channel_name, validate_module_identifier,
};
