//! 数据模型
//!
//! 描述符（输入）、可用性标记与结果记录（输出）。

pub mod availability;
pub mod descriptor;
pub mod results;

pub use availability::{Availability, Factor, UnavailableReason};
pub use descriptor::{
    CampaignDescriptor, ChannelKey, ChannelMapping, ChargeSource, ChargeWindow,
    CumulativeChargeSource, DatasetDescriptor, ModuleDescriptor, MultiplierChange, RateCorrection,
    RateSample,
};
pub use results::{
    AgeingFactors, CampaignResult, ChannelRecord, ChargeOrigin, ChargeRecord, ChargeStatus,
    DatasetResult, DatasetStatus, FitQuality, FitResult, FitSource, ModuleResult, ReferenceMean,
};
