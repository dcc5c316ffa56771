//! 常量和默认配置集中管理
//!
//! 将所有重要常量集中定义，避免"默认值漂移"和重复定义

/// 测量文件解析常量
pub mod parser {
    /// 默认列分隔符
    ///
    /// 读出系统导出的直方图文件使用冒号分隔
    pub const DEFAULT_DELIMITER: char = ':';

    /// 信号区起始数据行
    ///
    /// 前257行为噪声区（基线附近的低幅度计数），
    /// 之后才是用于峰值拟合的信号分布
    pub const SIGNAL_START_ROW: usize = 257;
}

/// 探测器结构常量
pub mod detector {
    /// 每块板卡的通道数
    pub const CHANNELS_PER_MODULE: u32 = 12;

    /// 板卡标识前缀
    pub const MODULE_PREFIX: &str = "PM";

    /// 允许的探测器侧标识（A侧 / C侧）
    pub const MODULE_SIDES: [char; 2] = ['A', 'C'];
}

/// 高斯拟合算法常量
pub mod fit {
    /// 最大迭代次数
    pub const MAX_ITERATIONS: usize = 1000;

    /// 收敛容差（相对SSE变化 / 相对步长）
    pub const TOLERANCE: f64 = 1e-6;

    /// 拟合区域半宽（以初始σ为单位）
    ///
    /// ±3σ 覆盖 99.7% 的峰面积，同时排除远处的次级结构
    pub const WINDOW_SIGMAS: f64 = 3.0;

    /// 至少需要的非零bin数量（3个自由参数）
    pub const MIN_POPULATED_BINS: usize = 3;

    /// FWHM 与 σ 的换算系数：2·√(2·ln2)
    pub const FWHM_TO_SIGMA: f64 = 2.354_820_045_030_949;

    /// Levenberg–Marquardt 初始阻尼
    pub const INITIAL_DAMPING: f64 = 1e-3;

    /// 阻尼上限，超过即视为已到达驻点
    pub const MAX_DAMPING: f64 = 1e12;
}

/// 拟合质量判定默认阈值
pub mod quality {
    /// 归一化RMSE上限（√(SSE/n)/A）
    pub const MAX_NORMALIZED_RMSE: f64 = 0.1;

    /// σ下限（bin单位），低于此值视为尖峰
    pub const MIN_WIDTH: f64 = 0.5;

    /// σ与数据跨度之比上限，高于此值视为过宽
    pub const MAX_RELATIVE_WIDTH: f64 = 0.5;
}

/// 参考通道峰隔离常量
pub mod reference_peak {
    /// 使用第几个显著峰（1基）
    ///
    /// 参考通道的第一个显著峰来自台阶噪声，第二个才是参考光源峰
    pub const PEAK_RANK: usize = 2;

    /// 最小显著度（计数单位）
    pub const MIN_PROMINENCE: f64 = 0.1;
}

/// 电荷积分常量
pub mod charge {
    /// 每日积分锚点（小时）
    ///
    /// 相邻数据集之间的积分区间从前一测量日正午到本测量日正午
    pub const INTEGRATION_ANCHOR_HOUR: u32 = 12;

    /// CFD触发率到电荷的换算系数
    pub const CFD_RATE_TO_CHARGE: f64 = 43e-15;
}

/// 并发度限制常量
pub mod parallel_limits {
    /// 最小并发度
    ///
    /// 任何并行处理至少需要1个线程/工作单元
    pub const MIN_PARALLEL_DEGREE: usize = 1;

    /// 最大并发度
    ///
    /// 通道拟合是纯CPU计算，超过16线程收益有限
    pub const MAX_PARALLEL_DEGREE: usize = 16;
}
