//! logstor 常量定义
//!
//! 这个模块包含了 logstor 磁盘布局和策略的所有常量定义，包括：
//! - 扇区和段的几何参数
//! - 磁盘布局相关常量（超级块、段摘要）
//! - 元数据地址空间
//! - 段清理器的策略参数

//=============================================================================
// 基础几何
//=============================================================================

/// 扇区大小（4096 字节）
pub const SECTOR_SIZE: usize = 4096;

/// 段大小（4 MiB）
pub const SEG_SIZE: usize = 0x40_0000;

/// 每段的扇区数（1024）
pub const SECTORS_PER_SEG: u32 = (SEG_SIZE / SECTOR_SIZE) as u32;

/// 段地址与扇区地址的转换位移（sa = sega << SA2SEGA_SHIFT）
pub const SA2SEGA_SHIFT: u32 = 10;

/// 段摘要在段内的扇区偏移（段的最后一个扇区）
pub const SEG_SUM_OFF: u32 = SECTORS_PER_SEG - 1;

/// 段摘要反向映射表的条目数
pub const SEG_SUM_ENTRIES: usize = (SECTORS_PER_SEG - 1) as usize;

/// 每段可存放的数据块数（扣除段摘要）
pub const BLOCKS_PER_SEG: u32 = SECTORS_PER_SEG - 1;

/// 数据段的起始段地址（段 0 保留给超级块环）
pub const SEG_DATA_START: u32 = 1;

//=============================================================================
// 超级块
//=============================================================================

/// 超级块魔数（ASCII "LOGS"）
pub const SIG_LOGSTOR: u32 = 0x4C4F_4753;

/// 磁盘格式主版本号
pub const VER_MAJOR: u8 = 0;

/// 磁盘格式次版本号
pub const VER_MINOR: u8 = 1;

/// 超级块定长部分的字节数（seg_age 数组之前）
pub const SB_FIXED_SIZE: usize = 40;

/// 格式化时的默认初始代数（嵌入方应通过配置提供随机种子）
pub const DEFAULT_FORMAT_GEN: u16 = 0x4C53;

//=============================================================================
// 扇区地址
//=============================================================================

/// 空映射的扇区地址（块尚未写入）
pub const SECTOR_NULL: u32 = 0;

/// 删除标记的扇区地址（块已被 delete）
pub const SECTOR_DELETE: u32 = 2;

//=============================================================================
// 元数据地址
//=============================================================================

/// 元数据地址空间的基址（高 2 位为 11）
pub const META_BASE: u32 = 0xC000_0000;

/// 无效的元数据地址（缓存槽位的空标签）
pub const META_INVALID: u32 = 0;

/// 正向映射树的叶子深度（树共 3 层：0、1、2）
pub const META_LEAF_DEPTH: u8 = 2;

/// 每个索引块的映射条目数（SECTOR_SIZE / 4）
pub const MAP_ENTRIES_PER_BLOCK: u32 = (SECTOR_SIZE / 4) as u32;

/// 块地址到叶子索引的位移
pub const MAP_ENTRY_SHIFT: u32 = 10;

//=============================================================================
// 正向映射文件
//=============================================================================

/// 基础映射文件（为快照方案保留）
pub const FD_BASE: u8 = 0;

/// 当前活跃的映射文件
pub const FD_ACTIVE: u8 = 1;

/// 增量映射文件（为快照方案保留）
pub const FD_DELTA: u8 = 2;

/// 正向映射文件的数量
pub const FD_COUNT: usize = 3;

//=============================================================================
// 元数据缓存（fbuf）
//=============================================================================

/// fbuf 哈希桶的数量（素数）
pub const FBUF_BUCKET_COUNT: usize = 12899;

/// fbuf 槽位数量的下限（保证小设备也有可用的下降链）
pub const FBUF_MIN_COUNT: usize = 32;

//=============================================================================
// 段清理器
//=============================================================================

/// 清理窗口的候选段数量
pub const CLEAN_WINDOW: usize = 6;

/// 强制清理的年龄上限
pub const CLEAN_AGE_LIMIT: u8 = 4;
