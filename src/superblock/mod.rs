//! 超级块操作模块
//!
//! 设备的第一个段（扇区 `[0, SECTORS_PER_SEG)`）构成超级块环：
//! 每次持久化根状态时，超级块以递增的代数写入环中的下一个扇区。
//! 打开设备时沿环向前扫描，找到代数连续序列的最后一个有效副本。
//!
//! 磁盘布局（小端，定长部分 40 字节，总长不超过一个扇区）：
//!
//! ```text
//! u32 magic | u8 ver_major | u8 ver_minor | u16 sb_gen |
//! u32 max_block_cnt | i32 seg_cnt | i32 seg_free_cnt |
//! i32 seg_alloc_p | i32 seg_reclaim_p | u32 ftab[3] |
//! u8 seg_age[seg_cnt]
//! ```

mod read;
mod write;

pub use read::{decode_superblock, read_superblock};
pub use write::{format_superblock, write_superblock};

use crate::consts::*;
use alloc::vec::Vec;

/// 超级块（内存表示）
///
/// 持有存储核心的根状态：段池的几何与分配/回收指针、正向映射
/// 树的根扇区地址表，以及每个段的年龄数组。
#[derive(Debug)]
pub struct Superblock {
    /// 代数，每次写入超级块时递增（按模 2^16 回绕比较）
    pub(crate) sb_gen: u16,
    /// 支持的最大块数
    pub(crate) max_block_cnt: u32,
    /// 总段数
    pub(crate) seg_cnt: u32,
    /// 空闲段数
    pub(crate) seg_free_cnt: u32,
    /// 段分配指针
    pub(crate) seg_alloc_p: u32,
    /// 段回收指针
    pub(crate) seg_reclaim_p: u32,
    /// 正向映射文件的根扇区地址表
    pub(crate) ftab: [u32; FD_COUNT],
    /// 段年龄数组：0 表示空闲可分配，非 0 表示在日志中或被回收器跳过
    pub(crate) seg_age: Vec<u8>,
}

impl Superblock {
    /// 当前代数
    pub fn generation(&self) -> u16 {
        self.sb_gen
    }

    /// 支持的最大块数
    pub fn max_block_cnt(&self) -> u32 {
        self.max_block_cnt
    }

    /// 总段数
    pub fn seg_cnt(&self) -> u32 {
        self.seg_cnt
    }

    /// 空闲段数
    pub fn seg_free_cnt(&self) -> u32 {
        self.seg_free_cnt
    }

    /// 数据段池的大小（扣除超级块环所在的段）
    pub(crate) fn data_pool(&self) -> u32 {
        self.seg_cnt - SEG_DATA_START
    }
}
