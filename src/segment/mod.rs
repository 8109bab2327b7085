//! 段摘要（segment summary）
//!
//! 每个段的最后一个扇区是段摘要，存放该段的反向映射表：
//! `rm[i]` 记录了段内偏移 `i` 处有效载荷扇区对应的块地址（BA）
//! 或元数据地址（MA）。摘要尾部附带一个 16 位代数（写入时取自
//! 当前超级块代数）和一个 16 位分配指针，指明段内已写入的有效
//! 载荷扇区数。
//!
//! 磁盘布局（小端，恰好一个扇区）：
//!
//! ```text
//! u32 rm[1023] | u16 ss_gen | u16 ss_alloc_p
//! ```

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};

/// 空段地址哨兵（段 0 是超级块环，永远不是数据段）
pub const SEGA_NONE: u32 = 0;

/// 段地址转扇区地址
#[inline]
pub const fn sega2sa(sega: u32) -> u32 {
    sega << SA2SEGA_SHIFT
}

/// 段摘要
///
/// `rm`、`gen` 和 `alloc_p` 会持久化到段的最后一个扇区；
/// `sega` 和 `live_count` 只存在于内存中，分别记录摘要所属的
/// 段地址和清理器统计出的存活块数。
pub struct SegSummary {
    /// 反向映射表：段内偏移 -> BA/MA
    pub rm: [u32; SEG_SUM_ENTRIES],
    /// 写入摘要时的超级块代数
    pub gen: u16,
    /// 段内分配指针（已写入的有效载荷扇区数）
    pub alloc_p: u16,
    /// 所属段地址（仅内存）
    pub sega: u32,
    /// 存活块计数（仅内存，由清理器维护）
    pub live_count: u32,
}

impl SegSummary {
    /// 创建空摘要
    pub fn new() -> Self {
        Self {
            rm: [SECTOR_NULL; SEG_SUM_ENTRIES],
            gen: 0,
            alloc_p: 0,
            sega: SEGA_NONE,
            live_count: 0,
        }
    }

    /// 段内剩余的有效载荷扇区数
    pub fn free_slots(&self) -> u32 {
        SEG_SUM_OFF - self.alloc_p as u32
    }

    /// 序列化到一个扇区
    pub fn encode(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        for (i, rm) in self.rm.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&rm.to_le_bytes());
        }
        let off = SEG_SUM_ENTRIES * 4;
        buf[off..off + 2].copy_from_slice(&self.gen.to_le_bytes());
        buf[off + 2..off + 4].copy_from_slice(&self.alloc_p.to_le_bytes());
    }

    /// 从一个扇区反序列化（不触碰 `sega` 和 `live_count`）
    pub fn decode(&mut self, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), SECTOR_SIZE);
        for i in 0..SEG_SUM_ENTRIES {
            self.rm[i] = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        }
        let off = SEG_SUM_ENTRIES * 4;
        self.gen = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        self.alloc_p = u16::from_le_bytes(buf[off + 2..off + 4].try_into().unwrap());
        if self.alloc_p as u32 > SEG_SUM_OFF {
            return Err(Error::new(ErrorKind::Format, "segment summary alloc pointer out of range"));
        }
        Ok(())
    }
}

impl Default for SegSummary {
    fn default() -> Self {
        Self::new()
    }
}
