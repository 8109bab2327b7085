//! 超级块写入和初始化

use crate::{
    block::SectorDevice,
    consts::*,
    error::{Error, ErrorKind, Result},
};
use alloc::vec;

use super::Superblock;

/// 叶子索引字段只有 20 位，块数上限为 2^30
const MAX_BLOCK_LIMIT: u32 = 1 << 30;

/// 格式化所需的最小段数
const MIN_SEG_CNT: u32 = SEG_DATA_START + CLEAN_WINDOW as u32 + 3;

impl Superblock {
    /// 序列化到一个扇区
    pub fn encode(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        assert!(SB_FIXED_SIZE + self.seg_age.len() <= SECTOR_SIZE);

        buf.fill(0);
        buf[0..4].copy_from_slice(&SIG_LOGSTOR.to_le_bytes());
        buf[4] = VER_MAJOR;
        buf[5] = VER_MINOR;
        buf[6..8].copy_from_slice(&self.sb_gen.to_le_bytes());
        buf[8..12].copy_from_slice(&self.max_block_cnt.to_le_bytes());
        buf[12..16].copy_from_slice(&(self.seg_cnt as i32).to_le_bytes());
        buf[16..20].copy_from_slice(&(self.seg_free_cnt as i32).to_le_bytes());
        buf[20..24].copy_from_slice(&(self.seg_alloc_p as i32).to_le_bytes());
        buf[24..28].copy_from_slice(&(self.seg_reclaim_p as i32).to_le_bytes());
        for (i, sa) in self.ftab.iter().enumerate() {
            buf[28 + i * 4..32 + i * 4].copy_from_slice(&sa.to_le_bytes());
        }
        buf[SB_FIXED_SIZE..SB_FIXED_SIZE + self.seg_age.len()].copy_from_slice(&self.seg_age);
    }
}

/// 推进超级块环并写出一个新副本
///
/// 代数递增，`sb_sa` 循环推进到环中的下一个扇区。
pub fn write_superblock<D: SectorDevice>(
    dev: &mut D,
    sb: &mut Superblock,
    sb_sa: &mut u32,
) -> Result<()> {
    sb.sb_gen = sb.sb_gen.wrapping_add(1);
    *sb_sa += 1;
    if *sb_sa == SECTORS_PER_SEG {
        *sb_sa = 0;
    }

    let mut buf = vec![0u8; SECTOR_SIZE];
    sb.encode(&mut buf);
    dev.write_sectors(*sb_sa, 1, &buf)?;
    log::debug!("[SB] wrote generation {} at sector {}", sb.sb_gen, *sb_sa);
    Ok(())
}

/// 在设备上建立一个全新的布局并写出第一个超级块
///
/// 根据设备容量推导段数和最大块数。扣除正向映射树自身的开销后
/// 再保留一成余量，防止日志空间被用户数据完全占满。
///
/// # 参数
///
/// * `dev` - 下游设备
/// * `format_gen` - 初始代数（嵌入方应提供随机值）
///
/// # 错误
///
/// 设备太小（容纳不下段池或映射树）时返回 `InvalidInput`。
pub fn format_superblock<D: SectorDevice>(
    dev: &mut D,
    format_gen: u16,
) -> Result<(Superblock, u32)> {
    let sector_cnt = dev.sector_count();
    let seg_cnt = sector_cnt / SECTORS_PER_SEG;

    if seg_cnt < MIN_SEG_CNT {
        return Err(Error::new(ErrorKind::InvalidInput, "device too small"));
    }
    if SB_FIXED_SIZE + seg_cnt as usize > SECTOR_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "segment count exceeds superblock capacity",
        ));
    }

    let seg_free_cnt = seg_cnt - SEG_DATA_START;
    let payload = seg_free_cnt * BLOCKS_PER_SEG;
    let map_overhead = (sector_cnt / MAP_ENTRIES_PER_BLOCK) * FD_COUNT as u32;
    if payload <= map_overhead {
        return Err(Error::new(ErrorKind::InvalidInput, "device cannot hold forward map"));
    }
    let raw = payload - map_overhead;
    let max_block_cnt = (raw - raw / 10).min(MAX_BLOCK_LIMIT);

    let sb = Superblock {
        sb_gen: format_gen,
        max_block_cnt,
        seg_cnt,
        seg_free_cnt,
        seg_alloc_p: SEG_DATA_START,
        seg_reclaim_p: SEG_DATA_START,
        ftab: [SECTOR_NULL; FD_COUNT],
        seg_age: vec![0u8; seg_cnt as usize],
    };

    let mut buf = vec![0u8; SECTOR_SIZE];
    sb.encode(&mut buf);
    dev.write_sectors(0, 1, &buf)?;
    log::debug!(
        "[SB] formatted: seg_cnt={} max_block_cnt={} generation={}",
        seg_cnt,
        max_block_cnt,
        format_gen
    );
    Ok((sb, 0))
}
