//! 超级块读取和验证

use crate::{
    block::SectorDevice,
    consts::*,
    error::{Error, ErrorKind, Result},
};
use alloc::vec;
use alloc::vec::Vec;

use super::Superblock;

/// 从一个扇区反序列化并验证超级块
///
/// # 错误
///
/// 魔数缺失、主版本不匹配或结构字段越界时返回
/// [`ErrorKind::Format`]，调用方据此决定重新格式化。
pub fn decode_superblock(buf: &[u8]) -> Result<Superblock> {
    assert_eq!(buf.len(), SECTOR_SIZE);

    let u32_at = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    let i32_at = |off: usize| i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());

    if u32_at(0) != SIG_LOGSTOR {
        return Err(Error::new(ErrorKind::Format, "bad superblock signature"));
    }
    if buf[4] != VER_MAJOR {
        return Err(Error::new(ErrorKind::Format, "unsupported superblock version"));
    }
    let sb_gen = u16::from_le_bytes(buf[6..8].try_into().unwrap());
    let max_block_cnt = u32_at(8);
    let seg_cnt = i32_at(12);
    let seg_free_cnt = i32_at(16);
    let seg_alloc_p = i32_at(20);
    let seg_reclaim_p = i32_at(24);

    if seg_cnt <= SEG_DATA_START as i32 {
        return Err(Error::new(ErrorKind::Format, "superblock segment count out of range"));
    }
    if SB_FIXED_SIZE + seg_cnt as usize > SECTOR_SIZE {
        return Err(Error::new(ErrorKind::Format, "superblock segment count exceeds sector"));
    }
    if seg_free_cnt < 0 || seg_free_cnt > seg_cnt {
        return Err(Error::new(ErrorKind::Format, "superblock free count out of range"));
    }
    if seg_alloc_p < SEG_DATA_START as i32 || seg_alloc_p >= seg_cnt {
        return Err(Error::new(ErrorKind::Format, "superblock allocation pointer out of range"));
    }
    if seg_reclaim_p < SEG_DATA_START as i32 || seg_reclaim_p >= seg_cnt {
        return Err(Error::new(ErrorKind::Format, "superblock reclaim pointer out of range"));
    }

    let mut ftab = [SECTOR_NULL; FD_COUNT];
    for (i, slot) in ftab.iter_mut().enumerate() {
        *slot = u32_at(28 + i * 4);
    }

    let mut seg_age: Vec<u8> = vec![0u8; seg_cnt as usize];
    seg_age.copy_from_slice(&buf[SB_FIXED_SIZE..SB_FIXED_SIZE + seg_cnt as usize]);

    Ok(Superblock {
        sb_gen,
        max_block_cnt,
        seg_cnt: seg_cnt as u32,
        seg_free_cnt: seg_free_cnt as u32,
        seg_alloc_p: seg_alloc_p as u32,
        seg_reclaim_p: seg_reclaim_p as u32,
        ftab,
        seg_age,
    })
}

/// 沿超级块环扫描，返回最新的超级块及其所在扇区
///
/// 从扇区 0 开始顺序读取：只要当前扇区能通过验证且代数恰好是
/// 前一个的 `+1`（按模 2^16 回绕），就继续前进；序列断开处的前
/// 一个副本即为当前超级块。
///
/// # 返回
///
/// `(superblock, sb_sa)`，`sb_sa` 是当前副本的扇区地址。
pub fn read_superblock<D: SectorDevice>(dev: &mut D) -> Result<(Superblock, u32)> {
    let mut buf = vec![0u8; SECTOR_SIZE];

    dev.read_sectors(0, 1, &mut buf)?;
    let mut current = decode_superblock(&buf)?;
    let mut sb_sa = 0u32;

    for sa in 1..SECTORS_PER_SEG {
        dev.read_sectors(sa, 1, &mut buf)?;
        let next = match decode_superblock(&buf) {
            Ok(sb) => sb,
            Err(_) => break,
        };
        if next.sb_gen != current.sb_gen.wrapping_add(1) {
            break;
        }
        current = next;
        sb_sa = sa;
    }

    log::debug!("[SB] found generation {} at sector {}", current.sb_gen, sb_sa);
    Ok((current, sb_sa))
}
