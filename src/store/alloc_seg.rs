//! 段分配与追加
//!
//! 任意时刻有两个打开的段：热段收用户数据，冷段收元数据刷写和
//! 清理器搬运的存活数据。段写满时写出摘要、把段标记为已关闭
//! （年龄置 1，使它不再被分配器选中），然后为所属的流分配新段。

use crate::block::SectorDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::segment::{sega2sa, SegSummary, SEGA_NONE};

use super::{LogStore, Stream};

use alloc::vec;

impl<D: SectorDevice> LogStore<D> {
    pub(crate) fn summary(&self, stream: Stream) -> &SegSummary {
        match stream {
            Stream::Hot => &self.hot,
            Stream::Cold => &self.cold,
        }
    }

    pub(crate) fn summary_mut(&mut self, stream: Stream) -> &mut SegSummary {
        match stream {
            Stream::Hot => &mut self.hot,
            Stream::Cold => &mut self.cold,
        }
    }

    /// 为一个流分配新段
    ///
    /// 循环推进分配指针，跳过热段、冷段和年龄非 0（已关闭或被回收
    /// 器持有）的段。扫完整个段池都找不到候选时返回 `Exhausted`。
    pub(crate) fn seg_alloc(&mut self, stream: Stream) -> Result<()> {
        let sega_hot = self.hot.sega;
        let sega_cold = self.cold.sega;
        let pool_segs = self.sb.data_pool();

        for _ in 0..pool_segs {
            let sega = self.sb.seg_alloc_p;
            self.sb.seg_alloc_p += 1;
            if self.sb.seg_alloc_p == self.sb.seg_cnt {
                self.sb.seg_alloc_p = SEG_DATA_START;
            }
            if sega == sega_hot || sega == sega_cold {
                continue;
            }
            if self.sb.seg_age[sega as usize] != 0 {
                continue;
            }

            assert!(self.sb.seg_free_cnt > 0);
            self.sb.seg_free_cnt -= 1;
            let sum = self.summary_mut(stream);
            sum.sega = sega;
            sum.alloc_p = 0;
            log::trace!("[SEG] alloc sega={} for {:?}", sega, stream);
            return Ok(());
        }
        Err(Error::new(ErrorKind::Exhausted, "no free segment available"))
    }

    /// 写出一个流的段摘要
    ///
    /// 摘要落在段的最后一个扇区，盖上当前超级块代数的戳。
    pub(crate) fn seg_sum_write(&mut self, stream: Stream) -> Result<()> {
        let gen = self.sb.sb_gen;
        let mut buf = vec![0u8; SECTOR_SIZE];
        let sum = self.summary_mut(stream);
        sum.gen = gen;
        sum.encode(&mut buf);
        let sa = sega2sa(sum.sega) + SEG_SUM_OFF;
        self.dev.write_sectors(sa, 1, &buf)?;
        self.other_write_count += 1;
        Ok(())
    }

    /// 把一个候选段的摘要从盘上读进来
    pub(crate) fn seg_sum_read_into(&mut self, sum: &mut SegSummary) -> Result<()> {
        let sa = sega2sa(sum.sega) + SEG_SUM_OFF;
        let mut buf = vec![0u8; SECTOR_SIZE];
        self.dev.read_sectors(sa, 1, &mut buf)?;
        sum.decode(&buf)
    }

    /// 关闭一个流当前的段：写出摘要并把年龄置 1
    ///
    /// 年龄非 0 的段既不会被分配器选中，也被记在空闲计数之外，
    /// 重新打开设备后其中的存活数据不会被覆盖。
    pub(crate) fn seg_close(&mut self, stream: Stream) -> Result<()> {
        self.seg_sum_write(stream)?;
        let sega = self.summary(stream).sega;
        assert_ne!(sega, SEGA_NONE);
        self.sb.seg_age[sega as usize] = 1;
        Ok(())
    }

    /// 段写满时的滚动：关闭当前段，分配新段
    ///
    /// 只有热段的滚动才触发清理检查；冷段在清理器和元数据刷写
    /// 内部滚动，不能重入清理器。
    pub(crate) fn seg_roll(&mut self, stream: Stream) -> Result<()> {
        self.seg_close(stream)?;
        self.seg_alloc(stream)?;
        if stream == Stream::Hot {
            self.clean_check()?;
        }
        Ok(())
    }

    /// 追加单个扇区并更新正向映射
    ///
    /// 反向映射在数据写入设备后立即记录；正向映射在段摘要可能
    /// 滚动之后记录。
    pub(crate) fn seg_append_one(&mut self, stream: Stream, ba: u32, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), SECTOR_SIZE);
        if self.summary(stream).alloc_p as u32 == SEG_SUM_OFF {
            // 上次滚动时分配失败，段已关闭但还没有接替者
            self.seg_alloc(stream)?;
        }
        let sum = self.summary(stream);
        assert!((sum.alloc_p as u32) < SEG_SUM_OFF);
        let sa = sega2sa(sum.sega) + sum.alloc_p as u32;

        self.dev.write_sectors(sa, 1, data)?;
        if self.cleaning {
            self.other_write_count += 1;
        } else {
            self.data_write_count += 1;
        }

        let sum = self.summary_mut(stream);
        sum.rm[sum.alloc_p as usize] = ba;
        sum.alloc_p += 1;
        if sum.alloc_p as u32 == SEG_SUM_OFF {
            self.seg_roll(stream)?;
        }
        self.file_write_4byte(FD_ACTIVE, ba, sa)
    }

    /// 范围写：按热段剩余空间分片，每片对设备发出一次连续写
    ///
    /// 跨段的写被拆成每段一片，同一个扇区绝不会写两次。
    pub(crate) fn write_range(&mut self, ba: u32, buf: &[u8]) -> Result<()> {
        let mut ba = ba;
        let mut remain = buf.len() / SECTOR_SIZE;
        let mut off = 0usize;

        while remain > 0 {
            if self.hot.alloc_p as u32 == SEG_SUM_OFF {
                // 上次滚动时分配失败，段已关闭但还没有接替者
                self.seg_alloc(Stream::Hot)?;
            }
            let sum = &self.hot;
            let count = remain.min(sum.free_slots() as usize);
            let sa = sega2sa(sum.sega) + sum.alloc_p as u32;

            self.dev
                .write_sectors(sa, count as u32, &buf[off..off + count * SECTOR_SIZE])?;
            if self.cleaning {
                self.other_write_count += count as u64;
            } else {
                self.data_write_count += count as u64;
            }

            // 数据落盘后立即记录反向映射
            let sum = &mut self.hot;
            for i in 0..count {
                sum.rm[sum.alloc_p as usize] = ba + i as u32;
                sum.alloc_p += 1;
            }
            if sum.alloc_p as u32 == SEG_SUM_OFF {
                self.seg_roll(Stream::Hot)?;
            }
            // 正向映射在段摘要滚动之后记录
            let mut sa = sa;
            for _ in 0..count {
                self.file_write_4byte(FD_ACTIVE, ba, sa)?;
                ba += 1;
                sa += 1;
            }

            off += count * SECTOR_SIZE;
            remain -= count;
        }
        Ok(())
    }
}
