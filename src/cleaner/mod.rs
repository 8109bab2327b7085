//! 段清理器
//!
//! 空闲段数跌到低水位时同步运行，把候选段中仍然存活的块搬进
//! 冷段，使候选段重新变为空闲，直到空闲段数回到高水位之上。
//!
//! 候选段按回收指针的顺序进入一个大小为 `CLEAN_WINDOW` 的滑动
//! 窗口，每轮清掉窗口中存活块最少（最冷）的段。在窗口头部熬过
//! 完整一轮的段，如果其存活数不低于窗口平均值，就增加年龄并逐
//! 出窗口（暂不清理）；年龄到达 `CLEAN_AGE_LIMIT` 的段在下次被
//! 回收指针扫到时强制清理，保证高存活段最终也会被搬空。

use crate::block::SectorDevice;
use crate::consts::*;
use crate::error::Result;
use crate::segment::{sega2sa, SegSummary};
use crate::types::MetaAddr;

use crate::store::{LogStore, Stream};

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

impl<D: SectorDevice> LogStore<D> {
    /// 清理检查：空闲段数跌破低水位时运行清理器
    ///
    /// 只由热段的滚动触发；清理器运行期间的段滚动不会重入。
    pub(crate) fn clean_check(&mut self) -> Result<()> {
        if self.sb.seg_free_cnt <= self.clean_low_water && !self.cleaning {
            self.cleaning = true;
            let result = self.cleaner();
            self.cleaning = false;
            result?;
        }
        Ok(())
    }

    /// 清理器主循环
    fn cleaner(&mut self) -> Result<()> {
        log::debug!(
            "[CLEAN] pass start: free={} low={} high={}",
            self.sb.seg_free_cnt,
            self.clean_low_water,
            self.clean_high_water
        );

        let mut cands: Vec<SegSummary> = (0..CLEAN_WINDOW).map(|_| SegSummary::new()).collect();
        let mut window: VecDeque<usize> = VecDeque::with_capacity(CLEAN_WINDOW);

        let mut done = false;
        for slot in 0..CLEAN_WINDOW {
            if !self.seg_reclaim_init(&mut cands[slot])? {
                done = true;
                break;
            }
            window.push_back(slot);
        }

        let mut prev_head: Option<usize> = None;
        let mut stalled = 0usize;
        while !done {
            let free_before = self.sb.seg_free_cnt;

            // 找窗口中存活数最少的段，并计算其余候选的平均存活数
            let mut min_live = u32::MAX;
            let mut min_pos = 0usize;
            let mut live_sum: u64 = 0;
            for (pos, &slot) in window.iter().enumerate() {
                let lc = cands[slot].live_count;
                live_sum += u64::from(lc);
                if lc < min_live {
                    min_live = lc;
                    min_pos = pos;
                }
            }
            let live_avg = ((live_sum - u64::from(min_live)) / (CLEAN_WINDOW as u64 - 1)) as u32;

            let mut slot = window.remove(min_pos).expect("window candidate");
            let mut head_checked = false;
            let mut do_clean = true;
            loop {
                if do_clean {
                    self.seg_clean(&cands[slot])?;
                    if self.sb.seg_free_cnt > self.clean_high_water {
                        done = true;
                        break;
                    }
                }
                if !self.seg_reclaim_init(&mut cands[slot])? {
                    done = true;
                    break;
                }
                window.push_back(slot);
                if head_checked {
                    break;
                }
                head_checked = true;

                // 让窗口保持移动：头部熬过完整一轮的段要么立即清理
                // （存活数低于平均），要么增加年龄后逐出
                let head = *window.front().expect("window head");
                if prev_head == Some(head) {
                    prev_head = window.get(1).copied();
                    window.pop_front();
                    slot = head;
                    if cands[slot].live_count >= live_avg {
                        let sega = cands[slot].sega as usize;
                        self.sb.seg_age[sega] = self.sb.seg_age[sega].saturating_add(1);
                        do_clean = false;
                    } else {
                        do_clean = true;
                    }
                } else {
                    prev_head = Some(head);
                    break;
                }
            }

            // 整轮下来空闲段数没有增长，说明工作集全部存活，
            // 继续清理只是在原地搬运
            if self.sb.seg_free_cnt > free_before {
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= CLEAN_WINDOW {
                    log::warn!("[CLEAN] no progress after {} rounds, giving up", stalled);
                    break;
                }
            }
        }

        // 扫尾：窗口里剩下的候选，存活数不足半段的顺手清掉
        for &slot in window.iter() {
            if cands[slot].live_count < BLOCKS_PER_SEG / 2 {
                self.seg_clean(&cands[slot])?;
            }
        }

        log::debug!("[CLEAN] pass end: free={}", self.sb.seg_free_cnt);
        Ok(())
    }

    /// 初始化下一个回收候选
    ///
    /// 循环推进回收指针，跳过热段、冷段和空闲（年龄 0）的段。
    /// 候选的年龄加一，从盘上读入其摘要；年龄到达上限的段当场
    /// 强制清理。返回 `false` 表示应当停止清理（空闲段数已越过
    /// 高水位，或者整个段池里已没有可回收的段）。
    fn seg_reclaim_init(&mut self, cand: &mut SegSummary) -> Result<bool> {
        let pool_segs = self.sb.data_pool();
        let mut scanned = 0u32;
        while scanned < pool_segs {
            let sega = self.sb.seg_reclaim_p;
            self.sb.seg_reclaim_p += 1;
            if self.sb.seg_reclaim_p == self.sb.seg_cnt {
                self.sb.seg_reclaim_p = SEG_DATA_START;
            }
            scanned += 1;

            if sega == self.hot.sega || sega == self.cold.sega {
                continue;
            }
            if self.sb.seg_age[sega as usize] == 0 {
                // 空闲段，无可回收
                continue;
            }

            self.sb.seg_age[sega as usize] = self.sb.seg_age[sega as usize].saturating_add(1);
            cand.sega = sega;
            self.seg_sum_read_into(cand)?;

            if self.sb.seg_age[sega as usize] >= CLEAN_AGE_LIMIT {
                log::debug!("[CLEAN] forced clean of aged segment {}", sega);
                self.seg_clean(cand)?;
                if self.sb.seg_free_cnt > self.clean_high_water {
                    return Ok(false);
                }
                continue;
            }

            self.seg_live_count(cand)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// 统计候选段的存活块数
    ///
    /// 逐个探测反向映射表：用户块取正向映射，元数据块经缓存解析
    /// 当前地址；与槽位自身的扇区地址一致即为存活。
    fn seg_live_count(&mut self, cand: &mut SegSummary) -> Result<()> {
        let seg_sa = sega2sa(cand.sega);
        let mut live = 0u32;
        for i in 0..cand.alloc_p as u32 {
            let ba = cand.rm[i as usize];
            if MetaAddr::is_meta(ba) {
                let ma = MetaAddr::from_raw(ba);
                if ma.depth() > META_LEAF_DEPTH {
                    continue; // 损坏的反向映射条目，当作垃圾
                }
                if self.fbuf_ma2sa(ma)? == seg_sa + i {
                    live += 1;
                }
            } else {
                if ba >= self.sb.max_block_cnt {
                    continue;
                }
                if self.file_read_4byte(FD_ACTIVE, ba)? == seg_sa + i {
                    live += 1;
                }
            }
        }
        cand.live_count = live;
        log::trace!("[CLEAN] segment {} live={}/{}", cand.sega, live, cand.alloc_p);
        Ok(())
    }

    /// 压实一个候选段
    ///
    /// 存活的用户块从盘上读出、经冷段重新追加（追加路径同时更新
    /// 正向映射，旧位置随之失效）。存活的元数据块标脏，交给刷写
    /// 路径重写；最近没有被访问过的当场刷出。全部处理完后段变为
    /// 空闲：年龄归零，空闲计数加一。
    ///
    /// 对已经空闲的段是幂等的空操作，窗口中的重复候选不会重复
    /// 计数。
    fn seg_clean(&mut self, cand: &SegSummary) -> Result<()> {
        let sega = cand.sega;
        if self.sb.seg_age[sega as usize] == 0 {
            return Ok(());
        }
        let seg_sa = sega2sa(sega);
        let mut sector = vec![0u8; SECTOR_SIZE];

        for i in 0..cand.alloc_p as u32 {
            let ba = cand.rm[i as usize];
            if MetaAddr::is_meta(ba) {
                let ma = MetaAddr::from_raw(ba);
                if ma.depth() > META_LEAF_DEPTH {
                    continue;
                }
                if self.fbuf_ma2sa(ma)? != seg_sa + i {
                    continue; // 垃圾
                }
                let idx = self.fbuf_get(ma)?;
                if !self.pool.slot(idx).is_modified() {
                    // 标脏后这个索引块终将被刷写到新位置
                    self.pool.mark_modified(idx);
                    if !self.pool.slot(idx).is_accessed() {
                        self.fbuf_flush(idx)?;
                    }
                }
            } else {
                if ba >= self.sb.max_block_cnt {
                    continue;
                }
                if self.file_read_4byte(FD_ACTIVE, ba)? != seg_sa + i {
                    continue; // 垃圾
                }
                self.dev.read_sectors(seg_sa + i, 1, &mut sector)?;
                self.seg_append_one(Stream::Cold, ba, &sector)?;
            }
        }

        self.sb.seg_age[sega as usize] = 0;
        self.sb.seg_free_cnt += 1;
        log::trace!("[CLEAN] segment {} reclaimed, free={}", sega, self.sb.seg_free_cnt);
        Ok(())
    }
}
