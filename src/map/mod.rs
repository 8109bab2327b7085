//! 正向映射
//!
//! BA→SA 的正向映射是每个映射文件一棵三层的索引块树：叶子
//! （depth 2）存 1024 个 4 字节扇区地址，depth-1 节点存叶子的
//! 扇区地址，depth-0 节点存 depth-1 节点的扇区地址，根自身的
//! 扇区地址记录在超级块的根地址表（ftab）里。树本身也写进日志：
//! 脏索引块追加到冷段，新地址发布到父节点（根则发布到 ftab），
//! 自底向上传播脏标记。
//!
//! 所有访问都经过 fbuf 缓存。向目标深度下降时，途经的间接节点
//! 被钉到按深度划分的间接队列上并计引用，保证载入子节点时触发
//! 的驱逐不会回收它们。

use crate::block::SectorDevice;
use crate::consts::*;
use crate::error::Result;
use crate::segment::{sega2sa, SEGA_NONE};
use crate::types::MetaAddr;

use crate::store::{LogStore, Stream};

impl<D: SectorDevice> LogStore<D> {
    /// 读取块 `ba` 在文件 `fd` 中的映射条目
    pub(crate) fn file_read_4byte(&mut self, fd: u8, ba: u32) -> Result<u32> {
        let (idx, off) = self.file_access(fd, ba, false)?;
        Ok(self.pool.slot(idx).read_u32_at(off))
    }

    /// 写入块 `ba` 在文件 `fd` 中的映射条目
    pub(crate) fn file_write_4byte(&mut self, fd: u8, ba: u32, sa: u32) -> Result<()> {
        let (idx, off) = self.file_access(fd, ba, true)?;
        self.pool.slot_mut(idx).write_u32_at(off, sa);
        Ok(())
    }

    /// 取得覆盖 `ba` 的叶子节点和条目在叶内的字节偏移
    ///
    /// 读写映射的公共入口：叶子被标记为已访问，写访问额外标脏。
    fn file_access(&mut self, fd: u8, ba: u32, write: bool) -> Result<(usize, usize)> {
        assert_eq!(ba & META_BASE, 0, "user block address expected");
        let ma = MetaAddr::leaf(fd, ba);
        let idx = self.fbuf_get(ma)?;
        self.pool.mark_accessed(idx);
        if write {
            self.pool.mark_modified(idx);
        }
        Ok((idx, ((ba & (MAP_ENTRIES_PER_BLOCK - 1)) * 4) as usize))
    }

    /// 取得元数据地址 `ma` 对应的缓存槽位
    ///
    /// 缓存未命中时从根向目标深度逐层下降，按需读盘。下降途中
    /// 经过的 depth-d 节点被钉到 `indirect_list[d]`；每次经过先
    /// 递增其引用计数以防被本层子节点的载入驱逐，子节点命中缓存
    /// 时再补偿递减（未命中时这次递增由子节点挂接抵账）。
    pub(crate) fn fbuf_get(&mut self, ma: MetaAddr) -> Result<usize> {
        assert!(MetaAddr::is_meta(ma.raw()));
        if let Some(idx) = self.pool.search(ma) {
            return Ok(idx);
        }

        let mut sa = self.sb.ftab[ma.fd() as usize];
        let mut parent: Option<usize> = None;
        let mut tma = MetaAddr::root(ma.fd());
        let mut depth: u8 = 0;
        loop {
            tma = tma.with_depth(depth);
            let idx = match self.pool.search(tma) {
                Some(found) => {
                    debug_assert_eq!(self.pool.slot(found).parent, parent);
                    if let Some(p) = parent {
                        // 上一层为保险多拿的引用在命中时还回去
                        self.pool.slot_mut(p).ref_cnt -= 1;
                    }
                    found
                }
                None => {
                    let loaded = self.fbuf_read_and_hash(sa, tma)?;
                    self.pool.slot_mut(loaded).parent = parent;
                    loaded
                }
            };
            if depth == ma.depth() {
                return Ok(idx);
            }

            if self.pool.slot(idx).on_circular() {
                // 有子节点要进缓存，把本节点钉到间接队列
                self.pool.pin(idx, depth);
            }
            self.pool.slot_mut(idx).ref_cnt += 1;

            let child = ma.index_at(depth);
            tma = tma.with_index_at(depth, child);
            sa = self.pool.slot(idx).entry(child as usize);
            parent = Some(idx);
            depth += 1;
        }
    }

    /// 分配一个槽位，填入扇区 `sa` 的内容并散列到 `ma`
    ///
    /// `sa == SECTOR_NULL` 表示该索引块还不存在，填零即可。
    fn fbuf_read_and_hash(&mut self, sa: u32, ma: MetaAddr) -> Result<usize> {
        let idx = self.fbuf_alloc()?;
        if sa == SECTOR_NULL {
            self.pool.slot_mut(idx).data.fill(0);
        } else {
            self.dev.read_sectors(sa, 1, &mut self.pool.slot_mut(idx).data)?;
        }
        self.pool.rehash(idx, ma);
        Ok(idx)
    }

    /// 用二次机会算法腾出一个槽位
    ///
    /// 受害者若是脏的先刷写。随后与父节点解除挂接：父节点引用
    /// 计数归零时降级回环形队列尾部。
    fn fbuf_alloc(&mut self) -> Result<usize> {
        let idx = self.pool.second_chance();
        if self.pool.slot(idx).is_modified() {
            self.fbuf_flush(idx)?;
        }
        if let Some(p) = self.pool.slot(idx).parent {
            self.pool.slot_mut(idx).parent = None;
            let ps = self.pool.slot_mut(p);
            assert!(!ps.on_circular());
            ps.ref_cnt -= 1;
            if ps.ref_cnt == 0 {
                self.pool.demote(p);
            }
        }
        log::trace!("[FBUF] recycle slot {}", idx);
        Ok(idx)
    }

    /// 刷写一个脏槽位
    ///
    /// 索引块追加到冷段，得到的新扇区地址发布到父节点（父节点因
    /// 此变脏），根节点则发布到超级块的根地址表。子节点总是先于
    /// 父节点落盘。
    pub(crate) fn fbuf_flush(&mut self, idx: usize) -> Result<()> {
        assert!(self.pool.slot(idx).is_modified());
        let ma = self.pool.slot(idx).ma;
        assert!(MetaAddr::is_meta(ma.raw()));

        let sa = self.fbuf_write_out(idx)?;
        if ma.depth() == 0 {
            self.sb.ftab[ma.fd() as usize] = sa;
            self.sb_dirty = true;
        } else {
            let p = self
                .pool
                .slot(idx)
                .parent
                .expect("dirty index node must have a cached parent");
            let pindex = ma.index_at(ma.depth() - 1) as usize;
            self.pool.slot_mut(p).set_entry(pindex, sa);
            self.pool.mark_modified(p);
        }
        Ok(())
    }

    /// 把槽位的索引块追加到冷段，返回新的扇区地址
    ///
    /// 元数据不走热段，冷段滚动时也不触发清理检查。
    fn fbuf_write_out(&mut self, idx: usize) -> Result<u32> {
        if self.cold.alloc_p as u32 == SEG_SUM_OFF {
            // 上次滚动时分配失败，段已关闭但还没有接替者
            self.seg_alloc(Stream::Cold)?;
        }
        let sum = &self.cold;
        let sa = sega2sa(sum.sega) + sum.alloc_p as u32;
        let ma = self.pool.slot(idx).ma;

        self.dev.write_sectors(sa, 1, &self.pool.slot(idx).data)?;
        self.other_write_count += 1;
        self.pool.clear_modified(idx);

        let sum = &mut self.cold;
        sum.rm[sum.alloc_p as usize] = ma.raw();
        sum.alloc_p += 1;
        if sum.alloc_p as u32 == SEG_SUM_OFF {
            self.seg_roll(Stream::Cold)?;
        }
        log::trace!("[FBUF] flush {:?} -> sa {}", ma, sa);
        Ok(sa)
    }

    /// 解析元数据地址当前的扇区地址（清理器的存活判定用）
    ///
    /// depth 0 的地址在超级块根地址表里；更深的节点从缓存中的
    /// 父节点读出。
    pub(crate) fn fbuf_ma2sa(&mut self, ma: MetaAddr) -> Result<u32> {
        match ma.depth() {
            0 => Ok(self.sb.ftab[ma.fd() as usize]),
            1 | 2 => {
                let idx = self.fbuf_get(ma)?;
                let p = self
                    .pool
                    .slot(idx)
                    .parent
                    .expect("non-root index node must have a pinned parent");
                let pindex = ma.index_at(ma.depth() - 1) as usize;
                Ok(self.pool.slot(p).entry(pindex))
            }
            _ => unreachable!("metadata depth out of range"),
        }
    }

    /// 刷写全部脏元数据
    ///
    /// 两趟：先刷环形队列上的脏节点（叶子和失去子节点的孤儿），
    /// 再按深度从深到浅刷间接队列上的脏节点。这样保证子节点先于
    /// 父节点看到新地址。
    pub(crate) fn flush_metadata(&mut self) -> Result<()> {
        debug_assert_ne!(self.cold.sega, SEGA_NONE);
        for idx in self.pool.circular_slots() {
            if self.pool.slot(idx).is_modified() {
                self.fbuf_flush(idx)?;
            }
        }
        for depth in (0..META_LEAF_DEPTH).rev() {
            for idx in self.pool.indirect_slots(depth) {
                if self.pool.slot(idx).is_modified() {
                    self.fbuf_flush(idx)?;
                }
            }
        }
        debug_assert_eq!(self.pool.modified_count, 0);
        Ok(())
    }
}
