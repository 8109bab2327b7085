//! 缓存槽位池

use crate::consts::*;
use crate::types::MetaAddr;
use alloc::vec::Vec;

use super::fbuf::{Fbuf, FbufFlags};

/// 缓存槽位池
///
/// 槽位在创建时全部挂到环形队列上，并以槽位下标为键均匀散列到
/// 各哈希桶（此时标签为 `MetaAddr::INVALID`，不会和真实地址冲
/// 突）。载入索引块时槽位被重新散列到其元数据地址对应的桶。
pub struct FbufPool {
    slots: Vec<Fbuf>,
    buckets: Vec<Option<usize>>,
    /// 环形队列头（二次机会扫描的起点）
    cir_head: usize,
    /// 间接队列头，按节点深度划分
    indirect_head: [Option<usize>; META_LEAF_DEPTH as usize],
    /// 脏槽位计数
    pub modified_count: usize,
    /// 缓存命中计数
    pub hits: u64,
    /// 缓存未命中计数
    pub misses: u64,
}

impl FbufPool {
    /// 创建槽位池
    ///
    /// # 参数
    ///
    /// * `count` - 槽位数量（至少 2）
    pub fn new(count: usize) -> Self {
        assert!(count >= 2, "fbuf pool needs at least two slots");
        let mut pool = Self {
            slots: Vec::with_capacity(count),
            buckets: alloc::vec![None; FBUF_BUCKET_COUNT],
            cir_head: 0,
            indirect_head: [None; META_LEAF_DEPTH as usize],
            modified_count: 0,
            hits: 0,
            misses: 0,
        };
        for i in 0..count {
            let mut f = Fbuf::new();
            f.cir_next = (i + 1) % count;
            f.cir_prev = (i + count - 1) % count;
            pool.slots.push(f);
        }
        for i in 0..count {
            // 标签都是 INVALID，用下标作键把槽位均匀分配到各桶
            pool.hash_insert(i, i as u32);
        }
        pool
    }

    /// 槽位数量
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 槽位的只读引用
    pub fn slot(&self, idx: usize) -> &Fbuf {
        &self.slots[idx]
    }

    /// 槽位的可变引用
    pub fn slot_mut(&mut self, idx: usize) -> &mut Fbuf {
        &mut self.slots[idx]
    }

    /// 按元数据地址查找槽位
    pub fn search(&mut self, ma: MetaAddr) -> Option<usize> {
        let mut cur = self.buckets[Self::bucket_of(ma.raw())];
        while let Some(idx) = cur {
            if self.slots[idx].ma == ma {
                self.hits += 1;
                return Some(idx);
            }
            cur = self.slots[idx].hash_next;
        }
        self.misses += 1;
        None
    }

    /// 把槽位重新散列到新地址对应的桶
    pub fn rehash(&mut self, idx: usize, ma: MetaAddr) {
        self.hash_remove(idx);
        self.slots[idx].ma = ma;
        self.hash_insert(idx, ma.raw());
    }

    /// 二次机会扫描，选出一个可复用的槽位
    ///
    /// 从环形队列头开始：被访问过的槽位清除 `ACCESSED` 后放过，
    /// 第一个未被访问的槽位即为受害者。扫描完整一圈仍未命中时，
    /// 选中此刻的队列头（它的 `ACCESSED` 已在本圈被清除）。
    /// 队列头推进到受害者的下一个槽位。
    pub fn second_chance(&mut self) -> usize {
        let mut idx = self.cir_head;
        loop {
            let f = &mut self.slots[idx];
            assert!(f.flags.contains(FbufFlags::ON_CIRCULAR));
            if !f.flags.contains(FbufFlags::ACCESSED) {
                break;
            }
            f.flags.remove(FbufFlags::ACCESSED);
            idx = f.cir_next;
            if idx == self.cir_head {
                break;
            }
        }
        assert_eq!(self.slots[idx].ref_cnt, 0, "circular slot must have no cached children");
        self.cir_head = self.slots[idx].cir_next;
        idx
    }

    /// 把槽位从环形队列钉到深度为 `depth` 的间接队列
    ///
    /// 引用计数清零，由调用方在其下挂接子节点时递增。
    pub fn pin(&mut self, idx: usize, depth: u8) {
        self.cir_remove(idx);
        self.ind_insert(depth, idx);
        self.slots[idx].ref_cnt = 0;
        log::trace!("[FBUF] pin slot {} at depth {}", idx, depth);
    }

    /// 把引用计数归零的间接节点降级回环形队列尾部
    ///
    /// `ACCESSED` 被清除，所以在无人使用的情况下它是二次机会
    /// 扫描的下一个候选。
    pub fn demote(&mut self, idx: usize) {
        assert_eq!(self.slots[idx].ref_cnt, 0);
        self.ind_remove(idx);
        self.cir_insert_tail(idx);
        self.slots[idx].flags.remove(FbufFlags::ACCESSED);
        log::trace!("[FBUF] demote slot {}", idx);
    }

    /// 标记槽位被访问
    pub fn mark_accessed(&mut self, idx: usize) {
        self.slots[idx].flags.insert(FbufFlags::ACCESSED);
    }

    /// 标记槽位为脏并维护脏计数
    pub fn mark_modified(&mut self, idx: usize) {
        let f = &mut self.slots[idx];
        if !f.flags.contains(FbufFlags::MODIFIED) {
            f.flags.insert(FbufFlags::MODIFIED);
            self.modified_count += 1;
        }
    }

    /// 清除槽位的脏标记并维护脏计数
    pub fn clear_modified(&mut self, idx: usize) {
        let f = &mut self.slots[idx];
        if f.flags.contains(FbufFlags::MODIFIED) {
            f.flags.remove(FbufFlags::MODIFIED);
            self.modified_count -= 1;
        }
    }

    /// 环形队列上所有槽位的快照
    pub fn circular_slots(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut idx = self.cir_head;
        loop {
            out.push(idx);
            idx = self.slots[idx].cir_next;
            if idx == self.cir_head {
                break;
            }
        }
        out
    }

    /// 深度为 `depth` 的间接队列上所有槽位的快照
    pub fn indirect_slots(&self, depth: u8) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.indirect_head[depth as usize];
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.slots[idx].ind_next;
        }
        out
    }

    // ===== 内部链表操作 =====

    fn bucket_of(key: u32) -> usize {
        key as usize % FBUF_BUCKET_COUNT
    }

    fn hash_insert(&mut self, idx: usize, key: u32) {
        let b = Self::bucket_of(key);
        let old = self.buckets[b];
        self.slots[idx].bucket = b;
        self.slots[idx].hash_next = old;
        self.slots[idx].hash_prev = None;
        if let Some(o) = old {
            self.slots[o].hash_prev = Some(idx);
        }
        self.buckets[b] = Some(idx);
    }

    fn hash_remove(&mut self, idx: usize) {
        let (b, prev, next) = {
            let f = &self.slots[idx];
            (f.bucket, f.hash_prev, f.hash_next)
        };
        match prev {
            Some(p) => self.slots[p].hash_next = next,
            None => self.buckets[b] = next,
        }
        if let Some(n) = next {
            self.slots[n].hash_prev = prev;
        }
        self.slots[idx].hash_next = None;
        self.slots[idx].hash_prev = None;
    }

    fn cir_remove(&mut self, idx: usize) {
        let f = &self.slots[idx];
        assert!(f.flags.contains(FbufFlags::ON_CIRCULAR));
        assert_ne!(f.cir_next, idx, "circular queue must keep at least one slot");
        let (prev, next) = (f.cir_prev, f.cir_next);
        if self.cir_head == idx {
            self.cir_head = next;
        }
        self.slots[prev].cir_next = next;
        self.slots[next].cir_prev = prev;
        self.slots[idx].flags.remove(FbufFlags::ON_CIRCULAR);
    }

    /// 插入到环形队列尾部（队列头的前面）
    fn cir_insert_tail(&mut self, idx: usize) {
        assert!(!self.slots[idx].flags.contains(FbufFlags::ON_CIRCULAR));
        let head = self.cir_head;
        let prev = self.slots[head].cir_prev;
        self.slots[idx].cir_next = head;
        self.slots[idx].cir_prev = prev;
        self.slots[prev].cir_next = idx;
        self.slots[head].cir_prev = idx;
        self.slots[idx].flags.insert(FbufFlags::ON_CIRCULAR);
    }

    fn ind_insert(&mut self, depth: u8, idx: usize) {
        let old = self.indirect_head[depth as usize];
        self.slots[idx].ind_next = old;
        self.slots[idx].ind_prev = None;
        if let Some(o) = old {
            self.slots[o].ind_prev = Some(idx);
        }
        self.indirect_head[depth as usize] = Some(idx);
    }

    fn ind_remove(&mut self, idx: usize) {
        let depth = self.slots[idx].ma.depth();
        assert!(depth < META_LEAF_DEPTH);
        let (prev, next) = (self.slots[idx].ind_prev, self.slots[idx].ind_next);
        match prev {
            Some(p) => self.slots[p].ind_next = next,
            None => self.indirect_head[depth as usize] = next,
        }
        if let Some(n) = next {
            self.slots[n].ind_prev = prev;
        }
        self.slots[idx].ind_next = None;
        self.slots[idx].ind_prev = None;
    }
}
