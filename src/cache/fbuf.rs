//! 缓存槽位结构

use crate::consts::*;
use crate::types::MetaAddr;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// 缓存槽位标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FbufFlags: u8 {
        /// 自上次二次机会扫描以来被访问过
        const ACCESSED = 0x01;
        /// 数据已修改（脏），需要刷写
        const MODIFIED = 0x02;
        /// 在环形队列上（否则在某条间接队列上）
        const ON_CIRCULAR = 0x04;
    }
}

/// 缓存槽位（fbuf）
///
/// 每个槽位缓存正向映射树的一个索引块。`parent` 是指向父节点
/// 槽位的弱引用（池内下标），由父节点的 `ref_cnt` 保护：只要
/// 还有子节点在缓存中，父节点就不会被驱逐。
pub struct Fbuf {
    /// 元数据地址（哈希键；`MetaAddr::INVALID` 表示槽位未使用）
    pub ma: MetaAddr,
    /// 父节点的池内下标
    pub parent: Option<usize>,
    /// 缓存中的子节点数（仅间接队列上的节点使用）
    pub ref_cnt: u16,
    /// 状态标志
    pub flags: FbufFlags,

    // 环形队列链接（仅当 ON_CIRCULAR 时有效）
    pub(super) cir_next: usize,
    pub(super) cir_prev: usize,
    // 间接队列链接（仅当不在环形队列上时有效）
    pub(super) ind_next: Option<usize>,
    pub(super) ind_prev: Option<usize>,
    // 哈希桶链接
    pub(super) bucket: usize,
    pub(super) hash_next: Option<usize>,
    pub(super) hash_prev: Option<usize>,

    /// 索引块数据（一个扇区）
    pub data: Vec<u8>,
}

impl Fbuf {
    pub(super) fn new() -> Self {
        Self {
            ma: MetaAddr::INVALID,
            parent: None,
            ref_cnt: 0,
            flags: FbufFlags::ON_CIRCULAR,
            cir_next: 0,
            cir_prev: 0,
            ind_next: None,
            ind_prev: None,
            bucket: 0,
            hash_next: None,
            hash_prev: None,
            data: vec![0u8; SECTOR_SIZE],
        }
    }

    /// 读取第 `idx` 个映射条目
    pub fn entry(&self, idx: usize) -> u32 {
        self.read_u32_at(idx * 4)
    }

    /// 写入第 `idx` 个映射条目
    pub fn set_entry(&mut self, idx: usize, sa: u32) {
        self.write_u32_at(idx * 4, sa);
    }

    /// 读取字节偏移 `off` 处的小端 u32
    pub fn read_u32_at(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap())
    }

    /// 写入字节偏移 `off` 处的小端 u32
    pub fn write_u32_at(&mut self, off: usize, val: u32) {
        self.data[off..off + 4].copy_from_slice(&val.to_le_bytes());
    }

    /// 是否在环形队列上
    pub fn on_circular(&self) -> bool {
        self.flags.contains(FbufFlags::ON_CIRCULAR)
    }

    /// 是否被访问过
    pub fn is_accessed(&self) -> bool {
        self.flags.contains(FbufFlags::ACCESSED)
    }

    /// 是否为脏
    pub fn is_modified(&self) -> bool {
        self.flags.contains(FbufFlags::MODIFIED)
    }
}
