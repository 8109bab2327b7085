//! 存储核心
//!
//! [`LogStore`] 是日志结构存储引擎的核心：它把前端按块地址（BA）
//! 寻址的读、写、删除请求翻译成下游设备上的顺序追加写。所有修改
//! ——用户数据和解析 BA→SA 的映射元数据——都追加到打开的段中，
//! 旧位置变成垃圾，之后由段清理器回收。
//!
//! 核心是单写者、同步的：任意时刻最多只有一个请求在变更内存状态。
//! 调用方负责在核心边界外对请求串行化。

mod alloc_seg;

use crate::block::SectorDevice;
use crate::cache::FbufPool;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::segment::SegSummary;
use crate::superblock::{self, Superblock};

/// 存储核心配置
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// fbuf 槽位的超配比例（≥ 1）
    ///
    /// 槽位数 = `max(max_block_cnt / 1024, FBUF_MIN_COUNT) * fbuf_ratio`。
    pub fbuf_ratio: u32,
    /// 格式化设备时使用的初始代数
    ///
    /// 有熵源的嵌入方应提供随机值；默认是一个固定常量。
    pub format_gen: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fbuf_ratio: 1,
            format_gen: DEFAULT_FORMAT_GEN,
        }
    }
}

/// 存储核心统计信息
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    /// 写入设备的用户数据扇区数
    pub data_write_count: u64,
    /// 其他写入（元数据、段摘要、超级块、清理搬运）的扇区数
    pub other_write_count: u64,
    /// fbuf 缓存命中次数
    pub fbuf_hits: u64,
    /// fbuf 缓存未命中次数
    pub fbuf_misses: u64,
    /// 当前脏 fbuf 数量
    pub fbuf_modified: usize,
    /// 空闲段数
    pub free_segment_count: u32,
    /// 总段数
    pub segment_count: u32,
    /// 支持的最大块数
    pub block_count: u32,
}

/// 追加流：热段收用户数据，冷段收元数据刷写和清理搬运
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    /// 热段
    Hot,
    /// 冷段
    Cold,
}

/// 日志结构存储核心
///
/// # 示例
///
/// ```rust,ignore
/// use logstor_core::{LogStore, SectorDevice};
/// use logstor_core::consts::SECTOR_SIZE;
///
/// let device = MyDevice::new();
/// let mut store = LogStore::open(device)?;
///
/// let buf = vec![0xABu8; SECTOR_SIZE];
/// store.write(5 * SECTOR_SIZE as u64, &buf)?;
///
/// let mut out = vec![0u8; SECTOR_SIZE];
/// store.read(5 * SECTOR_SIZE as u64, &mut out)?;
/// assert_eq!(out, buf);
///
/// // close 消费核心并交还设备
/// let device = store.close()?;
/// ```
pub struct LogStore<D> {
    pub(crate) dev: D,
    pub(crate) sb: Superblock,
    /// 当前超级块副本所在的扇区
    pub(crate) sb_sa: u32,
    pub(crate) sb_dirty: bool,
    /// 热段摘要（用户数据）
    pub(crate) hot: SegSummary,
    /// 冷段摘要（元数据刷写和清理搬运）
    pub(crate) cold: SegSummary,
    /// 元数据缓存
    pub(crate) pool: FbufPool,
    pub(crate) clean_low_water: u32,
    pub(crate) clean_high_water: u32,
    /// 清理器正在运行（防止重入，并把写入计入 other 一侧）
    pub(crate) cleaning: bool,
    pub(crate) data_write_count: u64,
    pub(crate) other_write_count: u64,
}

impl<D: SectorDevice> LogStore<D> {
    /// 用默认配置打开存储核心
    ///
    /// 等价于 `open_with_config(dev, StoreConfig::default())`。
    pub fn open(dev: D) -> Result<Self> {
        Self::open_with_config(dev, StoreConfig::default())
    }

    /// 打开存储核心
    ///
    /// 读取超级块环恢复根状态；设备上没有有效布局（或布局与设备
    /// 容量不符）时就地格式化。随后初始化元数据缓存并打开冷、热
    /// 两个段。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Io` - 设备读写失败
    /// - `ErrorKind::InvalidInput` - 设备太小，无法格式化
    /// - `ErrorKind::Exhausted` - 找不到可分配的空闲段
    pub fn open_with_config(mut dev: D, config: StoreConfig) -> Result<Self> {
        dev.open()?;

        let (sb, sb_sa) = match superblock::read_superblock(&mut dev) {
            Ok((sb, sa)) if sb.seg_cnt() * SECTORS_PER_SEG <= dev.sector_count() => (sb, sa),
            Ok(_) => {
                log::warn!("[SB] superblock geometry exceeds device, reformatting");
                superblock::format_superblock(&mut dev, config.format_gen)?
            }
            Err(e) if e.kind() == ErrorKind::Format => {
                log::warn!("[SB] no valid superblock ({}), formatting device", e);
                superblock::format_superblock(&mut dev, config.format_gen)?
            }
            Err(e) => return Err(e),
        };

        let ratio = config.fbuf_ratio.max(1) as usize;
        let fbuf_count =
            ((sb.max_block_cnt() / MAP_ENTRIES_PER_BLOCK) as usize).max(FBUF_MIN_COUNT) * ratio;

        let pool_segs = sb.seg_cnt() - SEG_DATA_START;
        let clean_high_water =
            (CLEAN_WINDOW as u32 * 4).min(pool_segs.saturating_sub(2 + CLEAN_WINDOW as u32));
        let clean_low_water = (CLEAN_WINDOW as u32 * 2).min(clean_high_water / 2);

        let mut store = Self {
            dev,
            sb,
            sb_sa,
            sb_dirty: false,
            hot: SegSummary::new(),
            cold: SegSummary::new(),
            pool: FbufPool::new(fbuf_count),
            clean_low_water,
            clean_high_water,
            cleaning: false,
            data_write_count: 0,
            other_write_count: 0,
        };

        store.seg_alloc(Stream::Cold)?;
        store.seg_alloc(Stream::Hot)?;

        log::debug!(
            "[STORE] open: blocks={} segments={} free={} fbufs={}",
            store.sb.max_block_cnt(),
            store.sb.seg_cnt(),
            store.sb.seg_free_cnt(),
            store.pool.len()
        );
        Ok(store)
    }

    /// 周期性持久化（检查点）
    ///
    /// 把当前状态完整落盘：刷写全部脏元数据，关闭冷、热两个段并
    /// 写出段摘要，推进超级块环，然后为两个流分配新段继续运行。
    /// 此后发生崩溃，重新打开时能看到调用 `persist` 之前的全部
    /// 写入。
    pub fn persist(&mut self) -> Result<()> {
        self.flush_metadata()?;
        self.seg_close(Stream::Cold)?;
        self.seg_close(Stream::Hot)?;
        superblock::write_superblock(&mut self.dev, &mut self.sb, &mut self.sb_sa)?;
        self.sb_dirty = false;
        self.dev.flush()?;
        self.seg_alloc(Stream::Cold)?;
        self.seg_alloc(Stream::Hot)?;
        log::debug!("[STORE] checkpoint at generation {}", self.sb.generation());
        Ok(())
    }

    /// 关闭存储核心
    ///
    /// 刷写所有脏元数据，关闭冷、热两个段（写出段摘要），持久化
    /// 超级块，然后交还下游设备。`close` 消费核心，之后无法再发
    /// 出请求。
    pub fn close(mut self) -> Result<D> {
        self.flush_metadata()?;
        self.seg_close(Stream::Cold)?;
        self.seg_close(Stream::Hot)?;
        superblock::write_superblock(&mut self.dev, &mut self.sb, &mut self.sb_sa)?;
        self.sb_dirty = false;
        self.dev.flush()?;
        self.dev.close()?;
        log::debug!("[STORE] closed at generation {}", self.sb.generation());
        Ok(self.dev)
    }

    /// 读取
    ///
    /// 从字节偏移 `offset` 读取 `buf.len()` 字节。偏移和长度都必须
    /// 是扇区大小的整数倍。映射到 `SECTOR_NULL` 或 `SECTOR_DELETE`
    /// 的块（空洞）读出全零。
    ///
    /// 连续块的读取会按物理连续的扇区串合并，每串只向设备发出一次
    /// 读请求。
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (ba, count) = self.check_range(offset, buf.len())?;
        if count == 0 {
            return Ok(());
        }
        self.read_range(ba, buf)
    }

    /// 写入
    ///
    /// 把 `buf.len()` 字节写到字节偏移 `offset`。偏移和长度都必须
    /// 是扇区大小的整数倍。数据追加到热段，旧的映射位置变成垃圾。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 未对齐或越界
    /// - `ErrorKind::Exhausted` - 日志已满且清理器无法取得进展
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let (ba, count) = self.check_range(offset, buf.len())?;
        if count == 0 {
            return Ok(());
        }
        if count == 1 {
            self.seg_append_one(Stream::Hot, ba, buf)
        } else {
            self.write_range(ba, buf)
        }
    }

    /// 删除
    ///
    /// 把 `[offset, offset + length)` 范围内每个块的映射写成删除
    /// 标记。被删除的块再次读取时返回全零。
    pub fn delete(&mut self, offset: u64, length: u64) -> Result<()> {
        let (ba, count) = self.check_range(offset, length as usize)?;
        for i in 0..count as u32 {
            self.file_write_4byte(FD_ACTIVE, ba + i, SECTOR_DELETE)?;
        }
        Ok(())
    }

    /// 支持的最大块数
    pub fn block_count(&self) -> u32 {
        self.sb.max_block_cnt()
    }

    /// 当前空闲段数
    pub fn free_segment_count(&self) -> u32 {
        self.sb.seg_free_cnt()
    }

    /// 统计信息快照
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            data_write_count: self.data_write_count,
            other_write_count: self.other_write_count,
            fbuf_hits: self.pool.hits,
            fbuf_misses: self.pool.misses,
            fbuf_modified: self.pool.modified_count,
            free_segment_count: self.sb.seg_free_cnt(),
            segment_count: self.sb.seg_cnt(),
            block_count: self.sb.max_block_cnt(),
        }
    }

    /// 校验请求范围，返回起始块地址和块数
    fn check_range(&self, offset: u64, len: usize) -> Result<(u32, usize)> {
        if offset % SECTOR_SIZE as u64 != 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "offset not sector aligned"));
        }
        if len % SECTOR_SIZE != 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "length not sector aligned"));
        }
        let ba = offset / SECTOR_SIZE as u64;
        let count = len / SECTOR_SIZE;
        if ba + count as u64 > self.sb.max_block_cnt() as u64 {
            return Err(Error::new(ErrorKind::InvalidInput, "block address out of range"));
        }
        Ok((ba as u32, count))
    }

    /// 范围读：合并物理连续的扇区串
    fn read_range(&mut self, ba: u32, buf: &mut [u8]) -> Result<()> {
        let count = buf.len() / SECTOR_SIZE;
        let mut start_sa = self.file_read_4byte(FD_ACTIVE, ba)?;
        let mut prev_sa = start_sa;
        let mut run = 1usize;
        let mut out = 0usize;
        for i in 1..count {
            let sa = self.file_read_4byte(FD_ACTIVE, ba + i as u32)?;
            if sa == prev_sa.wrapping_add(1) {
                run += 1;
                prev_sa = sa;
            } else {
                self.emit_run(start_sa, &mut buf[out..out + run * SECTOR_SIZE])?;
                out += run * SECTOR_SIZE;
                start_sa = sa;
                prev_sa = sa;
                run = 1;
            }
        }
        self.emit_run(start_sa, &mut buf[out..out + run * SECTOR_SIZE])
    }

    /// 发出一串连续扇区的设备读；空洞串填零
    fn emit_run(&mut self, start_sa: u32, buf: &mut [u8]) -> Result<()> {
        if start_sa == SECTOR_NULL || start_sa == SECTOR_DELETE {
            buf.fill(0);
            Ok(())
        } else {
            self.dev.read_sectors(start_sa, (buf.len() / SECTOR_SIZE) as u32, buf)
        }
    }
}

#[cfg(test)]
mod tests;
