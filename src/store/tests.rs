//! 存储核心的端到端测试

use super::*;
use crate::segment::{sega2sa, SegSummary};
use alloc::vec;
use alloc::vec::Vec;

struct MockDisk {
    sectors: Vec<u8>,
    read_calls: u64,
    write_calls: u64,
}

impl MockDisk {
    fn new(seg_cnt: u32) -> Self {
        Self {
            sectors: vec![0u8; (seg_cnt * SECTORS_PER_SEG) as usize * SECTOR_SIZE],
            read_calls: 0,
            write_calls: 0,
        }
    }
}

impl SectorDevice for MockDisk {
    fn sector_count(&self) -> u32 {
        (self.sectors.len() / SECTOR_SIZE) as u32
    }

    fn read_sectors(&mut self, sa: u32, count: u32, buf: &mut [u8]) -> Result<()> {
        self.read_calls += 1;
        let start = sa as usize * SECTOR_SIZE;
        let len = count as usize * SECTOR_SIZE;
        buf[..len].copy_from_slice(&self.sectors[start..start + len]);
        Ok(())
    }

    fn write_sectors(&mut self, sa: u32, count: u32, buf: &[u8]) -> Result<()> {
        self.write_calls += 1;
        let start = sa as usize * SECTOR_SIZE;
        let len = count as usize * SECTOR_SIZE;
        self.sectors[start..start + len].copy_from_slice(&buf[..len]);
        Ok(())
    }
}

/// 16 段 = 64 MiB 的测试设备
fn open_store() -> LogStore<MockDisk> {
    LogStore::open(MockDisk::new(16)).unwrap()
}

fn sector_of(byte: u8) -> Vec<u8> {
    vec![byte; SECTOR_SIZE]
}

fn ba_offset(ba: u32) -> u64 {
    ba as u64 * SECTOR_SIZE as u64
}

/// 空闲段计数必须等于既非热段也非冷段的年龄 0 段的数量
fn assert_free_accounting(store: &LogStore<MockDisk>) {
    let mut expect = 0u32;
    for s in SEG_DATA_START..store.sb.seg_cnt {
        if store.sb.seg_age[s as usize] == 0 && s != store.hot.sega && s != store.cold.sega {
            expect += 1;
        }
    }
    assert_eq!(store.sb.seg_free_cnt, expect);
}

#[test]
fn test_fresh_device_reads_zero() {
    let mut store = open_store();
    let mut out = sector_of(0xFF);
    store.read(0, &mut out).unwrap();
    assert_eq!(out, sector_of(0));
    assert_free_accounting(&store);
}

#[test]
fn test_write_read_roundtrip() {
    let mut store = open_store();
    store.write(ba_offset(5), &sector_of(b'A')).unwrap();
    let mut out = sector_of(0);
    store.read(ba_offset(5), &mut out).unwrap();
    assert_eq!(out, sector_of(b'A'));
}

#[test]
fn test_overwrite_moves_to_new_sector() {
    let mut store = open_store();
    store.write(ba_offset(5), &sector_of(b'A')).unwrap();
    let sa_x = store.file_read_4byte(FD_ACTIVE, 5).unwrap();
    store.write(ba_offset(5), &sector_of(b'B')).unwrap();
    let sa_y = store.file_read_4byte(FD_ACTIVE, 5).unwrap();
    assert_ne!(sa_x, sa_y);

    let mut out = sector_of(0);
    store.read(ba_offset(5), &mut out).unwrap();
    assert_eq!(out, sector_of(b'B'));
}

#[test]
fn test_durability_across_reopen() {
    let mut store = open_store();
    store.write(ba_offset(5), &sector_of(b'A')).unwrap();
    let disk = store.close().unwrap();

    let mut store = LogStore::open(disk).unwrap();
    let mut out = sector_of(0);
    store.read(ba_offset(5), &mut out).unwrap();
    assert_eq!(out, sector_of(b'A'));
    assert_free_accounting(&store);
}

#[test]
fn test_reopen_does_not_overwrite_old_segments() {
    // 上一次会话的热段在重新打开后绝不能被再次分配
    let mut store = open_store();
    store.write(ba_offset(1), &sector_of(0x11)).unwrap();
    let disk = store.close().unwrap();

    let mut store = LogStore::open(disk).unwrap();
    for round in 0..3u8 {
        store.write(ba_offset(2), &sector_of(round)).unwrap();
    }
    let mut out = sector_of(0);
    store.read(ba_offset(1), &mut out).unwrap();
    assert_eq!(out, sector_of(0x11));
    assert_free_accounting(&store);
}

#[test]
fn test_delete_reads_zero() {
    let mut store = open_store();
    store.write(ba_offset(5), &sector_of(b'A')).unwrap();
    store.delete(ba_offset(5), SECTOR_SIZE as u64).unwrap();

    assert_eq!(store.file_read_4byte(FD_ACTIVE, 5).unwrap(), SECTOR_DELETE);
    let mut out = sector_of(0xFF);
    store.read(ba_offset(5), &mut out).unwrap();
    assert_eq!(out, sector_of(0));
}

#[test]
fn test_delete_range_leaves_neighbors() {
    let mut store = open_store();
    for ba in 10..13u32 {
        store.write(ba_offset(ba), &sector_of(ba as u8)).unwrap();
    }
    store.delete(ba_offset(11), SECTOR_SIZE as u64).unwrap();

    let mut out = sector_of(0xFF);
    store.read(ba_offset(10), &mut out).unwrap();
    assert_eq!(out, sector_of(10));
    store.read(ba_offset(11), &mut out).unwrap();
    assert_eq!(out, sector_of(0));
    store.read(ba_offset(12), &mut out).unwrap();
    assert_eq!(out, sector_of(12));
}

#[test]
fn test_ranged_write_is_physically_contiguous() {
    let mut store = open_store();
    let mut buf = vec![0u8; 4 * SECTOR_SIZE];
    for i in 0..4 {
        buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].fill(0xD0 + i as u8);
    }
    // 整段写只对设备发出一次写请求（映射更新留在缓存里）
    let before = store.dev.write_calls;
    store.write(ba_offset(10), &buf).unwrap();
    assert_eq!(store.dev.write_calls - before, 1);

    // 四个块的映射是四个连续的扇区地址
    let sa0 = store.file_read_4byte(FD_ACTIVE, 10).unwrap();
    for i in 1..4u32 {
        assert_eq!(store.file_read_4byte(FD_ACTIVE, 10 + i).unwrap(), sa0 + i);
    }

    // 合并读：只对设备发出一次读请求
    let mut out = vec![0u8; 4 * SECTOR_SIZE];
    let before = store.dev.read_calls;
    store.read(ba_offset(10), &mut out).unwrap();
    assert_eq!(store.dev.read_calls - before, 1);
    assert_eq!(out, buf);
}

#[test]
fn test_read_splits_runs_at_holes() {
    let mut store = open_store();
    store.write(ba_offset(21), &sector_of(0x21)).unwrap();
    store.write(ba_offset(23), &sector_of(0x23)).unwrap();

    let mut out = vec![0xFFu8; 5 * SECTOR_SIZE];
    store.read(ba_offset(20), &mut out).unwrap();
    assert_eq!(&out[0..SECTOR_SIZE], &sector_of(0)[..]);
    assert_eq!(&out[SECTOR_SIZE..2 * SECTOR_SIZE], &sector_of(0x21)[..]);
    assert_eq!(&out[2 * SECTOR_SIZE..3 * SECTOR_SIZE], &sector_of(0)[..]);
    assert_eq!(&out[3 * SECTOR_SIZE..4 * SECTOR_SIZE], &sector_of(0x23)[..]);
    assert_eq!(&out[4 * SECTOR_SIZE..], &sector_of(0)[..]);
}

#[test]
fn test_segment_boundary_flush() {
    let mut store = open_store();
    let old_sega = store.hot.sega;
    let n = store.hot.free_slots() as usize;

    let mut buf = vec![0u8; n * SECTOR_SIZE];
    for i in 0..n {
        buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].fill(i as u8);
    }
    store.write(0, &buf).unwrap();

    // 恰好填满最后一个有效载荷槽位：摘要落盘、换了新段
    assert_ne!(store.hot.sega, old_sega);
    assert_eq!(store.hot.alloc_p, 0);
    assert_eq!(store.sb.seg_age[old_sega as usize], 1);

    let mut sect = sector_of(0);
    store
        .dev
        .read_sectors(sega2sa(old_sega) + SEG_SUM_OFF, 1, &mut sect)
        .unwrap();
    let mut sum = SegSummary::new();
    sum.decode(&sect).unwrap();
    assert_eq!(sum.alloc_p as u32, SEG_SUM_OFF);
    assert_eq!(sum.rm[0], 0);
    assert_eq!(sum.rm[n - 1], (n - 1) as u32);

    // 最后一个块的正向映射没有丢
    let last = (n - 1) as u32;
    assert_eq!(
        store.file_read_4byte(FD_ACTIVE, last).unwrap(),
        sega2sa(old_sega) + last
    );
    let mut out = sector_of(0);
    store.read(ba_offset(last), &mut out).unwrap();
    assert_eq!(out, sector_of((n - 1) as u8));
    assert_free_accounting(&store);
}

#[test]
fn test_write_spanning_segments() {
    let mut store = open_store();
    // 跨段的大写入：2000 个扇区必然越过一次段边界
    let n = 2000usize;
    let mut buf = vec![0u8; n * SECTOR_SIZE];
    for i in 0..n {
        buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].fill((i % 251) as u8);
    }
    store.write(ba_offset(100), &buf).unwrap();

    let mut out = vec![0u8; n * SECTOR_SIZE];
    store.read(ba_offset(100), &mut out).unwrap();
    assert_eq!(out, buf);
    assert_free_accounting(&store);
}

#[test]
fn test_invalid_arguments() {
    let mut store = open_store();
    let mut buf = sector_of(0);

    let err = store.read(1, &mut buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = store.write(0, &buf[..100]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let beyond = store.block_count() as u64 * SECTOR_SIZE as u64;
    let err = store.write(beyond, &buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    // 零长度是空操作
    store.write(0, &[]).unwrap();
    store.read(0, &mut []).unwrap();
}

#[test]
fn test_threshold_scaling() {
    // 16 段的池（15 个数据段）：高水位 min(24, 15-2-6) = 7，低水位 min(12, 3) = 3
    let store = open_store();
    assert_eq!(store.clean_high_water, 7);
    assert_eq!(store.clean_low_water, 3);
}

#[test]
fn test_cleaner_reclaims_stale_segments() {
    let mut store = open_store();
    let low = store.clean_low_water;
    let high = store.clean_high_water;

    // 不停地覆写同一个块。清理器在写入内部同步运行：从外面能
    // 观察到的是空闲段数在某次写入中不降反升，且一举越过高水位
    let mut last_byte = 0u8;
    let mut cleaned = false;
    for i in 0..40_000u32 {
        let before = store.sb.seg_free_cnt;
        last_byte = (i % 251) as u8;
        store.write(0, &sector_of(last_byte)).unwrap();
        let after = store.sb.seg_free_cnt;
        if after > before {
            // 清理器只在空闲段数跌破低水位时触发
            assert!(before <= low + 1, "cleaner ran above the low water mark");
            assert!(after > high, "cleaner stopped below the high water mark");
            cleaned = true;
            break;
        }
    }
    assert!(cleaned, "cleaner never ran");

    // 清理不改变读到的内容
    let mut out = sector_of(0);
    store.read(0, &mut out).unwrap();
    assert_eq!(out, sector_of(last_byte));
    assert_free_accounting(&store);

    // 清理后的状态能安然渡过一次重开
    let disk = store.close().unwrap();
    let mut store = LogStore::open(disk).unwrap();
    store.read(0, &mut out).unwrap();
    assert_eq!(out, sector_of(last_byte));
    assert_free_accounting(&store);
}

#[test]
fn test_persist_survives_crash() {
    let mut store = open_store();
    store.write(ba_offset(7), &sector_of(b'A')).unwrap();
    store.persist().unwrap();
    // 检查点之后的写入在"崩溃"时丢失是允许的
    store.write(ba_offset(8), &sector_of(b'B')).unwrap();

    // 模拟崩溃：从设备当前内容重新打开，跳过 close
    let mut crashed = MockDisk::new(16);
    crashed.sectors.copy_from_slice(&store.dev.sectors);
    let mut store2 = LogStore::open(crashed).unwrap();
    let mut out = sector_of(0);
    store2.read(ba_offset(7), &mut out).unwrap();
    assert_eq!(out, sector_of(b'A'));
    assert_free_accounting(&store2);

    // 原来的核心继续工作不受影响
    store.write(ba_offset(9), &sector_of(b'C')).unwrap();
    let mut out = sector_of(0);
    store.read(ba_offset(8), &mut out).unwrap();
    assert_eq!(out, sector_of(b'B'));
    store.read(ba_offset(9), &mut out).unwrap();
    assert_eq!(out, sector_of(b'C'));
}

#[test]
fn test_exhausted_when_everything_live() {
    let mut store = open_store();
    // 全部写不同的块：没有垃圾可回收，日志终将耗尽
    let mut hit = None;
    for ba in 0..store.block_count() {
        match store.write(ba_offset(ba), &sector_of(ba as u8)) {
            Ok(()) => {}
            Err(e) => {
                hit = Some(e);
                break;
            }
        }
    }
    let err = hit.expect("writing every block must exhaust the log");
    assert_eq!(err.kind(), ErrorKind::Exhausted);

    // 已经写进去的数据仍然可读
    let mut out = sector_of(0);
    store.read(ba_offset(0), &mut out).unwrap();
    assert_eq!(out, sector_of(0));
    store.read(ba_offset(100), &mut out).unwrap();
    assert_eq!(out, sector_of(100));
}

#[test]
fn test_metadata_survives_eviction() {
    // 64 段的设备：映射叶子数超过 fbuf 槽位数，下降会触发二次
    // 机会驱逐和脏叶子的途中刷写
    let mut store = LogStore::open(MockDisk::new(64)).unwrap();
    let leaves = store.block_count() / MAP_ENTRIES_PER_BLOCK + 1;
    assert!(
        leaves as usize + 2 > store.pool.len(),
        "device too small to overflow the fbuf pool"
    );
    for leaf in 0..leaves {
        let ba = leaf * MAP_ENTRIES_PER_BLOCK;
        store.write(ba_offset(ba), &sector_of(leaf as u8)).unwrap();
    }
    // 再扫一遍，迫使被驱逐的叶子从盘上读回
    let mut out = sector_of(0);
    for leaf in 0..leaves {
        let ba = leaf * MAP_ENTRIES_PER_BLOCK;
        store.read(ba_offset(ba), &mut out).unwrap();
        assert_eq!(out, sector_of(leaf as u8), "leaf {} lost its data", leaf);
    }

    let disk = store.close().unwrap();
    let mut store = LogStore::open(disk).unwrap();
    for leaf in 0..leaves {
        let ba = leaf * MAP_ENTRIES_PER_BLOCK;
        store.read(ba_offset(ba), &mut out).unwrap();
        assert_eq!(out, sector_of(leaf as u8), "leaf {} lost its data after reopen", leaf);
    }
}

#[test]
fn test_descent_pins_parents() {
    let mut store = open_store();
    // 访问两个不同子树的叶子：根和 depth-1 节点都被钉在间接队列上
    store.write(ba_offset(0), &sector_of(1)).unwrap();
    store.write(ba_offset(5 * MAP_ENTRIES_PER_BLOCK), &sector_of(2)).unwrap();

    let d0 = store.pool.indirect_slots(0);
    let d1 = store.pool.indirect_slots(1);
    assert_eq!(d0.len(), 1, "one pinned root");
    assert_eq!(d1.len(), 1, "one pinned depth-1 node");
    // 根的引用计数 = 缓存中的 depth-1 子节点数
    assert_eq!(store.pool.slot(d0[0]).ref_cnt, 1);
    // depth-1 节点的引用计数 = 缓存中的叶子数
    assert_eq!(store.pool.slot(d1[0]).ref_cnt, 2);
}

#[test]
fn test_stats_accumulate() {
    let mut store = open_store();
    store.write(ba_offset(0), &sector_of(1)).unwrap();
    store.write(ba_offset(1), &sector_of(2)).unwrap();
    let stats = store.stats();
    assert_eq!(stats.data_write_count, 2);
    assert!(stats.fbuf_hits > 0);
    assert!(stats.fbuf_misses > 0);
    assert_eq!(stats.segment_count, 16);
    assert_eq!(stats.block_count, store.block_count());
    // 叶子被写脏但还没刷
    assert!(stats.fbuf_modified > 0);
}
