//! 扇区设备接口

use crate::error::Result;

/// 扇区设备接口
///
/// 实现此 trait 以提供下游物理设备访问。logstor 以固定大小的扇区
/// （[`SECTOR_SIZE`](crate::consts::SECTOR_SIZE)）为单位寻址设备，
/// 扇区地址（SA）从 0 开始。
///
/// 所有 I/O 对核心而言都是同步的：方法返回时操作已被设备接受。
/// 传输失败以 [`ErrorKind::Io`](crate::error::ErrorKind::Io) 上报，
/// 核心不做重试。
///
/// # 示例
///
/// ```rust,ignore
/// use logstor_core::{SectorDevice, Result};
/// use logstor_core::consts::SECTOR_SIZE;
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl SectorDevice for MyDevice {
///     fn sector_count(&self) -> u32 {
///         16384
///     }
///
///     fn read_sectors(&mut self, sa: u32, count: u32, buf: &mut [u8]) -> Result<()> {
///         // 从设备读取 count 个连续扇区
///         Ok(())
///     }
///
///     fn write_sectors(&mut self, sa: u32, count: u32, buf: &[u8]) -> Result<()> {
///         // 向设备写入 count 个连续扇区
///         Ok(())
///     }
/// }
/// ```
pub trait SectorDevice {
    /// 设备的总扇区数
    fn sector_count(&self) -> u32;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `sa` - 起始扇区地址
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 `count * SECTOR_SIZE`）
    fn read_sectors(&mut self, sa: u32, count: u32, buf: &mut [u8]) -> Result<()>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `sa` - 起始扇区地址
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 `count * SECTOR_SIZE`）
    fn write_sectors(&mut self, sa: u32, count: u32, buf: &[u8]) -> Result<()>;

    /// 打开设备
    ///
    /// 在开始使用设备前调用，用于初始化设备资源。
    /// 默认实现什么都不做，设备可以根据需要覆盖此方法。
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// 关闭设备
    ///
    /// 在停止使用设备后调用，用于清理设备资源。
    /// 默认实现什么都不做，设备可以根据需要覆盖此方法。
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// 刷新设备缓存
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
