//! logstor_core: Pure Rust log-structured block storage core
//!
//! 这是一个纯 Rust 实现的日志结构块存储引擎，位于虚拟块设备和
//! 下游物理块设备之间：
//! - 接受按**块地址**（BA）寻址的定长扇区读、写、删除
//! - 把所有修改翻译成物理设备上按**扇区地址**（SA）寻址的顺序追加写
//! - BA→SA 的正向映射本身也作为索引块树写入日志
//! - 旧位置成为垃圾，由段清理器压实回收
//! - 通过带代数的超级块环和每段的摘要支持崩溃后恢复
//!
//! # 示例
//!
//! ```rust,ignore
//! use logstor_core::{LogStore, SectorDevice, Result};
//! use logstor_core::consts::SECTOR_SIZE;
//!
//! // 实现 SectorDevice trait
//! struct MyDevice {
//!     // ...
//! }
//!
//! impl SectorDevice for MyDevice {
//!     // 实现必要的方法
//!     // ...
//! }
//!
//! fn main() -> Result<()> {
//!     let device = MyDevice::new();
//!     let mut store = LogStore::open(device)?;
//!
//!     let buf = vec![0xA5u8; SECTOR_SIZE];
//!     store.write(0, &buf)?;
//!
//!     let device = store.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 下游扇区设备抽象
//! - [`consts`] - 常量定义
//! - [`types`] - 元数据地址类型
//! - [`superblock`] - 超级块环操作
//! - [`segment`] - 段摘要
//! - [`store`] - 存储核心和前端接口

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 扇区设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 元数据地址类型
pub mod types;

/// 超级块环操作
pub mod superblock;

/// 段摘要
pub mod segment;

/// 存储核心
pub mod store;

// 元数据缓存和映射树、清理器是核心的内部实现
mod cache;
mod cleaner;
mod map;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 设备
pub use block::SectorDevice;

// 存储核心
pub use store::{LogStore, StoreConfig, StoreStats};

// 地址类型
pub use types::MetaAddr;

// 超级块
pub use superblock::Superblock;

// 段摘要
pub use segment::SegSummary;
