//! 元数据缓存模块（fbuf）
//!
//! 正向映射树的索引块缓存。每个缓存槽位（fbuf）容纳一个索引块，
//! 槽位总数在打开设备时一次性分配，之后就地复用。
//!
//! # 主要组件
//!
//! - [`Fbuf`] - 单个缓存槽位，包含索引块数据和簿记字段
//! - [`FbufPool`] - 槽位池：哈希桶、环形队列和按深度划分的间接队列
//! - [`FbufFlags`] - 槽位状态标志
//!
//! # 替换策略
//!
//! 环形队列上的槽位按二次机会（second chance）算法复用：扫描时
//! 清除 `ACCESSED` 标志并前进，遇到未被访问的槽位即选中。有子节点
//! 被缓存的间接块不在环形队列上——它们被钉（pin）在按深度划分的
//! 间接队列里，并以引用计数记录缓存中的子节点数，计数归零时降级
//! 回环形队列尾部。因此驱逐永远不会选中一个仍被子节点引用的父
//! 节点。
//!
//! 本模块只负责数据结构本身；下降、读盘和刷写逻辑在核心的映射
//! 层实现。

mod fbuf;
mod pool;

pub use fbuf::{Fbuf, FbufFlags};
pub use pool::FbufPool;
