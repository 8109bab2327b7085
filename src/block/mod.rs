//! 块设备抽象
//!
//! 提供下游物理设备的扇区级访问接口。

mod device;

pub use device::SectorDevice;
