//! # ends：协议的两端
//!
//! - [`Front`]：客户端一侧，发起操作并接收 Back→Front 票据；
//! - [`Back`]：服务端一侧，在收到发起票据时创建操作并分派给 [`Servicer`](crate::Servicer)；
//! - 两端各自持有一张 [`OperationTable`]，不存在进程级全局表。

mod back;
mod front;
mod table;

pub use self::{
    back::{Back, WeakBack},
    front::{Front, WeakFront},
    table::OperationStats,
};

pub(crate) use self::table::OperationTable;
