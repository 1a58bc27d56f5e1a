// src/lib.rs
//! crab-ds 库：在事务型 KV 存储之上实现 String / Hash / Set / ZSet / List，
//! 以及过期清理、增量 GC、list 编码转换和后台任务选主

pub mod codec;     // 可排序的定长编码
pub mod config;    // JSON 配置
pub mod election;  // 基于租约的选主
pub mod engine;    // 引擎入口 & 事务型 KV 原语
pub mod error;     // 错误类型
pub mod expire;    // 过期索引 & 清理任务
pub mod gc;        // 增量垃圾回收
pub mod keys;      // 物理 key 布局
pub mod transfer;  // 紧凑 list → 分布式 list
pub mod txn;       // 事务门面 & key 级操作
pub mod types;     // String / Hash / List / Set / ZSet 数据结构

pub use engine::Engine;
pub use error::{Error, Result};
pub use txn::Transaction;
