// src/error.rs

//! 引擎对外暴露的错误类型
//!
//! 容器方法从不在内部重试：任何错误都交给调用方，由调用方回滚所在事务。
//! `Conflict` 是唯一可重试的类别。

/// 数据结构层的错误
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 已存在的对象类型与请求的容器类型不一致
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    TypeMismatch,

    /// 调用方需要区分“不存在”和“为空”时返回
    #[error("key not found")]
    KeyNotFound,

    #[error("index out of range")]
    OutOfRange,

    /// 分布式 list 插入时两个相邻浮点下标之间已经没有可用的中点
    #[error("list index precision exhausted")]
    PrecisionExhausted,

    /// meta 值损坏或包含未知的类型 / 编码标记
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 提交时检测到并发写冲突，调用方可以重试整个事务
    #[error("transaction conflict")]
    Conflict,

    #[error("storage error: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl Error {
    /// 冲突类错误可以整体重试，其他错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
