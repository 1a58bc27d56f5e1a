// src/codec.rs

//! 可排序的定长编码
//!
//! 把 `i64` / `f64` 编码成 8 字节大端序，使得按字节比较的顺序与数值顺序一致，
//! 这样它们可以直接拼进 key 里做范围扫描（过期索引的时间戳、zset 的分数、
//! 分布式 list 的浮点下标）。

use crate::error::{Error, Result};

const SIGN_BIT: u64 = 1 << 63;

/// 翻转符号位：负数落在正数前面
pub fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ SIGN_BIT).to_be_bytes()
}

pub fn decode_i64(b: &[u8]) -> Result<i64> {
    Ok((read_u64(b)? ^ SIGN_BIT) as i64)
}

/// IEEE-754 的可排序编码：
/// - 正数只翻转符号位
/// - 负数全部取反（越小的负数绝对值越大，取反后字节越小）
///
/// `-0.0` 统一编码成 `0.0`。调用方负责拒绝 NaN。
pub fn encode_f64(v: f64) -> [u8; 8] {
    let v = if v == 0.0 { 0.0 } else { v };
    let bits = v.to_bits();
    let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT };
    ordered.to_be_bytes()
}

pub fn decode_f64(b: &[u8]) -> Result<f64> {
    let ordered = read_u64(b)?;
    let bits = if ordered & SIGN_BIT != 0 { ordered ^ SIGN_BIT } else { !ordered };
    Ok(f64::from_bits(bits))
}

fn read_u64(b: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = b
        .get(..8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::InvalidEncoding(format!("expected 8 bytes, got {}", b.len())))?;
    Ok(u64::from_be_bytes(raw))
}
