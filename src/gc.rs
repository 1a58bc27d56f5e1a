// src/gc.rs

//! 增量垃圾回收
//!
//! 对象被销毁时只删 meta key，并把它的数据前缀登记成一个 GC 标记
//! `$sys:0:GC:{prefix}`。回收任务每次取一个标记，在一个事务里最多删除
//! `batch_limit` 个数据 key；只有前缀下已经删空时才删除标记，
//! 所以中途崩溃也不会丢失回收进度。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::GcConfig;
use crate::election::{self, Election};
use crate::engine::kv::{KvTxn, Storage};
use crate::error::Result;
use crate::keys;

/// 登记一个待回收的前缀；重复登记只是覆盖同一个标记
pub(crate) fn enqueue(kv: &KvTxn, prefix: &[u8]) {
    kv.set(&keys::gc_key(prefix), &[]);
}

/// 处理一个 GC 标记。没有标记时返回 `None`，否则返回删除的数据 key 数量。
fn sweep_marker(storage: &Storage, limit: usize) -> Result<Option<usize>> {
    let txn = storage.begin();
    let marker_prefix = keys::gc_prefix();
    let Some(item) = txn.scan_prefix(&marker_prefix).next() else {
        return Ok(None);
    };
    let (marker, _) = item?;
    let prefix = marker[marker_prefix.len()..].to_vec();
    if prefix.is_empty() {
        warn!("dropping GC marker with empty prefix");
        txn.delete(&marker);
        txn.commit()?;
        return Ok(Some(0));
    }

    let victims = txn
        .scan_prefix(&prefix)
        .take(limit + 1)
        .map(|r| r.map(|(k, _)| k))
        .collect::<Result<Vec<_>>>()?;
    let exhausted = victims.len() <= limit;
    let n = victims.len().min(limit);
    for k in &victims[..n] {
        txn.delete(k);
    }
    if exhausted {
        txn.delete(&marker);
    }
    txn.commit()?;
    debug!(prefix = %hex::encode(&prefix), deleted = n, exhausted, "gc batch committed");
    Ok(Some(n))
}

/// 回收直到没有标记或者累计删除量用完 `budget`
pub fn run_once(storage: &Storage, batch_limit: usize, budget: usize) -> Result<usize> {
    let limit = batch_limit.max(1);
    let mut total = 0;
    while total < budget {
        match sweep_marker(storage, limit.min(budget - total))? {
            Some(n) => total += n,
            None => break,
        }
    }
    Ok(total)
}

/// 后台 GC 任务
pub async fn start_collector(storage: Storage, election: Arc<Election>, cfg: GcConfig) {
    election::run_as_leader("gc", cfg.interval(), election, move || {
        run_once(&storage, cfg.batch_limit, cfg.budget)
    })
    .await
}
