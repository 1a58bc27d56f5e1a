// src/expire.rs

//! 过期子系统
//!
//! 过期索引是一个按时间排序的二级索引：`$sys:0:at:{sortable_ts}:{meta_key}`。
//! 每次设置 / 刷新 / 清除 `expire_at` 时，旧索引项和新索引项与对象头在同一个事务里更新，
//! 因此每个会过期的 key 在索引里恰好有一项。
//!
//! 后台清理任务按固定周期运行，只有拿到租约的进程才会真正执行。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ExpireConfig;
use crate::election::{self, Election};
use crate::engine::kv::{KvTxn, Storage};
use crate::error::Result;
use crate::keys::{self, DbKeys};
use crate::txn::destroy_object;
use crate::types::object::{now_nanos, Object};

/// 把 key 的过期索引从 `old_at` 挪到 `new_at`（0 表示没有）
pub(crate) fn update_index(kv: &KvTxn, meta_key: &[u8], old_at: i64, new_at: i64) {
    unset_index(kv, meta_key, old_at);
    if new_at > 0 {
        kv.set(&keys::expire_key(new_at, meta_key), &[]);
    }
}

pub(crate) fn unset_index(kv: &KvTxn, meta_key: &[u8], at: i64) {
    if at > 0 {
        kv.delete(&keys::expire_key(at, meta_key));
    }
}

/// 清理一批到期的 key，返回处理的索引项数量。
///
/// 从索引开头扫描，遇到第一个未到期的项或达到 `batch_limit` 就停下，整批只提交一次。
pub fn sweep_once(storage: &Storage, now: i64, batch_limit: usize) -> Result<usize> {
    let txn = storage.begin();
    let mut due = Vec::new();
    for item in txn.scan_prefix(&keys::expire_prefix()) {
        if due.len() >= batch_limit {
            break;
        }
        let (index_key, _) = item?;
        match keys::split_expire_key(&index_key) {
            Ok((at, _)) if at > now => break,
            Ok((at, meta_key)) => {
                let meta_key = meta_key.to_vec();
                due.push((index_key, at, meta_key));
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed expire index entry");
                txn.delete(&index_key);
            }
        }
    }

    for (index_key, at, meta_key) in &due {
        if let Some(raw) = txn.get(meta_key)? {
            match Object::decode(&raw) {
                // 索引项过时（对象已经被覆盖或重新设置了过期时间）时只删索引
                Ok((obj, _)) if obj.expire_at == *at => match DbKeys::from_meta_key(meta_key) {
                    Some(db_keys) => destroy_object(&txn, &db_keys, meta_key, &obj),
                    None => txn.delete(meta_key),
                },
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(meta_key), error = %e, "undecodable meta value in expire index");
                }
            }
        }
        txn.delete(index_key);
    }

    let n = due.len();
    if n > 0 || !txn.is_read_only() {
        txn.commit()?;
        debug!(expired = n, "expire sweep committed");
    }
    Ok(n)
}

/// 后台定时清理任务
pub async fn start_sweeper(storage: Storage, election: Arc<Election>, cfg: ExpireConfig) {
    let limit = cfg.batch_limit;
    election::run_as_leader("expire", cfg.interval(), election, move || {
        sweep_once(&storage, now_nanos(), limit)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::test_support::*;
    use std::time::Duration;

    #[test]
    fn test_sweep_removes_due_keys_only() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        txn.string(b"soon")?.set(b"v")?;
        txn.string(b"later")?.set(b"v")?;
        txn.hash(b"h")?.set(b"f", b"v")?;
        let ks = txn.keyspace();
        let now = txn.now();
        ks.expire_at(b"soon", now + 10)?;
        ks.expire_at(b"h", now + 20)?;
        ks.expire_at(b"later", now + 1_000_000_000_000)?;
        txn.commit()?;

        assert_eq!(sweep_once(&st, now + 100, 100)?, 2);

        let txn = begin(&st);
        assert!(!txn.string(b"soon")?.exists());
        assert!(txn.string(b"later")?.exists());
        assert_eq!(txn.hash(b"h")?.len(), 0);
        // 只剩 later 的索引项；hash 的数据交给了 GC
        assert_eq!(count_prefix(&txn, &keys::expire_prefix()), 1);
        assert_eq!(count_prefix(&txn, &keys::gc_prefix()), 1);
        Ok(())
    }

    #[test]
    fn test_sweep_respects_batch_limit() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        let now = txn.now();
        for i in 0..5 {
            let key = format!("k{}", i);
            txn.string(key.as_bytes())?.set(b"v")?;
            txn.keyspace().expire_at(key.as_bytes(), now + 1 + i)?;
        }
        txn.commit()?;

        assert_eq!(sweep_once(&st, now + 100, 2)?, 2);
        assert_eq!(sweep_once(&st, now + 100, 2)?, 2);
        assert_eq!(sweep_once(&st, now + 100, 2)?, 1);
        assert_eq!(sweep_once(&st, now + 100, 2)?, 0);
        Ok(())
    }

    #[test]
    fn test_reset_same_expire_keeps_one_entry() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        txn.string(b"k")?.set(b"v")?;
        let at = txn.now() + Duration::from_secs(60).as_nanos() as i64;
        assert!(txn.keyspace().expire_at(b"k", at)?);
        assert!(txn.keyspace().expire_at(b"k", at)?);
        assert_eq!(count_prefix(&txn, &keys::expire_prefix()), 1);
        assert!(txn.keyspace().expire_at(b"k", at + 5)?);
        assert_eq!(count_prefix(&txn, &keys::expire_prefix()), 1);
        txn.commit()?;
        Ok(())
    }

    #[test]
    fn test_stale_index_entry_only_removes_index() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        txn.string(b"k")?.set(b"v")?;
        let now = txn.now();
        // 直接塞一个与对象头不一致的索引项
        txn.kv().set(&keys::expire_key(now + 1, &txn.keys().meta_key(b"k")), &[]);
        txn.commit()?;

        assert_eq!(sweep_once(&st, now + 10, 10)?, 1);
        let txn = begin(&st);
        assert_eq!(txn.string(b"k")?.get()?, b"v");
        assert_eq!(count_prefix(&txn, &keys::expire_prefix()), 0);
        Ok(())
    }
}
