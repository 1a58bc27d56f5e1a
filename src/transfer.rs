// src/transfer.rs

//! 紧凑 list → 分布式 list 的后台转换
//!
//! 紧凑 list 长度超过阈值时，会在同一个事务里写下转换标记 `$sys:0:LT:{meta_key}`。
//! 这里的扫描任务（只在 leader 上跑）周期性读取标记，放进一个有界队列；
//! 一组 worker 从队列里攒批，每批在一个事务里完成转换并删除标记。
//!
//! 批次失败时整批回滚，标记还在，下一轮扫描会重新发现它们。

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ListConfig;
use crate::election::{self, Election};
use crate::engine::kv::{KvTxn, Storage};
use crate::error::Result;
use crate::keys::{self, DbKeys};
use crate::types::list::distributed::write_layout;
use crate::types::object::{now_nanos, Encoding, Object, ObjectType};

/// 读取最多 `limit` 个待转换 list 的 meta key
pub fn scan_pending(storage: &Storage, limit: usize) -> Result<Vec<Vec<u8>>> {
    let txn = storage.begin();
    let prefix = keys::transfer_prefix();
    txn.scan_prefix(&prefix)
        .take(limit)
        .map(|r| r.map(|(k, _)| k[prefix.len()..].to_vec()))
        .collect()
}

/// 转换一个 list；标记过时（key 不在了、已过期、已经是分布式、类型变了、又缩回阈值以内）时只删标记
fn convert(kv: &KvTxn, meta_key: &[u8], max_len: usize, now: i64) -> Result<bool> {
    kv.delete(&keys::transfer_key(meta_key));
    let Some(raw) = kv.get(meta_key)? else {
        return Ok(false);
    };
    let (mut obj, tail) = Object::decode(&raw)?;
    if obj.kind != ObjectType::List || obj.encoding != Encoding::Compact || obj.is_expired(now) {
        return Ok(false);
    }
    let Some(db_keys) = DbKeys::from_meta_key(meta_key) else {
        warn!(key = %String::from_utf8_lossy(meta_key), "transfer marker points outside any db");
        return Ok(false);
    };
    let items: Vec<Vec<u8>> = bincode::deserialize(tail)?;
    if items.len() <= max_len {
        return Ok(false);
    }
    obj.encoding = Encoding::Distributed;
    write_layout(kv, &db_keys, meta_key, &obj, &items);
    debug!(key = %String::from_utf8_lossy(meta_key), id = %obj.id, len = items.len(), "list converted");
    Ok(true)
}

/// 在一个事务里转换一批 list，返回真正转换的数量
pub fn transfer_batch(storage: &Storage, cfg: &ListConfig, meta_keys: &[Vec<u8>]) -> Result<usize> {
    if meta_keys.is_empty() {
        return Ok(0);
    }
    let txn = storage.begin();
    let now = now_nanos();
    let mut converted = 0;
    for meta_key in meta_keys {
        if convert(&txn, meta_key, cfg.compact_max_len, now)? {
            converted += 1;
        }
    }
    txn.commit()?;
    Ok(converted)
}

/// 同步跑一轮：扫描一次，按 `batch_size` 分批转换
pub fn run_once(storage: &Storage, cfg: &ListConfig) -> Result<usize> {
    let pending = scan_pending(storage, cfg.queue_size)?;
    let mut converted = 0;
    for batch in pending.chunks(cfg.batch_size.max(1)) {
        converted += transfer_batch(storage, cfg, batch)?;
    }
    Ok(converted)
}

/// 扫描任务 + worker 池
#[derive(Clone)]
pub struct TransferQueue {
    storage: Storage,
    cfg: ListConfig,
    /// 已入队、尚未处理完的 key，避免重复扫描时重复入队
    inflight: Arc<DashSet<Vec<u8>>>,
}

impl TransferQueue {
    pub fn new(storage: Storage, cfg: ListConfig) -> Self {
        TransferQueue { storage, cfg, inflight: Arc::new(DashSet::new()) }
    }

    /// 把扫描到的标记放进队列，返回新入队的数量；队列满了就留到下一轮
    fn enqueue_pending(&self, tx: &mpsc::Sender<Vec<u8>>) -> Result<usize> {
        let mut queued = 0;
        for meta_key in scan_pending(&self.storage, self.cfg.queue_size)? {
            if !self.inflight.insert(meta_key.clone()) {
                continue;
            }
            if tx.try_send(meta_key.clone()).is_err() {
                self.inflight.remove(&meta_key);
                break;
            }
            queued += 1;
        }
        Ok(queued)
    }

    /// 启动扫描任务和 `workers` 个 worker，必须在 tokio runtime 里调用
    pub fn spawn(self, election: Arc<Election>) -> Vec<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel(self.cfg.queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(self.cfg.workers + 1);

        let scanner = self.clone();
        handles.push(tokio::spawn(election::run_as_leader(
            "transfer",
            self.cfg.scan_interval(),
            election,
            move || scanner.enqueue_pending(&tx),
        )));
        for id in 0..self.cfg.workers.max(1) {
            handles.push(tokio::spawn(self.clone().worker(id, rx.clone())));
        }
        handles
    }

    async fn next_batch(&self, rx: &Mutex<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<Vec<u8>>> {
        let mut rx = rx.lock().await;
        let first = rx.recv().await?;
        let mut batch = vec![first];
        while batch.len() < self.cfg.batch_size {
            match timeout(self.cfg.batch_idle(), rx.recv()).await {
                Ok(Some(meta_key)) => batch.push(meta_key),
                Ok(None) | Err(_) => break,
            }
        }
        Some(batch)
    }

    async fn worker(self, id: usize, rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>) {
        while let Some(batch) = self.next_batch(&rx).await {
            let storage = self.storage.clone();
            let cfg = self.cfg;
            let keys = batch.clone();
            let res = tokio::task::spawn_blocking(move || transfer_batch(&storage, &cfg, &keys)).await;
            match res {
                Ok(Ok(n)) => info!(worker = id, batch = batch.len(), converted = n, "list transfer batch committed"),
                Ok(Err(e)) => warn!(worker = id, batch = batch.len(), error = %e, "list transfer batch rolled back"),
                Err(e) => warn!(worker = id, error = %e, "list transfer task panicked"),
            }
            for meta_key in &batch {
                self.inflight.remove(meta_key);
            }
        }
        debug!(worker = id, "transfer queue closed");
    }
}
