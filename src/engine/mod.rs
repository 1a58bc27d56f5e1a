// src/engine/mod.rs

//! # 引擎
//!
//! `Engine` 持有存储句柄、配置和协调服务，是客户端拿事务、进程启动后台任务的入口。
//! 它不持有任何全局状态：队列、选举都挂在它自己身上。

pub mod kv;

use std::sync::Arc;

use sled::Db;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::election::{Coordinator, Election, SledCoordinator};
use crate::error::Result;
use crate::keys::DbKeys;
use crate::transfer::TransferQueue;
use crate::txn::Transaction;
use crate::{expire, gc};

pub use kv::{KvTxn, Storage};

pub struct Engine {
    storage: Storage,
    coordinator: Arc<dyn Coordinator>,
    config: Config,
    node_id: String,
}

/// 已经启动的后台任务
pub struct BackgroundJobs {
    handles: Vec<JoinHandle<()>>,
    elections: Vec<Arc<Election>>,
}

impl BackgroundJobs {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 停掉所有任务并让出持有的租约
    pub fn shutdown(self) {
        for h in &self.handles {
            h.abort();
        }
        for e in &self.elections {
            e.resign();
        }
    }
}

impl Engine {
    /// 打开引擎，选主使用同一个 sled 库里的独立 tree
    pub fn open(db: &Db, config: Config) -> Result<Self> {
        let coordinator = Arc::new(SledCoordinator::open(db)?);
        Self::with_coordinator(db, config, coordinator)
    }

    pub fn with_coordinator(db: &Db, config: Config, coordinator: Arc<dyn Coordinator>) -> Result<Self> {
        let storage = Storage::open(db)?;
        let node_id = if config.node_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            config.node_id.clone()
        };
        info!(node_id = %node_id, keys = storage.len(), "engine opened");
        Ok(Engine { storage, coordinator, config, node_id })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// 在 `namespace` 的第 `db_id` 个库上开启一个事务
    pub fn begin(&self, namespace: &str, db_id: u32) -> Result<Transaction> {
        let keys = DbKeys::new(namespace, db_id)?;
        Ok(Transaction::new(self.storage.begin(), keys, self.config.list))
    }

    /// 开事务、执行 `f`、提交；`f` 出错时回滚
    pub fn run<T>(&self, namespace: &str, db_id: u32, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let txn = self.begin(namespace, db_id)?;
        match f(&txn) {
            Ok(v) => {
                txn.commit()?;
                Ok(v)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    /// 某个后台任务在本进程的选举句柄
    pub fn election(&self, job: &str) -> Arc<Election> {
        Arc::new(Election::new(
            self.coordinator.clone(),
            job,
            self.node_id.clone(),
            self.config.election.lease_ttl(),
        ))
    }

    /// 启动过期清理、GC 和 list 转换，必须在 tokio runtime 里调用
    pub fn spawn_background(&self) -> BackgroundJobs {
        let expire_el = self.election("expire");
        let gc_el = self.election("gc");
        let transfer_el = self.election("transfer");

        let mut handles = vec![
            tokio::spawn(expire::start_sweeper(self.storage.clone(), expire_el.clone(), self.config.expire)),
            tokio::spawn(gc::start_collector(self.storage.clone(), gc_el.clone(), self.config.gc)),
        ];
        handles.extend(TransferQueue::new(self.storage.clone(), self.config.list).spawn(transfer_el.clone()));
        info!(node_id = %self.node_id, tasks = handles.len(), "background jobs started");

        BackgroundJobs { handles, elections: vec![expire_el, gc_el, transfer_el] }
    }
}
