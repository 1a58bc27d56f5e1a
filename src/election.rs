// src/election.rs

//! 基于租约的选主
//!
//! 多个进程共享同一个存储时，GC / 过期清理 / list 转换这些后台任务在同一时刻
//! 只能有一个进程在跑。每个任务有自己的选举 key，`campaign()` 每个周期调用一次：
//! 抢到或续上租约就返回 true，任务本轮才执行。
//!
//! 与协调服务的会话出错只当作“失去领导权”，记一条日志，下个周期再试。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sled::{Db, Tree};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

const ELECTION_TREE: &str = "election";

/// 协调服务：按任意字节串 key 提供租约
pub trait Coordinator: Send + Sync {
    /// 租约空闲、已过期或本来就属于 `holder` 时写入新租约并返回 true
    fn acquire(&self, key: &[u8], holder: &[u8], ttl: Duration) -> Result<bool>;

    /// 只释放属于 `holder` 的租约
    fn release(&self, key: &[u8], holder: &[u8]) -> Result<()>;
}

/// 用 sled 的 compare-and-swap 实现的协调服务，租约存放在独立的 tree 里
pub struct SledCoordinator {
    tree: Tree,
}

impl SledCoordinator {
    pub fn open(db: &Db) -> Result<Self> {
        Ok(SledCoordinator { tree: db.open_tree(ELECTION_TREE)? })
    }
}

/// 返回当前的 UNIX 毫秒
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// 租约值：deadline_ms:u64 | holder
fn encode_lease(deadline: u64, holder: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + holder.len());
    v.extend_from_slice(&deadline.to_be_bytes());
    v.extend_from_slice(holder);
    v
}

fn decode_lease(raw: &[u8]) -> Result<(u64, &[u8])> {
    if raw.len() < 8 {
        return Err(Error::InvalidEncoding("lease record too short".into()));
    }
    let (head, holder) = raw.split_at(8);
    let mut b = [0u8; 8];
    b.copy_from_slice(head);
    Ok((u64::from_be_bytes(b), holder))
}

impl Coordinator for SledCoordinator {
    fn acquire(&self, key: &[u8], holder: &[u8], ttl: Duration) -> Result<bool> {
        let now = now_ms();
        let current = self.tree.get(key)?;
        if let Some(raw) = &current {
            let (deadline, owner) = decode_lease(raw)?;
            if owner != holder && deadline > now {
                return Ok(false);
            }
        }
        let lease = encode_lease(now.saturating_add(ttl.as_millis() as u64), holder);
        // CAS 失败说明别的进程刚刚抢先写入
        Ok(self.tree.compare_and_swap(key, current, Some(lease))?.is_ok())
    }

    fn release(&self, key: &[u8], holder: &[u8]) -> Result<()> {
        let current = self.tree.get(key)?;
        if let Some(raw) = &current {
            if decode_lease(raw)?.1 == holder {
                let _ = self.tree.compare_and_swap(key, current.clone(), None::<Vec<u8>>)?;
            }
        }
        Ok(())
    }
}

/// 某个后台任务的一次选举
pub struct Election {
    coordinator: Arc<dyn Coordinator>,
    key: Vec<u8>,
    holder: String,
    ttl: Duration,
    leader: AtomicBool,
}

impl Election {
    pub fn new(coordinator: Arc<dyn Coordinator>, job: &str, holder: impl Into<String>, ttl: Duration) -> Self {
        Election {
            coordinator,
            key: format!("$sys:election:{}", job).into_bytes(),
            holder: holder.into(),
            ttl,
            leader: AtomicBool::new(false),
        }
    }

    /// 抢占或续约；只有当前持有租约时返回 true
    pub fn campaign(&self) -> bool {
        let won = match self.coordinator.acquire(&self.key, self.holder.as_bytes(), self.ttl) {
            Ok(won) => won,
            Err(e) => {
                warn!(key = %String::from_utf8_lossy(&self.key), error = %e, "election session lost");
                false
            }
        };
        let was = self.leader.swap(won, Ordering::SeqCst);
        if won != was {
            info!(
                key = %String::from_utf8_lossy(&self.key),
                holder = %self.holder,
                leader = won,
                "leadership changed"
            );
        }
        won
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// 主动让出租约（进程退出时调用）
    pub fn resign(&self) {
        if self.leader.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.coordinator.release(&self.key, self.holder.as_bytes()) {
                warn!(key = %String::from_utf8_lossy(&self.key), error = %e, "failed to release lease");
            }
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

/// 周期性执行 `job`，每个周期先 campaign，不是 leader 就跳过。
///
/// `job` 在阻塞线程池里执行，出错只中止本批，下个周期继续。
pub async fn run_as_leader<F>(name: &'static str, every: Duration, election: Arc<Election>, job: F)
where
    F: Fn() -> Result<usize> + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let mut iv = interval(every);
    iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        iv.tick().await;
        let el = election.clone();
        let f = job.clone();
        let res = tokio::task::spawn_blocking(move || {
            if !el.campaign() {
                return Ok(None);
            }
            f().map(Some)
        })
        .await;
        match res {
            Ok(Ok(Some(n))) if n > 0 => debug!(job = name, processed = n, "background job tick"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.is_retryable() => {
                debug!(job = name, error = %e, "background batch conflicted, retrying next tick")
            }
            Ok(Err(e)) => warn!(job = name, error = %e, "background batch aborted"),
            Err(e) => error!(job = name, error = %e, "background job panicked"),
        }
    }
}
