use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use anyhow::{Context, Result};
use serde_json;
use tracing::info;

/// 进程启动后，从配置文件中读到的全局配置
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// sled 数据目录
    pub data_dir: PathBuf,
    /// 参与选主时使用的节点标识，为空时启动时随机生成
    pub node_id: String,
    pub list: ListConfig,
    pub expire: ExpireConfig,
    pub gc: GcConfig,
    pub election: ElectionConfig,
}

/// list 的双编码与后台转换
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct ListConfig {
    /// 关闭后新建的 list 直接使用分布式编码
    pub compact_enabled: bool,
    /// 紧凑 list 超过这个长度后转成分布式编码
    pub compact_max_len: usize,
    /// 转换 worker 数量
    pub workers: usize,
    /// 待转换队列的容量，也是单次扫描最多读取的标记数
    pub queue_size: usize,
    /// 每个事务最多转换多少个 list
    pub batch_size: usize,
    /// 攒批的空闲超时（毫秒）
    pub batch_idle_ms: u64,
    /// 扫描转换标记的周期（毫秒）
    pub scan_interval_ms: u64,
}

impl Default for ListConfig {
    fn default() -> Self {
        ListConfig {
            compact_enabled: true,
            compact_max_len: 128,
            workers: 2,
            queue_size: 1024,
            batch_size: 16,
            batch_idle_ms: 100,
            scan_interval_ms: 1000,
        }
    }
}

impl ListConfig {
    pub fn batch_idle(&self) -> Duration {
        Duration::from_millis(self.batch_idle_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct ExpireConfig {
    /// 清理周期（毫秒）
    pub interval_ms: u64,
    /// 每次清理最多删除的 key 数
    pub batch_limit: usize,
}

impl Default for ExpireConfig {
    fn default() -> Self {
        ExpireConfig { interval_ms: 1000, batch_limit: 256 }
    }
}

impl ExpireConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct GcConfig {
    pub interval_ms: u64,
    /// 单个事务最多删除的数据 key 数
    pub batch_limit: usize,
    /// 单次运行累计最多删除的数据 key 数，用完就让出
    pub budget: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig { interval_ms: 1000, batch_limit: 256, budget: 4096 }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct ElectionConfig {
    /// 租约有效期（毫秒），需要明显大于各任务的周期
    pub lease_ttl_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        ElectionConfig { lease_ttl_ms: 5000 }
    }
}

impl ElectionConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

fn default_config() -> Config {
    Config { data_dir: PathBuf::from("data"), ..Config::default() }
}

/// 从指定路径读取并反序列化 JSON 配置
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();

    // 如果配置文件不存在，创建默认配置
    if !path_ref.exists() {
        let default_cfg = default_config();
        let default_json = serde_json::to_string_pretty(&default_cfg)?;
        fs::write(path_ref, default_json)
            .with_context(|| format!("Failed to write default config {:?}", path_ref))?;
        info!(path = ?path_ref, "config file not found, default configuration created");
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read config file {:?}", path_ref))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse config file {:?}", path_ref))?;
    Ok(cfg)
}
