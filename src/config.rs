//! # 配置模块
//!
//! 节点配置可以通过命令行参数或同名环境变量提供。

use std::time::Duration;

use clap::{ArgAction, Parser};

#[derive(Debug, Clone, Parser)]
#[clap(version, about = "Proof-of-work ring ledger node")]
pub struct Config {
    /// 节点在环中的索引
    #[clap(long, env = "NODE_INDEX", value_parser, default_value = "0")]
    pub node_index: usize,

    /// 是否为引导节点
    #[clap(long, env = "IS_BOOTSTRAP", action = ArgAction::Set, value_parser, default_value = "false")]
    pub is_bootstrap: bool,

    /// 挖矿难度：区块哈希需要的前导零个数
    #[clap(long, env = "DIFFICULTY", value_parser, default_value = "5")]
    pub difficulty: usize,

    /// 环中节点数量
    #[clap(long, env = "NUM_OF_NODES", value_parser, default_value = "10")]
    pub num_of_nodes: usize,

    #[clap(long, env = "URL", value_parser, default_value = "127.0.0.1")]
    pub url: String,

    #[clap(long, env = "PORT", value_parser, default_value = "3000")]
    pub port: u16,

    /// 每个区块包含的交易数量
    #[clap(long, env = "BLOCK_CAPACITY", value_parser, default_value = "5")]
    pub block_capacity: usize,

    /// 本节点私有的钱包口令；未设置时每次启动生成随机密钥
    #[clap(long, env = "PASSPHRASE", value_parser)]
    pub passphrase: Option<String>,

    #[clap(long, env = "BOOTSTRAP_URL", value_parser, default_value = "127.0.0.1")]
    pub bootstrap_url: String,

    #[clap(long, env = "BOOTSTRAP_PORT", value_parser, default_value = "3000")]
    pub bootstrap_port: u16,

    #[clap(long, env = "JOIN_DELAY_MS", value_parser, default_value = "1000")]
    pub join_delay_ms: u64,
}

impl Config {
    /// 非引导节点注册前的等待时间，与节点索引成正比，避免并发修改环
    pub fn join_delay(&self) -> Duration {
        Duration::from_millis(self.join_delay_ms.saturating_mul(self.node_index as u64))
    }

    /// 创世区块分配给引导节点的总金额
    pub fn genesis_amount(&self) -> u64 {
        self.num_of_nodes as u64 * 100
    }
}
