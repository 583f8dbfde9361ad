//! # 环形账本节点
//!
//! 一个最小的工作量证明加密货币：固定数量的节点组成一个环，共同维护一份以UTXO表示余额、
//! 由签名保护、通过哈希链接并按难度挖出区块的账本。
//!
//! ## 主要模块
//!
//! * `hash` - 对象哈希与难度判断
//! * `wallet` - 密钥管理和签名验证
//! * `transaction` - 交易、交易输入和交易输出
//! * `ledger` - UTXO集合和待处理交易队列
//! * `block` - 区块结构与区块哈希
//! * `blockchain` - 已确定的区块链和当前区块
//! * `miner` - 可中止的工作量证明搜索
//! * `ring` - 环成员
//! * `network` - 节点之间的消息与传输
//! * `node` - 协调以上组件的节点
//! * `config` - 节点配置
//! * `error` - 错误类型

pub mod block;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod miner;
pub mod network;
pub mod node;
pub mod ring;
pub mod transaction;
pub mod wallet;
