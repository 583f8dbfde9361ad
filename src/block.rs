//! # 区块模块
//!
//! 定义区块结构以及区块哈希的计算方式。
//!
//! 区块哈希只覆盖索引、交易列表、nonce和前一个区块的哈希，不包含时间戳，
//! 各节点必须对参与哈希的字段集合保持一致。

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::hash::{hash, meets_difficulty};
use crate::transaction::Transaction;

/// 创世区块的前驱哈希
pub const GENESIS_PREVIOUS_HASH: &str = "1";

/// 区块结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// 区块在链中的位置，创世区块为0
    pub index: u64,
    /// 区块创建时间戳（Unix毫秒），不参与哈希
    pub timestamp: i64,
    /// 区块中包含的交易列表
    pub transactions: Vec<Transaction>,
    /// 工作量证明的随机数
    pub nonce: u64,
    /// 当前区块的哈希值
    pub current_hash: String,
    /// 前一个区块的哈希值
    pub previous_hash: String,
}

/// 参与哈希计算的区块字段
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockCore<'a> {
    index: u64,
    transactions: &'a [Transaction],
    nonce: u64,
    previous_hash: &'a str,
}

impl Block {
    /// 创建新的空区块
    ///
    /// # 参数
    ///
    /// * `index` - 区块索引
    /// * `previous_hash` - 前一个区块的哈希值
    ///
    /// # 返回值
    ///
    /// 返回哈希已计算好的空区块
    pub fn new(index: u64, previous_hash: String) -> Self {
        let mut block = Block {
            index,
            timestamp: Utc::now().timestamp_millis(),
            transactions: Vec::new(),
            nonce: 0,
            current_hash: String::new(),
            previous_hash,
        };
        block.recompute_hash();
        block
    }

    /// 创建只包含创世交易的创世区块，不需要挖矿
    pub fn genesis(transaction: Transaction) -> Self {
        let mut block = Block::new(0, GENESIS_PREVIOUS_HASH.to_string());
        block.transactions.push(transaction);
        block.recompute_hash();
        block
    }

    /// 用当前的nonce计算区块哈希
    pub fn calculate_hash(&self) -> String {
        self.hash_with_nonce(self.nonce)
    }

    /// 用给定的nonce计算区块哈希，不修改区块
    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        hash(&BlockCore {
            index: self.index,
            transactions: &self.transactions,
            nonce,
            previous_hash: &self.previous_hash,
        })
    }

    pub fn recompute_hash(&mut self) {
        self.current_hash = self.calculate_hash();
    }

    /// 验证区块哈希是否满足难度要求
    pub fn is_valid(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.current_hash, difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}
