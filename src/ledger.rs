//! # 账本模块
//!
//! 账本持有按地址索引的UTXO集合和待处理交易队列，是唯一允许修改UTXO的组件。
//!
//! 每个地址的UTXO列表按插入顺序排列，花费时按先进先出的顺序选取，不做金额优化。
//! 交易验证是一个不可中断的同步步骤：要么完整地消费输入并写入输出，要么不改变任何状态。

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::transaction::{Transaction, TransactionInput, TransactionOutput};

/// UTXO集合在网络传输和校验和中的表示：按地址排序的`(地址, 输出列表)`条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoEntry {
    pub address: String,
    pub outputs: Vec<TransactionOutput>,
}

#[derive(Debug, Default)]
pub struct Ledger {
    utxos: HashMap<String, Vec<TransactionOutput>>,
    pending: Vec<Transaction>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 验证交易并把它应用到UTXO集合
    ///
    /// 按列表顺序累加发送方的UTXO直到不少于转账金额，把它们记录为交易输入；
    /// 输出为给接收方的一笔，以及在有余额时找零给发送方的一笔。
    /// 验证成功后原地填充交易的输入和输出列表。
    ///
    /// # 错误
    ///
    /// * `InvalidSignature` - 签名验证失败
    /// * `NoFunds` - 发送方没有任何UTXO记录
    /// * `InsufficientFunds` - 发送方全部UTXO之和仍小于转账金额，此时UTXO集合保持不变
    pub fn validate(&mut self, transaction: &mut Transaction) -> Result<()> {
        if !transaction.verify_signature() {
            return Err(NodeError::InvalidSignature);
        }

        let sender_utxos = self
            .utxos
            .get(&transaction.sender_address)
            .ok_or(NodeError::NoFunds)?;

        let mut accumulated = 0u64;
        let mut inputs = Vec::new();
        for output in sender_utxos {
            if accumulated >= transaction.amount {
                break;
            }
            accumulated += output.amount;
            inputs.push(TransactionInput {
                previous_output_id: output.output_id.clone(),
                amount: output.amount,
            });
        }

        if accumulated < transaction.amount {
            return Err(NodeError::InsufficientFunds {
                balance: accumulated,
                requested: transaction.amount,
            });
        }

        let mut outputs = vec![TransactionOutput::new(
            &transaction.transaction_id,
            &transaction.receiver_address,
            transaction.amount,
        )];
        if accumulated > transaction.amount {
            outputs.push(TransactionOutput::new(
                &transaction.transaction_id,
                &transaction.sender_address,
                accumulated - transaction.amount,
            ));
        }

        if let Some(sender_utxos) = self.utxos.get_mut(&transaction.sender_address) {
            sender_utxos.drain(..inputs.len());
        }
        for output in &outputs {
            self.utxos
                .entry(output.receiver_address.clone())
                .or_default()
                .push(output.clone());
        }

        debug!(
            "交易 {} 已应用: 消费 {} 个输出，产生 {} 个输出",
            transaction.transaction_id,
            inputs.len(),
            outputs.len()
        );

        transaction.transaction_inputs = inputs;
        transaction.transaction_outputs = outputs;
        Ok(())
    }

    /// 直接写入一个输出，仅用于创世分配
    pub fn add_output(&mut self, output: TransactionOutput) {
        self.utxos
            .entry(output.receiver_address.clone())
            .or_default()
            .push(output);
    }

    pub fn utxos(&self, address: &str) -> Option<&[TransactionOutput]> {
        self.utxos.get(address).map(Vec::as_slice)
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.utxos(address)
            .map(|outputs| outputs.iter().map(|output| output.amount).sum())
            .unwrap_or(0)
    }

    /// 检查地址能否再发起一笔指定金额的转账，不修改任何状态
    ///
    /// 可用金额是UTXO之和减去该地址在待处理队列中尚未打包的转出金额。
    ///
    /// # 错误
    ///
    /// * `NoFunds` - 地址没有任何UTXO记录
    /// * `InsufficientFunds` - 可用金额小于`amount`，`balance`为可用金额
    pub fn check_funds(&self, address: &str, amount: u64) -> Result<()> {
        if self.utxos(address).is_none() {
            return Err(NodeError::NoFunds);
        }

        let queued: u64 = self
            .pending
            .iter()
            .filter(|transaction| transaction.sender_address == address)
            .map(|transaction| transaction.amount)
            .sum();
        let available = self.balance(address).saturating_sub(queued);
        if available < amount {
            return Err(NodeError::InsufficientFunds {
                balance: available,
                requested: amount,
            });
        }
        Ok(())
    }

    /// 系统中全部UTXO的总值
    pub fn total_supply(&self) -> u64 {
        self.utxos
            .values()
            .flat_map(|outputs| outputs.iter().map(|output| output.amount))
            .sum()
    }

    /// 加入待处理队列并按时间戳重新排序，已在队列中的交易ID会被忽略
    ///
    /// # 返回值
    ///
    /// 交易被加入时返回true
    pub fn enqueue(&mut self, transaction: Transaction) -> bool {
        if self
            .pending
            .iter()
            .any(|queued| queued.transaction_id == transaction.transaction_id)
        {
            return false;
        }
        self.pending.push(transaction);
        self.sort_pending();
        true
    }

    /// 取出最早的至多`count`笔交易
    pub fn dequeue(&mut self, count: usize) -> Vec<Transaction> {
        let count = count.min(self.pending.len());
        self.pending.drain(..count).collect()
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 用快照整体替换UTXO集合
    pub fn set_utxos(&mut self, snapshot: Vec<UtxoEntry>) {
        self.utxos = snapshot
            .into_iter()
            .map(|entry| (entry.address, entry.outputs))
            .collect();
    }

    pub fn set_pending_queue(&mut self, pending: Vec<Transaction>) {
        self.pending = pending;
        self.sort_pending();
    }

    /// 导出按地址排序的UTXO快照，与内存中的表示无关
    pub fn utxo_snapshot(&self) -> Vec<UtxoEntry> {
        let mut snapshot: Vec<UtxoEntry> = self
            .utxos
            .iter()
            .map(|(address, outputs)| UtxoEntry {
                address: address.clone(),
                outputs: outputs.clone(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.address.cmp(&b.address));
        snapshot
    }

    // 时间戳相同时按交易ID排序，持有相同交易集合的节点得到相同顺序
    fn sort_pending(&mut self) {
        self.pending.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
    }
}
