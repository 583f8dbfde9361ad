//! # 区块链模块
//!
//! 保存已最终确定（已挖出）的区块列表和正在累积交易的当前区块。
//!
//! 当前区块的索引总是等于已确定区块的数量，它的前驱哈希总是最后一个已确定区块的哈希。
//! 插入一个已挖出的区块后，会立即生成下一个空的当前区块。

use log::info;
use serde::Serialize;

use crate::block::Block;
use crate::error::{NodeError, Result};
use crate::hash::hash;
use crate::ledger::{Ledger, UtxoEntry};
use crate::transaction::Transaction;

#[derive(Debug, Default)]
pub struct Blockchain {
    blocks: Vec<Block>,
    current_block: Option<Block>,
}

/// 参与状态校验和计算的字段
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChecksumFields<'a> {
    current_block_index: u64,
    blockchain: &'a [Block],
    pending_transactions: &'a [Transaction],
    utxos: Vec<UtxoEntry>,
}

impl Blockchain {
    /// 创建空链，等待设置创世区块或从其他节点同步
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置创世区块并生成第一个当前区块
    pub fn set_genesis_block(&mut self, genesis: Block) {
        info!("创世区块已设置: {}", genesis.current_hash);
        self.current_block = Some(Block::new(1, genesis.current_hash.clone()));
        self.blocks = vec![genesis];
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn latest_finalized(&self) -> Result<&Block> {
        self.blocks.last().ok_or(NodeError::ChainUninitialized)
    }

    pub fn current_block(&self) -> Result<&Block> {
        self.current_block
            .as_ref()
            .ok_or(NodeError::ChainUninitialized)
    }

    /// 把交易加入当前区块，不更新哈希
    pub fn append_to_current_block(&mut self, transaction: Transaction) -> Result<()> {
        self.current_block
            .as_mut()
            .ok_or(NodeError::ChainUninitialized)?
            .transactions
            .push(transaction);
        Ok(())
    }

    /// 当前区块被冻结、开始挖矿之前，根据其内容重新计算哈希
    pub fn recompute_current_block_hash(&mut self) -> Result<()> {
        self.current_block
            .as_mut()
            .ok_or(NodeError::ChainUninitialized)?
            .recompute_hash();
        Ok(())
    }

    /// 验证并插入一个已挖出的区块，然后生成下一个空的当前区块
    ///
    /// # 参数
    ///
    /// * `block` - 已挖出的区块，索引必须等于当前已确定区块的数量
    pub fn insert_finalized_block(&mut self, block: Block) -> Result<()> {
        if block.index != self.blocks.len() as u64 {
            return Err(NodeError::ChainInvalid(format!(
                "expected block {}, got block {}",
                self.blocks.len(),
                block.index
            )));
        }
        self.validate_block(&block)?;

        self.current_block = Some(Block::new(block.index + 1, block.current_hash.clone()));
        self.blocks.push(block);
        Ok(())
    }

    /// 验证区块的哈希以及它与最后一个已确定区块的链接关系。创世区块不做验证
    pub fn validate_block(&self, block: &Block) -> Result<()> {
        match self.blocks.last() {
            Some(previous) => validate_link(previous, block),
            None if block.is_genesis() => Ok(()),
            None => validate_own_hash(block),
        }
    }

    /// 按顺序验证链中每个非创世区块，任何一个区块失败都使整条链无效
    pub fn validate_chain(chain: &[Block]) -> Result<()> {
        if chain.is_empty() {
            return Err(NodeError::ChainInvalid("chain is empty".to_string()));
        }
        for pair in chain.windows(2) {
            validate_link(&pair[0], &pair[1])
                .map_err(|e| NodeError::ChainInvalid(e.to_string()))?;
        }
        Ok(())
    }

    /// 验证后整体替换已确定区块列表，当前区块重置为新链尾之后的空区块
    pub fn set_finalized_chain(&mut self, chain: Vec<Block>) -> Result<()> {
        Self::validate_chain(&chain)?;
        let tip = chain.last().ok_or(NodeError::ChainUninitialized)?;
        self.current_block = Some(Block::new(tip.index + 1, tip.current_hash.clone()));
        self.blocks = chain;
        Ok(())
    }

    /// 不经验证地整体替换链和当前区块，冲突解决时使用。
    /// 没有提供当前区块时，生成新链尾之后的空区块
    pub fn replace(&mut self, chain: Vec<Block>, current_block: Option<Block>) {
        self.current_block = current_block.or_else(|| {
            chain
                .last()
                .map(|tip| Block::new(tip.index + 1, tip.current_hash.clone()))
        });
        self.blocks = chain;
    }

    /// 替换当前区块，用于从其他节点同步完整状态
    pub fn set_current_block(&mut self, block: Block) {
        self.current_block = Some(block);
    }

    /// 计算整个节点状态的指纹：当前区块索引、已确定的链、待处理队列和UTXO集合
    ///
    /// 这只是广播区块时的一种廉价一致性检查，不能代替链验证
    pub fn state_checksum(&self, ledger: &Ledger) -> Result<String> {
        Ok(hash(&ChecksumFields {
            current_block_index: self.current_block()?.index,
            blockchain: &self.blocks,
            pending_transactions: ledger.pending(),
            utxos: ledger.utxo_snapshot(),
        }))
    }

    pub fn validate_checksum(&self, expected: &str, ledger: &Ledger) -> Result<()> {
        if self.state_checksum(ledger)? != expected {
            return Err(NodeError::ChecksumMismatch);
        }
        Ok(())
    }
}

fn validate_own_hash(block: &Block) -> Result<()> {
    if block.calculate_hash() != block.current_hash {
        return Err(NodeError::BadHash { index: block.index });
    }
    Ok(())
}

fn validate_link(previous: &Block, block: &Block) -> Result<()> {
    if block.is_genesis() {
        return Ok(());
    }
    validate_own_hash(block)?;
    if previous.calculate_hash() != block.previous_hash {
        return Err(NodeError::BadPreviousHash { index: block.index });
    }
    Ok(())
}
