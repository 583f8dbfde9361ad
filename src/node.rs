//! # 节点模块
//!
//! 节点协调账本、区块链和矿工，响应本地和远程事件：环成员管理、交易提交与转发、
//! 触发挖矿、接收区块以及冲突解决。
//!
//! 每个进程只有一个节点实例，全部状态都由它持有并通过它的方法修改。
//! 状态锁从不跨越网络调用或挖矿持有，因此验证交易和插入区块对其他请求来说都是原子的。

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::config::Config;
use crate::error::{NodeError, Result};
use crate::ledger::{Ledger, UtxoEntry};
use crate::miner::Miner;
use crate::network::{self, Request, Response, Transport};
use crate::ring::{Membership, Ring, RingNode};
use crate::transaction::Transaction;
use crate::wallet::Wallet;

/// 引导节点给每个新加入节点的初始资金
pub const SEED_AMOUNT: u64 = 100;

/// 节点角色。只有引导节点可以把新节点加入环
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Bootstrap,
    Peer,
}

/// 节点完整状态的快照，用于同步和冲突解决
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub chain: Vec<Block>,
    pub current_block: Option<Block>,
    pub utxos: Vec<UtxoEntry>,
    pub pending_transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Credit,
    Debit,
}

/// 最新区块中与本节点相关的交易，附带双方在环中的索引
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestTransaction {
    pub sender_id: Option<usize>,
    pub recipient_id: Option<usize>,
    pub transaction_type: TransactionType,
    pub timestamp: i64,
    pub transaction_id: String,
    pub sender_address: String,
    pub receiver_address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeBalance {
    pub index: usize,
    pub balance: u64,
}

struct NodeState {
    ledger: Ledger,
    chain: Blockchain,
    ring: Ring,
    /// 本节点最近一次创建交易使用的时间戳，保证本节点的交易ID不重复
    last_timestamp: i64,
}

impl NodeState {
    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            chain: self.chain.blocks().to_vec(),
            current_block: self.chain.current_block().ok().cloned(),
            utxos: self.ledger.utxo_snapshot(),
            pending_transactions: self.ledger.pending().to_vec(),
        }
    }

    /// 当前区块已有的交易数加上待处理队列长度达到区块容量时才可以挖矿
    fn mining_ready(&self, capacity: usize) -> bool {
        match self.chain.current_block() {
            Ok(current) => current.transactions.len() + self.ledger.pending_len() >= capacity,
            Err(_) => false,
        }
    }

    /// 把当前区块补足到区块容量并冻结，返回待挖的区块
    ///
    /// 任何一笔交易验证失败时，尚未处理的交易放回队列，错误交给调用方触发冲突解决
    fn assemble_block(&mut self, capacity: usize) -> Result<Block> {
        let missing = capacity.saturating_sub(self.chain.current_block()?.transactions.len());
        let mut batch = self.ledger.dequeue(missing).into_iter();

        while let Some(mut transaction) = batch.next() {
            if let Err(e) = self.ledger.validate(&mut transaction) {
                warn!("交易 {} 验证失败: {}", transaction.transaction_id, e);
                for remaining in batch {
                    self.ledger.enqueue(remaining);
                }
                return Err(e);
            }
            self.chain.append_to_current_block(transaction)?;
        }

        self.chain.recompute_current_block_hash()?;
        Ok(self.chain.current_block()?.clone())
    }

    fn accept_block(&mut self, block: Block, checksum: &str) -> Result<()> {
        self.chain.validate_checksum(checksum, &self.ledger)?;
        self.chain.insert_finalized_block(block)
    }
}

/// 在各节点的状态快照中选出已确定链最长的一个，长度相同时取先出现的
pub fn select_longest_chain<I>(snapshots: I) -> Option<NodeSnapshot>
where
    I: IntoIterator<Item = NodeSnapshot>,
{
    snapshots.into_iter().fold(None, |best, candidate| match best {
        Some(best) if best.chain.len() >= candidate.chain.len() => Some(best),
        _ => Some(candidate),
    })
}

pub struct Node {
    config: Config,
    role: Role,
    wallet: Wallet,
    info: RingNode,
    state: Mutex<NodeState>,
    miner: Miner,
    /// 挖矿循环的互斥锁，保证每个节点同时只有一个挖矿循环
    mining_loop: Mutex<()>,
    transport: Arc<dyn Transport>,
}

impl Node {
    /// 创建节点
    ///
    /// 引导节点把自己加入环并创建创世区块，创世交易把`节点数 × 100`分配给自己；
    /// 普通节点从空链开始，等待引导节点推送状态。
    ///
    /// # 参数
    ///
    /// * `config` - 节点配置
    /// * `wallet` - 节点钱包，其公钥即节点地址
    /// * `transport` - 与环中其他节点通信的方式
    pub fn new(config: Config, wallet: Wallet, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let role = if config.is_bootstrap {
            Role::Bootstrap
        } else {
            Role::Peer
        };
        let info = RingNode {
            index: config.node_index,
            url: config.url.clone(),
            port: config.port,
            public_key: wallet.address.clone(),
        };

        let mut state = NodeState {
            ledger: Ledger::new(),
            chain: Blockchain::new(),
            ring: Ring::new(config.num_of_nodes),
            last_timestamp: 0,
        };

        if role == Role::Bootstrap {
            state.ring.insert(info.clone())?;
            let genesis = Transaction::genesis(&wallet.address, config.genesis_amount());
            for output in &genesis.transaction_outputs {
                state.ledger.add_output(output.clone());
            }
            state.chain.set_genesis_block(Block::genesis(genesis));
        }

        info!("节点 {} 已初始化，角色: {:?}", info.index, role);

        Ok(Arc::new(Node {
            miner: Miner::new(config.difficulty),
            config,
            role,
            wallet,
            info,
            state: Mutex::new(state),
            mining_loop: Mutex::new(()),
            transport,
        }))
    }

    pub fn info(&self) -> &RingNode {
        &self.info
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn address(&self) -> &str {
        &self.wallet.address
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    /// 启动节点：普通节点按索引等待一段时间后向引导节点注册
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.role == Role::Bootstrap {
            return Ok(());
        }
        let delay = self.config.join_delay();
        info!("节点 {} 将在 {:?} 后加入环", self.info.index, delay);
        tokio::time::sleep(delay).await;
        self.join_ring().await
    }

    /// 向引导节点注册自己
    pub async fn join_ring(&self) -> Result<()> {
        let bootstrap = RingNode {
            index: 0,
            url: self.config.bootstrap_url.clone(),
            port: self.config.bootstrap_port,
            public_key: String::new(),
        };
        self.transport
            .send(
                &bootstrap,
                Request::InsertNode {
                    node: self.info.clone(),
                },
            )
            .await?;
        info!("节点 {} 已加入环", self.info.index);
        Ok(())
    }

    /// 把新节点加入环（仅引导节点）
    ///
    /// 加入后把新的环广播给所有成员，把完整状态推送给新节点，并给它转入初始资金。
    /// 已在环中的索引视为重启后重新注册，只更新成员信息并重新推送状态。
    pub async fn insert_node_to_ring(self: &Arc<Self>, node: RingNode) -> Result<()> {
        if self.role != Role::Bootstrap {
            return Err(NodeError::NotBootstrap);
        }

        let (membership, ring, snapshot) = {
            let mut state = self.state.lock().await;
            let membership = state.ring.insert(node.clone())?;
            (membership, state.ring.nodes().to_vec(), state.snapshot())
        };
        info!(
            "节点 {} ({}) {}",
            node.index,
            node.address(),
            match membership {
                Membership::Joined => "加入环",
                Membership::Rejoined => "重新注册",
            }
        );

        let peers: Vec<RingNode> = ring
            .iter()
            .filter(|n| n.index != self.info.index)
            .cloned()
            .collect();
        network::broadcast(&*self.transport, &peers, &Request::SetRing { ring }).await?;
        self.transport
            .send(&node, Request::SetState { state: snapshot })
            .await?;

        if membership == Membership::Joined {
            self.post_transaction(node.index, SEED_AMOUNT).await?;
        }
        Ok(())
    }

    /// 发起一笔转账
    ///
    /// 创建并签名交易，加入本地队列，转发给环中其他节点，队列满足区块容量时触发挖矿。
    /// 可用资金不足的转账在入队之前被拒绝，不会转发给其他节点。
    ///
    /// # 参数
    ///
    /// * `recipient_index` - 收款节点在环中的索引
    /// * `amount` - 转账金额
    pub async fn post_transaction(
        self: &Arc<Self>,
        recipient_index: usize,
        amount: u64,
    ) -> Result<Transaction> {
        if recipient_index == self.info.index {
            return Err(NodeError::SelfTransfer);
        }

        let (transaction, peers) = {
            let mut state = self.state.lock().await;
            let recipient = state
                .ring
                .get(recipient_index)
                .ok_or(NodeError::RecipientNotFound(recipient_index))?;
            if recipient.public_key == self.wallet.address {
                return Err(NodeError::SelfTransfer);
            }
            let receiver_address = recipient.public_key.clone();
            state.ledger.check_funds(&self.wallet.address, amount)?;

            let timestamp = chrono::Utc::now()
                .timestamp_millis()
                .max(state.last_timestamp + 1);
            state.last_timestamp = timestamp;

            let mut transaction =
                Transaction::new(&self.wallet.address, &receiver_address, amount, Some(timestamp));
            transaction.sign(&self.wallet)?;
            state.ledger.enqueue(transaction.clone());
            (transaction, state.ring.peers(self.info.index))
        };
        info!(
            "创建交易 {}: 向节点 {} 转账 {}",
            transaction.transaction_id, recipient_index, amount
        );

        network::broadcast(
            &*self.transport,
            &peers,
            &Request::PutTransaction {
                transaction: transaction.clone(),
            },
        )
        .await?;

        self.trigger_mining();
        Ok(transaction)
    }

    /// 接收其他节点转发的交易。交易在被打包进区块时才验证
    pub async fn put_transaction(self: &Arc<Self>, transaction: Transaction) -> Result<()> {
        let id = transaction.transaction_id.clone();
        if self.state.lock().await.ledger.enqueue(transaction) {
            debug!("收到转发的交易 {}", id);
            self.trigger_mining();
        }
        Ok(())
    }

    /// 在后台启动挖矿循环。已有循环在运行或队列不足时什么也不做
    fn trigger_mining(self: &Arc<Self>) {
        let node = Arc::clone(self);
        tokio::spawn(async move { node.init_mining().await });
    }

    /// 挖矿循环：只要队列中的交易足够组成一个区块，就组装、挖矿、广播
    ///
    /// 过程中任何错误都会触发冲突解决，而不是直接返回错误
    pub async fn init_mining(self: &Arc<Self>) {
        let Ok(guard) = self.mining_loop.try_lock() else {
            debug!("挖矿循环已在运行");
            return;
        };

        let drained = loop {
            match self.mine_next_block().await {
                Ok(true) => continue,
                Ok(false) => break true,
                Err(e) => {
                    warn!("挖矿过程出错: {}，开始冲突解决", e);
                    if let Err(e) = self.resolve_conflicts().await {
                        error!("冲突解决失败: {}", e);
                        break false;
                    }
                }
            }
        };
        drop(guard);

        // 循环判断队列不足之后、释放锁之前到达的交易，其触发已被忽略
        let capacity = self.config.block_capacity.max(1);
        if drained && self.state.lock().await.mining_ready(capacity) {
            self.trigger_mining();
        }
    }

    /// 尝试挖出下一个区块
    ///
    /// # 返回值
    ///
    /// 交易不足时返回false；完成一次挖矿尝试（成功、中止或区块已过期）时返回true
    async fn mine_next_block(&self) -> Result<bool> {
        let capacity = self.config.block_capacity.max(1);
        let (mut block, generation) = {
            let mut state = self.state.lock().await;
            if !state.mining_ready(capacity) {
                return Ok(false);
            }
            let block = state.assemble_block(capacity)?;
            (block, self.miner.generation())
        };

        if !self.miner.mine_block_since(&mut block, generation).await {
            return Ok(true);
        }

        let (checksum, peers) = {
            let mut state = self.state.lock().await;
            let current = state.chain.current_block()?;
            if current.index != block.index
                || current.previous_hash != block.previous_hash
                || current.transactions != block.transactions
            {
                info!("区块 #{} 已被其他节点的区块取代，丢弃", block.index);
                return Ok(true);
            }
            let checksum = state.chain.state_checksum(&state.ledger)?;
            state.chain.insert_finalized_block(block.clone())?;
            (checksum, state.ring.peers(self.info.index))
        };
        info!(
            "区块 #{} 已加入本地区块链: {}",
            block.index, block.current_hash
        );

        network::broadcast(
            &*self.transport,
            &peers,
            &Request::PostBlock { block, checksum },
        )
        .await?;
        Ok(true)
    }

    /// 接收其他节点挖出的区块
    ///
    /// 中止本地挖矿，验证状态校验和后插入区块；任何失败都进行冲突解决
    pub async fn post_block(self: &Arc<Self>, block: Block, checksum: String) -> Result<()> {
        self.miner.abort();
        let index = block.index;
        let accepted = {
            let mut state = self.state.lock().await;
            let accepted = state.accept_block(block, &checksum);
            // 在锁内再次中止，覆盖上一次中止之后才组装的区块
            self.miner.abort();
            accepted
        };

        match accepted {
            Ok(()) => {
                info!("接受区块 #{}", index);
                self.trigger_mining();
                Ok(())
            }
            Err(e) => {
                warn!("区块 #{} 未被接受: {}，开始冲突解决", index, e);
                self.resolve_conflicts().await
            }
        }
    }

    /// 冲突解决：向所有节点请求完整状态，整体采用已确定链最长的那一个
    ///
    /// 只比较链的长度，不重新验证采用的链
    pub async fn resolve_conflicts(self: &Arc<Self>) -> Result<()> {
        self.miner.abort();

        let peers = self.state.lock().await.ring.peers(self.info.index);
        if peers.is_empty() {
            info!("没有其他节点，保留本地状态");
            return Ok(());
        }

        let responses = network::broadcast(&*self.transport, &peers, &Request::GetState).await?;
        let mut snapshots = Vec::with_capacity(responses.len());
        for (peer, response) in responses {
            match response {
                Response::State { state } => snapshots.push(state),
                other => {
                    return Err(NodeError::Transport(format!(
                        "unexpected response from node {}: {:?}",
                        peer.index, other
                    )))
                }
            }
        }

        let best = match select_longest_chain(snapshots) {
            Some(best) if !best.chain.is_empty() => best,
            _ => {
                info!("没有可采用的区块链，保留本地状态");
                return Ok(());
            }
        };

        let length = best.chain.len();
        {
            let mut state = self.state.lock().await;
            state.chain.replace(best.chain, best.current_block);
            state.ledger.set_utxos(best.utxos);
            state.ledger.set_pending_queue(best.pending_transactions);
            self.miner.abort();
        }
        info!("冲突解决完成，采用长度为 {} 的区块链", length);

        self.trigger_mining();
        Ok(())
    }

    /// 整体替换节点状态（引导节点在新节点加入时推送）。链会先经过验证
    pub async fn set_state(self: &Arc<Self>, snapshot: NodeSnapshot) -> Result<()> {
        self.miner.abort();
        {
            let mut state = self.state.lock().await;
            state.chain.set_finalized_chain(snapshot.chain)?;
            if let Some(current) = snapshot.current_block {
                state.chain.set_current_block(current);
            }
            state.ledger.set_utxos(snapshot.utxos);
            state.ledger.set_pending_queue(snapshot.pending_transactions);
            self.miner.abort();
            info!("已同步状态，区块链长度: {}", state.chain.len());
        }
        self.trigger_mining();
        Ok(())
    }

    pub async fn set_ring(&self, ring: Vec<RingNode>) {
        let mut state = self.state.lock().await;
        state.ring.replace(ring);
        info!("环已更新，共 {} 个节点", state.ring.len());
    }

    pub async fn ring(&self) -> Vec<RingNode> {
        self.state.lock().await.ring.nodes().to_vec()
    }

    pub async fn snapshot(&self) -> NodeSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn state_checksum(&self) -> Result<String> {
        let state = self.state.lock().await;
        state.chain.state_checksum(&state.ledger)
    }

    pub async fn chain_len(&self) -> usize {
        self.state.lock().await.chain.len()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.ledger.pending_len()
    }

    pub async fn balance(&self) -> u64 {
        self.balance_of(&self.wallet.address).await
    }

    pub async fn balance_of(&self, address: &str) -> u64 {
        self.state.lock().await.ledger.balance(address)
    }

    /// 环中每个节点的余额
    pub async fn all_balances(&self) -> Vec<NodeBalance> {
        let state = self.state.lock().await;
        state
            .ring
            .nodes()
            .iter()
            .map(|node| NodeBalance {
                index: node.index,
                balance: state.ledger.balance(&node.public_key),
            })
            .collect()
    }

    /// 最新已确定区块中与本节点相关的交易
    pub async fn latest_mined_block_transactions(&self) -> Result<Vec<LatestTransaction>> {
        let state = self.state.lock().await;
        let block = state.chain.latest_finalized()?;
        let index_of = |address: &str| state.ring.find_by_key(address).map(|node| node.index);

        Ok(block
            .transactions
            .iter()
            .filter(|transaction| transaction.involves(&self.wallet.address))
            .map(|transaction| LatestTransaction {
                sender_id: index_of(&transaction.sender_address),
                recipient_id: index_of(&transaction.receiver_address),
                transaction_type: if transaction.sender_address == self.wallet.address {
                    TransactionType::Debit
                } else {
                    TransactionType::Credit
                },
                timestamp: transaction.timestamp,
                transaction_id: transaction.transaction_id.clone(),
                sender_address: transaction.sender_address.clone(),
                receiver_address: transaction.receiver_address.clone(),
                amount: transaction.amount,
            })
            .collect())
    }

    /// 把请求分派给对应的操作，错误转换为带状态码的错误响应
    pub async fn handle(self: &Arc<Self>, request: Request) -> Response {
        let result = match request {
            Request::Healthcheck => Ok(Response::Healthy {
                node_index: self.info.index,
            }),
            Request::InsertNode { node } => {
                self.insert_node_to_ring(node).await.map(|_| Response::Ok)
            }
            Request::GetRing => Ok(Response::Ring {
                ring: self.ring().await,
            }),
            Request::SetRing { ring } => {
                self.set_ring(ring).await;
                Ok(Response::Ok)
            }
            Request::GetState => Ok(Response::State {
                state: self.snapshot().await,
            }),
            Request::SetState { state } => self.set_state(state).await.map(|_| Response::Ok),
            Request::PostBlock { block, checksum } => {
                self.post_block(block, checksum).await.map(|_| Response::Ok)
            }
            Request::GetTransactions => self
                .latest_mined_block_transactions()
                .await
                .map(|transactions| Response::Transactions { transactions }),
            Request::PostTransaction {
                recipient_index,
                amount,
            } => self
                .post_transaction(recipient_index, amount)
                .await
                .map(|transaction| Response::Transaction { transaction }),
            Request::PutTransaction { transaction } => {
                self.put_transaction(transaction).await.map(|_| Response::Ok)
            }
            Request::GetBalance => Ok(Response::Balance {
                balance: self.balance().await,
            }),
            Request::GetBalances => Ok(Response::Balances {
                balances: self.all_balances().await,
            }),
        };

        result.unwrap_or_else(|e| {
            debug!("请求处理失败: {}", e);
            Response::from(e)
        })
    }
}
