//! # 挖矿模块
//!
//! 对当前区块进行工作量证明搜索：从一个随机的nonce开始逐个尝试，
//! 直到区块哈希具有足够多的前导零，或者观察到中止请求。
//!
//! 搜索在阻塞线程池中运行，异步运行时在挖矿期间仍然可以处理请求。
//! 中止通过递增代数实现：每次挖矿记录开始时的代数，代数一旦变化搜索就结束。
//! 每次哈希尝试之后都会检查代数，因此中止最多延迟一次哈希计算的时间。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::Rng;

use crate::block::Block;
use crate::hash::meets_difficulty;

/// 随机起始nonce的上界
const NONCE_RANGE: u64 = 1_000_000_000;

/// 每隔多少次尝试输出一次进度
const PROGRESS_INTERVAL: u64 = 100_000;

pub struct Miner {
    difficulty: usize,
    generation: Arc<AtomicU64>,
    mining: AtomicBool,
}

impl Miner {
    pub fn new(difficulty: usize) -> Self {
        Miner {
            difficulty,
            generation: Arc::new(AtomicU64::new(0)),
            mining: AtomicBool::new(false),
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// 当前的中止代数，每次`abort`都会使其加一
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// 挖掘区块，只响应调用之后发出的中止请求
    pub async fn mine_block(&self, block: &mut Block) -> bool {
        let generation = self.generation();
        self.mine_block_since(block, generation).await
    }

    /// 挖掘区块
    ///
    /// 找到满足难度的nonce时，把nonce和哈希写入区块并返回true；
    /// 代数不再等于`generation`时返回false，区块保持不变。
    /// 在组装区块时读取代数，组装之后、开始搜索之前发出的中止也不会丢失。
    /// 同一时刻每个节点最多只能有一次挖矿调用，调用方应先检查`is_mining`。
    ///
    /// # 参数
    ///
    /// * `block` - 待挖掘的区块
    /// * `generation` - 组装区块时读取的`generation()`
    pub async fn mine_block_since(&self, block: &mut Block, generation: u64) -> bool {
        self.mining.store(true, Ordering::SeqCst);
        info!("开始挖掘区块 #{}，难度 {}", block.index, self.difficulty);

        let template = block.clone();
        let current = self.generation.clone();
        let difficulty = self.difficulty;
        let start = rand::thread_rng().gen_range(0..NONCE_RANGE);
        let result = tokio::task::spawn_blocking(move || {
            search(&template, difficulty, start, &current, generation)
        })
        .await;

        self.mining.store(false, Ordering::SeqCst);

        match result {
            Ok(Some((nonce, hash))) => {
                block.nonce = nonce;
                block.current_hash = hash;
                info!("成功挖到区块 #{}，nonce: {}", block.index, nonce);
                true
            }
            Ok(None) => {
                info!("区块 #{} 的挖矿已中止", block.index);
                false
            }
            Err(e) => {
                warn!("挖矿任务异常结束: {}", e);
                false
            }
        }
    }

    /// 中止正在进行以及已经组装但尚未开始的挖矿，可重复调用
    pub fn abort(&self) {
        if self.is_mining() {
            debug!("请求中止挖矿");
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }
}

fn search(
    block: &Block,
    difficulty: usize,
    start: u64,
    current: &AtomicU64,
    generation: u64,
) -> Option<(u64, String)> {
    let mut nonce = start;
    let mut attempts = 0u64;
    loop {
        if current.load(Ordering::SeqCst) != generation {
            return None;
        }

        let hash = block.hash_with_nonce(nonce);
        if meets_difficulty(&hash, difficulty) {
            debug!("尝试 {} 次后找到nonce", attempts + 1);
            return Some((nonce, hash));
        }

        nonce = nonce.wrapping_add(1);
        attempts += 1;
        if attempts % PROGRESS_INTERVAL == 0 {
            debug!("Mining... iterations: {}, nonce: {}", attempts, nonce);
        }
    }
}
