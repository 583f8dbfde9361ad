use std::sync::Arc;
use std::time::Duration;

use ringcoin::block::Block;
use ringcoin::miner::Miner;
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_mine_block_meets_difficulty() {
    let miner = Miner::new(3);
    let mut block = Block::new(1, "previous".to_string());

    assert!(miner.mine_block(&mut block).await);
    assert!(block.current_hash.starts_with("000"));
    assert_eq!(block.current_hash, block.calculate_hash());
    assert!(block.is_valid(3));
    assert!(!miner.is_mining());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_leaves_block_unchanged() {
    // 难度足够高，测试期间不可能挖到
    let miner = Arc::new(Miner::new(64));
    let original = Block::new(1, "previous".to_string());

    let handle = {
        let miner = miner.clone();
        let mut block = original.clone();
        tokio::spawn(async move {
            let found = miner.mine_block(&mut block).await;
            (found, block)
        })
    };

    timeout(Duration::from_secs(5), async {
        while !miner.is_mining() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("挖矿没有开始");

    miner.abort();
    let (found, block) = timeout(Duration::from_secs(5), handle)
        .await
        .expect("中止后挖矿没有及时结束")
        .unwrap();

    assert!(!found);
    assert_eq!(block, original);
    assert!(!miner.is_mining());
}

#[tokio::test]
async fn test_abort_before_mining_does_not_stick() {
    let miner = Miner::new(1);
    miner.abort();

    // 中止只影响当时已经开始或已经组装的挖矿
    let mut block = Block::new(1, "previous".to_string());
    assert!(miner.mine_block(&mut block).await);
}

#[tokio::test]
async fn test_abort_after_assembly_is_not_lost() {
    // 难度足够高，只有中止才能让挖矿结束
    let miner = Miner::new(64);
    let mut block = Block::new(1, "previous".to_string());
    let original = block.clone();

    // 组装区块时读取代数，之后的中止发生在搜索开始之前
    let generation = miner.generation();
    miner.abort();

    let found = timeout(Duration::from_secs(5), miner.mine_block_since(&mut block, generation))
        .await
        .expect("搜索开始前的中止被忽略");
    assert!(!found);
    assert_eq!(block, original);
    assert_eq!(miner.generation(), generation + 1);
}
