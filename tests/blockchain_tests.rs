use ringcoin::block::Block;
use ringcoin::blockchain::Blockchain;
use ringcoin::error::NodeError;
use ringcoin::ledger::Ledger;
use ringcoin::miner::Miner;
use ringcoin::transaction::Transaction;
use ringcoin::wallet::Wallet;

// 辅助函数：创建带有创世区块的链和对应的账本
fn genesis_chain(wallet: &Wallet) -> (Blockchain, Ledger) {
    let genesis = Transaction::genesis(&wallet.address, 300);
    let mut ledger = Ledger::new();
    for output in &genesis.transaction_outputs {
        ledger.add_output(output.clone());
    }
    let mut chain = Blockchain::new();
    chain.set_genesis_block(Block::genesis(genesis));
    (chain, ledger)
}

// 辅助函数：把一笔转账放进当前区块，挖矿后插入链
async fn mine_transfer(
    chain: &mut Blockchain,
    ledger: &mut Ledger,
    miner: &Miner,
    sender: &Wallet,
    receiver: &Wallet,
    amount: u64,
) -> Block {
    let mut transaction = Transaction::new(&sender.address, &receiver.address, amount, None);
    transaction.sign(sender).unwrap();
    ledger.validate(&mut transaction).unwrap();
    chain.append_to_current_block(transaction).unwrap();
    chain.recompute_current_block_hash().unwrap();

    let mut block = chain.current_block().unwrap().clone();
    assert!(miner.mine_block(&mut block).await);
    chain.insert_finalized_block(block.clone()).unwrap();
    block
}

#[test]
fn test_empty_chain_is_uninitialized() {
    let chain = Blockchain::new();
    assert!(chain.is_empty());
    assert!(matches!(
        chain.current_block(),
        Err(NodeError::ChainUninitialized)
    ));
    assert!(matches!(
        chain.latest_finalized(),
        Err(NodeError::ChainUninitialized)
    ));
    assert!(matches!(
        chain.state_checksum(&Ledger::new()),
        Err(NodeError::ChainUninitialized)
    ));
}

#[test]
fn test_genesis_sets_current_block() {
    let wallet = Wallet::from_passphrase("chain-0").unwrap();
    let (chain, _) = genesis_chain(&wallet);

    let genesis = chain.latest_finalized().unwrap();
    let current = chain.current_block().unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(current.index, 1);
    assert_eq!(current.previous_hash, genesis.current_hash);
    assert!(current.transactions.is_empty());
}

#[tokio::test]
async fn test_insert_mined_blocks() {
    let alice = Wallet::from_passphrase("chain-0").unwrap();
    let bob = Wallet::from_passphrase("chain-1").unwrap();
    let (mut chain, mut ledger) = genesis_chain(&alice);
    let miner = Miner::new(2);

    let first = mine_transfer(&mut chain, &mut ledger, &miner, &alice, &bob, 50).await;
    let second = mine_transfer(&mut chain, &mut ledger, &miner, &bob, &alice, 20).await;

    assert_eq!(chain.len(), 3);
    assert!(first.is_valid(2));
    assert_eq!(second.previous_hash, first.current_hash);
    assert_eq!(chain.current_block().unwrap().index, 3);
    assert_eq!(
        chain.current_block().unwrap().previous_hash,
        second.current_hash
    );
    assert!(Blockchain::validate_chain(chain.blocks()).is_ok());
    assert_eq!(ledger.balance(&alice.address), 270);
    assert_eq!(ledger.balance(&bob.address), 30);
}

#[tokio::test]
async fn test_insert_rejects_bad_blocks() {
    let alice = Wallet::from_passphrase("chain-0").unwrap();
    let bob = Wallet::from_passphrase("chain-1").unwrap();
    let (mut chain, mut ledger) = genesis_chain(&alice);
    let miner = Miner::new(1);
    mine_transfer(&mut chain, &mut ledger, &miner, &alice, &bob, 50).await;

    let tip = chain.latest_finalized().unwrap().clone();

    // 哈希与内容不符
    let mut wrong_hash = Block::new(2, tip.current_hash.clone());
    wrong_hash.current_hash = "0".repeat(64);
    assert!(matches!(
        chain.insert_finalized_block(wrong_hash),
        Err(NodeError::BadHash { index: 2 })
    ));

    // 前驱哈希不是链尾的哈希
    let unlinked = Block::new(2, "f".repeat(64));
    assert!(matches!(
        chain.insert_finalized_block(unlinked),
        Err(NodeError::BadPreviousHash { index: 2 })
    ));

    // 索引跳跃
    let skipped = Block::new(5, tip.current_hash.clone());
    assert!(matches!(
        chain.insert_finalized_block(skipped),
        Err(NodeError::ChainInvalid(_))
    ));

    assert_eq!(chain.len(), 2);
    assert_eq!(chain.current_block().unwrap().index, 2);
}

#[tokio::test]
async fn test_mutated_chain_fails_validation() {
    let alice = Wallet::from_passphrase("chain-0").unwrap();
    let bob = Wallet::from_passphrase("chain-1").unwrap();
    let (mut chain, mut ledger) = genesis_chain(&alice);
    let miner = Miner::new(1);
    mine_transfer(&mut chain, &mut ledger, &miner, &alice, &bob, 50).await;
    mine_transfer(&mut chain, &mut ledger, &miner, &alice, &bob, 10).await;

    let blocks = chain.blocks().to_vec();
    assert!(Blockchain::validate_chain(&blocks).is_ok());

    let mut changed_nonce = blocks.clone();
    changed_nonce[1].nonce += 1;
    assert!(matches!(
        Blockchain::validate_chain(&changed_nonce),
        Err(NodeError::ChainInvalid(_))
    ));

    let mut changed_amount = blocks.clone();
    changed_amount[2].transactions[0].amount = 1;
    assert!(Blockchain::validate_chain(&changed_amount).is_err());

    // 修改后重新计算哈希也无法通过：下一个区块的前驱哈希对不上
    let mut rehashed = blocks.clone();
    rehashed[1].transactions[0].amount = 1;
    rehashed[1].recompute_hash();
    assert!(Blockchain::validate_chain(&rehashed).is_err());

    assert!(Blockchain::validate_chain(&[]).is_err());

    // 验证通过的链可以整体替换
    let mut synced = Blockchain::new();
    synced.set_finalized_chain(blocks.clone()).unwrap();
    assert_eq!(synced.len(), 3);
    assert_eq!(synced.current_block().unwrap().index, 3);
    assert!(synced.set_finalized_chain(changed_nonce).is_err());
    assert_eq!(synced.len(), 3);
}

#[test]
fn test_state_checksum() {
    let alice = Wallet::from_passphrase("chain-0").unwrap();
    let bob = Wallet::from_passphrase("chain-1").unwrap();
    let (chain, mut ledger) = genesis_chain(&alice);

    let checksum = chain.state_checksum(&ledger).unwrap();
    assert_eq!(chain.state_checksum(&ledger).unwrap(), checksum);
    assert!(chain.validate_checksum(&checksum, &ledger).is_ok());

    // 另一个节点持有相同的链和账本时得到相同的校验和
    let mut replica = Blockchain::new();
    replica.replace(chain.blocks().to_vec(), Some(chain.current_block().unwrap().clone()));
    let mut replica_ledger = Ledger::new();
    replica_ledger.set_utxos(ledger.utxo_snapshot());
    assert_eq!(replica.state_checksum(&replica_ledger).unwrap(), checksum);

    // 待处理队列变化会改变校验和
    let mut transaction = Transaction::new(&alice.address, &bob.address, 5, None);
    transaction.sign(&alice).unwrap();
    ledger.enqueue(transaction);
    assert!(matches!(
        chain.validate_checksum(&checksum, &ledger),
        Err(NodeError::ChecksumMismatch)
    ));
}
