use ringcoin::block::{Block, GENESIS_PREVIOUS_HASH};
use ringcoin::hash::{hash, meets_difficulty};
use ringcoin::transaction::{Transaction, GENESIS_SENDER};
use ringcoin::wallet::{self, Wallet};

#[test]
fn test_transaction_id_is_deterministic() {
    let sender = Wallet::from_passphrase("test-0").unwrap();
    let receiver = Wallet::from_passphrase("test-1").unwrap();

    let first = Transaction::new(&sender.address, &receiver.address, 10, Some(1_000));
    let second = Transaction::new(&sender.address, &receiver.address, 10, Some(1_000));
    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(first.transaction_id, first.compute_id());

    // 任何一个字段不同都会得到不同的ID
    let later = Transaction::new(&sender.address, &receiver.address, 10, Some(1_001));
    let larger = Transaction::new(&sender.address, &receiver.address, 11, Some(1_000));
    assert_ne!(first.transaction_id, later.transaction_id);
    assert_ne!(first.transaction_id, larger.transaction_id);
}

#[test]
fn test_signature_round_trip() {
    let sender = Wallet::from_passphrase("test-0").unwrap();
    let receiver = Wallet::from_passphrase("test-1").unwrap();

    let mut transaction = Transaction::new(&sender.address, &receiver.address, 25, None);
    assert!(!transaction.verify_signature(), "未签名的交易不应通过验证");

    transaction.sign(&sender).unwrap();
    assert!(transaction.verify_signature());
}

#[test]
fn test_tampered_transaction_fails_verification() {
    let sender = Wallet::from_passphrase("test-0").unwrap();
    let receiver = Wallet::from_passphrase("test-1").unwrap();

    let mut transaction = Transaction::new(&sender.address, &receiver.address, 25, Some(42));
    transaction.sign(&sender).unwrap();

    let mut tampered = transaction.clone();
    tampered.amount = 2_500;
    assert!(!tampered.verify_signature());

    let mut redirected = transaction.clone();
    redirected.receiver_address = sender.address.clone();
    assert!(!redirected.verify_signature());

    // 用接收方的私钥签名，签名与发送方地址不匹配
    let mut forged = Transaction::new(&sender.address, &receiver.address, 25, Some(42));
    forged.sign(&receiver).unwrap();
    assert!(!forged.verify_signature());
}

#[test]
fn test_wallet_from_passphrase() {
    let first = Wallet::from_passphrase("node-a secret").unwrap();
    let again = Wallet::from_passphrase("node-a secret").unwrap();
    let other = Wallet::from_passphrase("node-b secret").unwrap();

    assert_eq!(first.address, again.address);
    assert_ne!(first.address, other.address);
    assert!(Wallet::from_passphrase("").is_err());

    // 地址是33字节压缩公钥的16进制编码
    assert_eq!(first.address.len(), 66);
    assert_eq!(first.address, wallet::public_key_to_address(&first.public_key));
}

#[test]
fn test_random_wallets_are_distinct() {
    // 没有配置口令的节点每次启动都得到不同的密钥
    let first = Wallet::new();
    let second = Wallet::new();
    assert_ne!(first.address, second.address);
    assert_ne!(first.private_key, second.private_key);
}

#[test]
fn test_verify_rejects_malformed_input() {
    let wallet = Wallet::new();
    let signature = wallet.sign(b"payload").unwrap();

    assert!(wallet::verify(&wallet.address, b"payload", &signature));
    assert!(!wallet::verify(&wallet.address, b"other payload", &signature));
    assert!(!wallet::verify("not hex", b"payload", &signature));
    assert!(!wallet::verify(&wallet.address, b"payload", "zz"));
    assert!(!wallet::verify(GENESIS_SENDER, b"payload", &signature));
}

#[test]
fn test_genesis_transaction() {
    let wallet = Wallet::from_passphrase("test-0").unwrap();
    let genesis = Transaction::genesis(&wallet.address, 300);

    assert_eq!(genesis.sender_address, GENESIS_SENDER);
    assert!(genesis.transaction_inputs.is_empty());
    assert_eq!(genesis.transaction_outputs.len(), 1);
    assert_eq!(genesis.transaction_outputs[0].amount, 300);
    assert_eq!(genesis.transaction_outputs[0].receiver_address, wallet.address);
    assert_eq!(
        genesis.transaction_outputs[0].transaction_id,
        genesis.transaction_id
    );
}

#[test]
fn test_block_hash_ignores_timestamp() {
    let mut block = Block::new(1, "abc".to_string());
    let hash_before = block.calculate_hash();
    block.timestamp += 60_000;
    assert_eq!(block.calculate_hash(), hash_before);

    block.nonce += 1;
    assert_ne!(block.calculate_hash(), hash_before);
    assert_eq!(block.hash_with_nonce(block.nonce - 1), hash_before);
}

#[test]
fn test_genesis_block() {
    let wallet = Wallet::from_passphrase("test-0").unwrap();
    let block = Block::genesis(Transaction::genesis(&wallet.address, 100));

    assert!(block.is_genesis());
    assert_eq!(block.previous_hash, GENESIS_PREVIOUS_HASH);
    assert_eq!(block.nonce, 0);
    assert_eq!(block.transactions.len(), 1);
    assert_eq!(block.current_hash, block.calculate_hash());
}

#[test]
fn test_meets_difficulty() {
    assert!(meets_difficulty("00abc", 2));
    assert!(!meets_difficulty("0abc", 2));
    assert!(meets_difficulty("abc", 0));
    assert!(!meets_difficulty("0", 2));

    // 相同的值总是得到相同的哈希
    assert_eq!(hash(&("a", 1)), hash(&("a", 1)));
    assert_eq!(hash(&("a", 1)).len(), 64);
}
