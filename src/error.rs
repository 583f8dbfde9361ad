//! # 错误模块
//!
//! 节点的错误分类。每种错误都带有可直接交给外部HTTP层使用的数字状态码。
//!
//! 错误分为三类：
//!
//! * 交易级错误（签名无效、无资金、资金不足），作为被拒绝的请求返回给客户端
//! * 请求级错误（环已满、收款人不存在、给自己转账等）
//! * 共识完整性错误（哈希错误、前驱哈希错误、链无效、校验和不一致），
//!   这类错误从不直接返回给客户端，而是触发冲突解决

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Transaction signature is invalid")]
    InvalidSignature,

    #[error("Sender has no unspent outputs")]
    NoFunds,

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },

    #[error("Ring is full ({capacity} nodes)")]
    RingFull { capacity: usize },

    #[error("Ring index {index} is out of range [0, {capacity})")]
    RingIndexOutOfRange { index: usize, capacity: usize },

    #[error("No ring node with index {0}")]
    RecipientNotFound(usize),

    #[error("Cannot transfer funds to yourself")]
    SelfTransfer,

    #[error("Only the bootstrap node can perform this operation")]
    NotBootstrap,

    #[error("Block {index} has an invalid hash")]
    BadHash { index: u64 },

    #[error("Block {index} has an invalid previous hash")]
    BadPreviousHash { index: u64 },

    #[error("Chain is invalid: {0}")]
    ChainInvalid(String),

    #[error("State checksum mismatch")]
    ChecksumMismatch,

    #[error("Blockchain has not been initialized")]
    ChainUninitialized,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Peer responded with error {code}: {message}")]
    Remote { message: String, code: u16 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] secp256k1::Error),
}

impl NodeError {
    /// 返回外部HTTP层可直接使用的状态码
    pub fn status_code(&self) -> u16 {
        match self {
            NodeError::InvalidSignature
            | NodeError::NoFunds
            | NodeError::InsufficientFunds { .. }
            | NodeError::SelfTransfer
            | NodeError::RingIndexOutOfRange { .. } => 400,
            NodeError::RingFull { .. } | NodeError::NotBootstrap => 403,
            NodeError::RecipientNotFound(_) => 404,
            NodeError::BadHash { .. }
            | NodeError::BadPreviousHash { .. }
            | NodeError::ChainInvalid(_)
            | NodeError::ChecksumMismatch => 409,
            NodeError::Transport(_) => 502,
            NodeError::ChainUninitialized => 503,
            NodeError::Remote { code, .. } => *code,
            NodeError::Serialization(_) | NodeError::Crypto(_) => 500,
        }
    }

    /// 是否为共识完整性错误。这类错误说明本地状态可疑，应当与环同步而不是直接拒绝
    pub fn is_consensus(&self) -> bool {
        matches!(
            self,
            NodeError::BadHash { .. }
                | NodeError::BadPreviousHash { .. }
                | NodeError::ChainInvalid(_)
                | NodeError::ChecksumMismatch
                | NodeError::ChainUninitialized
        )
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
