//! # 交易模块
//!
//! 定义交易、交易输入和交易输出。
//!
//! 交易在创建时只包含发送方、接收方、金额和时间戳，交易ID由这四个字段确定性地计算得到。
//! 输入和输出列表在交易被账本验证时才会填充，签名也不覆盖它们。

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash::hash;
use crate::wallet::{self, Wallet};

/// 创世交易的发送方地址，不对应任何密钥
pub const GENESIS_SENDER: &str = "0";

/// 交易输出，表示分配给某个地址的一笔可花费金额
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutput {
    /// 输出ID，由交易ID、接收方和金额计算得到
    pub output_id: String,
    /// 产生该输出的交易ID
    pub transaction_id: String,
    /// 接收方地址
    pub receiver_address: String,
    /// 输出金额
    pub amount: u64,
}

/// 交易输入，引用一个被消费的输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    /// 被消费输出的ID
    pub previous_output_id: String,
    /// 被消费输出的金额
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    pub sender_address: String,
    pub receiver_address: String,
    pub amount: u64,
    /// Unix毫秒时间戳
    pub timestamp: i64,
    pub signature: Option<String>,
    pub transaction_inputs: Vec<TransactionInput>,
    pub transaction_outputs: Vec<TransactionOutput>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionIdFields<'a> {
    sender_address: &'a str,
    receiver_address: &'a str,
    amount: u64,
    timestamp: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputIdFields<'a> {
    transaction_id: &'a str,
    receiver_address: &'a str,
    amount: u64,
}

/// 签名覆盖的字段
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedFields<'a> {
    transaction_id: &'a str,
    sender_address: &'a str,
    receiver_address: &'a str,
    amount: u64,
}

impl TransactionOutput {
    pub fn new(transaction_id: &str, receiver_address: &str, amount: u64) -> Self {
        let output_id = hash(&OutputIdFields {
            transaction_id,
            receiver_address,
            amount,
        });
        TransactionOutput {
            output_id,
            transaction_id: transaction_id.to_string(),
            receiver_address: receiver_address.to_string(),
            amount,
        }
    }
}

impl Transaction {
    /// 创建新的交易
    ///
    /// # 参数
    ///
    /// * `sender_address` - 发送方地址
    /// * `receiver_address` - 接收方地址
    /// * `amount` - 转账金额
    /// * `timestamp` - 可选的Unix毫秒时间戳，缺省时取当前时间
    ///
    /// # 返回值
    ///
    /// 返回未签名、输入输出为空的交易
    pub fn new(
        sender_address: &str,
        receiver_address: &str,
        amount: u64,
        timestamp: Option<i64>,
    ) -> Self {
        let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
        let mut transaction = Transaction {
            transaction_id: String::new(),
            sender_address: sender_address.to_string(),
            receiver_address: receiver_address.to_string(),
            amount,
            timestamp,
            signature: None,
            transaction_inputs: Vec::new(),
            transaction_outputs: Vec::new(),
        };
        transaction.transaction_id = transaction.compute_id();
        transaction
    }

    /// 创世交易：没有输入，唯一的输出把全部初始资金分配给引导节点
    pub fn genesis(receiver_address: &str, amount: u64) -> Self {
        let mut transaction = Transaction::new(GENESIS_SENDER, receiver_address, amount, None);
        transaction.transaction_outputs =
            vec![TransactionOutput::new(&transaction.transaction_id, receiver_address, amount)];
        transaction
    }

    /// 由发送方、接收方、金额和时间戳重新计算交易ID
    pub fn compute_id(&self) -> String {
        hash(&TransactionIdFields {
            sender_address: &self.sender_address,
            receiver_address: &self.receiver_address,
            amount: self.amount,
            timestamp: self.timestamp,
        })
    }

    fn signed_digest(&self) -> String {
        hash(&SignedFields {
            transaction_id: &self.transaction_id,
            sender_address: &self.sender_address,
            receiver_address: &self.receiver_address,
            amount: self.amount,
        })
    }

    /// 用钱包私钥对交易签名，签名保存在`signature`字段中
    pub fn sign(&mut self, wallet: &Wallet) -> Result<()> {
        self.signature = Some(wallet.sign(self.signed_digest().as_bytes())?);
        Ok(())
    }

    /// 验证签名。没有签名或验证失败都返回false
    pub fn verify_signature(&self) -> bool {
        match &self.signature {
            Some(signature) => wallet::verify(
                &self.sender_address,
                self.signed_digest().as_bytes(),
                signature,
            ),
            None => false,
        }
    }

    pub fn involves(&self, address: &str) -> bool {
        self.sender_address == address || self.receiver_address == address
    }
}
