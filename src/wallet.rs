//! # 钱包模块
//!
//! 每个节点持有一个secp256k1密钥对。公钥的16进制编码同时是节点在账本中的地址，
//! 也是节点在环中的身份标识。

use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::Result;

pub struct Wallet {
    pub private_key: SecretKey,
    pub public_key: PublicKey,
    pub address: String,
}

impl Wallet {
    /// 生成随机密钥对
    pub fn new() -> Self {
        let secp = Secp256k1::new();
        let mut rng = rand::thread_rng();
        let (private_key, public_key) = secp.generate_keypair(&mut rng);
        Self::from_keys(private_key, public_key)
    }

    /// 由节点自己的口令派生密钥对
    ///
    /// 同一口令总是得到同一个地址，节点重启后重新加入环时仍然拥有原来的资金。
    /// 口令是唯一的密钥来源，每个节点必须使用不同且保密的口令。
    ///
    /// # 参数
    ///
    /// * `passphrase` - 本节点的私有口令，不能为空
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(secp256k1::Error::InvalidSecretKey.into());
        }
        let seed = Sha256::digest(passphrase.as_bytes());
        let private_key = SecretKey::from_slice(&seed)?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::new(), &private_key);
        Ok(Self::from_keys(private_key, public_key))
    }

    fn from_keys(private_key: SecretKey, public_key: PublicKey) -> Self {
        Wallet {
            private_key,
            public_key,
            address: public_key_to_address(&public_key),
        }
    }

    /// 对任意载荷签名，返回紧凑格式签名的16进制编码
    ///
    /// ECDSA签名采用RFC 6979确定性随机数，相同载荷总是得到相同签名
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        let message = payload_message(payload)?;
        let signature = Secp256k1::signing_only().sign_ecdsa(&message, &self.private_key);
        Ok(hex::encode(signature.serialize_compact()))
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

pub fn public_key_to_address(public_key: &PublicKey) -> String {
    hex::encode(public_key.serialize())
}

/// 用地址（公钥）验证签名。任何解析错误都视为验证失败
pub fn verify(address: &str, payload: &[u8], signature: &str) -> bool {
    let (Some((public_key, signature)), Ok(message)) =
        (parse_key_and_signature(address, signature), payload_message(payload))
    else {
        return false;
    };

    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &public_key)
        .is_ok()
}

fn parse_key_and_signature(address: &str, signature: &str) -> Option<(PublicKey, Signature)> {
    let public_key = PublicKey::from_slice(&hex::decode(address).ok()?).ok()?;
    let signature = Signature::from_compact(&hex::decode(signature).ok()?).ok()?;
    Some((public_key, signature))
}

fn payload_message(payload: &[u8]) -> Result<Message> {
    let digest = Sha256::digest(payload);
    Ok(Message::from_slice(&digest)?)
}
