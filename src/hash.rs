//! # 哈希工具
//!
//! 对任意可序列化对象计算确定性的SHA-256哈希：先序列化为JSON，再取摘要的16进制编码。
//! 字段顺序由结构体定义决定，因此相同的字段值总是得到相同的摘要。

use serde::Serialize;
use sha2::{Digest, Sha256};

/// 计算对象的哈希值
///
/// # 参数
///
/// * `value` - 任意实现了`Serialize`的对象
///
/// # 返回值
///
/// 返回64个字符的16进制摘要
pub fn hash<T: Serialize + ?Sized>(value: &T) -> String {
    // 只用于由字符串和整数构成的结构体，序列化不会失败
    let serialized = serde_json::to_vec(value).expect("hash payloads are plain serializable structs");
    hash_bytes(&serialized)
}

/// 对原始字节计算SHA-256摘要
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// 检查16进制哈希是否满足难度要求，即前`difficulty`个字符都是'0'
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    if difficulty == 0 {
        return true;
    }
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
