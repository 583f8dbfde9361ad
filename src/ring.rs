//! # 环模块
//!
//! 环是参与记账的固定成员集合。每个成员有一个在生命周期内不变的索引，
//! 环的长度不会超过配置的节点数量。

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};

/// 环中的一个节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingNode {
    pub index: usize,
    pub url: String,
    pub port: u16,
    /// 节点公钥，同时是它在账本中的地址
    pub public_key: String,
}

impl RingNode {
    /// 用于建立连接的`host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.url, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct Ring {
    capacity: usize,
    nodes: Vec<RingNode>,
}

/// 节点加入环的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// 新成员
    Joined,
    /// 已有索引的节点重新注册
    Rejoined,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Ring {
            capacity,
            nodes: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn nodes(&self) -> &[RingNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 插入节点并按索引排序
    ///
    /// 已存在的索引会被替换（节点重启后重新注册），不占用新的容量
    pub fn insert(&mut self, node: RingNode) -> Result<Membership> {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.index == node.index) {
            *existing = node;
            return Ok(Membership::Rejoined);
        }

        if self.nodes.len() >= self.capacity {
            return Err(NodeError::RingFull {
                capacity: self.capacity,
            });
        }

        if node.index >= self.capacity {
            return Err(NodeError::RingIndexOutOfRange {
                index: node.index,
                capacity: self.capacity,
            });
        }

        self.nodes.push(node);
        self.nodes.sort_by_key(|n| n.index);
        Ok(Membership::Joined)
    }

    /// 整体替换成员列表，超出容量的部分被丢弃
    pub fn replace(&mut self, mut nodes: Vec<RingNode>) {
        nodes.sort_by_key(|n| n.index);
        nodes.dedup_by_key(|n| n.index);
        nodes.truncate(self.capacity);
        self.nodes = nodes;
    }

    pub fn get(&self, index: usize) -> Option<&RingNode> {
        self.nodes.iter().find(|n| n.index == index)
    }

    pub fn find_by_key(&self, public_key: &str) -> Option<&RingNode> {
        self.nodes.iter().find(|n| n.public_key == public_key)
    }

    /// 除`own_index`以外的所有成员
    pub fn peers(&self, own_index: usize) -> Vec<RingNode> {
        self.nodes
            .iter()
            .filter(|n| n.index != own_index)
            .cloned()
            .collect()
    }
}
