//! # 网络模块
//!
//! 实现环内节点之间的请求/响应通信。
//!
//! * `Request`/`Response` - 节点之间传递的消息，与外部HTTP层的路由一一对应
//! * `Transport` - 向单个节点发送请求的抽象
//! * `TcpTransport`/`serve` - 基于TCP的实现：每个连接一个请求，消息为一行JSON
//! * `LocalTransport` - 同一进程内的多个节点之间的实现，用于模拟和测试
//! * `broadcast` - 并行向所有节点发送请求，任何一个失败都使整个广播失败

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::block::Block;
use crate::error::{NodeError, Result};
use crate::node::{LatestTransaction, Node, NodeBalance, NodeSnapshot};
use crate::ring::RingNode;
use crate::transaction::Transaction;

/// 等待节点响应的超时时间
pub const PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// 节点之间的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    Healthcheck,
    /// 新节点向引导节点注册
    InsertNode { node: RingNode },
    GetRing,
    SetRing { ring: Vec<RingNode> },
    /// 读取完整的节点状态
    GetState,
    /// 整体替换节点状态
    SetState { state: NodeSnapshot },
    /// 其他节点挖出的区块及其状态校验和
    PostBlock { block: Block, checksum: String },
    GetTransactions,
    /// 本地发起一笔转账
    #[serde(rename_all = "camelCase")]
    PostTransaction { recipient_index: usize, amount: u64 },
    /// 转发其他节点发起的交易
    PutTransaction { transaction: Transaction },
    GetBalance,
    GetBalances,
}

/// 节点之间的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Ok,
    #[serde(rename_all = "camelCase")]
    Healthy { node_index: usize },
    Ring { ring: Vec<RingNode> },
    State { state: NodeSnapshot },
    Transaction { transaction: Transaction },
    Transactions { transactions: Vec<LatestTransaction> },
    Balance { balance: u64 },
    Balances { balances: Vec<NodeBalance> },
    Error { message: String, code: u16 },
}

impl From<NodeError> for Response {
    fn from(error: NodeError) -> Self {
        Response::Error {
            message: error.to_string(),
            code: error.status_code(),
        }
    }
}

impl Response {
    /// 把错误响应转换为`NodeError::Remote`
    pub fn into_result(self) -> Result<Response> {
        match self {
            Response::Error { message, code } => Err(NodeError::Remote { message, code }),
            response => Ok(response),
        }
    }
}

/// 向环中的单个节点发送请求
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer: &RingNode, request: Request) -> Result<Response>;
}

/// 并行向所有节点发送同一个请求并等待全部完成
///
/// # 返回值
///
/// 全部成功时按节点顺序返回响应；否则返回按节点顺序遇到的第一个错误
pub async fn broadcast(
    transport: &dyn Transport,
    peers: &[RingNode],
    request: &Request,
) -> Result<Vec<(RingNode, Response)>> {
    let requests = peers.iter().map(|peer| {
        let request = request.clone();
        async move {
            let response = transport.send(peer, request).await;
            if let Err(e) = &response {
                warn!("向节点 {} ({}) 发送请求失败: {}", peer.index, peer.address(), e);
            }
            response.map(|response| (peer.clone(), response))
        }
    });

    join_all(requests).await.into_iter().collect()
}

fn io_error(error: std::io::Error) -> NodeError {
    NodeError::Transport(error.to_string())
}

/// 基于TCP的传输实现
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        TcpTransport { timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(PEER_TIMEOUT)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, peer: &RingNode, request: Request) -> Result<Response> {
        let address = peer.address();
        let exchange = async {
            let mut stream = TcpStream::connect(&address).await.map_err(io_error)?;
            write_message(&mut stream, &request).await?;
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            if reader.read_line(&mut line).await.map_err(io_error)? == 0 {
                return Err(NodeError::Transport(format!(
                    "{} closed the connection without a response",
                    address
                )));
            }
            Ok::<_, NodeError>(serde_json::from_str::<Response>(&line)?)
        };

        timeout(self.timeout, exchange)
            .await
            .map_err(|_| NodeError::Transport(format!("request to {} timed out", address)))??
            .into_result()
    }
}

async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

/// 接受连接并把每个请求交给节点处理，直到监听出错
pub async fn serve(node: Arc<Node>, listener: TcpListener) -> Result<()> {
    info!(
        "节点 {} 正在监听地址: {}",
        node.info().index,
        listener.local_addr().map_err(io_error)?
    );

    loop {
        let (stream, remote) = listener.accept().await.map_err(io_error)?;
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(node, stream).await {
                warn!("处理来自 {} 的连接失败: {}", remote, e);
            }
        });
    }
}

async fn handle_connection(node: Arc<Node>, stream: TcpStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    if reader.read_line(&mut line).await.map_err(io_error)? == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<Request>(&line) {
        Ok(request) => {
            debug!("收到请求: {:?}", request);
            node.handle(request).await
        }
        Err(e) => Response::from(NodeError::from(e)),
    };
    write_message(&mut writer, &response).await
}

/// 进程内传输：按`host:port`把请求路由给已注册的节点
///
/// 请求和响应都经过一次JSON编解码，节点之间不共享任何状态
#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<String, Weak<Node>>>,
}

impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, node: &Arc<Node>) {
        self.nodes
            .write()
            .await
            .insert(node.info().address(), Arc::downgrade(node));
    }

    /// 移除节点，之后发往它的请求都会失败
    pub async fn unregister(&self, address: &str) {
        self.nodes.write().await.remove(address);
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, peer: &RingNode, request: Request) -> Result<Response> {
        let address = peer.address();
        let node = self
            .nodes
            .read()
            .await
            .get(&address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NodeError::Transport(format!("no node listening on {}", address)))?;

        let request: Request = serde_json::from_slice(&serde_json::to_vec(&request)?)?;
        let response = node.handle(request).await;
        let response: Response = serde_json::from_slice(&serde_json::to_vec(&response)?)?;
        response.into_result()
    }
}
