//! # 节点程序入口
//!
//! 读取配置，初始化日志和钱包，启动TCP服务；普通节点随后向引导节点注册。

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use ringcoin::config::Config;
use ringcoin::network::{self, TcpTransport};
use ringcoin::node::Node;
use ringcoin::wallet::Wallet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    info!(
        "启动节点 {}，难度 {}，区块容量 {}，环大小 {}",
        config.node_index, config.difficulty, config.block_capacity, config.num_of_nodes
    );

    let wallet = match &config.passphrase {
        Some(passphrase) => {
            Wallet::from_passphrase(passphrase).context("failed to derive wallet from passphrase")?
        }
        None => Wallet::new(),
    };

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to listen on port {}", config.port))?;

    let node = Node::new(config, wallet, Arc::new(TcpTransport::default()))?;
    info!("钱包地址: {}", node.address());
    let server = tokio::spawn(network::serve(node.clone(), listener));

    node.start().await.context("failed to join the ring")?;

    server.await??;
    Ok(())
}
