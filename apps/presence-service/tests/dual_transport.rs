use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;
use presence_proto::ping::v1::{LastUserPingRequest, ping_service_client::PingServiceClient};
use presence_service::{build_orchestrator, config::Config};

fn free_port() -> Result<u16> {
    let listener = StdTcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn dev_config(http_port: u16, rpc_port: u16) -> Result<Config> {
    let http_port = http_port.to_string();
    let rpc_port = rpc_port.to_string();
    let values = HashMap::from([
        ("BIND_HOST", "127.0.0.1"),
        ("HTTP_PORT", http_port.as_str()),
        ("GRPC_PORT", rpc_port.as_str()),
        ("DEVELOPMENT", "true"),
    ]);
    Ok(Config::from_lookup(|key| {
        values.get(key).map(ToString::to_string)
    })?)
}

async fn wait_for_http(client: &reqwest::Client, addr: SocketAddr) -> Result<()> {
    for _ in 0..100 {
        if let Ok(response) = client.get(format!("http://{addr}/health")).send().await {
            if response.status().is_success() {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Err(anyhow!("http transport never became ready on {addr}"))
}

#[tokio::test]
async fn http_writes_are_visible_over_rpc() -> Result<()> {
    let config = dev_config(free_port()?, free_port()?)?;
    let http_addr = config.http_addr();
    let rpc_addr = config.rpc_addr();

    let mut orchestrator = build_orchestrator(config).await?;
    let running = tokio::spawn(async move { orchestrator.start().await });

    let http = reqwest::Client::new();
    wait_for_http(&http, http_addr).await?;

    let unauthenticated = http.get(format!("http://{http_addr}/ping")).send().await?;
    assert_eq!(unauthenticated.status(), reqwest::StatusCode::UNAUTHORIZED);

    let before = Utc::now().timestamp();
    let response = http
        .get(format!("http://{http_addr}/ping"))
        .header("X-User-Subject", "user-42")
        .header("X-User-Access-Token", "any-token")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.bytes().await?.is_empty());
    let after = Utc::now().timestamp();

    let mut rpc = PingServiceClient::connect(format!("http://{rpc_addr}")).await?;
    let reply = rpc
        .ping(LastUserPingRequest {
            user_id: "user-42".to_string(),
        })
        .await?
        .into_inner();
    assert_eq!(reply.user_id, "user-42");
    assert!(reply.last_ping >= before && reply.last_ping <= after);
    assert_eq!(reply.status, None);

    let unknown = rpc
        .ping(LastUserPingRequest {
            user_id: "never-seen".to_string(),
        })
        .await?
        .into_inner();
    assert_eq!(unknown.last_ping, 0);
    assert_eq!(unknown.status, None);

    assert!(!running.is_finished());
    running.abort();
    Ok(())
}

#[test]
fn health_subcommand_exits_successfully() -> Result<()> {
    let status = Command::new(env!("CARGO_BIN_EXE_presence-service"))
        .arg("health")
        .env("RUST_LOG", "error")
        .status()?;
    assert!(status.success());
    Ok(())
}

#[test]
fn serve_exits_with_failure_when_a_port_is_taken() -> Result<()> {
    let occupied = StdTcpListener::bind("127.0.0.1:0")?;
    let port = occupied.local_addr()?.port();

    let output = Command::new(env!("CARGO_BIN_EXE_presence-service"))
        .arg("serve")
        .env("BIND_HOST", "127.0.0.1")
        .env("HTTP_PORT", port.to_string())
        .env("GRPC_PORT", "0")
        .env("DEVELOPMENT", "true")
        .env_remove("STORE_URL")
        .env_remove("DATABASE_URL")
        .env("RUST_LOG", "error")
        .output()?;

    assert!(!output.status.success());
    drop(occupied);
    Ok(())
}
