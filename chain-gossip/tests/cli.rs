//! Startup failures of the `chain-gossip` binary.

use std::{net::TcpListener, process::Output};

use anyhow::Result;
use assert_cmd::Command;
use chain_gossip::transport::PeerId;

fn run(args: &[&str]) -> Result<Output> {
    let output = Command::cargo_bin("chain-gossip")?
        .args(args)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .output()?;
    Ok(output)
}

fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn assert_fails_with(output: &Output, needle: &str) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "expected failure, stderr: {stderr}");
    assert!(
        stderr.contains(needle),
        "expected '{needle}' in diagnostic, got: {stderr}"
    );
}

#[test]
fn missing_listen_port_is_fatal() -> Result<()> {
    let output = run(&[])?;
    assert_fails_with(&output, "--listen");
    Ok(())
}

#[test]
fn zero_listen_port_is_fatal() -> Result<()> {
    let output = run(&["-l", "0"])?;
    assert_fails_with(&output, "--listen");
    Ok(())
}

#[test]
fn malformed_peer_address_is_fatal() -> Result<()> {
    let output = run(&["-l", "4001", "-d", "127.0.0.1:4000"])?;
    assert_fails_with(&output, "malformed peer address");
    Ok(())
}

#[test]
fn undecodable_peer_id_is_fatal() -> Result<()> {
    let output = run(&["-l", "4001", "-d", "/ip4/127.0.0.1/tcp/4000/p2p/not-hex"])?;
    assert_fails_with(&output, "undecodable peer id");
    Ok(())
}

#[test]
fn unreachable_peer_is_fatal() -> Result<()> {
    let listen = free_port()?.to_string();
    let target = format!(
        "/ip4/127.0.0.1/tcp/{}/p2p/{}",
        free_port()?,
        PeerId::from_seed(1)
    );
    let output = run(&["-l", &listen, "-d", &target])?;
    assert_fails_with(&output, "failed to open stream");
    Ok(())
}
