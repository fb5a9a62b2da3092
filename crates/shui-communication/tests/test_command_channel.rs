//! Tests for communication::channel against a scripted printer

mod common;

use common::MockPrinter;
use futures_util::future::join_all;
use shui_communication::{Command, CommandSource};
use shui_core::{CommandError, ConnectionState};
use std::time::Duration;

#[tokio::test]
async fn test_command_before_connect_fails_fast() {
    let printer = MockPrinter::start().await;
    let (channel, shutdown) = printer.channel(Duration::from_secs(1));

    let err = channel
        .send_line("M117 hello", CommandSource::UserTerminal)
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::NotConnected);
    assert!(printer.received().is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn test_banner_is_not_attributed_to_first_command() {
    let printer = MockPrinter::start().await;
    let (channel, shutdown) = printer.channel(Duration::from_secs(1));

    channel.ensure_connected().await.unwrap();
    assert_eq!(channel.connection_state(), ConnectionState::Connected);

    let response = channel
        .send_line("M117 first", CommandSource::UserTerminal)
        .await
        .unwrap();
    assert_eq!(response.lines, vec!["echo:M117 first", "ok"]);
    shutdown.cancel();
}

#[tokio::test]
async fn test_fifo_order_without_overlap() {
    let printer = MockPrinter::start().await;
    printer.set_delay("M117", Duration::from_millis(20));
    let (channel, shutdown) = printer.channel(Duration::from_secs(2));
    channel.ensure_connected().await.unwrap();

    let lines: Vec<String> = (0..10).map(|i| format!("M117 {}", i)).collect();
    let results = join_all(
        lines
            .iter()
            .map(|line| channel.send_line(line, CommandSource::UserTerminal)),
    )
    .await;

    for (line, result) in lines.iter().zip(results) {
        let response = result.unwrap();
        assert_eq!(response.lines[0], format!("echo:{}", line));
    }
    assert_eq!(printer.received(), lines);
    assert_eq!(printer.overlaps(), 0);
    shutdown.cancel();
}

#[tokio::test]
async fn test_concurrent_submitters_are_serialized() {
    let printer = MockPrinter::start().await;
    printer.set_delay("M117", Duration::from_millis(5));
    let (channel, shutdown) = printer.channel(Duration::from_secs(2));
    channel.ensure_connected().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            let line = format!("M117 task {}", i);
            let response = channel
                .send_line(&line, CommandSource::UserTerminal)
                .await
                .unwrap();
            assert_eq!(response.lines[0], format!("echo:{}", line));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(printer.received().len(), 8);
    assert_eq!(printer.overlaps(), 0);
    shutdown.cancel();
}

#[tokio::test]
async fn test_timeout_frees_the_queue() {
    let printer = MockPrinter::start().await;
    let (channel, shutdown) = printer.channel(Duration::from_millis(200));
    channel.ensure_connected().await.unwrap();

    let started = tokio::time::Instant::now();
    let err = channel
        .send_line("HANG", CommandSource::UserTerminal)
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::Timeout { timeout_ms: 200 });
    assert!(started.elapsed() >= Duration::from_millis(200));

    let response = channel
        .send_line("M117 after", CommandSource::UserTerminal)
        .await
        .unwrap();
    assert_eq!(response.lines[0], "echo:M117 after");
    assert_eq!(channel.connection_state(), ConnectionState::Connected);
    shutdown.cancel();
}

#[tokio::test]
async fn test_per_command_timeout_override() {
    let printer = MockPrinter::start().await;
    printer.set_delay("G4", Duration::from_millis(300));
    let (channel, shutdown) = printer.channel(Duration::from_millis(100));
    channel.ensure_connected().await.unwrap();

    let command = Command::new("G4 S0", CommandSource::JobControl)
        .with_timeout(Duration::from_secs(2));
    let response = channel.submit(command).await.unwrap();
    assert_eq!(response.lines[0], "echo:G4 S0");
    shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_fails_pending_commands() {
    let printer = MockPrinter::start().await;
    printer.set_delay("M117", Duration::from_millis(300));
    let (channel, shutdown) = printer.channel(Duration::from_secs(2));
    channel.ensure_connected().await.unwrap();

    let first = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.send_line("M117 a", CommandSource::UserTerminal).await })
    };
    let second = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.send_line("M117 b", CommandSource::UserTerminal).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    assert_eq!(first.await.unwrap().unwrap_err(), CommandError::ShuttingDown);
    assert_eq!(second.await.unwrap().unwrap_err(), CommandError::ShuttingDown);
    assert_eq!(
        channel
            .send_line("M117 c", CommandSource::UserTerminal)
            .await
            .unwrap_err(),
        CommandError::ShuttingDown
    );

    let mut state = channel.watch_connection();
    let closed = tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_dropped_socket_faults_and_reconnects() {
    let printer = MockPrinter::start().await;
    let (channel, shutdown) = printer.channel(Duration::from_secs(1));
    channel.ensure_connected().await.unwrap();

    printer.set_online(false);
    let err = channel
        .send_line("M117 lost", CommandSource::UserTerminal)
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Io { .. }));
    assert!(matches!(
        channel.connection_state(),
        ConnectionState::Faulted(_)
    ));

    assert_eq!(
        channel
            .send_line("M117 queued", CommandSource::UserTerminal)
            .await
            .unwrap_err(),
        CommandError::NotConnected
    );
    assert_eq!(
        channel.ensure_connected().await.unwrap_err(),
        CommandError::NotConnected
    );

    printer.set_online(true);
    channel.ensure_connected().await.unwrap();
    let response = channel
        .send_line("M117 back", CommandSource::UserTerminal)
        .await
        .unwrap();
    assert_eq!(response.lines[0], "echo:M117 back");
    assert!(printer.connections() >= 3);
    shutdown.cancel();
}
