//! End-to-end protocol behaviour against a live service.

use std::time::Duration;

use haltd_core::ipc::{ClientOptions, IpcClient, Response};
use haltd_test_utils::TestService;
use pretty_assertions::assert_eq;

#[test_log::test(tokio::test)]
async fn test_command_table() {
    let service = TestService::start().await;
    let client = service.client();

    let cases = [
        ("PING", "PONG"),
        ("ping", "PONG"),
        ("  Ping  ", "PONG"),
        ("DRYRUN", "OK dryrun"),
        ("dryrun", "OK dryrun"),
        ("REBOOT", "ERR unknown"),
        ("", "ERR unknown"),
        ("PING extra", "ERR unknown"),
    ];
    for (command, expected) in cases {
        assert_eq!(client.send(command).await.unwrap(), expected, "{command:?}");
    }

    assert_eq!(service.halt_invocations(), 0);
}

#[tokio::test]
async fn test_repeated_ping_is_idempotent() {
    let service = TestService::start().await;
    let client = service.client();

    for _ in 0..20 {
        assert_eq!(client.send("PING").await.unwrap(), "PONG");
    }
}

#[tokio::test]
async fn test_dry_run_disabled_keeps_protocol_shape() {
    let service =
        TestService::start_with(TestService::fast_options().with_allow_dry_run(false)).await;
    let client = service.client();

    let response = client.send("DRYRUN").await.unwrap();
    assert_eq!(response, "ERR dryrun-disabled");
    assert_eq!(Response::from_line(&response), Some(Response::DryRunDisabled));
    assert_eq!(client.send("PING").await.unwrap(), "PONG");
    assert_eq!(service.halt_invocations(), 0);
}

#[tokio::test]
async fn test_concurrent_pings_are_all_answered() {
    let service = TestService::start().await;
    let options = service
        .client_options()
        .with_timeout(Duration::from_secs(5))
        .with_max_retries(5)
        .with_initial_backoff(Duration::from_millis(20));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let client = IpcClient::new(options.clone());
            tokio::spawn(async move { client.send("PING").await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "PONG");
    }
}

#[tokio::test]
async fn test_service_recovers_after_bad_input() {
    let service = TestService::start().await;
    let client = service.client();

    assert_eq!(client.send("GARBAGE").await.unwrap(), "ERR unknown");
    assert_eq!(client.send("PING").await.unwrap(), "PONG");
}

#[tokio::test]
async fn test_client_options_reach_the_same_channel() {
    let service = TestService::start().await;
    let client = IpcClient::new(ClientOptions::new(service.channel_name()));
    assert_eq!(client.path(), service.client().path());
    assert_eq!(client.send("PING").await.unwrap(), "PONG");
}

#[tokio::test]
async fn test_stop_ends_the_loop_cleanly() {
    let service = TestService::start().await;
    let client = service.client();
    assert!(service.stop().await.is_ok());

    let err = client.send("PING").await.unwrap_err();
    assert!(err.is_transient(), "{err}");
}
