//! Readiness poller timing tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stackpilot::deploy::readiness::{wait_until_ready, PollOptions};
use stackpilot::errors::StackError;
use stackpilot::models::resource::ResourceStatus;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_ready_on_third_check() {
    let started = Instant::now();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = calls.clone();

    let options = PollOptions::new(Duration::from_secs(120), Duration::from_secs(5));
    let attempts = wait_until_ready(
        "vectordb-abc",
        move || {
            let recorder = recorder.clone();
            async move {
                let mut calls = recorder.lock().unwrap();
                calls.push(started.elapsed());
                if calls.len() < 3 {
                    Ok(ResourceStatus::Pending)
                } else {
                    Ok(ResourceStatus::Ready)
                }
            }
        },
        options,
    )
    .await
    .unwrap();

    assert_eq!(attempts, 3);
    assert_eq!(
        *calls.lock().unwrap(),
        vec![Duration::ZERO, Duration::from_secs(5), Duration::from_secs(10)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_never_ready_times_out_after_budget() {
    let started = Instant::now();
    let options = PollOptions::new(Duration::from_secs(600), Duration::from_secs(10));

    let err = wait_until_ready("gpu-abc", || async { Ok(ResourceStatus::NotFound) }, options)
        .await
        .unwrap_err();

    match err {
        StackError::ReadinessTimeout { resource, waited, .. } => {
            assert_eq!(resource, "gpu-abc");
            assert!(waited >= options.timeout);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(started.elapsed() >= options.timeout);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_are_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let options = PollOptions::new(Duration::from_secs(60), Duration::from_secs(5));

    let attempts = wait_until_ready(
        "rag-abc",
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StackError::ProvisioningError("connection refused".to_string()))
                } else {
                    Ok(ResourceStatus::Ready)
                }
            }
        },
        options,
    )
    .await
    .unwrap();

    assert_eq!(attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_carries_last_transport_error() {
    let options = PollOptions::new(Duration::from_secs(20), Duration::from_secs(5));
    let err = wait_until_ready(
        "chat-abc",
        || async { Err(StackError::ProvisioningError("connection refused".to_string())) },
        options,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_check_is_bounded_by_budget() {
    let started = Instant::now();
    let options = PollOptions::new(Duration::from_secs(30), Duration::from_secs(5));

    let err = wait_until_ready(
        "llm-abc",
        || async {
            std::future::pending::<()>().await;
            Ok(ResourceStatus::Ready)
        },
        options,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, StackError::ReadinessTimeout { .. }));
    assert_eq!(started.elapsed(), Duration::from_secs(30));
}
