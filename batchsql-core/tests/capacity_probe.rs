use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::http::{StatusCode, header};
use axum::routing::post;
use batchsql_core::{
    BatchConfig, CapacityConfig, CapacityProbe, CapacityRefresher, FixedCapacity, HostAdmission,
    HttpCapacityProbe,
};
use tokio::net::TcpListener;

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Capacity endpoint answering every `POST /load/{host}` with `status` and
/// `body` after `delay`.
async fn capacity_endpoint(status: StatusCode, body: &'static str, delay: Duration) -> SocketAddr {
    let app = Router::new().route(
        "/load/{host}",
        post(move || async move {
            tokio::time::sleep(delay).await;
            (status, [(header::CONTENT_TYPE, "application/json")], body)
        }),
    );
    serve(app).await
}

fn probe_for(addr: SocketAddr, timeout_ms: u64) -> HttpCapacityProbe {
    HttpCapacityProbe::new(CapacityConfig {
        enabled: true,
        endpoint_template: format!("http://{addr}/load/{{host}}"),
        timeout_ms,
        ..CapacityConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn reports_available_cores() {
    let addr = capacity_endpoint(
        StatusCode::OK,
        r#"{"retcode":0,"return_values":{"available_cores":4}}"#,
        Duration::ZERO,
    )
    .await;
    assert_eq!(probe_for(addr, 2_000).capacity("db1").await, 4);
}

#[tokio::test]
async fn non_zero_retcode_fails_open() {
    let addr = capacity_endpoint(
        StatusCode::OK,
        r#"{"retcode":1,"return_values":{"available_cores":4}}"#,
        Duration::ZERO,
    )
    .await;
    assert_eq!(probe_for(addr, 2_000).capacity("db1").await, 1);
}

#[tokio::test]
async fn negative_cores_fail_open() {
    let addr = capacity_endpoint(
        StatusCode::OK,
        r#"{"retcode":0,"return_values":{"available_cores":-3}}"#,
        Duration::ZERO,
    )
    .await;
    assert_eq!(probe_for(addr, 2_000).capacity("db1").await, 1);
}

#[tokio::test]
async fn error_status_fails_open() {
    let addr = capacity_endpoint(
        StatusCode::SERVICE_UNAVAILABLE,
        r#"{"retcode":0,"return_values":{"available_cores":8}}"#,
        Duration::ZERO,
    )
    .await;
    assert_eq!(probe_for(addr, 2_000).capacity("db1").await, 1);
}

#[tokio::test]
async fn refused_connection_fails_open() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    assert_eq!(probe_for(addr, 2_000).capacity("db1").await, 1);
}

#[tokio::test]
async fn slow_endpoint_times_out_and_fails_open() {
    let addr = capacity_endpoint(
        StatusCode::OK,
        r#"{"retcode":0,"return_values":{"available_cores":16}}"#,
        Duration::from_secs(5),
    )
    .await;

    let started = tokio::time::Instant::now();
    assert_eq!(probe_for(addr, 200).capacity("db1").await, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn endpoint_is_resolved_per_host() {
    let app = Router::new().route(
        "/load/{host}",
        post(|Path(host): Path<String>| async move {
            let cores = match host.as_str() {
                "db1" => 2,
                "db2" => 6,
                _ => 0,
            };
            format!(r#"{{"retcode":0,"return_values":{{"available_cores":{cores}}}}}"#)
        }),
    );
    let addr = serve(app).await;
    let probe = probe_for(addr, 2_000);

    assert_eq!(probe.capacity("db1").await, 2);
    assert_eq!(probe.capacity("db2").await, 6);
    assert_eq!(probe.capacity("unknown").await, 1);
}

#[tokio::test]
async fn endpoint_without_post_route_fails_open() {
    let app = Router::new().route(
        "/load/{host}",
        axum::routing::get(|| async { r#"{"retcode":0,"return_values":{"available_cores":12}}"# }),
    );
    let addr = serve(app).await;
    assert_eq!(probe_for(addr, 2_000).capacity("db1").await, 1);
}

#[tokio::test]
async fn refresher_divides_capacity_between_workers() {
    let admission = HostAdmission::new(1);
    assert!(admission.try_admit("db1").await);
    assert!(admission.try_admit("db2").await);

    let refresher = CapacityRefresher::new(
        Arc::new(FixedCapacity(8)),
        admission.clone(),
        BatchConfig {
            worker_processes: 2,
            ..BatchConfig::default()
        },
    );
    let samples = refresher.refresh_once().await;

    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| s.available_cores == 8));
    assert_eq!(admission.utilization("db1").await.limit, 4);
    assert_eq!(admission.utilization("db2").await.limit, 4);
}
