//! Launches the mock collector binary and drives it from the control side.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use snapline::control::client::{connect, ClientOptions, PluginHandle, StreamSettings};
use snapline::control::launch::{keepalive, PluginExecutor};
use snapline::core::config::{ConfigTable, ConfigValue};
use snapline::core::meta::{Arg, PluginType, Response, RpcType};
use snapline::core::metric::{Metric, MetricData, Namespace};

const MOCK: &str = env!("CARGO_BIN_EXE_snapline-mock-collector");
const HANDSHAKE: Duration = Duration::from_secs(10);
const EXIT: Duration = Duration::from_secs(10);

struct Launched {
    exec: PluginExecutor,
    response: Response,
    _logs: tempfile::TempDir,
    log_file: std::path::PathBuf,
}

fn arg(logs: &tempfile::TempDir) -> Arg {
    Arg {
        log_path: Some(logs.path().join("mock.log")),
        log_level: Some("debug".into()),
        ping_timeout_ms: 1000,
        ..Arg::default()
    }
}

async fn launch(env: &[(&str, &str)], tweak: impl FnOnce(&mut Arg)) -> Launched {
    let logs = tempfile::tempdir().unwrap();
    let mut a = arg(&logs);
    tweak(&mut a);
    let log_file = a.log_path.clone().unwrap();
    let mut exec = PluginExecutor::spawn_with_env(MOCK, &a, env.iter().copied()).unwrap();
    let response = exec.wait_for_handshake(HANDSHAKE).await.unwrap();
    Launched {
        exec,
        response,
        _logs: logs,
        log_file,
    }
}

fn opts() -> ClientOptions {
    ClientOptions {
        timeout: Duration::from_secs(3),
        tls: None,
    }
}

fn requested(config: &ConfigTable) -> Vec<Metric> {
    ["foo", "bar"]
        .iter()
        .map(|leaf| {
            Metric::new(Namespace::new(&["intel", "mock", *leaf]), MetricData::Null)
                .with_config(config.clone())
        })
        .collect()
}

async fn exit_code(exec: &mut PluginExecutor) -> Option<i32> {
    exec.wait_timeout(EXIT).await.unwrap().code()
}

// --------------------
// Collectors
// --------------------

#[tokio::test]
async fn secure_collect_then_kill_over_each_transport() {
    for rpc in ["native", "jsonrpc", "proto"] {
        let mut p = launch(&[("SNAPLINE_MOCK_RPC", rpc)], |_| {}).await;
        assert_eq!(p.response.meta.name, "mock");
        assert_eq!(p.response.meta.rpc_type.as_str(), rpc);
        assert!(p.response.public_key.is_some(), "{rpc}");

        let handle = connect(&p.response, &opts()).await.unwrap();

        let tree = handle.get_config_policy().await.unwrap();
        let node = tree.get(&["intel", "mock", "foo"]).expect("mock policy");
        let mut supplied = ConfigTable::new();
        supplied.insert("password".into(), ConfigValue::Str("secret".into()));
        let config = node.process(supplied).unwrap();
        assert_eq!(config.get("name"), Some(&ConfigValue::Str("bob".into())));

        let collector = handle.collector().unwrap();
        let types = collector.get_metric_types(ConfigTable::new()).await.unwrap();
        assert_eq!(types.len(), 3, "{rpc}");
        assert!(types.iter().all(|t| t.last_advertised_time.is_some()));

        let got = collector.collect_metrics(requested(&config)).await.unwrap();
        assert_eq!(got.len(), 2, "{rpc}");
        for m in &got {
            assert!(matches!(m.data, MetricData::Int64(_)));
            assert!(m.timestamp.is_some());
            assert_eq!(m.tags.get("name").map(String::as_str), Some("bob"));
        }

        handle.kill("e2e done").await.unwrap();
        assert_eq!(exit_code(&mut p.exec).await, Some(0), "{rpc}");

        let log = std::fs::read_to_string(&p.log_file).unwrap();
        assert!(log.contains("plugin listening"), "{rpc}");
    }
}

#[tokio::test]
async fn unsecure_plugin_skips_key_exchange() {
    let mut p = launch(&[("SNAPLINE_MOCK_UNSECURE", "1")], |_| {}).await;
    assert!(p.response.meta.unsecure);
    assert!(p.response.public_key.is_none());

    let handle = connect(&p.response, &opts()).await.unwrap();
    let got = handle
        .collector()
        .unwrap()
        .collect_metrics(requested(&ConfigTable::new()))
        .await
        .unwrap();
    assert_eq!(got.len(), 2);

    handle.kill("bye").await.unwrap();
    assert_eq!(exit_code(&mut p.exec).await, Some(0));
}

#[tokio::test]
async fn plugin_errors_keep_the_plugin_alive() {
    let mut p = launch(&[], |_| {}).await;
    let handle = connect(&p.response, &opts()).await.unwrap();
    let collector = handle.collector().unwrap();

    let fail = vec![Metric::new(
        Namespace::new(&["intel", "mock", "fail"]),
        MetricData::Null,
    )];
    let err = collector.collect_metrics(fail).await.expect_err("must fail");
    assert_eq!(err.code().as_str(), "PLUGIN");
    assert!(err.to_string().contains("CollectMetrics call error"));

    handle.ping().await.unwrap();
    handle.kill("bye").await.unwrap();
    assert_eq!(exit_code(&mut p.exec).await, Some(0));
}

#[tokio::test]
async fn panic_in_plugin_exits_with_software_code() {
    let mut p = launch(&[("SNAPLINE_MOCK_UNSECURE", "1")], |_| {}).await;
    let handle = connect(&p.response, &opts()).await.unwrap();

    let boom = vec![Metric::new(
        Namespace::new(&["intel", "mock", "panic"]),
        MetricData::Null,
    )];
    handle
        .collector()
        .unwrap()
        .collect_metrics(boom)
        .await
        .expect_err("must fail");
    assert_eq!(exit_code(&mut p.exec).await, Some(70));

    let log = std::fs::read_to_string(&p.log_file).unwrap();
    assert!(log.contains("mock collector asked to panic"));
}

// --------------------
// Session lifecycle
// --------------------

#[tokio::test]
async fn invalid_arg_reports_failure_handshake() {
    let logs = tempfile::tempdir().unwrap();
    let mut a = arg(&logs);
    a.ping_miss_limit = 0;
    let mut exec = PluginExecutor::spawn(MOCK, &a).unwrap();

    let err = exec.wait_for_handshake(HANDSHAKE).await.expect_err("must fail");
    assert_eq!(err.code().as_str(), "PLUGIN");
    assert!(err.to_string().contains("ping_miss_limit"));
    assert_eq!(exit_code(&mut exec).await, Some(1));
}

#[tokio::test]
async fn silent_control_loses_the_heartbeat() {
    let mut p = launch(&[("SNAPLINE_MOCK_UNSECURE", "1")], |a| a.ping_timeout_ms = 100).await;
    assert_eq!(exit_code(&mut p.exec).await, Some(0));

    let log = std::fs::read_to_string(&p.log_file).unwrap();
    assert!(log.contains("HeartbeatLost"));
}

#[tokio::test]
async fn keepalive_holds_the_session_open() {
    let mut p = launch(&[("SNAPLINE_MOCK_UNSECURE", "1")], |a| a.ping_timeout_ms = 150).await;
    let handle = connect(&p.response, &opts()).await.unwrap();

    let stop = CancellationToken::new();
    let pinger = keepalive(handle.clone(), Duration::from_millis(50), stop.clone());
    tokio::time::sleep(Duration::from_millis(1000)).await;
    handle.ping().await.unwrap();

    stop.cancel();
    pinger.await.unwrap();
    handle.kill("bye").await.unwrap();
    assert_eq!(exit_code(&mut p.exec).await, Some(0));
}

#[tokio::test]
async fn non_daemon_plugin_ignores_silence() {
    let mut p = launch(&[("SNAPLINE_MOCK_UNSECURE", "1")], |a| {
        a.daemon = false;
        a.ping_timeout_ms = 100;
    })
    .await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let handle = connect(&p.response, &opts()).await.unwrap();
    handle.ping().await.unwrap();
    handle.kill("bye").await.unwrap();
    assert_eq!(exit_code(&mut p.exec).await, Some(0));
}

// --------------------
// Streams
// --------------------

#[tokio::test]
async fn stream_collector_end_to_end() {
    let mut p = launch(&[("SNAPLINE_MOCK_STREAM", "1")], |_| {}).await;
    assert_eq!(p.response.plugin_type, PluginType::StreamCollector);
    assert_eq!(p.response.meta.rpc_type, RpcType::Proto);

    let handle = connect(&p.response, &opts()).await.unwrap();
    let PluginHandle::StreamCollector(client) = &handle else {
        panic!("expected a stream collector handle");
    };

    let mut stream = client
        .stream_metrics(
            requested(&ConfigTable::new()),
            StreamSettings {
                max_metrics_buffer: Some(4),
                max_collect_duration: Some(Duration::from_secs(5)),
            },
        )
        .await
        .unwrap();

    let batch = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("batch in time")
        .expect("stream open")
        .unwrap();
    assert_eq!(batch.len(), 4);

    stream.close();
    handle.kill("bye").await.unwrap();
    assert_eq!(exit_code(&mut p.exec).await, Some(0));
}
