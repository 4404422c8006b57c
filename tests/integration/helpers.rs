//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use fleetwatch::{
    Instance, InstanceId, Metric, Readings,
    collector::SnapshotSource,
    monitor::{Monitor, MonitorBuilder},
    registry::{InstanceDescriptor, StaticDirectory},
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Snapshot source answering from a table of readings
///
/// Instances without an entry are unreachable. An optional delay is applied
/// to every fetch.
#[derive(Default)]
pub struct ScriptedSource {
    pub readings: DashMap<InstanceId, Readings>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn set(&self, id: InstanceId, readings: Readings) {
        self.readings.insert(id, readings);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self, instance: &Instance) -> anyhow::Result<Readings> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.readings
            .get(&instance.id)
            .map(|readings| readings.clone())
            .ok_or_else(|| anyhow::anyhow!("connection refused"))
    }
}

pub fn descriptor(id: InstanceId, address: impl Into<String>) -> InstanceDescriptor {
    InstanceDescriptor {
        id,
        name: format!("sql-{id}"),
        address: address.into(),
        token: None,
    }
}

pub fn builder(source: Arc<dyn SnapshotSource>, ids: &[InstanceId]) -> MonitorBuilder {
    let directory = StaticDirectory::new(
        ids.iter()
            .map(|&id| descriptor(id, format!("10.0.0.{id}:51243")))
            .collect(),
    );
    Monitor::builder(Arc::new(directory), source)
}

pub async fn start(builder: MonitorBuilder) -> Arc<Monitor> {
    let monitor = builder.build().unwrap();
    monitor.sync_directory().await.unwrap();
    Arc::new(monitor)
}

pub fn cpu(value: f64) -> Readings {
    Readings::default().with(Metric::CpuPercent, value)
}

/// Agent answering `/snapshot` with fixed readings
pub async fn mock_agent(readings: &Readings) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(readings))
        .mount(&mock_server)
        .await;

    mock_server
}

/// "host:port" of a mock server, as stored in an instance address
pub fn agent_address(server: &MockServer) -> String {
    let url = url::Url::parse(&server.uri()).unwrap();
    format!("{}:{}", url.host_str().unwrap(), url.port().unwrap())
}
