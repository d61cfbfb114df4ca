//! Lifecycle of live services integration tests run against.
//!
//! A [ServiceGate] makes sure a service is reachable before any test body runs.
//! It reuses an instance given through the environment, provisions an ephemeral
//! one, or reports the suite as skipped when neither is possible.
//!
//! ```text
//! Uninitialized -> Provisioning -> Ready -> TornDown
//!                       |
//!                       +--------> TornDown (failed)
//! ```

use crate::{err, error::IngestError, map_err};
use futures_util::FutureExt;
use std::{any::Any, future::Future, panic::AssertUnwindSafe, path::Path, time::Duration};
use testcontainers::{runners::AsyncRunner, GenericImage};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Everything needed to bring up and check a service.
#[async_trait::async_trait]
pub trait ServiceSpec: Send + Sync {
    fn name(&self) -> &str;

    /// Environment variable holding the endpoint of a pre-provisioned instance.
    fn env_var(&self) -> &str;

    /// The container image for ephemeral instances.
    fn image(&self) -> GenericImage;

    /// The container port clients connect to.
    fn port(&self) -> u16;

    fn endpoint(&self, host: &str, port: u16) -> String {
        format!("http://{host}:{port}")
    }

    /// Succeeds once the service at `endpoint` accepts requests.
    async fn probe(&self, endpoint: &str) -> Result<(), IngestError>;
}

/// A reachable service instance. Dropping it releases the instance.
pub struct Provisioned {
    pub endpoint: String,
    _guard: Option<Box<dyn Any + Send>>,
}

impl Provisioned {
    /// An instance kept alive by `guard`, e.g. a running container.
    pub fn new(endpoint: String, guard: impl Any + Send) -> Self {
        Self {
            endpoint,
            _guard: Some(Box::new(guard)),
        }
    }

    /// An instance not owned by this process.
    pub fn external(endpoint: String) -> Self {
        Self {
            endpoint,
            _guard: None,
        }
    }
}

impl std::fmt::Debug for Provisioned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioned")
            .field("endpoint", &self.endpoint)
            .field("owned", &self._guard.is_some())
            .finish()
    }
}

/// Brings up ephemeral service instances.
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync {
    /// Whether provisioning is possible at all. The error is the reason it is not.
    fn available(&self) -> Result<(), String>;

    async fn provision(&self, spec: &dyn ServiceSpec) -> Result<Provisioned, IngestError>;
}

/// Provisions services as containers through the local docker daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerProvisioner;

#[async_trait::async_trait]
impl Provisioner for DockerProvisioner {
    fn available(&self) -> Result<(), String> {
        if std::env::var_os("DOCKER_HOST").is_some() || Path::new("/var/run/docker.sock").exists()
        {
            return Ok(());
        }
        Err("no container runtime found, set DOCKER_HOST".to_string())
    }

    async fn provision(&self, spec: &dyn ServiceSpec) -> Result<Provisioned, IngestError> {
        info!("Starting {} container", spec.name());

        let container = map_err!(spec.image().start().await);
        let host = map_err!(container.get_host().await);
        let port = map_err!(container.get_host_port_ipv4(spec.port()).await);

        Ok(Provisioned::new(
            spec.endpoint(&host.to_string(), port),
            container,
        ))
    }
}

#[derive(Debug)]
pub enum GateState {
    Uninitialized,
    Provisioning,
    Ready(Provisioned),
    /// No instance can be obtained in this environment.
    Skipped(String),
    TornDown,
}

impl GateState {
    fn label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Provisioning => "provisioning",
            Self::Ready(_) => "ready",
            Self::Skipped(_) => "skipped",
            Self::TornDown => "torn down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Ready(String),
    Skipped(String),
}

const PROBE_ATTEMPTS: usize = 10;
const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Guards a single service instance shared by a test run.
///
/// The state lock is held for the whole provisioning, so at most one
/// attempt runs per gate and concurrent callers observe its outcome.
pub struct ServiceGate<S, P> {
    spec: S,
    provisioner: P,
    pre_provisioned: Option<String>,
    probe_attempts: usize,
    probe_interval: Duration,
    state: Mutex<GateState>,
}

impl<S, P> ServiceGate<S, P>
where
    S: ServiceSpec,
    P: Provisioner,
{
    /// Reads the pre-provisioned endpoint from [ServiceSpec::env_var].
    pub fn new(spec: S, provisioner: P) -> Self {
        let pre_provisioned = std::env::var(spec.env_var()).ok();
        Self {
            spec,
            provisioner,
            pre_provisioned,
            probe_attempts: PROBE_ATTEMPTS,
            probe_interval: PROBE_INTERVAL,
            state: Mutex::new(GateState::Uninitialized),
        }
    }

    /// Probe the service up to `attempts` times, waiting `interval` in between.
    pub fn with_probe_policy(mut self, attempts: usize, interval: Duration) -> Self {
        self.probe_attempts = attempts.max(1);
        self.probe_interval = interval;
        self
    }

    pub fn with_pre_provisioned(mut self, endpoint: Option<String>) -> Self {
        self.pre_provisioned = endpoint;
        self
    }

    pub async fn state(&self) -> &'static str {
        self.state.lock().await.label()
    }

    /// Make the service available, provisioning it on first use.
    ///
    /// Errors if provisioning fails, in which case the gate is torn down
    /// and every later call fails as well.
    pub async fn ensure(&self) -> Result<Availability, IngestError> {
        let mut state = self.state.lock().await;
        let name = self.spec.name();

        match &*state {
            GateState::Uninitialized => {}
            GateState::Ready(instance) => return Ok(Availability::Ready(instance.endpoint.clone())),
            GateState::Skipped(reason) => return Ok(Availability::Skipped(reason.clone())),
            GateState::Provisioning => {
                return err!(Provisioning, "previous attempt for '{name}' was interrupted")
            }
            GateState::TornDown => return err!(Provisioning, "'{name}' is torn down"),
        }

        let instance = match &self.pre_provisioned {
            Some(endpoint) => {
                info!("Using pre-provisioned {name} at {endpoint}");
                *state = GateState::Provisioning;
                Provisioned::external(endpoint.clone())
            }
            None => {
                if let Err(reason) = self.provisioner.available() {
                    warn!("Skipping {name}: {reason}");
                    *state = GateState::Skipped(reason.clone());
                    return Ok(Availability::Skipped(reason));
                }

                *state = GateState::Provisioning;

                match self.provisioner.provision(&self.spec).await {
                    Ok(instance) => instance,
                    Err(e) => {
                        *state = GateState::TornDown;
                        return err!(Provisioning, "{name}: {e}");
                    }
                }
            }
        };

        if let Err(e) = self.probe(&instance.endpoint).await {
            *state = GateState::TornDown;
            return err!(Provisioning, "{name} at {}: {e}", instance.endpoint);
        }

        info!("{name} ready at {}", instance.endpoint);

        let endpoint = instance.endpoint.clone();
        *state = GateState::Ready(instance);

        Ok(Availability::Ready(endpoint))
    }

    /// Release the instance. Idempotent.
    pub async fn teardown(&self) {
        let mut state = self.state.lock().await;
        if let GateState::Ready(instance) = std::mem::replace(&mut *state, GateState::TornDown) {
            info!("Tearing down {} at {}", self.spec.name(), instance.endpoint);
        }
    }

    async fn probe(&self, endpoint: &str) -> Result<(), IngestError> {
        let mut attempt = 1;
        loop {
            match self.spec.probe(endpoint).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.probe_attempts => return Err(e),
                Err(e) => {
                    debug!("Probe {attempt}/{} failed: {e}", self.probe_attempts);
                    attempt += 1;
                    tokio::time::sleep(self.probe_interval).await;
                }
            }
        }
    }
}

/// Run `test` against the service and tear it down afterwards, even if `test` panics.
///
/// Returns `None` when the service is skipped in this environment.
pub async fn with_service<S, P, F, Fut, T>(
    gate: &ServiceGate<S, P>,
    test: F,
) -> Result<Option<T>, IngestError>
where
    S: ServiceSpec,
    P: Provisioner,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = T>,
{
    let endpoint = match gate.ensure().await? {
        Availability::Ready(endpoint) => endpoint,
        Availability::Skipped(reason) => {
            info!("Skipping: {reason}");
            return Ok(None);
        }
    };

    let result = AssertUnwindSafe(test(endpoint)).catch_unwind().await;

    gate.teardown().await;

    match result {
        Ok(value) => Ok(Some(value)),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Qdrant as the reference index service.
#[cfg(feature = "qdrant")]
#[derive(Debug, Default, Clone, Copy)]
pub struct QdrantService;

#[cfg(feature = "qdrant")]
#[async_trait::async_trait]
impl ServiceSpec for QdrantService {
    fn name(&self) -> &str {
        "qdrant"
    }

    fn env_var(&self) -> &str {
        "QDRANT_URL"
    }

    fn image(&self) -> GenericImage {
        use testcontainers::core::{IntoContainerPort, WaitFor};

        GenericImage::new("qdrant/qdrant", "latest")
            .with_exposed_port(6334.tcp())
            .with_wait_for(WaitFor::message_on_stdout("gRPC listening on"))
    }

    fn port(&self) -> u16 {
        6334
    }

    async fn probe(&self, endpoint: &str) -> Result<(), IngestError> {
        let client = map_err!(qdrant_client::Qdrant::from_url(endpoint).build());
        let reply = map_err!(client.health_check().await);
        debug!("Qdrant {} is healthy", reply.version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct Spec {
        healthy: bool,
    }

    #[async_trait::async_trait]
    impl ServiceSpec for Spec {
        fn name(&self) -> &str {
            "index"
        }

        fn env_var(&self) -> &str {
            "INGESTKIT_TEST_INDEX_URL"
        }

        fn image(&self) -> GenericImage {
            GenericImage::new("index", "latest")
        }

        fn port(&self) -> u16 {
            1234
        }

        async fn probe(&self, _: &str) -> Result<(), IngestError> {
            if self.healthy {
                Ok(())
            } else {
                err!(Backend, "unhealthy")
            }
        }
    }

    /// Counts provisioning attempts and releases on drop.
    #[derive(Default)]
    struct Counting {
        attempts: AtomicUsize,
        released: Arc<AtomicUsize>,
        fail: bool,
        unavailable: bool,
    }

    struct Release(Arc<AtomicUsize>);

    impl Drop for Release {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Provisioner for Counting {
        fn available(&self) -> Result<(), String> {
            if self.unavailable {
                return Err("no runtime".to_string());
            }
            Ok(())
        }

        async fn provision(&self, spec: &dyn ServiceSpec) -> Result<Provisioned, IngestError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return err!(Backend, "image pull failed");
            }
            Ok(Provisioned::new(
                spec.endpoint("localhost", spec.port()),
                Release(self.released.clone()),
            ))
        }
    }

    fn gate(healthy: bool, provisioner: Counting) -> ServiceGate<Spec, Counting> {
        ServiceGate::new(Spec { healthy }, provisioner).with_pre_provisioned(None)
    }

    #[tokio::test]
    async fn provisions_at_most_once() {
        let gate = Arc::new(gate(true, Counting::default()));

        let handles = (0..8)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.ensure().await.unwrap() })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert_eq!(
                Availability::Ready("http://localhost:1234".to_string()),
                handle.await.unwrap()
            );
        }

        assert_eq!(1, gate.provisioner.attempts.load(Ordering::SeqCst));
        assert_eq!("ready", gate.state().await);
    }

    #[tokio::test]
    async fn teardown_releases_the_instance() {
        let gate = gate(true, Counting::default());
        gate.ensure().await.unwrap();

        gate.teardown().await;
        gate.teardown().await;

        assert_eq!(1, gate.provisioner.released.load(Ordering::SeqCst));
        assert_eq!("torn down", gate.state().await);
        assert!(gate.ensure().await.is_err());
    }

    #[tokio::test]
    async fn provisioning_failure_tears_down() {
        let gate = gate(
            true,
            Counting {
                fail: true,
                ..Default::default()
            },
        );

        let err = gate.ensure().await.unwrap_err();
        assert_eq!(ErrorKind::Provisioning, err.kind());
        assert_eq!("torn down", gate.state().await);

        // No second attempt
        assert!(gate.ensure().await.is_err());
        assert_eq!(1, gate.provisioner.attempts.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unhealthy_instance_is_released() {
        let gate = gate(false, Counting::default()).with_probe_policy(3, Duration::ZERO);

        let err = gate.ensure().await.unwrap_err();

        assert_eq!(ErrorKind::Provisioning, err.kind());
        assert_eq!(1, gate.provisioner.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn skips_without_a_runtime() {
        let gate = gate(
            true,
            Counting {
                unavailable: true,
                ..Default::default()
            },
        );

        assert_eq!(
            Availability::Skipped("no runtime".to_string()),
            gate.ensure().await.unwrap()
        );
        assert_eq!(0, gate.provisioner.attempts.load(Ordering::SeqCst));

        let ran = with_service(&gate, |_| async { true }).await.unwrap();
        assert_eq!(None, ran);
    }

    #[tokio::test]
    async fn reuses_pre_provisioned_instances() {
        let gate = gate(
            true,
            Counting {
                unavailable: true,
                ..Default::default()
            },
        )
        .with_pre_provisioned(Some("http://index:1".to_string()));

        assert_eq!(
            Availability::Ready("http://index:1".to_string()),
            gate.ensure().await.unwrap()
        );
        assert_eq!(0, gate.provisioner.attempts.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scoped_service_is_torn_down_after_a_panic() {
        let gate = gate(true, Counting::default());

        let result = AssertUnwindSafe(with_service(&gate, |endpoint| async move {
            assert_eq!("http://localhost:1234", endpoint);
            panic!("test body failed");
        }))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert_eq!(1, gate.provisioner.released.load(Ordering::SeqCst));
        assert_eq!("torn down", gate.state().await);
    }
}
