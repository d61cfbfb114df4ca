//! Test suites and utilites.

#[cfg(feature = "qdrant")]
use super::service::{DockerProvisioner, QdrantService, ServiceGate};

#[cfg(feature = "qdrant")]
pub type QdrantGate = ServiceGate<QdrantService, DockerProvisioner>;

/// The qdrant instance shared by every suite of a test run.
/// Setting `QDRANT_URL` reuses a running instance instead of starting a container.
#[cfg(feature = "qdrant")]
pub fn qdrant_gate() -> &'static QdrantGate {
    static GATE: std::sync::OnceLock<QdrantGate> = std::sync::OnceLock::new();
    GATE.get_or_init(|| ServiceGate::new(QdrantService, DockerProvisioner))
}

#[cfg(feature = "qdrant")]
#[suitest::suite(qdrant_service_tests)]
#[suitest::suite_cfg(sequential = true)]
mod qdrant_service_tests {
    use super::qdrant_gate;
    use crate::app::service::{Availability, QdrantService, ServiceSpec};
    use qdrant_client::Qdrant;
    use suitest::{after_all, before_all};

    #[before_all]
    async fn setup() -> Availability {
        // A failed provisioning fails the whole suite, not the single tests
        let availability = qdrant_gate()
            .ensure()
            .await
            .expect("qdrant provisioning failed");
        availability
    }

    #[after_all]
    async fn teardown() {
        qdrant_gate().teardown().await;
    }

    #[test]
    async fn instance_is_healthy(availability: Availability) {
        let Availability::Ready(endpoint) = availability else {
            return;
        };

        QdrantService.probe(&endpoint).await.unwrap();
    }

    #[test]
    async fn gate_reuses_the_instance(availability: Availability) {
        let again = qdrant_gate().ensure().await.unwrap();
        assert_eq!(*availability, again);
    }

    #[test]
    async fn unknown_collections_do_not_exist(availability: Availability) {
        let Availability::Ready(endpoint) = availability else {
            return;
        };

        let client = Qdrant::from_url(&endpoint).build().unwrap();
        let exists = client
            .collection_exists("__ingestkit_unknown_collection__")
            .await
            .unwrap();

        assert!(!exists);
    }
}
