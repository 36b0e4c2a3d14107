use chrono::{DateTime, Utc};
use gunsmith_directory::config::OwnershipConfig;
use gunsmith_directory::workflows::ownership::{
    CallerIdentity, ChannelNotifier, InMemoryOwnershipStore, OwnershipEvent, OwnershipServices,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub(crate) type DirectoryServices = OwnershipServices<InMemoryOwnershipStore, ChannelNotifier>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Wiring used by the server and the CLI: one in-process store and an outbox
/// whose receiving end the caller must drain.
pub(crate) struct Wiring {
    pub(crate) services: Arc<DirectoryServices>,
    pub(crate) store: Arc<InMemoryOwnershipStore>,
    pub(crate) outbox: UnboundedReceiver<OwnershipEvent>,
}

pub(crate) fn wire_services(config: &OwnershipConfig) -> Wiring {
    let store = Arc::new(InMemoryOwnershipStore::new());
    let (notifier, outbox) = ChannelNotifier::channel();
    let services = Arc::new(OwnershipServices::new(
        store.clone(),
        Arc::new(notifier),
        config,
    ));
    Wiring {
        services,
        store,
        outbox,
    }
}

/// Identity for operator actions taken from the command line.
pub(crate) fn operator() -> CallerIdentity {
    CallerIdentity::administrator("cli-operator")
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}
