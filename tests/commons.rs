use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use meshconf::Binding;
use meshconf::Engine;
use meshconf::EngineBuilder;
use meshconf::EngineConfig;
use meshconf::HostReloader;
use meshconf::InMemoryBackend;
use meshconf::OwnerId;
use meshconf::Properties;
use meshconf::ReloadableSchema;
use meshconf::Result;
use meshconf::ServiceIdentity;
use parking_lot::Mutex;
use tokio::time::sleep;
use tokio::time::Instant;

pub const OWNER: OwnerId = OwnerId(42);
pub const WAIT: Duration = Duration::from_secs(3);

pub fn identity() -> ServiceIdentity {
    ServiceIdentity::new("prod", "orders")
}

pub fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>()
}

#[derive(Debug, Default)]
pub struct Host {
    pub reloads: AtomicUsize,
    pub events: Mutex<Vec<BTreeSet<String>>>,
}

impl HostReloader for Host {
    fn whole_reload(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn publish_change_event(
        &self,
        keys: &BTreeSet<String>,
    ) {
        self.events.lock().push(keys.clone());
    }
}

impl Host {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<BTreeSet<String>> {
        self.events.lock().clone()
    }
}

/// A service object with a couple of bound settings.
#[derive(Debug, Default)]
pub struct OrderService {
    pub endpoint: Mutex<String>,
    pub timeout_ms: Mutex<u64>,
}

impl OrderService {
    pub fn bind(
        self: &Arc<Self>,
        engine: &Engine,
    ) {
        let registry = engine.registry();
        registry
            .register_template(
                OWNER,
                Binding::new(self, "endpoint", "${db.host}:${db.port:5432}", |s: &OrderService, v: &str| {
                    *s.endpoint.lock() = v.to_string();
                    Ok(())
                }),
            )
            .unwrap();
        registry.register(
            OWNER,
            "orders.timeout-ms",
            Binding::parsed(self, "timeout_ms", "${orders.timeout-ms}", |s: &OrderService, v: u64| {
                *s.timeout_ms.lock() = v;
            }),
        );
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.lock().clone()
    }

    pub fn timeout_ms(&self) -> u64 {
        *self.timeout_ms.lock()
    }
}

pub fn engine(
    backend: &Arc<InMemoryBackend>,
    host: &Arc<Host>,
    config: EngineConfig,
) -> Engine {
    EngineBuilder::new(config)
        .backend(backend.clone())
        .host(host.clone())
        .owner(OWNER)
        .schema(ReloadableSchema::new("pool").scalar("maxSize").collection("replicas"))
        .build()
        .unwrap()
}

pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn keys(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|k| k.to_string()).collect()
}
