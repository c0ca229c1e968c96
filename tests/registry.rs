//! Bulk control over a mixed set of decorators.

use memo_cache::cache::store::MemoryStore;
use memo_cache::cache::{CacheRegistry, Memoized};
use memo_cache::config::{ConnectionParams, PolicyTable};
use memo_cache::key::{CallArgs, FunctionIdentity, Signature};
use memo_cache::resilience::{AvailabilityTracker, StaticConnector};
use memo_cache::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const POLICIES: &str = r#"
price_claim:
  backend: remote
  capacity: 100
  ttl_seconds: 3600
  tags: [claims, pricing]
  transforms:
    zipcode: "truncate:4"
    dos: year_month
member_plan:
  capacity: 10
  tags: [members]
audit_log:
  allow_disable: false
  tags: [claims]
"#;

struct Service {
    registry: CacheRegistry,
    store: Arc<MemoryStore>,
    calls: Arc<AtomicUsize>,
    price_claim: Memoized<u32, Error>,
    member_plan: Memoized<String, Error>,
    audit_log: Memoized<u32, Error>,
}

impl Service {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(AvailabilityTracker::new(Arc::new(StaticConnector::new(
            store.clone(),
        ))));
        let registry = CacheRegistry::with_tracker(tracker);
        let table = PolicyTable::from_yaml(POLICIES).unwrap();
        let params = ConnectionParams::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let sig = |name: &str, names: &[&str]| {
            names.iter().fold(
                Signature::new(FunctionIdentity::new("service.rs", name)),
                |s, p| s.param(*p),
            )
        };
        let counter = calls.clone();
        let price_claim = Memoized::new(
            registry
                .install_configured::<u32, Error>(
                    &table,
                    "price_claim",
                    sig("price_claim", &["dos", "zipcode"]),
                    &params,
                )
                .unwrap()
                .unwrap(),
            move |args: &CallArgs| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(args.positional()[1].as_u64().unwrap_or_default() as u32 / 10)
            },
        );
        let counter = calls.clone();
        let member_plan = Memoized::new(
            registry
                .install_configured::<String, Error>(
                    &table,
                    "member_plan",
                    sig("member_plan", &["member"]),
                    &params,
                )
                .unwrap()
                .unwrap(),
            move |args: &CallArgs| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(format!("plan-{}", args.positional()[0]))
            },
        );
        let counter = calls.clone();
        let audit_log = Memoized::new(
            registry
                .install_configured::<u32, Error>(
                    &table,
                    "audit_log",
                    sig("audit_log", &["entry"]),
                    &params,
                )
                .unwrap()
                .unwrap(),
            move |_: &CallArgs| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            },
        );
        Self {
            registry,
            store,
            calls,
            price_claim,
            member_plan,
            audit_log,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn warm(&self) {
        self.price_claim
            .call(&CallArgs::new().arg("2024-03-02").arg(29220))
            .unwrap();
        self.member_plan.call(&CallArgs::new().arg(42)).unwrap();
        self.audit_log.call(&CallArgs::new().arg("x")).unwrap();
    }
}

#[test]
fn test_configured_service_caches() {
    let svc = Service::new();
    svc.warm();
    svc.warm();
    assert_eq!(svc.calls(), 3);
    // Same month and zipcode prefix.
    svc.price_claim
        .call(&CallArgs::new().arg("2024-03-30").arg(29221))
        .unwrap();
    assert_eq!(svc.calls(), 3);
    assert!(svc.store.key_count() >= 2);
}

#[test]
fn test_disable_by_tag_leaves_others_alone() {
    let svc = Service::new();
    svc.warm();

    assert_eq!(svc.registry.disable(&["claims"], true), 2);
    let report = svc.registry.report();
    assert!(!report.get("price_claim").unwrap().enabled);
    assert_eq!(report.get("price_claim").unwrap().size, 0);
    // Refused: still enabled and still holding its entry.
    assert!(report.get("audit_log").unwrap().enabled);
    assert_eq!(report.get("audit_log").unwrap().size, 1);
    assert!(report.get("member_plan").unwrap().enabled);

    svc.warm();
    assert_eq!(svc.calls(), 4);
    svc.warm();
    assert_eq!(svc.calls(), 5);
}

#[test]
fn test_clear_by_tag() {
    let svc = Service::new();
    svc.warm();
    assert_eq!(svc.registry.clear(&["members"]), 1);
    assert_eq!(svc.registry.report().get("member_plan").unwrap().size, 0);
    assert_eq!(svc.registry.report().get("price_claim").unwrap().size, 1);
    svc.warm();
    assert_eq!(svc.calls(), 4);
}

#[test]
fn test_unregister_keeps_original_callable() {
    let svc = Service::new();
    svc.warm();
    assert!(svc.registry.unregister("member_plan").is_some());
    assert_eq!(svc.registry.enable(&[]), 2);
    assert_eq!(
        svc.member_plan.call_uncached(&CallArgs::new().arg(42)).unwrap(),
        "plan-42"
    );
    assert_eq!(svc.calls(), 4);
    assert!(svc.registry.to_string().contains("price_claim [remote] enabled size=1"));
}
