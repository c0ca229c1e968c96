//! In-process memoization through the public API.

use memo_cache::cache::{CacheControl, CachePolicy, Capacity, LocalMemo, Memo, Memoized};
use memo_cache::key::{transforms, CallArgs, FunctionIdentity, Signature};
use memo_cache::{ArgumentBindingError, Error};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, thiserror::Error)]
enum LookupError {
    #[error("cache: {0}")]
    Cache(#[from] Error),
    #[error("no such plan: {0}")]
    UnknownPlan(String),
}

fn counted<V, F>(memo: Arc<LocalMemo<V>>, f: F) -> (Memoized<V, LookupError>, Arc<AtomicUsize>)
where
    V: Clone + Send + 'static,
    F: Fn(&CallArgs) -> Result<V, LookupError> + Send + Sync + 'static,
{
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let memo: Arc<dyn Memo<V, LookupError>> = memo;
    let wrapped = Memoized::new(memo, move |args: &CallArgs| {
        counter.fetch_add(1, Ordering::SeqCst);
        f(args)
    });
    (wrapped, calls)
}

fn claim_signature() -> Signature {
    Signature::new(FunctionIdentity::new("claims.rs", "Claims::price"))
        .param("a")
        .param("b")
        .param("dos")
        .param("zipcode")
}

#[test]
fn test_repeat_call_hits() {
    init_tracing();
    let sig = Signature::new(FunctionIdentity::new("rates.rs", "rate"))
        .param("plan")
        .param_with_default("region", "us");
    let memo = Arc::new(LocalMemo::<String>::new(sig, &CachePolicy::new().with_quiet(false)));
    let (rate, calls) = counted(memo.clone(), |args| {
        Ok(format!("{}", args.positional()[0]))
    });

    let first = rate.call(&CallArgs::new().arg("gold")).unwrap();
    // Same call once defaults are applied.
    let second = rate.call(&CallArgs::new().arg("gold").kw("region", "us")).unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    rate.call(&CallArgs::new().arg("gold").kw("region", "eu")).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(memo.size(), 2);
}

#[test]
fn test_disabled_calls_run_every_time() {
    init_tracing();
    let sig = Signature::new(FunctionIdentity::new("clock.rs", "now"));
    let memo = Arc::new(LocalMemo::<Instant>::new(sig, &CachePolicy::default()));
    let (now, calls) = counted(memo.clone(), |_| Ok(Instant::now()));
    let args = CallArgs::new();

    let cached = now.call(&args).unwrap();
    thread::sleep(Duration::from_millis(2));
    assert_eq!(now.call(&args).unwrap(), cached);

    memo.disable(false);
    let a = now.call(&args).unwrap();
    thread::sleep(Duration::from_millis(2));
    let b = now.call(&args).unwrap();
    assert_ne!(a, b);
    assert_ne!(a, cached);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    memo.enable();
    assert_eq!(now.call(&args).unwrap(), cached);
}

#[test]
fn test_transforms_collide_nearby_zipcodes() {
    init_tracing();
    let policy = CachePolicy::new()
        .with_transform("zipcode", transforms::truncate(4))
        .with_transform("dos", transforms::year_month());
    let memo = Arc::new(LocalMemo::<u32>::new(claim_signature(), &policy));
    let (price, calls) = counted(memo.clone(), |args| {
        Ok(args.positional()[3].as_u64().unwrap_or_default() as u32)
    });

    let call = |dos: &str, zipcode: u32| {
        CallArgs::new()
            .arg(json!({"1": 2, "3": 4}))
            .arg(json!([1, 2, 3]))
            .arg(dos)
            .arg(zipcode)
    };
    assert_eq!(price.call(&call("2024-03-02T10:00:00", 29220)).unwrap(), 29220);
    assert_eq!(price.call(&call("2024-03-28", 29221)).unwrap(), 29220);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    price.call(&call("2024-04-01", 29221)).unwrap();
    price.call(&call("2024-03-02", 29230)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_binding_errors_reach_the_caller() {
    let memo = Arc::new(LocalMemo::<u32>::new(claim_signature(), &CachePolicy::default()));
    let (price, calls) = counted(memo, |_| Ok(0));

    let err = price
        .call(&CallArgs::new().arg(1).arg(2).arg(3).kw("zip", 29220))
        .unwrap_err();
    match err {
        LookupError::Cache(Error::Binding(ArgumentBindingError::UnexpectedKeyword { name, .. })) => {
            assert_eq!(name, "zip")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_wrapped_errors_pass_through_uncached() {
    let sig = Signature::new(FunctionIdentity::new("rates.rs", "rate")).param("plan");
    let memo = Arc::new(LocalMemo::<u32>::new(sig, &CachePolicy::default()));
    let (rate, calls) = counted(memo.clone(), |args| {
        let plan = args.positional()[0].as_str().unwrap_or_default().to_string();
        if plan == "gold" {
            Ok(3)
        } else {
            Err(LookupError::UnknownPlan(plan))
        }
    });

    let args = CallArgs::new().arg("tin");
    assert!(matches!(rate.call(&args), Err(LookupError::UnknownPlan(p)) if p == "tin"));
    assert!(matches!(rate.call(&args), Err(LookupError::UnknownPlan(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(memo.size(), 0);
}

#[test]
fn test_capacity_evicts_least_recently_used() {
    let sig = Signature::new(FunctionIdentity::new("sq.rs", "square")).param("x");
    let memo = Arc::new(LocalMemo::<i64>::new(
        sig,
        &CachePolicy::new().with_capacity(Capacity::Bounded(2)),
    ));
    let (square, calls) = counted(memo.clone(), |args| {
        let x = args.positional()[0].as_i64().unwrap_or_default();
        Ok(x * x)
    });
    let arg = |x: i64| CallArgs::new().arg(x);

    square.call(&arg(1)).unwrap();
    square.call(&arg(2)).unwrap();
    // Touch 1 so 2 becomes the eviction candidate.
    square.call(&arg(1)).unwrap();
    square.call(&arg(3)).unwrap();
    assert_eq!(memo.size(), 2);
    assert!(memo.contains(&arg(1)).unwrap());
    assert!(!memo.contains(&arg(2)).unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_bound_caller_identity_separates_instances() {
    use memo_cache::key::InstanceId;

    let sig = Signature::new(FunctionIdentity::new("svc.rs", "Service::load"))
        .method()
        .param("id");
    let memo = Arc::new(LocalMemo::<u64>::new(
        sig,
        &CachePolicy::new().with_bind_caller_identity(true),
    ));
    let (load, calls) = counted(memo, |args| Ok(args.receiver().map_or(0, |r| r.get())));

    let first = InstanceId::next();
    let second = InstanceId::next();
    load.call(&CallArgs::method(first).arg(7)).unwrap();
    load.call(&CallArgs::method(first).arg(7)).unwrap();
    load.call(&CallArgs::method(second).arg(7)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_single_writer_runs_once_under_contention() {
    let sig = Signature::new(FunctionIdentity::new("slow.rs", "slow")).param("x");
    let memo = Arc::new(LocalMemo::<i64>::new(
        sig,
        &CachePolicy::new().with_single_writer(true),
    ));
    let (slow, calls) = counted(memo, |args| {
        thread::sleep(Duration::from_millis(20));
        Ok(args.positional()[0].as_i64().unwrap_or_default())
    });
    let slow = Arc::new(slow);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let slow = Arc::clone(&slow);
            thread::spawn(move || slow.call(&CallArgs::new().arg(9)).unwrap())
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), 9);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
