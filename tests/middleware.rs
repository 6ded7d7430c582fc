mod common;

use common::{config, limiter, T0};
use std::sync::Arc;
use tollgate::{AdmissionLayer, DenyReason, GateError, ManualClock, MemoryStore, WindowUnit};
use tower::{service_fn, Layer, Service, ServiceBuilder, ServiceExt};

#[derive(Debug)]
struct Request {
    tenant: &'static str,
}

fn by_tenant(req: &Request) -> String {
    req.tenant.to_string()
}

#[tokio::test]
async fn admitted_requests_reach_the_inner_service() {
    let clock = ManualClock::at_secs(T0);
    let rl = Arc::new(limiter(MemoryStore::new(clock.clone()), &clock, config(2, 5, WindowUnit::Minute)));
    let inner = service_fn(|req: Request| async move {
        Ok::<_, std::io::Error>(format!("hello {}", req.tenant))
    });
    let mut svc = ServiceBuilder::new().layer(AdmissionLayer::new(rl, by_tenant)).service(inner);

    let resp = svc.ready().await.unwrap().call(Request { tenant: "acme" }).await.unwrap();
    assert_eq!(resp, "hello acme");
    let resp = svc.ready().await.unwrap().call(Request { tenant: "acme" }).await.unwrap();
    assert_eq!(resp, "hello acme");

    let err = svc.ready().await.unwrap().call(Request { tenant: "acme" }).await.unwrap_err();
    assert!(matches!(err, GateError::Denied(DenyReason::RateExceeded)));
    assert_eq!(err.deny_reason(), Some(DenyReason::RateExceeded));

    // A different tenant has its own window.
    let resp = svc.ready().await.unwrap().call(Request { tenant: "globex" }).await.unwrap();
    assert_eq!(resp, "hello globex");
}

#[tokio::test]
async fn denied_requests_never_reach_the_inner_service() {
    let clock = ManualClock::at_secs(T0);
    let rl = Arc::new(limiter(MemoryStore::new(clock.clone()), &clock, config(1, 1, WindowUnit::Minute)));
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counted = calls.clone();
    let inner = service_fn(move |_req: Request| {
        counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async { Ok::<_, std::io::Error>(()) }
    });
    let layer = AdmissionLayer::new(rl, by_tenant);

    let svc = layer.layer(inner);
    let _ = svc.clone().oneshot(Request { tenant: "acme" }).await;
    let denied = svc.oneshot(Request { tenant: "acme" }).await;

    assert!(matches!(denied, Err(GateError::Denied(DenyReason::BurstExceeded))));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inner_and_admission_failures_stay_apart() {
    let clock = ManualClock::at_secs(T0);
    let store = MemoryStore::new(clock.clone());
    let rl = Arc::new(limiter(store.clone(), &clock, config(5, 5, WindowUnit::Minute)));
    let inner = service_fn(|_req: Request| async {
        Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
    });
    let svc = ServiceBuilder::new().layer(AdmissionLayer::new(rl, by_tenant)).service(inner);

    let err = svc.clone().oneshot(Request { tenant: "acme" }).await.unwrap_err();
    assert!(matches!(err, GateError::Inner(ref e) if e.to_string() == "boom"));

    store.set_reachable(false);
    let err = svc.oneshot(Request { tenant: "acme" }).await.unwrap_err();
    assert!(matches!(err, GateError::Admission(ref e) if e.is_connection()));
}
