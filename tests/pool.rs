mod common;

use common::{config, limiter, limiter_with_pool, ScriptedStore, T0};
use std::sync::Arc;
use std::time::Duration;
use tollgate::{
    AdmissionError, CallContext, CancelCause, CancellationToken, ManualClock, MemoryStore,
    PoolConfig, PoolError, StoreError, Verdict, WindowUnit,
};

fn single_lease() -> tollgate::PoolConfigBuilder {
    PoolConfig::builder().max_active(1).max_idle(1)
}

#[tokio::test]
async fn unreachable_store_is_a_connection_error() {
    let clock = ManualClock::at_secs(T0);
    let store = MemoryStore::new(clock.clone());
    let rl = limiter(store.clone(), &clock, config(5, 5, WindowUnit::Minute));

    store.set_reachable(false);
    let err = rl.allow(&CallContext::background(), "k").await.unwrap_err();

    assert!(err.is_connection());
    assert!(matches!(
        err,
        AdmissionError::Connection(PoolError::Dial(StoreError::Unreachable(_)))
    ));
    assert_eq!(rl.pool().stats().active, 0);
}

#[tokio::test]
async fn outage_on_a_pooled_connection_fails_then_recovers() {
    let clock = ManualClock::at_secs(T0);
    let store = MemoryStore::new(clock.clone());
    let rl = limiter(store.clone(), &clock, config(5, 5, WindowUnit::Minute));
    let ctx = CallContext::background();
    rl.allow(&ctx, "k").await.unwrap();

    store.set_reachable(false);
    assert!(rl.allow(&ctx, "k").await.is_err());

    store.set_reachable(true);
    assert_eq!(rl.allow(&ctx, "k").await, Ok(Verdict::Admitted));
}

#[tokio::test]
async fn password_from_the_endpoint_is_presented_on_dial() {
    let clock = ManualClock::at_secs(T0);
    let store = MemoryStore::with_password(clock.clone(), "s3cret");
    let ctx = CallContext::background();

    let anonymous = limiter(store.clone(), &clock, config(5, 5, WindowUnit::Minute));
    assert!(matches!(
        anonymous.allow(&ctx, "k").await,
        Err(AdmissionError::Connection(PoolError::Dial(StoreError::Auth(_))))
    ));

    let pool = PoolConfig::builder().password("s3cret").build().unwrap();
    let authed = limiter_with_pool(store, &clock, config(5, 5, WindowUnit::Minute), pool);
    assert_eq!(authed.allow(&ctx, "k").await, Ok(Verdict::Admitted));
}

#[tokio::test]
async fn pool_at_capacity_fails_fast_by_default() {
    let clock = ManualClock::at_secs(T0);
    let script = ScriptedStore::new(MemoryStore::new(clock.clone()));
    let rl = Arc::new(limiter_with_pool(
        script.clone(),
        &clock,
        config(5, 5, WindowUnit::Minute),
        single_lease().build().unwrap(),
    ));

    script.stall_reads(true);
    let token = CancellationToken::new();
    let holder = {
        let rl = rl.clone();
        let ctx = CallContext::with_token(token.clone());
        tokio::spawn(async move { rl.allow(&ctx, "k").await })
    };
    while rl.pool().stats().active == 0 {
        tokio::task::yield_now().await;
    }

    let err = rl.allow(&CallContext::background(), "k").await.unwrap_err();
    assert_eq!(err, AdmissionError::Connection(PoolError::Exhausted { max_active: 1 }));

    token.cancel();
    assert_eq!(holder.await.unwrap(), Err(AdmissionError::Cancelled(CancelCause::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn waiting_for_a_lease_times_out() {
    let clock = ManualClock::at_secs(T0);
    let script = ScriptedStore::new(MemoryStore::new(clock.clone()));
    let pool = single_lease().acquire_timeout(Duration::from_millis(20)).build().unwrap();
    let rl = Arc::new(limiter_with_pool(
        script.clone(),
        &clock,
        config(5, 5, WindowUnit::Minute),
        pool,
    ));

    script.stall_reads(true);
    let token = CancellationToken::new();
    let holder = {
        let rl = rl.clone();
        let ctx = CallContext::with_token(token.clone());
        tokio::spawn(async move { rl.allow(&ctx, "k").await })
    };
    while rl.pool().stats().active == 0 {
        tokio::task::yield_now().await;
    }

    let err = rl.allow(&CallContext::background(), "k").await.unwrap_err();
    assert_eq!(err, AdmissionError::Connection(PoolError::Timeout(Duration::from_millis(20))));

    token.cancel();
    let _ = holder.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn waiting_for_a_lease_succeeds_once_it_is_released() {
    let clock = ManualClock::at_secs(T0);
    let script = ScriptedStore::new(MemoryStore::new(clock.clone()));
    let pool = single_lease().acquire_timeout(Duration::from_secs(1)).build().unwrap();
    let rl = Arc::new(limiter_with_pool(
        script.clone(),
        &clock,
        config(5, 5, WindowUnit::Minute),
        pool,
    ));

    script.stall_reads(true);
    let token = CancellationToken::new();
    let holder = {
        let rl = rl.clone();
        let ctx = CallContext::with_token(token.clone());
        tokio::spawn(async move { rl.allow(&ctx, "k").await })
    };
    while rl.pool().stats().active == 0 {
        tokio::task::yield_now().await;
    }
    let releaser = {
        let script = script.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            script.stall_reads(false);
            token.cancel();
        })
    };

    assert_eq!(rl.allow(&CallContext::background(), "k").await, Ok(Verdict::Admitted));
    assert!(holder.await.unwrap().is_err());
    releaser.await.unwrap();
}

#[tokio::test]
async fn closed_pool_refuses_checks() {
    let clock = ManualClock::at_secs(T0);
    let rl = limiter(MemoryStore::new(clock.clone()), &clock, config(5, 5, WindowUnit::Minute));
    rl.pool().close();

    let err = rl.allow(&CallContext::background(), "k").await.unwrap_err();
    assert_eq!(err, AdmissionError::Connection(PoolError::Closed));
}
