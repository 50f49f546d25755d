//! Concurrency behavior of `SingleFlight`

use parking_lot::Mutex;
use rootcache_memo::{FlightError, SingleFlight};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

async fn wait_for_waiters<T, E>(flight: &SingleFlight<T, E>, count: usize)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    while flight.waiters() < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn concurrent_callers_share_one_computation() {
    let flight: Arc<SingleFlight<Arc<String>, String>> = Arc::new(SingleFlight::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let (release, gate) = watch::channel(false);

    let mut handles = Vec::new();
    for _ in 0..100 {
        let flight = Arc::clone(&flight);
        let runs = Arc::clone(&runs);
        let mut gate = gate.clone();
        handles.push(tokio::spawn(async move {
            flight
                .run(&CancellationToken::new(), move |_| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    gate.wait_for(|open| *open).await.map_err(|e| e.to_string())?;
                    Ok(Arc::new("computed".to_string()))
                })
                .await
        }));
    }

    wait_for_waiters(&flight, 100).await;
    release.send(true).unwrap();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    assert_eq!(flight.epochs_started(), 1);
    assert!(!flight.is_running());
}

#[tokio::test]
async fn failure_reaches_every_waiter() {
    let flight: Arc<SingleFlight<u32, String>> = Arc::new(SingleFlight::new());
    let (release, gate) = watch::channel(false);

    let mut handles = Vec::new();
    for _ in 0..3 {
        let flight = Arc::clone(&flight);
        let mut gate = gate.clone();
        handles.push(tokio::spawn(async move {
            flight
                .run(&CancellationToken::new(), move |_| async move {
                    gate.wait_for(|open| *open).await.map_err(|e| e.to_string())?;
                    Err("parser exploded".to_string())
                })
                .await
        }));
    }

    wait_for_waiters(&flight, 3).await;
    release.send(true).unwrap();

    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            Err(FlightError::Failed("parser exploded".to_string()))
        );
    }

    // The failed epoch is not retained
    let value = flight
        .run(&CancellationToken::new(), |_| async { Ok(5) })
        .await
        .unwrap();
    assert_eq!(value, 5);
    assert_eq!(flight.epochs_started(), 2);
}

#[tokio::test]
async fn cancelling_one_waiter_leaves_the_rest_running() {
    let flight: Arc<SingleFlight<u32, String>> = Arc::new(SingleFlight::new());
    let (release, gate) = watch::channel(false);

    let patient = {
        let flight = Arc::clone(&flight);
        tokio::spawn(async move {
            flight
                .run(&CancellationToken::new(), move |_| {
                    let mut gate = gate;
                    async move {
                        gate.wait_for(|open| *open).await.map_err(|e| e.to_string())?;
                        Ok(42)
                    }
                })
                .await
        })
    };
    wait_for_waiters(&flight, 1).await;

    let cancel = CancellationToken::new();
    let impatient = {
        let flight = Arc::clone(&flight);
        let cancel = cancel.clone();
        tokio::spawn(async move { flight.run(&cancel, |_| async { Ok(0) }).await })
    };
    wait_for_waiters(&flight, 2).await;

    cancel.cancel();
    assert_eq!(impatient.await.unwrap(), Err(FlightError::Cancelled));
    assert!(flight.is_running());
    assert_eq!(flight.waiters(), 1);

    release.send(true).unwrap();
    assert_eq!(patient.await.unwrap(), Ok(42));
    assert_eq!(flight.epochs_started(), 1);
}

#[tokio::test]
async fn flight_is_abandoned_when_every_waiter_cancels() {
    let flight: Arc<SingleFlight<u32, String>> = Arc::new(SingleFlight::new());
    let flight_token: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));

    let cancel = CancellationToken::new();
    let waiter = {
        let flight = Arc::clone(&flight);
        let cancel = cancel.clone();
        let flight_token = Arc::clone(&flight_token);
        tokio::spawn(async move {
            flight
                .run(&cancel, move |token| {
                    *flight_token.lock() = Some(token.clone());
                    async move {
                        token.cancelled().await;
                        Err("abandoned".to_string())
                    }
                })
                .await
        })
    };
    wait_for_waiters(&flight, 1).await;

    cancel.cancel();
    assert_eq!(waiter.await.unwrap(), Err(FlightError::Cancelled));

    assert!(!flight.is_running());
    let token = flight_token.lock().clone().unwrap();
    assert!(token.is_cancelled());

    // Next request starts a fresh epoch instead of joining the dead one
    let value = flight
        .run(&CancellationToken::new(), |_| async { Ok(9) })
        .await
        .unwrap();
    assert_eq!(value, 9);
    assert_eq!(flight.epochs_started(), 2);
}
