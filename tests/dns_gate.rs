use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sockvisor::{DnsGate, Lookup, ResolveCallback, ResolveStatus, Resolver};

const ANSWER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);
const FALLBACK: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

/// Completes every request from a helper thread after `delay`, tracking how
/// many requests were in flight at once
struct Delayed {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: AtomicUsize,
}

impl Delayed {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Resolver for Delayed {
    fn resolve(&self, _host: &str, done: ResolveCallback) -> ResolveStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let in_flight = Arc::clone(&self.in_flight);
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            in_flight.fetch_sub(1, Ordering::SeqCst);
            done(Some(ANSWER));
        });
        ResolveStatus::Pending
    }
}

/// Keeps callbacks alive without ever completing them
#[derive(Default)]
struct Silent(Mutex<Vec<ResolveCallback>>);

impl Resolver for Silent {
    fn resolve(&self, _host: &str, done: ResolveCallback) -> ResolveStatus {
        self.0.lock().unwrap().push(done);
        ResolveStatus::Pending
    }
}

struct Refusing;

impl Resolver for Refusing {
    fn resolve(&self, _host: &str, _done: ResolveCallback) -> ResolveStatus {
        ResolveStatus::Failed
    }
}

fn gate(resolver: Arc<dyn Resolver>, timeout: Duration) -> Arc<DnsGate> {
    Arc::new(DnsGate::with_intervals(
        resolver,
        Duration::from_millis(5),
        timeout,
    ))
}

#[test]
fn one_resolution_in_flight_across_sockets() {
    let resolver = Arc::new(Delayed::new(Duration::from_millis(20)));
    let gate = gate(resolver.clone(), Duration::from_secs(5));

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.resolve(&format!("sock{i}"), "device.example", Some(FALLBACK), || true)
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), Lookup::Resolved(ANSWER));
    }
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
    assert_eq!(resolver.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn late_completion_is_picked_up_by_polling() {
    let gate = gate(
        Arc::new(Delayed::new(Duration::from_millis(40))),
        Duration::from_secs(5),
    );
    let started = Instant::now();
    let lookup = gate.resolve("client", "device.example", None, || true);
    assert_eq!(lookup, Lookup::Resolved(ANSWER));
    assert!(lookup.is_resolved());
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[test]
fn silent_resolver_times_out_to_fallback() {
    let gate = gate(Arc::new(Silent::default()), Duration::from_millis(60));
    let started = Instant::now();
    let lookup = gate.resolve("client", "device.example", Some(FALLBACK), || true);
    assert_eq!(lookup, Lookup::Fallback(Some(FALLBACK)));
    assert_eq!(lookup.address(), Some(FALLBACK));
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[test]
fn stopping_socket_abandons_wait() {
    let gate = gate(Arc::new(Silent::default()), Duration::from_secs(30));
    let active = Arc::new(AtomicBool::new(true));
    let stopper = {
        let active = Arc::clone(&active);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            active.store(false, Ordering::SeqCst);
        })
    };

    let started = Instant::now();
    let lookup = gate.resolve("client", "device.example", None, || {
        active.load(Ordering::SeqCst)
    });
    stopper.join().unwrap();
    assert_eq!(lookup, Lookup::Fallback(None));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn abandoned_wait_releases_gate() {
    let gate = gate(Arc::new(Silent::default()), Duration::from_millis(30));
    assert_eq!(
        gate.resolve("first", "slow.example", None, || true),
        Lookup::Fallback(None)
    );
    assert_eq!(
        gate.resolve("second", "", Some(FALLBACK), || true),
        Lookup::Fallback(Some(FALLBACK))
    );
    assert_eq!(
        gate.resolve("third", "slow.example", Some(FALLBACK), || true),
        Lookup::Fallback(Some(FALLBACK))
    );
}

#[test]
fn refused_request_uses_fallback() {
    let gate = gate(Arc::new(Refusing), Duration::from_secs(1));
    assert_eq!(
        gate.resolve("client", "device.example", Some(FALLBACK), || true),
        Lookup::Fallback(Some(FALLBACK))
    );
}

#[test]
fn empty_url_skips_resolver() {
    let resolver = Arc::new(Delayed::new(Duration::ZERO));
    let gate = gate(resolver.clone(), Duration::from_secs(1));
    assert_eq!(
        gate.resolve("client", "", Some(FALLBACK), || true),
        Lookup::Fallback(Some(FALLBACK))
    );
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
}
