//! Endpoint-level tests: handle lifecycle and connection isolation.

use std::sync::{Arc, Mutex};

use arq::{ArqConfig, ArqError, Endpoint};
use bytes::Bytes;

type Captured = Arc<Mutex<Vec<Bytes>>>;

fn capture() -> (Captured, impl FnMut(&[u8]) + Send + 'static) {
    let wire: Captured = Arc::default();
    let sink = wire.clone();
    let output = move |datagram: &[u8]| {
        sink.lock().unwrap().push(Bytes::copy_from_slice(datagram));
    };
    (wire, output)
}

#[test]
fn full_exchange_through_handles() {
    let mut ep = Endpoint::new();
    let a = ep.create(5, ArqConfig::default()).unwrap();
    let b = ep.create(5, ArqConfig::default()).unwrap();

    let (wire_a, out_a) = capture();
    let (wire_b, out_b) = capture();
    ep.set_output(a, out_a).unwrap();
    ep.set_output(b, out_b).unwrap();

    ep.send(a, Bytes::from_static(b"over the wire")).unwrap();
    ep.update(a, 0).unwrap();

    for datagram in wire_a.lock().unwrap().drain(..).collect::<Vec<_>>() {
        ep.input(b, datagram, 10).unwrap();
    }
    assert_eq!(&ep.recv(b, 1024).unwrap()[..], b"over the wire");

    // Acks flow back through the handle surface as well
    ep.update(b, 10).unwrap();
    for datagram in wire_b.lock().unwrap().drain(..).collect::<Vec<_>>() {
        ep.input(a, datagram, 20).unwrap();
    }
    assert_eq!(ep.get(a).unwrap().stats().snd_in_flight, 0);
}

#[test]
fn operations_on_released_handles_fail() {
    let mut ep = Endpoint::new();
    let h = ep.create(1, ArqConfig::default()).unwrap();
    let copy = h;
    ep.release(h).unwrap();

    assert!(matches!(
        ep.send(copy, Bytes::from_static(b"x")),
        Err(ArqError::InvalidHandle)
    ));
    assert!(matches!(ep.recv(copy, 16), Err(ArqError::InvalidHandle)));
    assert!(matches!(ep.update(copy, 0), Err(ArqError::InvalidHandle)));
    assert!(matches!(ep.flush(copy, 0), Err(ArqError::InvalidHandle)));
    assert!(matches!(ep.set_mtu(copy, 1200), Err(ArqError::InvalidHandle)));
}

#[test]
fn connections_are_isolated() {
    let mut ep = Endpoint::new();
    let doomed = ep.create(1, ArqConfig::default().max_retries(1)).unwrap();
    let healthy = ep.create(2, ArqConfig::default()).unwrap();

    let (_wire, out) = capture();
    ep.set_output(doomed, out).unwrap();

    // Nothing ever acks this; the budget of 1 dies on the second expiry
    ep.send(doomed, Bytes::from_static(b"lost cause")).unwrap();
    ep.update(doomed, 0).unwrap();
    let mut died = false;
    for step in 1..=2_000u32 {
        if ep.update(doomed, step * 40).is_err() {
            died = true;
            break;
        }
    }
    assert!(died);
    assert!(ep.get(doomed).unwrap().is_dead());

    // The other connection is untouched
    ep.send(healthy, Bytes::from_static(b"fine")).unwrap();
    ep.update(healthy, 0).unwrap();
    assert!(!ep.get(healthy).unwrap().is_dead());
}

#[test]
fn tuning_passthroughs_apply() {
    let mut ep = Endpoint::new();
    let h = ep.create(9, ArqConfig::default()).unwrap();

    ep.set_window_size(h, 64, 256).unwrap();
    ep.set_mtu(h, 900).unwrap();
    ep.set_nodelay(h, arq::DelayConfig::fast()).unwrap();

    let config = ep.get(h).unwrap().config();
    assert_eq!(config.snd_wnd, 64);
    assert_eq!(config.rcv_wnd, 256);
    assert_eq!(config.mtu, 900);
    assert!(config.delay.nodelay);

    assert!(ep.set_mtu(h, 1).is_err());
    assert_eq!(ep.get(h).unwrap().config().mtu, 900);
}
