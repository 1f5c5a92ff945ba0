//! End-to-end tests: real client, mock daemon, real descriptors.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use crate::testing::MockDaemon;
use crate::{Addr, Client, Conn, Error};

fn daemon() -> (TempDir, MockDaemon) {
    let dir = tempfile::tempdir().unwrap();
    let daemon = MockDaemon::start(dir.path().join("pattyd.sock")).unwrap();
    (dir, daemon)
}

fn with_station(station: &str) -> (TempDir, MockDaemon) {
    let dir = tempfile::tempdir().unwrap();
    let daemon =
        MockDaemon::with_station(dir.path().join("pattyd.sock"), Addr::parse(station).unwrap())
            .unwrap();
    (dir, daemon)
}

/// Listen on `local` through client A, dial it through client B, and
/// return (accepted, dialed).
fn connected_pair(a: &Client, b: &Client, local: &str) -> (Conn, Conn) {
    let listener = a.listen("ax25", local).unwrap();
    thread::scope(|s| {
        let acceptor = s.spawn(|| listener.accept());
        let dialed = b.dial("ax25", local).unwrap();
        let accepted = acceptor.join().unwrap().unwrap();
        (accepted, dialed)
    })
}

/// Poll `cond` until it holds, failing the test after a few seconds.
fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

// ─── Client ────────────────────────────────────────────────────────────────

#[test]
fn test_open_nonexistent_socket_is_connect_failure() {
    let dir = tempfile::tempdir().unwrap();
    let err = Client::open(dir.path().join("nobody-home.sock")).unwrap_err();
    assert!(matches!(err, Error::ConnectFailure { .. }), "{err:?}");
}

#[test]
fn test_ping_and_socket_path() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    client.ping().unwrap();
    assert_eq!(client.socket_path(), daemon.socket_path());
}

#[test]
fn test_use_after_client_close() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    client.close().unwrap();
    assert!(client.is_closed());

    assert!(client.close().unwrap_err().is_use_after_close());
    assert!(client.ping().unwrap_err().is_use_after_close());
    assert!(client.dial("ax25", "N0CALL").unwrap_err().is_use_after_close());
    assert!(client.listen("ax25", "N0CALL").unwrap_err().is_use_after_close());
}

// ─── Dial ──────────────────────────────────────────────────────────────────

#[test]
fn test_dial_unsupported_network_makes_no_daemon_call() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    for network in ["tcp", "unix", "AX25", ""] {
        let err = client.dial(network, "N0CALL-1").unwrap_err();
        assert!(matches!(err, Error::UnsupportedNetwork(_)), "{err:?}");
    }
    assert_eq!(daemon.request_count(), 0);
}

#[test]
fn test_dial_invalid_address_makes_no_daemon_call() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let err = client.dial("ax25", "TOOLONG1-1").unwrap_err();
    assert!(matches!(err, Error::InvalidAddress { .. }), "{err:?}");
    assert_eq!(daemon.request_count(), 0);
}

#[test]
fn test_dial_refused_closes_socket() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let err = client.dial("ax25", "W1AW-5").unwrap_err();
    assert!(matches!(err, Error::ConnectFailure { .. }), "{err:?}");
    assert_eq!(err.errno(), Some(libc::ECONNREFUSED));
    assert_eq!(daemon.open_sockets(), 0);
}

#[test]
fn test_dialed_conn_has_no_local_addr() {
    let (_dir, daemon) = daemon();
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();
    let (_accepted, dialed) = connected_pair(&a, &b, "K3XEC-10");
    assert_eq!(dialed.local_addr(), None);
    assert_eq!(dialed.remote_addr().to_string(), "K3XEC-10");
}

// ─── Listen / Accept ───────────────────────────────────────────────────────

#[test]
fn test_listener_reports_bound_addr() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let listener = client.listen("ax25", "k3xec-10").unwrap();
    assert_eq!(listener.addr().to_string(), "K3XEC-10");
    assert_eq!(listener.addr().network(), "ax25");
}

#[test]
fn test_listen_unsupported_network() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let err = client.listen("udp", "K3XEC").unwrap_err();
    assert!(matches!(err, Error::UnsupportedNetwork(_)), "{err:?}");
    assert_eq!(daemon.request_count(), 0);
}

#[test]
fn test_listen_bind_conflict_closes_socket() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let _first = client.listen("ax25", "K3XEC-1").unwrap();
    assert_eq!(daemon.open_sockets(), 1);

    let err = client.listen("ax25", "K3XEC-1").unwrap_err();
    assert!(matches!(err, Error::DaemonError { op: "bind", .. }), "{err:?}");
    assert_eq!(err.errno(), Some(libc::EADDRINUSE));
    assert_eq!(daemon.open_sockets(), 1);
}

#[test]
fn test_accept_after_listener_close_fails_fast() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let listener = client.listen("ax25", "K3XEC-10").unwrap();
    listener.close().unwrap();

    let before = daemon.request_count();
    let err = listener.accept().unwrap_err();
    assert!(matches!(err, Error::AcceptFailure(_)), "{err:?}");
    assert_eq!(daemon.request_count(), before);
    assert!(listener.close().unwrap_err().is_use_after_close());
    assert!(listener.incoming().next().is_none());
}

#[test]
fn test_listener_close_keeps_accepted_conns() {
    let (_dir, daemon) = daemon();
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();

    let listener = a.listen("ax25", "K3XEC-2").unwrap();
    let (mut accepted, mut dialed) = thread::scope(|s| {
        let acceptor = s.spawn(|| listener.accept());
        let dialed = b.dial("ax25", "K3XEC-2").unwrap();
        (acceptor.join().unwrap().unwrap(), dialed)
    });
    listener.close().unwrap();

    dialed.write_all(b"still here").unwrap();
    let mut buf = [0u8; 10];
    accepted.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"still here");
}

#[test]
fn test_incoming_yields_connections() {
    let (_dir, daemon) = daemon();
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();
    let listener = a.listen("ax25", "K3XEC-3").unwrap();

    // Both dials queue on the daemon before anyone accepts
    let _one = b.dial("ax25", "K3XEC-3").unwrap();
    let _two = b.dial("ax25", "K3XEC-3").unwrap();

    let accepted: Vec<Conn> = listener.incoming().take(2).map(Result::unwrap).collect();
    assert_eq!(accepted.len(), 2);
    for conn in &accepted {
        assert_eq!(conn.local_addr().map(|a| a.to_string()), Some("K3XEC-3".into()));
    }
}

#[test]
fn test_listener_close_during_accept_ends_the_wait() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let listener = client.listen("ax25", "K3XEC-12").unwrap();
    let setup = daemon.request_count();

    thread::scope(|s| {
        let acceptor = s.spawn(|| listener.accept());
        wait_until("accept request", || daemon.request_count() > setup);

        listener.close().unwrap();
        let err = acceptor.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::AcceptFailure(_)), "{err:?}");
    });
    assert_eq!(daemon.open_sockets(), 0);
}

#[test]
fn test_client_close_during_accept_ends_the_wait() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let listener = client.listen("ax25", "K3XEC-14").unwrap();
    let setup = daemon.request_count();

    thread::scope(|s| {
        let acceptor = s.spawn(|| listener.accept());
        wait_until("accept request", || daemon.request_count() > setup);

        client.close().unwrap();
        let err = acceptor.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::AcceptFailure(_)), "{err:?}");
    });
    wait_until("sockets reclaimed", || daemon.open_sockets() == 0);
}

#[test]
fn test_same_client_dials_while_accept_waits() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    let listener = client.listen("ax25", "K3XEC-13").unwrap();
    let setup = daemon.request_count();

    let (mut accepted, mut dialed) = thread::scope(|s| {
        let acceptor = s.spawn(|| listener.accept());
        wait_until("accept request", || daemon.request_count() > setup);

        client.ping().unwrap();
        let dialed = client.dial("ax25", "K3XEC-13").unwrap();
        (acceptor.join().unwrap().unwrap(), dialed)
    });

    assert_eq!(accepted.remote_addr(), daemon.station());
    dialed.write_all(b"loop").unwrap();
    let mut buf = [0u8; 4];
    accepted.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"loop");
}

#[test]
fn test_one_client_shared_by_many_threads() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();

    thread::scope(|s| {
        for station in 0..8u8 {
            let client = &client;
            s.spawn(move || {
                for round in 1..=6u8 {
                    let address = format!("T{station}ST-{round}");
                    client.ping().unwrap();
                    let listener = client.listen("ax25", &address).unwrap();
                    assert_eq!(listener.addr().to_string(), address);

                    let mut dialed = client.dial("ax25", &address).unwrap();
                    let mut accepted = listener.accept().unwrap();
                    dialed.write_all(&[station, round]).unwrap();
                    let mut buf = [0u8; 2];
                    accepted.read_exact(&mut buf).unwrap();
                    assert_eq!(buf, [station, round]);

                    dialed.close().unwrap();
                    accepted.close().unwrap();
                    listener.close().unwrap();
                }
            });
        }
    });

    assert_eq!(daemon.open_sockets(), 0);
    client.ping().unwrap();
}

// ─── Stream connection ─────────────────────────────────────────────────────

#[test]
fn test_end_to_end_bytes_flow_both_ways() {
    let (_dir, daemon) = with_station("N0CALL-7");
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();
    let (mut accepted, mut dialed) = connected_pair(&a, &b, "K3XEC-10");

    assert_eq!(accepted.remote_addr(), daemon.station());
    assert_eq!(accepted.remote_addr().to_string(), "N0CALL-7");
    assert_eq!(accepted.local_addr().map(|a| a.to_string()), Some("K3XEC-10".into()));

    dialed.write_all(b"hello from B").unwrap();
    let mut buf = [0u8; 12];
    accepted.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello from B");

    accepted.write_all(b"73 de A").unwrap();
    let mut buf = [0u8; 7];
    dialed.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"73 de A");
}

#[test]
fn test_shared_reference_io() {
    let (_dir, daemon) = daemon();
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();
    let (accepted, dialed) = connected_pair(&a, &b, "K3XEC-4");

    thread::scope(|s| {
        s.spawn(|| (&dialed).write_all(b"abc").unwrap());
        let mut buf = [0u8; 3];
        (&accepted).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    });
}

#[test]
fn test_close_then_io_is_not_connected() {
    let (_dir, daemon) = daemon();
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();
    let (mut accepted, mut dialed) = connected_pair(&a, &b, "K3XEC-5");

    dialed.close().unwrap();
    assert!(dialed.is_closed());
    assert!(dialed.close().unwrap_err().is_use_after_close());

    let err = dialed.write(b"x").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    let err = dialed.read(&mut [0u8; 1]).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);

    // The peer sees end of stream once the dialer's copy is gone
    let mut rest = Vec::new();
    accepted.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_close_releases_daemon_sockets() {
    let (_dir, daemon) = daemon();
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();
    let listener = a.listen("ax25", "K3XEC-6").unwrap();
    let (accepted, dialed) = thread::scope(|s| {
        let acceptor = s.spawn(|| listener.accept());
        let dialed = b.dial("ax25", "K3XEC-6").unwrap();
        (acceptor.join().unwrap().unwrap(), dialed)
    });
    assert_eq!(daemon.open_sockets(), 3);

    dialed.close().unwrap();
    accepted.close().unwrap();
    listener.close().unwrap();
    assert_eq!(daemon.open_sockets(), 0);
}

#[test]
fn test_drop_closes_best_effort() {
    let (_dir, daemon) = daemon();
    let client = daemon.client().unwrap();
    {
        let _listener = client.listen("ax25", "K3XEC-8").unwrap();
        assert_eq!(daemon.open_sockets(), 1);
    }
    assert_eq!(daemon.open_sockets(), 0);
}

#[test]
fn test_deadlines_not_implemented() {
    let (_dir, daemon) = daemon();
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();
    let (accepted, _dialed) = connected_pair(&a, &b, "K3XEC-9");

    let soon = Some(std::time::Instant::now());
    for deadline in [None, soon] {
        assert!(matches!(accepted.set_deadline(deadline), Err(Error::NotImplemented(_))));
        assert!(matches!(accepted.set_read_deadline(deadline), Err(Error::NotImplemented(_))));
        assert!(matches!(accepted.set_write_deadline(deadline), Err(Error::NotImplemented(_))));
    }
}

#[test]
fn test_conn_ops_after_client_close() {
    let (_dir, daemon) = daemon();
    let a = daemon.client().unwrap();
    let b = daemon.client().unwrap();
    let (_accepted, dialed) = connected_pair(&a, &b, "K3XEC-11");

    b.close().unwrap();
    assert!(dialed.close().unwrap_err().is_use_after_close());
    // The stream was still released
    assert!(dialed.is_closed());
}

#[test]
fn test_handles_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Client>();
    assert_send_sync::<Conn>();
    assert_send_sync::<crate::Listener>();
}
