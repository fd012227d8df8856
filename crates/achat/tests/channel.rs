//! End-to-end channel tests over real UNIX-domain and TCP loopback sockets.

use achat::constants::MAX_MSGSIZE;
use achat::{
    AchatError, BlockingMode, Channel, ChannelAddr, ChannelConfig, ChannelState, ResultCode, Role,
    WritableNotify,
};

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

static SEQ: AtomicUsize = AtomicUsize::new(0);

fn sock_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "achat-it-{}-{}-{}.sock",
        tag,
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}

fn server(addr: ChannelAddr) -> Channel {
    let mut ch = ChannelConfig::new()
        .role(Role::Server)
        .address(addr)
        .build()
        .unwrap();
    ch.prepare().unwrap();
    assert_eq!(ch.state(), ChannelState::NotConnected);
    ch
}

fn client(addr: ChannelAddr, blocking: BlockingMode) -> Channel {
    let mut ch = ChannelConfig::new()
        .role(Role::Client)
        .address(addr)
        .blocking(blocking)
        .build()
        .unwrap();
    ch.prepare().unwrap();
    ch
}

/// Open a client, retrying while a non-blocking connect is in flight.
fn open(ch: &mut Channel) {
    for _ in 0..1000 {
        match ch.open() {
            Ok(()) => return,
            Err(AchatError::Pending) => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("open failed: {e}"),
        }
    }
    panic!("connect never completed");
}

fn unix_pair(tag: &str, client_mode: BlockingMode) -> (Channel, Channel, Channel, PathBuf) {
    let path = sock_path(tag);
    let srv = server(ChannelAddr::unix(&path));
    let mut cli = client(ChannelAddr::unix(&path), client_mode);
    open(&mut cli);
    let conn = srv.accept_duplicate().unwrap();
    (srv, cli, conn, path)
}

fn recv(ch: &mut Channel) -> Vec<u8> {
    let mut buf = vec![0u8; MAX_MSGSIZE];
    let n = ch.receive_message(&mut buf).unwrap();
    buf.truncate(n);
    buf
}

#[derive(Default)]
struct CountingHook {
    armed: AtomicUsize,
}

impl WritableNotify for CountingHook {
    fn arm(&self, _fd: i32) {
        self.armed.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn unix_round_trip_both_directions() {
    let (_srv, mut cli, mut conn, _path) = unix_pair("rt", BlockingMode::Blocking);
    assert_eq!(cli.state(), ChannelState::Established);
    assert_eq!(conn.state(), ChannelState::Established);
    assert_eq!(conn.role(), Some(Role::Client));

    for payload in [&b"x"[..], b"hello achat", &vec![0xa5u8; MAX_MSGSIZE][..]] {
        cli.send_message(payload).unwrap();
        assert_eq!(recv(&mut conn), payload);

        conn.send_message(payload).unwrap();
        assert_eq!(recv(&mut cli), payload);
    }
}

#[test]
fn messages_arrive_in_send_order() {
    let (_srv, mut cli, mut conn, _path) = unix_pair("order", BlockingMode::Blocking);
    for i in 0..20u8 {
        cli.send_message(&[i; 3]).unwrap();
    }
    for i in 0..20u8 {
        assert_eq!(recv(&mut conn), vec![i; 3]);
    }
}

#[test]
fn unix_peer_credentials_are_own_identity() {
    let (_srv, cli, conn, _path) = unix_pair("cred", BlockingMode::Blocking);
    let euid = unsafe { libc::geteuid() };
    let egid = unsafe { libc::getegid() };

    let c = conn.peer_credentials().expect("accepted side has credentials");
    assert_eq!((c.euid, c.egid), (euid, egid));
    let c = cli.peer_credentials().expect("client side has credentials");
    assert_eq!((c.euid, c.egid), (euid, egid));
}

#[test]
fn tcp_round_trip_without_credentials() {
    let srv = server("127.0.0.1:0".parse().unwrap());
    let bound = srv.local_address().unwrap();
    match &bound {
        ChannelAddr::Inet(sa) => assert_ne!(sa.port(), 0),
        other => panic!("unexpected address {other}"),
    }

    let mut cli = client(bound, BlockingMode::NonBlocking);
    open(&mut cli);
    let mut conn = srv.accept_duplicate().unwrap();

    assert!(cli.peer_credentials().is_none());
    assert!(conn.peer_credentials().is_none());

    cli.send_message(b"over tcp").unwrap();
    assert_eq!(recv(&mut conn), b"over tcp");
}

#[test]
fn listener_accepts_repeatedly() {
    let path = sock_path("multi");
    let srv = server(ChannelAddr::unix(&path));

    let mut a = client(ChannelAddr::unix(&path), BlockingMode::Blocking);
    let mut b = client(ChannelAddr::unix(&path), BlockingMode::Blocking);
    open(&mut a);
    open(&mut b);

    let mut ca = srv.accept_duplicate().unwrap();
    let mut cb = srv.accept_duplicate().unwrap();
    assert_eq!(srv.state(), ChannelState::NotConnected);
    assert_ne!(ca.raw_fd(), cb.raw_fd());

    a.send_message(b"from a").unwrap();
    b.send_message(b"from b").unwrap();
    assert_eq!(recv(&mut ca), b"from a");
    assert_eq!(recv(&mut cb), b"from b");
}

#[test]
fn open_before_prepare_is_wrong_state() {
    let mut ch = ChannelConfig::new()
        .role(Role::Client)
        .address(ChannelAddr::unix(sock_path("early")))
        .build()
        .unwrap();
    let err = ch.open().unwrap_err();
    assert_eq!(err.code(), ResultCode::WrongState);
    assert!(ch.raw_fd().is_none());
    assert_eq!(ch.state(), ChannelState::Initialised);
}

#[test]
fn role_specific_operations_are_rejected() {
    let path = sock_path("roles");
    let mut srv = server(ChannelAddr::unix(&path));
    assert!(matches!(srv.open(), Err(AchatError::InvalidParameter(_))));

    let cli = client(ChannelAddr::unix(&path), BlockingMode::Blocking);
    assert!(matches!(cli.accept_duplicate(), Err(AchatError::InvalidParameter(_))));
}

#[test]
fn configuration_locked_while_socket_open() {
    let path = sock_path("locked");
    let mut srv = server(ChannelAddr::unix(&path));
    assert_eq!(srv.set_role(Role::Client).unwrap_err().code(), ResultCode::WrongState);
    assert_eq!(
        srv.set_blocking_mode(BlockingMode::NonBlocking).unwrap_err().code(),
        ResultCode::WrongState
    );
    assert_eq!(
        srv.set_address(ChannelAddr::unix("/tmp/elsewhere.sock")).unwrap_err().code(),
        ResultCode::WrongState
    );

    srv.close().unwrap();
    srv.set_role(Role::Server).unwrap();
    assert_eq!(srv.state(), ChannelState::Initialised);

    // A closed channel can be brought up again
    srv.prepare().unwrap();
    assert_eq!(srv.state(), ChannelState::NotConnected);
    srv.close().unwrap();
    assert!(!path.exists());
}

#[test]
fn unix_server_socket_is_world_accessible_and_removed_on_close() {
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    let path = sock_path("cleanup");
    // A stale file from an earlier run must not block bind
    std::fs::File::create(&path).unwrap();

    let mut srv = server(ChannelAddr::unix(&path));
    let meta = std::fs::metadata(&path).unwrap();
    assert!(meta.file_type().is_socket());
    assert_eq!(meta.permissions().mode() & 0o777, 0o777);

    srv.close().unwrap();
    assert!(!path.exists());
    assert_eq!(srv.state(), ChannelState::Closed);

    // Second close is a no-op
    srv.close().unwrap();
}

#[test]
fn failed_client_leaves_no_files() {
    let path = sock_path("nosrv");
    let mut cli = client(ChannelAddr::unix(&path), BlockingMode::Blocking);
    let err = cli.open().unwrap_err();
    assert_eq!(err.code(), ResultCode::Error);
    assert_eq!(cli.state(), ChannelState::Initialised);
    assert!(cli.raw_fd().is_none());

    cli.destroy().unwrap();
    assert!(!path.exists());
}

#[test]
fn accepted_channel_does_not_unlink_listener_path() {
    let (srv, _cli, conn, path) = unix_pair("keep", BlockingMode::Blocking);
    conn.destroy().unwrap();
    assert!(path.exists());
    srv.destroy().unwrap();
    assert!(!path.exists());
}

#[test]
fn peer_close_reports_end_of_file() {
    let (_srv, mut cli, mut conn, _path) = unix_pair("eof", BlockingMode::Blocking);
    cli.close().unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(conn.receive_message(&mut buf), Err(AchatError::EndOfFile));
}

#[test]
fn send_to_vanished_peer_is_an_error() {
    let (_srv, mut cli, conn, _path) = unix_pair("epipe", BlockingMode::Blocking);
    drop(conn);
    let err = cli.send_message(b"anyone there?").unwrap_err();
    assert_eq!(err.code(), ResultCode::Error);
    assert_eq!(err.errno(), Some(libc::EPIPE));
}

#[test]
fn undersized_buffer_then_retry() {
    let (_srv, mut cli, mut conn, _path) = unix_pair("nospace", BlockingMode::Blocking);
    let payload = vec![7u8; 1000];
    cli.send_message(&payload).unwrap();

    let mut small = vec![0u8; 999];
    assert_eq!(
        conn.receive_message(&mut small),
        Err(AchatError::NoSpace { needed: 1000 })
    );
    // The peer is gone; the retry must be served from the buffer alone
    cli.close().unwrap();
    assert_eq!(recv(&mut conn), payload);
}

#[test]
fn empty_frame_from_raw_peer() {
    let path = sock_path("empty");
    let srv = server(ChannelAddr::unix(&path));
    let mut raw = std::os::unix::net::UnixStream::connect(&path).unwrap();
    let mut conn = srv.accept_duplicate().unwrap();

    raw.write_all(&[0, 0, 0, 4]).unwrap();
    raw.write_all(&[0, 0, 0, 9, b'a', b'f', b't', b'e', b'r']).unwrap();

    let mut buf = [0u8; 32];
    assert_eq!(conn.receive_message(&mut buf), Ok(0));
    assert_eq!(conn.receive_message(&mut buf), Ok(5));
    assert_eq!(&buf[..5], b"after");
    assert_eq!(conn.buffered_input(), 0);
}

#[test]
fn corrupt_prefix_from_raw_peer() {
    let path = sock_path("corrupt");
    let srv = server(ChannelAddr::unix(&path));
    let mut raw = std::os::unix::net::UnixStream::connect(&path).unwrap();
    let mut conn = srv.accept_duplicate().unwrap();

    raw.write_all(&[0, 0, 0, 1]).unwrap();
    let mut buf = [0u8; 32];
    let err = conn.receive_message(&mut buf).unwrap_err();
    assert_eq!(err, AchatError::CorruptFrame(1));
    assert_eq!(err.code(), ResultCode::Error);
}

#[test]
fn partial_writes_resume_with_flush() {
    const MSG: usize = 64 * 1024;

    let (_srv, mut cli, mut conn, _path) = unix_pair("partial", BlockingMode::NonBlocking);
    let hook = Arc::new(CountingHook::default());
    cli.register_writable(&hook);

    // Queue messages until the socket pushes back
    let mut sent = 0usize;
    loop {
        let msg = vec![sent as u8; MSG];
        match cli.send_message(&msg) {
            Ok(()) => sent += 1,
            Err(AchatError::Pending) => {
                sent += 1;
                break;
            }
            Err(e) => panic!("send failed: {e}"),
        }
        assert!(sent < 64, "socket never reported back-pressure");
    }
    assert!(cli.pending_output() > 0);
    assert!(hook.armed.load(Ordering::Relaxed) >= 1);

    let reader = std::thread::spawn(move || {
        let mut got = Vec::with_capacity(sent);
        for _ in 0..sent {
            got.push(recv(&mut conn));
        }
        got
    });

    loop {
        match cli.flush() {
            Ok(()) => break,
            Err(AchatError::Pending) => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("flush failed: {e}"),
        }
    }
    assert_eq!(cli.pending_output(), 0);

    let got = reader.join().unwrap();
    assert_eq!(got.len(), sent);
    for (i, msg) in got.iter().enumerate() {
        assert_eq!(msg.len(), MSG);
        assert!(msg.iter().all(|&b| b == i as u8), "message {i} corrupted");
    }
}

#[test]
fn nonblocking_receive_is_pending_until_data() {
    let (_srv, mut cli, _conn, _path) = unix_pair("nbrecv", BlockingMode::NonBlocking);
    let mut buf = [0u8; 8];
    let err = cli.receive_message(&mut buf).unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.code(), ResultCode::Pending);
}
