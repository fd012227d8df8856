//! achat echo
//!
//! Server: accepts connections and sends every message straight back.
//! Client: sends each stdin line as one message and prints the reply.
//!
//! Usage:
//!     achat-echo server [addr]
//!     achat-echo client [addr]
//!
//! `addr` is a socket path or `host:port`; without it `ACHAT_ADDR` is used
//! (default 127.0.0.1:4000).
//!
//! Logging: `ACHAT_LOG=debug achat-echo server /tmp/echo.sock`

use achat::constants::MAX_MSGSIZE;
use achat::{AchatError, BlockingMode, Channel, ChannelAddr, ChannelConfig, Role};
use achat_core::env::env_get_str;

use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_new(env_get_str("ACHAT_LOG", "info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn usage() -> ExitCode {
    eprintln!("usage: achat-echo <server|client> [socket-path | host:port]");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let Some(role) = args.get(1).and_then(|s| s.parse::<Role>().ok()) else {
        return usage();
    };

    let mut cfg = match ChannelConfig::from_env() {
        Ok(cfg) => cfg.role(role),
        Err(e) => {
            error!(error = %e, "bad environment configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(s) = args.get(2) {
        match s.parse::<ChannelAddr>() {
            Ok(addr) => cfg = cfg.address(addr),
            Err(e) => {
                error!(addr = %s, error = %e, "bad address");
                return usage();
            }
        }
    }
    // The loops below wait on the socket by blocking in the kernel.
    cfg = cfg.blocking(BlockingMode::Blocking);

    let res = match role {
        Role::Server => serve(&cfg),
        Role::Client => client(&cfg),
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, code = ?e.code(), "achat-echo failed");
            ExitCode::FAILURE
        }
    }
}

fn serve(cfg: &ChannelConfig) -> achat::Result<()> {
    let mut listener = cfg.build()?;
    listener.prepare()?;
    info!(addr = %listener.local_address()?, "listening");

    let mut failures = 0u32;
    loop {
        let conn = match listener.accept_duplicate() {
            Ok(conn) => conn,
            // EMFILE and friends: keep serving the clients we have
            Err(e) if e.errno().is_some() => {
                failures = failures.saturating_add(1);
                let delay = accept_backoff(failures);
                warn!(error = %e, failures, ?delay, "accept failed");
                std::thread::sleep(delay);
                continue;
            }
            Err(e) => {
                let _ = listener.close();
                return Err(e);
            }
        };
        failures = 0;
        info!(peer = ?conn.peer_credentials(), fd = ?conn.raw_fd(), "client connected");
        std::thread::spawn(move || echo_loop(conn));
    }
}

/// Delay before retrying after `failures` consecutive accept errors:
/// 10ms doubling up to 1s.
fn accept_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(7);
    Duration::from_millis((10u64 << shift).min(1000))
}

fn echo_loop(mut conn: Channel) {
    let mut buf = vec![0u8; MAX_MSGSIZE];
    loop {
        let n = match conn.receive_message(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(AchatError::EndOfFile) => {
                info!(fd = ?conn.raw_fd(), "client disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "receive failed");
                break;
            }
        };
        if let Err(e) = conn.send_message(&buf[..n]) {
            warn!(error = %e, "send failed");
            break;
        }
    }
    if let Err(e) = conn.destroy() {
        warn!(error = %e, "close failed");
    }
}

fn client(cfg: &ChannelConfig) -> achat::Result<()> {
    let mut ch = cfg.build()?;
    ch.prepare()?;
    ch.open()?;
    info!(addr = ?ch.address(), peer = ?ch.peer_credentials(), "connected");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    let mut reply = vec![0u8; MAX_MSGSIZE];

    for line in stdin.lock().lines().map_while(|l| l.ok()) {
        if line.is_empty() {
            continue;
        }
        ch.send_message(line.as_bytes())?;
        let n = ch.receive_message(&mut reply)?;
        let _ = writeln!(stdout, "{}", String::from_utf8_lossy(&reply[..n]));
    }
    ch.destroy()
}
