//! Execution context lifecycle and tunnel control through contexts.
//!
//! These tests use the memory backend so nothing touches the host network.
//! Contexts own a runtime, so the tests are plain `#[test]` functions.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::{TempDir, tempdir};
use tunnelctl_core::platform::MemoryPlatform;
use tunnelctl_core::{
    Config, DownOutcome, ErrorCode, IsolateManager, ReservedFlags, TunnelError, TunnelState,
};

const TUNNEL_CONF: &str = "[Interface]
PrivateKey = OMX3U47NyJYiSdkIHAv/J3H46ERMhRaAOozcbfMjRZE=
Address = 10.20.0.2/32
DNS = 10.20.0.1

[Peer]
PublicKey = dmSZae1jaLWArRrESamuHRWqUjkYvEGNzwsdTNGWv1k=
Endpoint = vpn.example.com:51820
AllowedIPs = 0.0.0.0/0, ::/0
";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tunnelctl_core=debug")
        .with_test_writer()
        .try_init();
}

struct Fixture {
    dir: TempDir,
    manager: IsolateManager,
    platform: Arc<MemoryPlatform>,
}

fn fixture(max_isolates: usize) -> Fixture {
    init_tracing();
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("tunnel.conf"), TUNNEL_CONF).unwrap();

    let mut config = Config::default();
    config.isolate.max_isolates = max_isolates;
    config.tunnel.search_path = vec![dir.path().to_path_buf()];

    let platform = Arc::new(MemoryPlatform::new());
    let manager = IsolateManager::new(&config, platform.clone());
    Fixture {
        dir,
        manager,
        platform,
    }
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

#[test]
fn up_returns_non_zero_handle_and_down_stops_it() {
    let fx = fixture(4);
    let conf = path_str(&fx.dir.path().join("tunnel.conf"));
    let mut ctx = fx.manager.create().unwrap();

    let handle = ctx.up(&conf, ReservedFlags::NONE).unwrap();
    assert!(handle.get() > 0);
    assert_eq!(ctx.last_error_code(), ErrorCode::Ok);
    assert_eq!(ctx.state(&conf).unwrap(), TunnelState::Up);

    let info = ctx.controller().tunnel(handle).unwrap();
    assert_eq!(info.interface, "tunnel");
    assert_eq!(info.peers, 1);

    assert_eq!(
        ctx.down(&conf, ReservedFlags::NONE).unwrap(),
        DownOutcome::Stopped
    );
    assert_eq!(ctx.state(&conf).unwrap(), TunnelState::Down);
    ctx.teardown();

    assert_eq!(fx.manager.live_isolates(), 0);
}

#[test]
fn second_up_fails_with_already_up() {
    let fx = fixture(4);
    let mut ctx = fx.manager.create().unwrap();

    ctx.up("tunnel", ReservedFlags::NONE).unwrap();
    let err = ctx.up("tunnel", ReservedFlags::NONE).unwrap_err();
    assert!(matches!(err, TunnelError::AlreadyUp(_)));
    assert_eq!(ctx.last_error_code().as_i32(), 4);
    assert!(fx.platform.adapter("tunnel").is_some());
}

#[test]
fn up_down_up_yields_a_different_handle() {
    let fx = fixture(4);
    let mut ctx = fx.manager.create().unwrap();

    let first = ctx.up("tunnel", ReservedFlags::NONE).unwrap();
    ctx.down("tunnel", ReservedFlags::NONE).unwrap();
    let second = ctx.up("tunnel", ReservedFlags::NONE).unwrap();
    assert_ne!(first, second);
}

#[test]
fn missing_configuration_reports_config_not_found() {
    let fx = fixture(4);
    let missing = path_str(&fx.dir.path().join("missing.conf"));
    let mut ctx = fx.manager.create().unwrap();

    let err = ctx.up(&missing, ReservedFlags::NONE).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigNotFound);
    assert_eq!(ctx.last_error_code(), ErrorCode::ConfigNotFound);
    assert_ne!(ctx.last_error_code().as_i32(), 0);
}

#[test]
fn down_on_a_down_tunnel_succeeds() {
    let fx = fixture(4);
    let mut ctx = fx.manager.create().unwrap();

    for _ in 0..2 {
        assert_eq!(
            ctx.down("tunnel", ReservedFlags::NONE).unwrap(),
            DownOutcome::AlreadyDown
        );
        assert_eq!(ctx.last_error_code(), ErrorCode::Ok);
    }
    assert_eq!(ctx.state("tunnel").unwrap(), TunnelState::Down);
}

#[test]
fn tunnel_state_outlives_the_context_that_created_it() {
    let fx = fixture(4);
    let conf = path_str(&fx.dir.path().join("tunnel.conf"));

    let mut first = fx.manager.create().unwrap();
    first.up(&conf, ReservedFlags::NONE).unwrap();
    first.teardown();

    let mut second = fx.manager.create().unwrap();
    assert_eq!(second.state(&conf).unwrap(), TunnelState::Up);
    assert_eq!(
        second.down(&conf, ReservedFlags::NONE).unwrap(),
        DownOutcome::Stopped
    );
}

#[test]
fn inline_configuration_uses_the_default_interface() {
    let fx = fixture(4);
    let mut ctx = fx.manager.create().unwrap();

    let handle = ctx.up(TUNNEL_CONF, ReservedFlags::NONE).unwrap();
    assert_eq!(ctx.controller().tunnel(handle).unwrap().interface, "wg0");
    assert!(fx.platform.adapter("wg0").is_some());
}

#[test]
fn invalid_configuration_reports_invalid_config() {
    let fx = fixture(4);
    fs::write(fx.dir.path().join("broken.conf"), "[Interface]\nListenPort = x\n").unwrap();
    let mut ctx = fx.manager.create().unwrap();

    let err = ctx.up("broken", ReservedFlags::NONE).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidConfig);
}

#[test]
fn every_exit_path_releases_the_context() {
    let fx = fixture(1);

    // Early return through `?`
    let result: Result<(), TunnelError> = fx.manager.scoped(|ctx| {
        ctx.up("nope", ReservedFlags::NONE)?;
        unreachable!("up of a missing configuration succeeded");
    });
    assert!(result.is_err());
    assert_eq!(fx.manager.live_isolates(), 0);

    // Success
    let handle = fx
        .manager
        .scoped(|ctx| ctx.up("tunnel", ReservedFlags::NONE))
        .unwrap();
    assert_eq!(handle.get(), 1);
    assert_eq!(fx.manager.live_isolates(), 0);

    // Panic inside the closure
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = fx.manager.scoped(|_ctx| -> Result<(), TunnelError> {
            panic!("caller bug");
        });
    }));
    assert!(outcome.is_err());
    assert_eq!(fx.manager.live_isolates(), 0);

    // The single slot is free again
    let ctx = fx.manager.create().unwrap();
    drop(ctx);
}

#[test]
fn pool_exhaustion_is_an_initialization_failure() {
    let fx = fixture(1);
    let held = fx.manager.create().unwrap();

    let err = fx.manager.create().unwrap_err();
    assert_eq!(err.code(), ErrorCode::ResourceExhausted);

    let scoped: Result<(), TunnelError> = fx.manager.scoped(|_| Ok(()));
    assert_eq!(scoped.unwrap_err().code(), ErrorCode::ResourceExhausted);

    held.teardown();
    assert!(fx.manager.create().is_ok());
}
