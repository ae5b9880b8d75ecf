//! Mental Poker Testing Infrastructure
//!
//! Wires several protocol engines together in one process and supplies
//! controllers that record what the engines tell them.
//!
//! ```rust,ignore
//! let ring = LocalRing::new(4, 52, |_| PermissiveController::default())?;
//! ring.start().await?;
//! let card = ring.peer(0).draw().await?;
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod controller;
pub mod ring;

pub use controller::{ControllerEvent, PermissiveController, TableController, VetoController};
pub use ring::LocalRing;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds, giving spawned peer tasks time to run in
/// between. Returns whether it held within roughly five seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    check()
}
