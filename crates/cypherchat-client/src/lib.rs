pub mod client;
pub mod config;
pub mod contacts;
pub mod error;
pub mod events;
pub mod poller;
pub mod reconcile;
pub mod retry;
pub mod state;

pub use client::{ChatClient, DeployedGateway, GatewayFactory, PendingSend, SessionInfo};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::ChatEvent;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("cypherchat_client=debug,cypherchat_net=debug,cypherchat_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
