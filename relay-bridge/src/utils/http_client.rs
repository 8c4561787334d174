use std::{sync::OnceLock, time::Duration};

use tracing::debug;

/// User agent sent on index, gateway and message-unit requests.
pub const USER_AGENT: &str = concat!("relay-bridge/", env!("CARGO_PKG_VERSION"));

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared `reqwest::Client`.
///
/// No overall timeout is set on the client; each caller applies its own per
/// request (index queries, relayed calls and ledger writes differ widely).
pub fn build_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    install_rustls_provider();

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}
