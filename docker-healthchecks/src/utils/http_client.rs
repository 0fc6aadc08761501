use std::time::Duration;

use reqwest::Client;
use tracing::warn;

/// User agent sent with every heartbeat.
pub const USER_AGENT: &str = concat!("docker-healthchecks/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by all heartbeat requests.
///
/// `request_timeout` bounds both connecting and the whole request. Zero
/// disables both limits.
pub fn build_heartbeat_client(request_timeout: Duration) -> Client {
    let mut builder = Client::builder().user_agent(USER_AGENT);

    if request_timeout > Duration::ZERO {
        builder = builder
            .connect_timeout(request_timeout)
            .timeout(request_timeout);
    }

    builder.build().unwrap_or_else(|error| {
        warn!(
            error = %error,
            "Failed to create configured HTTP client; falling back to reqwest defaults"
        );
        Client::new()
    })
}
