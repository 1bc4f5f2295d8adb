use std::{net::SocketAddr, time::Duration};

use baton_tokens::TokenIssuer;
use clap::Parser;

const DEFAULT_LISTEN: &str = "127.0.0.1:1234";

/// Configuration for the demo authority
///
/// Every option can also be supplied through its environment variable, or a
/// `.env` file in the working directory.
#[derive(Clone, Debug, Parser)]
#[command(name = "baton_server", version, about)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "BATON_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Shared secret used to sign and verify tokens
    #[arg(
        long,
        env = "BATON_JWT_SECRET",
        default_value = "mykey",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub jwt_secret: String,

    /// Lifetime of access tokens, in seconds
    #[arg(long, env = "BATON_ACCESS_TTL_SECS", default_value_t = 60 * 60)]
    pub access_ttl_secs: u64,

    /// Lifetime of refresh tokens, in seconds
    #[arg(long, env = "BATON_REFRESH_TTL_SECS", default_value_t = 24 * 60 * 60)]
    pub refresh_ttl_secs: u64,
}

impl ServerConfig {
    /// The issuer described by this configuration
    pub fn issuer(&self) -> TokenIssuer {
        TokenIssuer::hs256(self.jwt_secret.as_bytes())
            .with_access_ttl(Duration::from_secs(self.access_ttl_secs))
            .with_refresh_ttl(Duration::from_secs(self.refresh_ttl_secs))
    }
}
