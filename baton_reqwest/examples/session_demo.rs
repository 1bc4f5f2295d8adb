use std::{path::PathBuf, time::Duration};

use baton_reqwest::{GateError, RequestGate};
use baton_tokens::{
    renewal, Credentials, FileTokenStore, HttpAuthority, Navigation, RenewalSchedule,
    RenewalWatcher, SessionBoundary, SessionManager, TokenValidator,
};
use clap::Parser;
use reqwest_middleware::ClientBuilder;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The base URL of the authority
    #[arg(short, long, env = "BATON_AUTHORITY", default_value = "http://127.0.0.1:1234/")]
    authority: reqwest::Url,

    /// The secret the authority signs tokens with
    #[arg(short, long, env = "BATON_JWT_SECRET", hide_env_values = true)]
    secret: String,

    /// The username to log in with, if no session is stored
    #[arg(short, long, env = "BATON_USERNAME", default_value = "admin")]
    username: String,

    /// The password to log in with, if no session is stored
    #[arg(short, long, env = "BATON_PASSWORD", hide_env_values = true)]
    password: String,

    /// The local file used to keep the session across runs
    #[arg(short = 'f', long, env = "BATON_SESSION_FILE", default_value = ".session.json")]
    session_file: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let authority = HttpAuthority::new(reqwest::Client::new(), opts.authority.clone());
    let session = SessionManager::builder(authority, TokenValidator::hs256(opts.secret.as_bytes()))
        .with_store(FileTokenStore::new(opts.session_file))
        .restore()
        .await?;

    let boundary = SessionBoundary::new(session.clone());
    if let Navigation::Redirect(to) = boundary.navigate("/aboutme").await {
        tracing::info!(%to, "no usable session, logging in");
        session
            .login(&Credentials::new(opts.username, opts.password))
            .await?;
    }

    let _renewal = RenewalWatcher::spawn(
        session.clone(),
        RenewalSchedule::default(),
        renewal::RandomEarlyJitter::new(Duration::from_secs(10)),
    );

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(RequestGate::new(session))
        .build();

    let mut interval = time::interval(Duration::from_secs(15));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match client.get(opts.authority.join("me")?).send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await?;
                tracing::info!(%status, %body, "fetched profile");
            }
            Err(err) => match GateError::find(&err) {
                Some(GateError::Refresh(denial)) => {
                    tracing::warn!(%denial, "session ended, log in again");
                    return Ok(());
                }
                _ => tracing::warn!(error = %err, "request failed"),
            },
        }
    }
}
