use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use aliri_clock::UnixTime;
use baton_tokens::{
    AuthorityError, Credentials, InMemoryTokenStore, RefreshTokenRef, SessionClaims,
    TokenAuthority, TokenIssuer, TokenPair, TokenValidator,
};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

use super::*;

const SECRET: &[u8] = b"gate-test-secret";

fn issuer() -> TokenIssuer {
    TokenIssuer::hs256(SECRET)
}

/// A pair whose access token expired an hour ago
fn expired_pair() -> TokenPair {
    let issuer = issuer();
    let now = System.now();
    let access = SessionClaims::new(
        "1",
        "admin",
        UnixTime(now.0 - 7_200),
        Duration::from_secs(3_600),
    );
    let refresh = SessionClaims::new("1", "admin", now, TokenIssuer::DEFAULT_REFRESH_TTL);

    TokenPair::new(
        issuer.sign(&access).unwrap().take(),
        issuer.sign(&refresh).unwrap().take(),
    )
}

struct TestAuthority {
    issuer: TokenIssuer,
    deny: AtomicBool,
    refresh_calls: AtomicUsize,
}

impl TestAuthority {
    fn new() -> Self {
        Self {
            issuer: issuer(),
            deny: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    fn denying() -> Self {
        let authority = Self::new();
        authority.deny.store(true, Ordering::Release);
        authority
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl TokenAuthority for TestAuthority {
    async fn login(&self, _: &Credentials) -> std::result::Result<TokenPair, AuthorityError> {
        Ok(self.issuer.issue_pair("1", "admin").unwrap().0)
    }

    async fn refresh(
        &self,
        _: Option<&AccessTokenRef>,
        _: &RefreshTokenRef,
    ) -> std::result::Result<TokenPair, AuthorityError> {
        self.refresh_calls.fetch_add(1, Ordering::AcqRel);
        if self.deny.load(Ordering::Acquire) {
            return Err(AuthorityError::Rejected {
                status: 401,
                message: "invalid refresh token".into(),
            });
        }

        Ok(self.issuer.issue_pair("1", "admin").unwrap().0)
    }
}

/// A terminal middleware standing in for a protected API
///
/// Requests bearing a valid access token get `200 OK`. Any other request
/// gets `401 Unauthorized`, after a delay when its path is listed in
/// `slow`.
#[derive(Default)]
struct Api {
    reject_all: bool,
    slow: Vec<(&'static str, Duration)>,
    seen: Mutex<Vec<Option<String>>>,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
}

impl Api {
    fn slow(mut self, path: &'static str, delay: Duration) -> Self {
        self.slow.push((path, delay));
        self
    }

    fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }

    fn respond(status: StatusCode) -> Response {
        http::Response::builder()
            .status(status)
            .body("")
            .unwrap()
            .into()
    }
}

#[async_trait::async_trait]
impl Middleware for Api {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> Result<Response> {
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_owned());
        self.seen.lock().unwrap().push(authorization.clone());

        let valid = authorization
            .as_deref()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map_or(false, |t| TokenValidator::hs256(SECRET).validate(t));

        if valid && !self.reject_all {
            self.accepted.fetch_add(1, Ordering::AcqRel);
            return Ok(Self::respond(StatusCode::OK));
        }

        let delay = self
            .slow
            .iter()
            .find(|(path, _)| *path == req.url().path())
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.rejected.fetch_add(1, Ordering::AcqRel);
        Ok(Self::respond(StatusCode::UNAUTHORIZED))
    }
}

async fn session_with(authority: &Arc<TestAuthority>, pair: Option<TokenPair>) -> SessionManager {
    let store = match pair {
        Some(pair) => InMemoryTokenStore::with_pair(pair),
        None => InMemoryTokenStore::new(),
    };

    SessionManager::builder(Arc::clone(authority), issuer().validator().clone())
        .with_store(store)
        .restore()
        .await
        .unwrap()
}

fn client<P>(gate: RequestGate<P>, api: &Arc<Api>) -> ClientWithMiddleware
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    ClientBuilder::new(Client::default())
        .with(gate)
        .with_arc(api.clone())
        .build()
}

mod when_the_session_is_valid {
    use super::*;

    #[tokio::test]
    async fn gate_attaches_access_token() {
        let authority = Arc::new(TestAuthority::new());
        let pair = issuer().issue_pair("1", "admin").unwrap().0;
        let session = session_with(&authority, Some(pair.clone())).await;
        let api = Arc::new(Api::default());

        let resp = client(RequestGate::new(session), &api)
            .get("http://localhost/me")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            api.seen(),
            vec![Some(format!("Bearer {}", pair.access().as_str()))]
        );
        assert_eq!(authority.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn gate_does_not_attach_token_to_login() {
        let authority = Arc::new(TestAuthority::new());
        let pair = issuer().issue_pair("1", "admin").unwrap().0;
        let session = session_with(&authority, Some(pair)).await;
        let api = Arc::new(Api::default());
        let client = client(RequestGate::new(session), &api);

        client.post("http://localhost/login").send().await.unwrap();
        client.post("http://localhost/api/register").send().await.unwrap();

        assert_eq!(api.seen(), vec![None, None]);
    }

    #[tokio::test]
    async fn gate_keeps_an_existing_authorization_header() {
        let authority = Arc::new(TestAuthority::new());
        let pair = issuer().issue_pair("1", "admin").unwrap().0;
        let session = session_with(&authority, Some(pair)).await;
        let api = Arc::new(Api::default());

        let resp = client(RequestGate::new(session), &api)
            .get("http://localhost/me")
            .bearer_auth("overridden!")
            .send()
            .await
            .unwrap();

        // Not a valid token, and the gate does not try to fix it
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.seen(), vec![Some("Bearer overridden!".to_owned())]);
        assert_eq!(authority.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn gate_with_custom_predicate_honors_it() {
        let authority = Arc::new(TestAuthority::new());
        let pair = issuer().issue_pair("1", "admin").unwrap().0;
        let session = session_with(&authority, Some(pair)).await;
        let api = Arc::new(Api::default());
        let gate = RequestGate::new(session).with_predicate(predicate::never());

        client(gate, &api)
            .get("http://localhost/me")
            .send()
            .await
            .unwrap();

        assert_eq!(api.seen(), vec![None]);
    }
}

mod when_there_is_no_session {
    use super::*;

    #[tokio::test]
    async fn gate_sends_without_a_token_and_returns_the_rejection() {
        let authority = Arc::new(TestAuthority::new());
        let session = session_with(&authority, None).await;
        let api = Arc::new(Api::default());

        let resp = client(RequestGate::new(session), &api)
            .get("http://localhost/me")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.seen(), vec![None]);
        assert_eq!(authority.refresh_calls(), 0);
    }
}

mod when_the_access_token_is_rejected {
    use super::*;

    #[tokio::test]
    async fn gate_renews_and_retries_once() {
        let authority = Arc::new(TestAuthority::new());
        let stale = expired_pair();
        let session = session_with(&authority, Some(stale.clone())).await;
        let api = Arc::new(Api::default());

        let resp = client(RequestGate::new(session.clone()), &api)
            .get("http://localhost/me")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(authority.refresh_calls(), 1);

        let renewed = session.current().unwrap();
        assert_ne!(renewed.access(), stale.access());
        assert_eq!(
            api.seen(),
            vec![
                Some(format!("Bearer {}", stale.access().as_str())),
                Some(format!("Bearer {}", renewed.access().as_str())),
            ]
        );
    }

    #[tokio::test]
    async fn gate_reports_a_second_rejection() {
        let authority = Arc::new(TestAuthority::new());
        let session = session_with(&authority, Some(expired_pair())).await;
        let api = Arc::new(Api {
            reject_all: true,
            ..Api::default()
        });

        let err = client(RequestGate::new(session), &api)
            .get("http://localhost/me")
            .send()
            .await
            .unwrap_err();

        assert!(matches!(
            GateError::find(&err),
            Some(GateError::RejectedAfterRefresh)
        ));
        assert_eq!(api.seen().len(), 2);
        assert_eq!(authority.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn gate_reports_a_denied_renewal_and_the_session_ends() {
        let authority = Arc::new(TestAuthority::denying());
        let session = session_with(&authority, Some(expired_pair())).await;
        let api = Arc::new(Api::default());

        let err = client(RequestGate::new(session.clone()), &api)
            .get("http://localhost/me")
            .send()
            .await
            .unwrap_err();

        assert!(matches!(
            GateError::find(&err),
            Some(GateError::Refresh(Denial::Rejected { status: 401, .. }))
        ));
        assert!(session.current().is_none());
        assert_eq!(api.seen().len(), 1);
    }

    #[tokio::test]
    async fn gate_returns_the_rejection_when_the_body_cannot_be_replayed() {
        let authority = Arc::new(TestAuthority::new());
        let session = session_with(&authority, Some(expired_pair())).await;
        let api = Arc::new(Api::default());

        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(&b"payload"[..]));
        let resp = client(RequestGate::new(session), &api)
            .post("http://localhost/upload")
            .body(body)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.seen().len(), 1);
        assert_eq!(authority.refresh_calls(), 0);
    }

    mod while_other_requests_are_in_flight {
        use super::*;

        fn slow_api() -> Api {
            let mut api = Api::default().slow("/items/0", Duration::from_millis(50));
            for path in ["/items/1", "/items/2", "/items/3", "/items/4"] {
                api = api.slow(path, Duration::from_secs(5));
            }
            api
        }

        #[tokio::test(start_paused = true)]
        async fn gate_cancels_the_wave_and_replays_it_after_one_renewal() {
            let authority = Arc::new(TestAuthority::new());
            let session = session_with(&authority, Some(expired_pair())).await;
            let api = Arc::new(slow_api());
            let in_flight = Arc::clone(session.in_flight());
            let client = client(RequestGate::new(session), &api);

            let requests: Vec<_> = (0..5)
                .map(|i| {
                    let client = client.clone();
                    tokio::spawn(async move {
                        client
                            .get(format!("http://localhost/items/{i}"))
                            .send()
                            .await
                    })
                })
                .collect();

            for request in requests {
                let resp = request.await.unwrap().unwrap();
                assert_eq!(resp.status(), StatusCode::OK);
            }

            assert_eq!(authority.refresh_calls(), 1);
            assert_eq!(api.rejected.load(Ordering::Acquire), 1);
            assert_eq!(api.accepted.load(Ordering::Acquire), 5);
            assert_eq!(api.seen().len(), 10);
            assert!(in_flight.is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn gate_cancels_requests_sent_by_other_clients_of_the_session() {
            let authority = Arc::new(TestAuthority::new());
            let session = session_with(&authority, Some(expired_pair())).await;
            let api = Arc::new(slow_api());
            let first_client = client(RequestGate::new(session.clone()), &api);
            let other_client = client(RequestGate::new(session.clone()), &api);
            let started = tokio::time::Instant::now();

            let other = tokio::spawn(async move {
                other_client.get("http://localhost/items/1").send().await
            });
            let first = tokio::spawn(async move {
                first_client.get("http://localhost/items/0").send().await
            });

            assert_eq!(first.await.unwrap().unwrap().status(), StatusCode::OK);
            assert_eq!(other.await.unwrap().unwrap().status(), StatusCode::OK);

            // The other client's request was cancelled instead of waiting out
            // its own rejection
            assert!(started.elapsed() < Duration::from_secs(1));
            assert_eq!(api.rejected.load(Ordering::Acquire), 1);
            assert_eq!(authority.refresh_calls(), 1);
            assert!(session.in_flight().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn gate_without_replay_fails_cancelled_requests() {
            let authority = Arc::new(TestAuthority::new());
            let session = session_with(&authority, Some(expired_pair())).await;
            let api = Arc::new(slow_api());
            let client = client(RequestGate::new(session).replay_cancelled(false), &api);

            let first = tokio::spawn({
                let client = client.clone();
                async move { client.get("http://localhost/items/0").send().await }
            });
            let second = tokio::spawn({
                let client = client.clone();
                async move { client.get("http://localhost/items/1").send().await }
            });

            let first = first.await.unwrap().unwrap();
            assert_eq!(first.status(), StatusCode::OK);

            let err = second.await.unwrap().unwrap_err();
            assert!(matches!(GateError::find(&err), Some(GateError::Cancelled)));
            assert_eq!(authority.refresh_calls(), 1);
        }
    }
}

mod except_paths_predicate {
    use super::*;

    fn request(url: &str) -> Request {
        Request::new(reqwest::Method::POST, url.parse().unwrap())
    }

    #[test]
    fn matches_paths_not_excluded() {
        let predicate = ExceptPaths::auth_entry();
        let result = dbg!(predicate.find_case(true, &request("http://localhost/me")));
        assert!(result.is_none())
    }

    #[test]
    fn does_not_match_excluded_paths() {
        let predicate = ExceptPaths::auth_entry();
        for url in [
            "http://localhost/login",
            "http://localhost/api/register",
            "http://localhost/login/",
        ] {
            let result = dbg!(predicate.find_case(false, &request(url)));
            assert!(result.is_none(), "{url} should be excluded");
        }
    }

    #[test]
    fn does_not_exclude_partial_segments() {
        let predicate = ExceptPaths::auth_entry();
        assert!(predicate.eval(&request("http://localhost/relogin")));
    }

    #[test]
    fn reports_the_excluding_path() {
        let predicate = ExceptPaths::new(["/health"]);
        let case = predicate
            .find_case(true, &request("http://localhost/api/health"))
            .unwrap();
        let names: Vec<_> = case.products().map(|p| p.name()).collect();
        assert_eq!(names, ["path", "excluded"]);
    }

    #[test]
    fn displays_excluded_paths() {
        assert_eq!(
            ExceptPaths::auth_entry().to_string(),
            r#"path not in ["/login", "/register"]"#
        );
    }
}
