// src/ingest/providers/documents.rs
//! Revision history of a remote document store.
//!
//! Credentials: a plaintext secret is exchanged once (see [`exchange_secret`])
//! for a durable [`Token`]; only the token is kept. Each poll turns the token
//! into a short-lived [`Session`]. When the service reports the session as
//! expired mid-run, a new session is opened once and the enumeration restarts;
//! a second expiry fails the poll with [`PulseError::Auth`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::error::{PulseError, Result};
use crate::ingest::types::EventSource;
use crate::model::{BlipDetail, NewBlip};
use crate::provider::Token;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Short-lived credential for one poll.
#[derive(Clone, PartialEq, Eq)]
pub struct Session(pub String);

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Session(..)")
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocApiError {
    #[error("session or token expired")]
    TokenExpired,
    /// 401/403 with a message that is not a known expiry.
    #[error("not authorized: {0}")]
    Unauthorized(String),
    /// Any other 4xx.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// 2xx whose body is not the expected JSON.
    #[error("unexpected response body: {0}")]
    BadResponse(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl DocApiError {
    /// Crate error for a failure that ends the poll. Only credential
    /// failures are `Auth`.
    pub fn into_pulse(self, account: &str) -> PulseError {
        match self {
            DocApiError::TokenExpired => PulseError::Auth(format!("session for {account} expired")),
            DocApiError::Unauthorized(m) => PulseError::Auth(format!("{account}: {m}")),
            DocApiError::Rejected(m) => PulseError::Config(format!("{account}: {m}")),
            DocApiError::BadResponse(m) => PulseError::Malformed { line: 0, reason: m },
            DocApiError::Transport(m) => PulseError::Transient(m),
        }
    }
}

/// Messages the service uses for an expired credential. Anything else on a
/// 401/403 is treated as a hard rejection.
const EXPIRY_MESSAGES: &[&str] = &["token expired", "token invalid", "session expired"];

pub fn classify_auth_message(msg: &str) -> DocApiError {
    let lower = msg.to_ascii_lowercase();
    if EXPIRY_MESSAGES.iter().any(|m| lower.contains(m)) {
        DocApiError::TokenExpired
    } else {
        DocApiError::Unauthorized(msg.to_string())
    }
}

/// Map a non-2xx status and its error message.
pub fn classify_status(status: reqwest::StatusCode, msg: &str) -> DocApiError {
    if status.is_server_error() {
        DocApiError::Transport(format!("{status}: {msg}"))
    } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        classify_auth_message(msg)
    } else {
        DocApiError::Rejected(format!("{status}: {msg}"))
    }
}

#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Exchange a plaintext secret for a durable token.
    async fn login(&self, account: &str, secret: &str) -> std::result::Result<Token, DocApiError>;
    async fn open_session(&self, account: &str, token: &Token) -> std::result::Result<Session, DocApiError>;
    async fn list_documents(&self, session: &Session) -> std::result::Result<Vec<Document>, DocApiError>;
    async fn list_revisions(
        &self,
        session: &Session,
        document: &Document,
    ) -> std::result::Result<Vec<Revision>, DocApiError>;
}

/// Exchange `secret` for a token. The secret is consumed and dropped here.
pub async fn exchange_secret(service: &dyn DocumentService, account: &str, secret: String) -> Result<Token> {
    let res = service.login(account, &secret).await;
    drop(secret);
    res.map_err(|e| match e {
        DocApiError::Transport(m) => PulseError::Transient(m),
        other => PulseError::Config(format!("login for {account} failed: {other}")),
    })
}

// ---- HTTP implementation ----

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct HttpDocumentService {
    http: reqwest::Client,
    base: String,
}

impl HttpDocumentService {
    pub fn new(http: reqwest::Client, base: &str) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> std::result::Result<T, DocApiError> {
        let resp = req.send().await.map_err(|e| DocApiError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| DocApiError::BadResponse(e.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        let msg = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        Err(classify_status(status, &msg))
    }
}

#[async_trait]
impl DocumentService for HttpDocumentService {
    async fn login(&self, account: &str, secret: &str) -> std::result::Result<Token, DocApiError> {
        #[derive(Serialize)]
        struct Req<'a> {
            account: &'a str,
            secret: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            token: String,
        }
        let url = format!("{}/accounts/login", self.base);
        let resp: Resp = self.send(self.http.post(url).json(&Req { account, secret })).await?;
        Ok(Token(resp.token))
    }

    async fn open_session(&self, account: &str, token: &Token) -> std::result::Result<Session, DocApiError> {
        #[derive(Serialize)]
        struct Req<'a> {
            account: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            session: String,
        }
        let url = format!("{}/sessions", self.base);
        let resp: Resp = self
            .send(self.http.post(url).bearer_auth(&token.0).json(&Req { account }))
            .await?;
        Ok(Session(resp.session))
    }

    async fn list_documents(&self, session: &Session) -> std::result::Result<Vec<Document>, DocApiError> {
        let url = format!("{}/documents", self.base);
        self.send(self.http.get(url).bearer_auth(&session.0)).await
    }

    async fn list_revisions(
        &self,
        session: &Session,
        document: &Document,
    ) -> std::result::Result<Vec<Revision>, DocApiError> {
        let url = format!("{}/documents/{}/revisions", self.base, document.id);
        self.send(self.http.get(url).bearer_auth(&session.0)).await
    }
}

// ---- adapter ----

pub struct RevisionSource {
    service: Arc<dyn DocumentService>,
    account: String,
    token: Token,
    name: String,
}

impl RevisionSource {
    pub fn new(service: Arc<dyn DocumentService>, account: &str, token: Token, name: &str) -> Self {
        Self {
            service,
            account: account.to_string(),
            token,
            name: name.to_string(),
        }
    }

    async fn open(&self) -> Result<Session> {
        self.service
            .open_session(&self.account, &self.token)
            .await
            .map_err(|e| e.into_pulse(&self.account))
    }

    async fn collect(
        &self,
        session: &Session,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<NewBlip>, DocApiError> {
        let mut out = Vec::new();
        for doc in self.service.list_documents(session).await? {
            for rev in self.service.list_revisions(session, &doc).await? {
                if rev.updated <= since {
                    continue;
                }
                let url = rev.url.clone().unwrap_or_else(|| doc.url.clone());
                let mut blip = NewBlip::new(url, format!("{} revised", doc.title), rev.updated);
                blip.who = Some(rev.author.unwrap_or_else(|| doc.owner.clone()));
                blip.detail = BlipDetail::Revision {
                    document_id: doc.id.clone(),
                };
                out.push(blip);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl EventSource for RevisionSource {
    async fn fetch_new_events(&self, since: DateTime<Utc>) -> Result<Vec<NewBlip>> {
        let mut session = self.open().await?;
        let mut reauth_left = 1u8;
        loop {
            match self.collect(&session, since).await {
                Ok(events) => return Ok(events),
                Err(DocApiError::TokenExpired) if reauth_left > 0 => {
                    reauth_left -= 1;
                    tracing::warn!(account = %self.account, "document session expired; re-authenticating");
                    session = self.open().await?;
                }
                Err(DocApiError::TokenExpired) => {
                    return Err(PulseError::Auth(format!(
                        "session for {} expired again after re-authentication",
                        self.account
                    )))
                }
                Err(other) => return Err(other.into_pulse(&self.account)),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Scripted in-process document service for tests and demos.
pub mod tests_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedDocs {
        documents: Vec<(Document, Vec<Revision>)>,
        secret: String,
        token: String,
        expire_next: AtomicUsize,
        fail_next: Mutex<Option<DocApiError>>,
        pub logins: AtomicUsize,
        pub sessions_opened: AtomicUsize,
    }

    impl ScriptedDocs {
        pub fn new(secret: &str, token: &str) -> Self {
            Self {
                secret: secret.to_string(),
                token: token.to_string(),
                ..Self::default()
            }
        }

        pub fn with_document(mut self, doc: Document, revisions: Vec<Revision>) -> Self {
            self.documents.push((doc, revisions));
            self
        }

        /// The next `n` document listings report an expired session.
        pub fn expire_next(&self, n: usize) {
            self.expire_next.store(n, Ordering::SeqCst);
        }

        /// The next document listing fails with a 401 carrying `msg`.
        pub fn reject_next(&self, msg: &str) {
            self.fail_next(classify_auth_message(msg));
        }

        /// The next document listing fails with `err`.
        pub fn fail_next(&self, err: DocApiError) {
            if let Ok(mut g) = self.fail_next.lock() {
                *g = Some(err);
            }
        }
    }

    #[async_trait]
    impl DocumentService for ScriptedDocs {
        async fn login(&self, _account: &str, secret: &str) -> std::result::Result<Token, DocApiError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if secret == self.secret {
                Ok(Token(self.token.clone()))
            } else {
                Err(DocApiError::Unauthorized("bad credentials".into()))
            }
        }

        async fn open_session(&self, _account: &str, token: &Token) -> std::result::Result<Session, DocApiError> {
            let n = self.sessions_opened.fetch_add(1, Ordering::SeqCst);
            if token.0 == self.token {
                Ok(Session(format!("session-{n}")))
            } else {
                Err(DocApiError::Unauthorized("unknown token".into()))
            }
        }

        async fn list_documents(&self, _session: &Session) -> std::result::Result<Vec<Document>, DocApiError> {
            if let Some(err) = self.fail_next.lock().ok().and_then(|mut g| g.take()) {
                return Err(err);
            }
            let expired = self
                .expire_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if expired {
                return Err(DocApiError::TokenExpired);
            }
            Ok(self.documents.iter().map(|(d, _)| d.clone()).collect())
        }

        async fn list_revisions(
            &self,
            _session: &Session,
            document: &Document,
        ) -> std::result::Result<Vec<Revision>, DocApiError> {
            Ok(self
                .documents
                .iter()
                .find(|(d, _)| d.id == document.id)
                .map(|(_, r)| r.clone())
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::ScriptedDocs;
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 7, day, 12, 0, 0).unwrap()
    }

    fn docs() -> ScriptedDocs {
        ScriptedDocs::new("hunter2", "durable-1").with_document(
            Document {
                id: "d1".into(),
                title: "Roadmap".into(),
                owner: "owner@example.org".into(),
                url: "https://docs.example/d1".into(),
            },
            vec![
                Revision { id: "r1".into(), author: None, updated: at(1), url: None },
                Revision {
                    id: "r2".into(),
                    author: Some("sam@example.org".into()),
                    updated: at(3),
                    url: Some("https://docs.example/d1?rev=2".into()),
                },
            ],
        )
    }

    fn source(svc: Arc<ScriptedDocs>) -> RevisionSource {
        RevisionSource::new(svc, "me@example.org", Token("durable-1".into()), "Docs")
    }

    #[test]
    fn only_known_expiry_messages_are_recoverable() {
        assert_eq!(classify_auth_message("Token expired"), DocApiError::TokenExpired);
        assert_eq!(classify_auth_message("Session expired, log in again"), DocApiError::TokenExpired);
        assert!(matches!(classify_auth_message("quota exceeded"), DocApiError::Unauthorized(_)));
    }

    #[test]
    fn only_401_and_403_are_auth_failures() {
        use reqwest::StatusCode;
        let account = "me@example.org";
        let kind = |status, msg| classify_status(status, msg).into_pulse(account);

        assert!(matches!(kind(StatusCode::UNAUTHORIZED, "account suspended"), PulseError::Auth(_)));
        assert!(matches!(kind(StatusCode::FORBIDDEN, "no access"), PulseError::Auth(_)));
        assert!(matches!(kind(StatusCode::NOT_FOUND, "no such feed"), PulseError::Config(_)));
        assert!(matches!(kind(StatusCode::BAD_REQUEST, "bad cursor"), PulseError::Config(_)));
        assert!(matches!(kind(StatusCode::BAD_GATEWAY, ""), PulseError::Transient(_)));
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "Token expired"),
            DocApiError::TokenExpired
        );
    }

    #[tokio::test]
    async fn non_auth_failures_keep_their_own_kind() {
        let svc = Arc::new(docs());
        svc.fail_next(DocApiError::Rejected("404 Not Found: no such document".into()));
        let err = source(svc.clone()).fetch_new_events(at(1)).await.unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));

        svc.fail_next(DocApiError::BadResponse("expected value at line 1 column 1".into()));
        let err = source(svc.clone()).fetch_new_events(at(1)).await.unwrap_err();
        assert!(matches!(err, PulseError::Malformed { .. }));

        // Neither triggers a re-authentication.
        assert_eq!(svc.sessions_opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn emits_revisions_newer_than_since_with_owner_fallback() {
        let svc = Arc::new(docs());
        let evs = source(svc).fetch_new_events(crate::provider::never_updated()).await.unwrap();
        assert_eq!(evs.len(), 2);
        assert_eq!(evs[0].who.as_deref(), Some("owner@example.org"));
        assert_eq!(evs[0].source_url, "https://docs.example/d1");
        assert_eq!(evs[1].who.as_deref(), Some("sam@example.org"));
        assert_eq!(evs[1].title, "Roadmap revised");

        let svc = Arc::new(docs());
        let evs = source(svc).fetch_new_events(at(2)).await.unwrap();
        assert_eq!(evs.len(), 1);
    }

    #[tokio::test]
    async fn one_expiry_is_recovered_by_reauth() {
        let svc = Arc::new(docs());
        svc.expire_next(1);
        let evs = source(svc.clone()).fetch_new_events(crate::provider::never_updated()).await.unwrap();
        assert_eq!(evs.len(), 2);
        assert_eq!(svc.sessions_opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_expiry_is_auth_error() {
        let svc = Arc::new(docs());
        svc.expire_next(2);
        let err = source(svc.clone()).fetch_new_events(at(1)).await.unwrap_err();
        assert!(matches!(err, PulseError::Auth(_)));
        assert_eq!(svc.sessions_opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unrecognized_auth_message_is_fatal_without_retry() {
        let svc = Arc::new(docs());
        svc.reject_next("account suspended");
        let err = source(svc.clone()).fetch_new_events(at(1)).await.unwrap_err();
        assert!(matches!(err, PulseError::Auth(_)));
        assert_eq!(svc.sessions_opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn secret_exchange_returns_token() {
        let svc = docs();
        let token = exchange_secret(&svc, "me@example.org", "hunter2".to_string()).await.unwrap();
        assert_eq!(token, Token("durable-1".into()));
        let err = exchange_secret(&svc, "me@example.org", "wrong".to_string()).await.unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));
    }
}
