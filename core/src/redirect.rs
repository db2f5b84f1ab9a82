//! Redirect decisions for one logical call.
//!
//! # Design
//! `RedirectTracker` is created fresh by every call and owns the hop counter,
//! so calls sharing a base configuration never see each other's counts. For
//! every response the pipeline asks [`RedirectTracker::evaluate`] what to do
//! next: finish with the response as-is, or follow a [`Hop`].
//!
//! The counter increments on each redirect response that would be followed.
//! When it reaches `max_redirects` the call fails, so `max_redirects = 5`
//! dispatches exactly five requests against an endpoint that always
//! redirects.

use std::fmt;

use http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::options::Options;

/// Status codes that carry a `Location` to follow.
pub const REDIRECT_CODES: [StatusCode; 5] = [
    StatusCode::MOVED_PERMANENTLY,
    StatusCode::FOUND,
    StatusCode::SEE_OTHER,
    StatusCode::TEMPORARY_REDIRECT,
    StatusCode::PERMANENT_REDIRECT,
];

pub fn is_redirect(status: StatusCode) -> bool {
    REDIRECT_CODES.contains(&status)
}

/// Where a call currently is in its request/redirect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectState {
    Initial,
    AwaitingResponse,
    RedirectReceived,
    FollowingRedirect,
    Done,
    Failed,
}

impl fmt::Display for RedirectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RedirectState::Initial => "initial",
            RedirectState::AwaitingResponse => "awaiting-response",
            RedirectState::RedirectReceived => "redirect-received",
            RedirectState::FollowingRedirect => "following-redirect",
            RedirectState::Done => "done",
            RedirectState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub follow: bool,
    pub preserve_method: bool,
    pub max_redirects: u32,
}

impl RedirectPolicy {
    pub fn from_options(options: &Options) -> Self {
        Self {
            follow: options.follow_redirects,
            preserve_method: options.preserve_method_on_redirect,
            max_redirects: options.max_redirects,
        }
    }
}

/// The next attempt of a call that is following a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub url: Url,
    pub method: Method,
    /// Send the original payload again.
    pub replay_payload: bool,
    /// Raw `Location` value the hop was resolved from.
    pub location: String,
    pub cross_host: bool,
}

impl Hop {
    /// Drop headers that no longer describe the next request.
    pub fn adjust_headers(&self, headers: &mut HeaderMap) {
        if !self.replay_payload {
            for name in [CONTENT_TYPE, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_DISPOSITION] {
                headers.remove(name);
            }
        }
        if self.cross_host {
            headers.remove(AUTHORIZATION);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Return this response to the caller.
    Finish,
    Follow(Hop),
}

#[derive(Debug)]
pub struct RedirectTracker {
    policy: RedirectPolicy,
    count: u32,
    state: RedirectState,
}

impl RedirectTracker {
    pub fn new(policy: RedirectPolicy) -> Self {
        Self {
            policy,
            count: 0,
            state: RedirectState::Initial,
        }
    }

    /// Redirect responses followed so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn state(&self) -> RedirectState {
        self.state
    }

    pub fn dispatched(&mut self) {
        self.state = RedirectState::AwaitingResponse;
    }

    /// The transport failed; no redirect semantics apply.
    pub fn failed(&mut self) {
        self.state = RedirectState::Failed;
    }

    /// Decide what follows a response to `method url`.
    pub fn evaluate(
        &mut self,
        url: &Url,
        method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<Decision> {
        if !is_redirect(status) {
            self.state = RedirectState::Done;
            return Ok(Decision::Finish);
        }
        self.state = RedirectState::RedirectReceived;
        if !self.policy.follow {
            debug!(status = status.as_u16(), "redirect not followed");
            self.state = RedirectState::Done;
            return Ok(Decision::Finish);
        }

        let result = self.next_hop(url, method, status, headers);
        self.state = match result {
            Ok(_) => RedirectState::FollowingRedirect,
            Err(_) => RedirectState::Failed,
        };
        result.map(Decision::Follow)
    }

    fn next_hop(
        &mut self,
        url: &Url,
        method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<Hop> {
        let location = headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(Error::MissingLocation {
                status: status.as_u16(),
            })?;

        self.count += 1;
        if self.count >= self.policy.max_redirects {
            return Err(Error::TooManyRedirects {
                limit: self.policy.max_redirects,
            });
        }

        let next = url.join(location).map_err(|source| Error::InvalidLocation {
            location: location.to_string(),
            source,
        })?;
        let (method, replay_payload) = if self.policy.preserve_method {
            (method.clone(), true)
        } else {
            (Method::GET, false)
        };
        info!(
            from = %url,
            to = %next,
            status = status.as_u16(),
            %method,
            hop = self.count,
            "following redirect"
        );
        Ok(Hop {
            cross_host: next.host_str() != url.host_str(),
            url: next,
            method,
            replay_payload,
            location: location.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn policy(follow: bool, preserve_method: bool, max_redirects: u32) -> RedirectPolicy {
        RedirectPolicy {
            follow,
            preserve_method,
            max_redirects,
        }
    }

    fn location(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static(value));
        headers
    }

    fn origin() -> Url {
        Url::parse("https://example.com/a/b").unwrap()
    }

    #[test]
    fn recognizes_redirect_codes() {
        for code in [301, 302, 303, 307, 308] {
            assert!(is_redirect(StatusCode::from_u16(code).unwrap()));
        }
        for code in [200, 204, 300, 304, 404] {
            assert!(!is_redirect(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn non_redirect_finishes() {
        let mut tracker = RedirectTracker::new(policy(true, false, 10));
        let decision = tracker
            .evaluate(&origin(), &Method::GET, StatusCode::OK, &HeaderMap::new())
            .unwrap();
        assert_eq!(decision, Decision::Finish);
        assert_eq!(tracker.state(), RedirectState::Done);
    }

    #[test]
    fn disabled_following_returns_redirect_itself() {
        let mut tracker = RedirectTracker::new(policy(false, false, 10));
        let decision = tracker
            .evaluate(&origin(), &Method::GET, StatusCode::FOUND, &location("/next"))
            .unwrap();
        assert_eq!(decision, Decision::Finish);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn relative_location_resolves_against_current_url() {
        let mut tracker = RedirectTracker::new(policy(true, false, 10));
        let Decision::Follow(hop) = tracker
            .evaluate(&origin(), &Method::POST, StatusCode::FOUND, &location("c?x=1"))
            .unwrap()
        else {
            panic!("expected a hop");
        };
        assert_eq!(hop.url.as_str(), "https://example.com/a/c?x=1");
        assert_eq!(hop.method, Method::GET);
        assert!(!hop.replay_payload);
        assert!(!hop.cross_host);
        assert_eq!(tracker.state(), RedirectState::FollowingRedirect);
    }

    #[test]
    fn preserve_method_keeps_method_and_payload() {
        let mut tracker = RedirectTracker::new(policy(true, true, 10));
        let Decision::Follow(hop) = tracker
            .evaluate(&origin(), &Method::PUT, StatusCode::TEMPORARY_REDIRECT, &location("/p"))
            .unwrap()
        else {
            panic!("expected a hop");
        };
        assert_eq!(hop.method, Method::PUT);
        assert!(hop.replay_payload);
    }

    #[test]
    fn missing_location_is_a_policy_error() {
        let mut tracker = RedirectTracker::new(policy(true, false, 10));
        let err = tracker
            .evaluate(&origin(), &Method::GET, StatusCode::MOVED_PERMANENTLY, &HeaderMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::MissingLocation { status: 301 }));
        assert_eq!(tracker.state(), RedirectState::Failed);
    }

    #[test]
    fn limit_triggers_on_the_redirect_that_reaches_it() {
        let mut tracker = RedirectTracker::new(policy(true, false, 5));
        let headers = location("/loop");
        for _ in 0..4 {
            let decision = tracker
                .evaluate(&origin(), &Method::GET, StatusCode::FOUND, &headers)
                .unwrap();
            assert!(matches!(decision, Decision::Follow(_)));
        }
        let err = tracker
            .evaluate(&origin(), &Method::GET, StatusCode::FOUND, &headers)
            .unwrap_err();
        assert!(matches!(err, Error::TooManyRedirects { limit: 5 }));
        assert!(err.to_string().contains('5'));
        assert_eq!(tracker.count(), 5);
    }

    #[test]
    fn cross_host_hop_drops_authorization() {
        let mut tracker = RedirectTracker::new(policy(true, false, 10));
        let Decision::Follow(hop) = tracker
            .evaluate(
                &origin(),
                &Method::POST,
                StatusCode::FOUND,
                &location("https://other.example.org/x"),
            )
            .unwrap()
        else {
            panic!("expected a hop");
        };
        assert!(hop.cross_host);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert("x-keep", HeaderValue::from_static("1"));
        hop.adjust_headers(&mut headers);
        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert_eq!(headers["x-keep"], "1");
    }
}
