//! Per-browser session state.
//!
//! Each browser gets a `docqa_session` cookie holding a random UUID. The
//! only thing kept per session is the preview of the last uploaded or
//! fetched file. State lives in memory and is lost on restart.
//!
//! The store holds at most `capacity` sessions; writing a new one past the
//! cap evicts the session that was written least recently.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};

pub const SESSION_COOKIE: &str = "docqa_session";

/// Default cap on remembered sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// What the page's preview pane shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preview {
    /// Storage key of the previewed file.
    pub key: String,
    pub content: String,
}

#[derive(Default)]
struct Inner {
    previews: HashMap<String, Preview>,
    /// Session ids, least recently written first.
    order: VecDeque<String>,
}

pub struct SessionStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn preview(&self, session: &str) -> Option<Preview> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .previews
            .get(session)
            .cloned()
    }

    pub fn set_preview(&self, session: &str, preview: Preview) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = inner.order.iter().position(|id| id == session) {
            inner.order.remove(pos);
        }
        while inner.order.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.previews.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(session.to_string());
        inner.previews.insert(session.to_string(), preview);
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .previews
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A session id resolved from a request, and whether it was just minted.
#[derive(Debug, Clone)]
pub struct SessionId {
    pub id: String,
    pub is_new: bool,
}

impl SessionId {
    /// Reads the session cookie, or mints a fresh id when absent or malformed.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match session_cookie(headers) {
            Some(id) => Self { id, is_new: false },
            None => Self {
                id: uuid::Uuid::new_v4().to_string(),
                is_new: true,
            },
        }
    }

    /// `Set-Cookie` header to attach when the id was minted for this request.
    pub fn set_cookie(&self) -> Option<(axum::http::HeaderName, HeaderValue)> {
        if !self.is_new {
            return None;
        }
        let value = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE, self.id
        );
        HeaderValue::from_str(&value).ok().map(|v| (SET_COOKIE, v))
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| uuid::Uuid::parse_str(value).is_ok())
        .map(str::to_string)
}
