//! Credential resolution
//!
//! Walks a [`LookupChain`] over a request and returns the first non-empty
//! credential. Two chains exist: one for API keys and one for bearer tokens.
//! The API-key chain is tried first; the token chain is only consulted when
//! no API key is present anywhere.
//!
//! When every descriptor of a chain fails, the most specific failure wins:
//! a malformed value (`InvalidFormat`) is reported over an absent one, and
//! when all descriptors are simply empty the error lists the whole chain.

use crate::{
    auth::lookup::{LookupChain, LookupDescriptor, LookupSource},
    config::SecurityConfig,
    error::AppError,
};
use axum::{
    extract::Query,
    http::{header, request::Parts, HeaderMap},
};
use std::collections::HashMap;
use std::fmt;

/// Read access to the parts of a request a credential can come from
pub trait RequestView {
    fn header(&self, name: &str) -> Option<String>;
    fn query(&self, name: &str) -> Option<String>;
    fn cookie(&self, name: &str) -> Option<String>;
    fn param(&self, name: &str) -> Option<String>;

    fn lookup(&self, descriptor: &LookupDescriptor) -> Option<String> {
        match descriptor.source {
            LookupSource::Header => self.header(&descriptor.key),
            LookupSource::Query => self.query(&descriptor.key),
            LookupSource::Cookie => self.cookie(&descriptor.key),
            LookupSource::Param => self.param(&descriptor.key),
        }
    }
}

/// [`RequestView`] over an HTTP request head plus matched path parameters
pub struct HttpRequestView<'a> {
    headers: &'a HeaderMap,
    query: HashMap<String, String>,
    params: HashMap<String, String>,
}

impl<'a> HttpRequestView<'a> {
    pub fn from_parts(parts: &'a Parts) -> Self {
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();

        Self {
            headers: &parts.headers,
            query,
            params: HashMap::new(),
        }
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

impl RequestView for HttpRequestView<'_> {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn query(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim().to_string())
    }

    fn param(&self, name: &str) -> Option<String> {
        self.params.get(name).cloned()
    }
}

/// What a chain is looking for; decides how header values are read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialKind {
    /// `<scheme> <token>` in headers, raw value elsewhere
    BearerToken { scheme: String },
    /// Raw value everywhere
    ApiKey,
}

/// A raw credential pulled out of a request
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    ApiKey(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Credential::Bearer(<redacted>)"),
            Credential::ApiKey(_) => f.write_str("Credential::ApiKey(<redacted>)"),
        }
    }
}

/// Outcome of a single descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
enum LookupFailure {
    Missing,
    InvalidFormat,
}

/// Resolves raw credentials from requests using configured lookup chains
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    token_chain: LookupChain,
    api_key_chain: LookupChain,
    token_scheme: String,
}

impl CredentialResolver {
    pub fn new(token_chain: LookupChain, api_key_chain: LookupChain, token_scheme: &str) -> Self {
        Self {
            token_chain,
            api_key_chain,
            token_scheme: token_scheme.to_string(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        Ok(Self::new(
            config.token_chain()?,
            config.api_key_chain()?,
            &config.token_scheme,
        ))
    }

    pub fn token_kind(&self) -> CredentialKind {
        CredentialKind::BearerToken {
            scheme: self.token_scheme.clone(),
        }
    }

    /// Resolve an API key if one is present, otherwise a bearer token
    pub fn resolve<R: RequestView>(&self, req: &R) -> Result<Credential, AppError> {
        match resolve_credential(req, &self.api_key_chain, &CredentialKind::ApiKey) {
            Ok(key) => return Ok(Credential::ApiKey(key)),
            Err(AppError::MissingSource(_)) => {}
            Err(e) => return Err(e),
        }

        resolve_credential(req, &self.token_chain, &self.token_kind()).map(Credential::Bearer)
    }
}

/// Walk `chain` in order and return the first non-empty value
///
/// Descriptors after the first hit are never consulted.
pub fn resolve_credential<R: RequestView>(
    req: &R,
    chain: &LookupChain,
    kind: &CredentialKind,
) -> Result<String, AppError> {
    let mut malformed: Option<&LookupDescriptor> = None;

    for descriptor in chain.descriptors() {
        match lookup_one(req, descriptor, kind) {
            Ok(value) => {
                tracing::trace!(source = %descriptor, "Credential resolved");
                return Ok(value);
            }
            Err(LookupFailure::InvalidFormat) => {
                tracing::debug!(source = %descriptor, "Malformed credential");
                malformed.get_or_insert(descriptor);
            }
            Err(LookupFailure::Missing) => {}
        }
    }

    match malformed {
        Some(descriptor) => Err(AppError::InvalidFormat(descriptor.to_string())),
        None => Err(AppError::MissingSource(chain.to_string())),
    }
}

fn lookup_one<R: RequestView>(
    req: &R,
    descriptor: &LookupDescriptor,
    kind: &CredentialKind,
) -> Result<String, LookupFailure> {
    let raw = req
        .lookup(descriptor)
        .filter(|v| !v.trim().is_empty())
        .ok_or(LookupFailure::Missing)?;

    match (descriptor.source, kind) {
        (LookupSource::Header, CredentialKind::BearerToken { scheme }) => {
            strip_scheme(&raw, scheme)
        }
        _ => Ok(raw.trim().to_string()),
    }
}

fn strip_scheme(value: &str, scheme: &str) -> Result<String, LookupFailure> {
    match value.split_once(' ') {
        Some((prefix, token)) if prefix == scheme && !token.trim().is_empty() => {
            Ok(token.trim().to_string())
        }
        _ => Err(LookupFailure::InvalidFormat),
    }
}
