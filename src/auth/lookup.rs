//! Lookup chain descriptors
//!
//! A chain is an ordered, comma separated list of `<source>:<key>` pairs,
//! e.g. `query:token,cookie:jwt,header:Authorization`.

use std::fmt;
use std::str::FromStr;

/// Where in a request a credential may live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupSource {
    Header,
    Query,
    Cookie,
    Param,
}

impl LookupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupSource::Header => "header",
            LookupSource::Query => "query",
            LookupSource::Cookie => "cookie",
            LookupSource::Param => "param",
        }
    }
}

impl FromStr for LookupSource {
    type Err = LookupParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "header" => Ok(LookupSource::Header),
            "query" => Ok(LookupSource::Query),
            "cookie" => Ok(LookupSource::Cookie),
            "param" => Ok(LookupSource::Param),
            other => Err(LookupParseError::UnknownSource(other.to_string())),
        }
    }
}

/// One `(source, key)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupDescriptor {
    pub source: LookupSource,
    pub key: String,
}

impl LookupDescriptor {
    pub fn new(source: LookupSource, key: impl Into<String>) -> Self {
        Self {
            source,
            key: key.into(),
        }
    }
}

impl fmt::Display for LookupDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.as_str(), self.key)
    }
}

impl FromStr for LookupDescriptor {
    type Err = LookupParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, key) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| LookupParseError::MissingSeparator(s.trim().to_string()))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(LookupParseError::EmptyKey(s.trim().to_string()));
        }

        Ok(LookupDescriptor::new(source.parse()?, key))
    }
}

/// Ordered lookup chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupChain(Vec<LookupDescriptor>);

impl LookupChain {
    pub fn new(descriptors: Vec<LookupDescriptor>) -> Self {
        Self(descriptors)
    }

    pub fn descriptors(&self) -> &[LookupDescriptor] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LookupChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for LookupChain {
    type Err = LookupParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let descriptors = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(LookupDescriptor::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        if descriptors.is_empty() {
            return Err(LookupParseError::EmptyChain);
        }

        Ok(LookupChain(descriptors))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupParseError {
    #[error("unknown lookup source [{0}], expected header, query, cookie or param")]
    UnknownSource(String),

    #[error("descriptor [{0}] is not of the form <source>:<key>")]
    MissingSeparator(String),

    #[error("descriptor [{0}] has an empty key")]
    EmptyKey(String),

    #[error("lookup chain is empty")]
    EmptyChain,
}
