//! Credential references.
//!
//! A registry entry names its API key indirectly: `env:NAME` reads an environment
//! variable, `literal:VALUE` carries the value inline (dev only). Delivering secrets is
//! somebody else's job; this module only resolves references.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

#[derive(Clone, PartialEq, Eq)]
pub enum CredentialRef {
    Env(String),
    Literal(String),
}

impl FromStr for CredentialRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("credential ref '{s}' has no scheme")))?;
        match scheme {
            "env" if !rest.trim().is_empty() => Ok(CredentialRef::Env(rest.trim().to_string())),
            "literal" => Ok(CredentialRef::Literal(rest.to_string())),
            "env" => Err(Error::Config("credential ref 'env:' names no variable".to_string())),
            other => Err(Error::Config(format!(
                "unsupported credential scheme '{other}'"
            ))),
        }
    }
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::Env(name) => write!(f, "env:{name}"),
            CredentialRef::Literal(_) => f.write_str("literal:<redacted>"),
        }
    }
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, reference: &CredentialRef) -> Result<String>;
}

/// Resolves `env:` references from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialResolver;

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, reference: &CredentialRef) -> Result<String> {
        match reference {
            CredentialRef::Literal(v) => Ok(v.clone()),
            CredentialRef::Env(name) => match std::env::var(name) {
                Ok(v) if !v.trim().is_empty() => Ok(v),
                Ok(_) => Err(Error::Config(format!("credential variable {name} is empty"))),
                Err(_) => Err(Error::Config(format!("credential variable {name} is not set"))),
            },
        }
    }
}

/// Resolves `env:` references from a fixed map instead of the environment.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    values: HashMap<String, String>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, reference: &CredentialRef) -> Result<String> {
        match reference {
            CredentialRef::Literal(v) => Ok(v.clone()),
            CredentialRef::Env(name) => self
                .values
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Config(format!("credential variable {name} is not set"))),
        }
    }
}
