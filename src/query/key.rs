use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Remote resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryKind {
    KvGet,
    KvList,
    KvKeys,
    CatalogServices,
    CatalogService,
    CatalogNodes,
    SecretRead,
    SecretList,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::KvGet => "kv.get",
            QueryKind::KvList => "kv.list",
            QueryKind::KvKeys => "kv.keys",
            QueryKind::CatalogServices => "catalog.services",
            QueryKind::CatalogService => "catalog.service",
            QueryKind::CatalogNodes => "catalog.nodes",
            QueryKind::SecretRead => "secret.read",
            QueryKind::SecretList => "secret.list",
        }
    }

    /// Secrets carry per-consumer leases and are never shared
    pub fn can_share(&self) -> bool {
        !self.is_secret()
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, QueryKind::SecretRead | QueryKind::SecretList)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedup identity of a query: kind plus normalized parameters.
///
/// Registrations that must not share a View carry a consumer `scope`, which
/// keeps their keys distinct while the remote resource stays the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    kind: QueryKind,
    params: String,
    scope: Option<u64>,
}

impl QueryKey {
    pub fn new(
        kind: QueryKind,
        params: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            params: params.into(),
            scope: None,
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn scope(&self) -> Option<u64> {
        self.scope
    }

    pub(crate) fn scoped(
        &self,
        scope: u64,
    ) -> Self {
        Self {
            scope: Some(scope),
            ..self.clone()
        }
    }

    /// Key of the shared remote resource, without any consumer scope
    pub fn unscoped(&self) -> Self {
        Self {
            scope: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.params)?;
        if let Some(scope) = self.scope {
            write!(f, "#{scope}")?;
        }
        Ok(())
    }
}
