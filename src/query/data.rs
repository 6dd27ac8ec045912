use serde::Deserialize;
use serde::Serialize;

use crate::CatalogService;
use crate::KvPair;
use crate::Node;
use crate::Secret;
use crate::ServiceInstance;

/// Result payload of a fetch.
///
/// An absent remote resource is represented by an empty value (`Pair(None)`,
/// an empty list, an empty secret), never by an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryData {
    Pair(Option<KvPair>),
    Pairs(Vec<KvPair>),
    Keys(Vec<String>),
    Services(Vec<CatalogService>),
    ServiceInstances(Vec<ServiceInstance>),
    Nodes(Vec<Node>),
    Secret(Secret),
    SecretKeys(Vec<String>),
}

impl QueryData {
    pub fn is_empty(&self) -> bool {
        match self {
            QueryData::Pair(p) => p.is_none(),
            QueryData::Pairs(v) => v.is_empty(),
            QueryData::Keys(v) => v.is_empty(),
            QueryData::Services(v) => v.is_empty(),
            QueryData::ServiceInstances(v) => v.is_empty(),
            QueryData::Nodes(v) => v.is_empty(),
            QueryData::Secret(s) => s.data.is_empty(),
            QueryData::SecretKeys(v) => v.is_empty(),
        }
    }

    pub fn as_pair(&self) -> Option<&KvPair> {
        match self {
            QueryData::Pair(p) => p.as_ref(),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&Secret> {
        match self {
            QueryData::Secret(s) => Some(s),
            _ => None,
        }
    }
}
