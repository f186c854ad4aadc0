//! Watch-address membership, consumed to filter extracted transfers.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::ScanError;
use crate::types::TransferCandidate;

/// Decides whether an address is watched by the bridge.
#[async_trait]
pub trait WatchPredicate: Send + Sync {
    async fn is_watched(&self, address: &str) -> Result<bool, ScanError>;
}

/// Fixed, case-insensitive set of watched addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticWatchList {
    addresses: HashSet<String>,
}

impl StaticWatchList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .map(|a| a.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl WatchPredicate for StaticWatchList {
    async fn is_watched(&self, address: &str) -> Result<bool, ScanError> {
        Ok(self.addresses.contains(&address.to_ascii_lowercase()))
    }
}

/// Keep only the candidates whose sender or receiver is watched.
pub async fn filter_watched(
    predicate: &dyn WatchPredicate,
    candidates: Vec<TransferCandidate>,
) -> Result<Vec<TransferCandidate>, ScanError> {
    let mut kept = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if predicate.is_watched(&candidate.sender).await?
            || predicate.is_watched(&candidate.receiver).await?
        {
            kept.push(candidate);
        }
    }
    Ok(kept)
}
