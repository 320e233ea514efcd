//! Region Directory
//!
//! Resolves the regions enabled for the account once per scan and provides
//! the bounded, order-preserving fan-out used by regional rules.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use super::providers::{ProviderResult, RegionContext, ResourceProvider};
use super::types::AuditError;

/// Ordered, deduplicated set of regions shared by every checker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSet {
    regions: Arc<[String]>,
}

impl RegionSet {
    /// Build a set keeping the first occurrence of each region
    pub fn new<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for region in regions {
            let region = region.into();
            if !region.is_empty() && !unique.contains(&region) {
                unique.push(region);
            }
        }

        Self {
            regions: unique.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(String::as_str)
    }

    /// One provider binding per region, in set order
    pub fn contexts(&self) -> impl Iterator<Item = RegionContext> + '_ {
        self.regions.iter().map(RegionContext::new)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.regions.to_vec()
    }
}

/// Resolves the region set at scan start
pub struct RegionDirectory;

impl RegionDirectory {
    pub async fn resolve(
        provider: &dyn ResourceProvider,
        home: &RegionContext,
    ) -> ProviderResult<RegionSet> {
        let regions = RegionSet::new(provider.list_regions(home).await?);
        info!(home = %home, count = regions.len(), "Resolved enabled regions");
        Ok(regions)
    }
}

/// Evaluate `f` for every item with at most `concurrency` calls in flight.
///
/// Results come back in input order whatever order the calls complete in.
/// The first error (in input order) aborts the fan-out and drops every call
/// still in flight.
pub async fn ordered_fan_out<I, T, F, Fut>(
    items: I,
    concurrency: usize,
    f: F,
) -> Result<Vec<T>, AuditError>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, AuditError>>,
{
    stream::iter(items)
        .map(f)
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// Per-region fan-out whose per-region results are concatenated in region order
pub async fn fan_out_regions<T, F, Fut>(
    regions: &RegionSet,
    concurrency: usize,
    f: F,
) -> Result<Vec<T>, AuditError>
where
    F: FnMut(RegionContext) -> Fut,
    Fut: Future<Output = Result<Vec<T>, AuditError>>,
{
    let per_region = ordered_fan_out(regions.contexts(), concurrency, f).await?;
    Ok(per_region.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::providers::{Operation, ProviderError};
    use std::time::Duration;

    #[test]
    fn test_region_set_dedupes_in_order() {
        let set = RegionSet::new(["us-east-1", "eu-west-1", "us-east-1", "", "ap-south-1"]);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec!["us-east-1", "eu-west-1", "ap-south-1"]
        );
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let regions = RegionSet::new(["a", "b", "c", "d"]);

        // Earlier regions finish last
        let results = fan_out_regions(&regions, 4, |ctx| async move {
            let delay = match ctx.region() {
                "a" => 40,
                "b" => 30,
                "c" => 20,
                _ => 10,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(vec![ctx.region().to_string(), format!("{}-2", ctx.region())])
        })
        .await
        .unwrap();

        assert_eq!(results, vec!["a", "a-2", "b", "b-2", "c", "c-2", "d", "d-2"]);
    }

    #[tokio::test]
    async fn test_fan_out_fails_fast() {
        let regions = RegionSet::new(["a", "b", "c"]);

        let err = fan_out_regions::<String, _, _>(&regions, 2, |ctx| async move {
            if ctx.region() == "b" {
                Err(ProviderError::new(Operation::DescribeVpcs, "denied")
                    .in_region(&ctx)
                    .into())
            } else {
                Ok(vec![])
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AuditError::Provider(ref e) if e.region.as_deref() == Some("b")));
    }
}
