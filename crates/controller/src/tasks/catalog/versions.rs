//! `isLatest` tracking across the versions of one catalog name.

use crate::crds::{CatalogEntry, CatalogKind};
use crate::store::{list_entries, update_entry_status, ObjectKey};
use crate::tasks::queue::{Action, Reconciler};
use crate::tasks::types::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, instrument};

lazy_static! {
    static ref SEMVER: Regex = Regex::new(
        r"^v?(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-([0-9A-Za-z.-]+))?(?:\+[0-9A-Za-z.-]+)?$"
    )
    .unwrap();
}

#[derive(Debug, PartialEq, Eq)]
struct SemVer {
    core: [u64; 3],
    pre: Vec<String>,
}

impl SemVer {
    fn parse(version: &str) -> Option<Self> {
        let caps = SEMVER.captures(version)?;
        let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
        Some(Self {
            core: [part(1)?, part(2)?, part(3)?],
            pre: caps
                .get(4)
                .map(|m| m.as_str().split('.').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.core.cmp(&other.core).then_with(|| {
            match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare_prerelease(&self.pre, &other.pre),
            }
        })
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_prerelease(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

pub fn is_semantic_version(version: &str) -> bool {
    SemVer::parse(version).is_some()
}

fn timestamp(published_at: Option<&str>) -> DateTime<Utc> {
    published_at
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Semver beats non-semver; semvers by precedence; the rest by publish time
pub fn compare_versions(a: &str, a_published: Option<&str>, b: &str, b_published: Option<&str>) -> Ordering {
    match (SemVer::parse(a), SemVer::parse(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => timestamp(a_published).cmp(&timestamp(b_published)),
    }
}

/// Metadata name of the published entry that should carry `isLatest`
pub fn latest_of<'a>(entries: impl IntoIterator<Item = &'a CatalogEntry>) -> Option<String> {
    let mut latest: Option<&CatalogEntry> = None;
    for entry in entries.into_iter().filter(|e| e.status.published) {
        let Some(version) = entry.spec.version() else {
            continue;
        };
        latest = match latest {
            None => Some(entry),
            Some(current) => {
                let current_version = current.spec.version().unwrap_or_default();
                let ordering = compare_versions(
                    version,
                    entry.status.published_at.as_deref(),
                    current_version,
                    current.status.published_at.as_deref(),
                );
                if ordering == Ordering::Greater {
                    Some(entry)
                } else {
                    Some(current)
                }
            }
        };
    }
    latest.map(CatalogEntry::name_any)
}

/// Recompute `isLatest` for every version of one catalog name
pub async fn refresh_latest(ctx: &Context, kind: CatalogKind, spec_name: &str) -> Result<usize> {
    let group: Vec<CatalogEntry> = list_entries(ctx.store.as_ref(), kind, Some(&ctx.namespace))
        .await?
        .into_iter()
        .filter(|e| e.spec.name() == spec_name)
        .collect();
    let latest = latest_of(&group);

    let mut updated = 0;
    for entry in &group {
        let should_be_latest = latest.as_deref() == Some(entry.name_any().as_str());
        if entry.status.is_latest == should_be_latest {
            continue;
        }
        update_entry_status(ctx.store.as_ref(), kind, &ctx.namespace, &entry.name_any(), |e| {
            if e.status.is_latest == should_be_latest {
                return false;
            }
            e.status.is_latest = should_be_latest;
            true
        })
        .await?;
        updated += 1;
    }
    Ok(updated)
}

/// Keeps `isLatest` consistent for one versioned catalog kind
pub struct VersionReconciler {
    ctx: Arc<Context>,
    kind: CatalogKind,
}

impl VersionReconciler {
    pub fn new(ctx: Arc<Context>, kind: CatalogKind) -> Self {
        Self { ctx, kind }
    }
}

#[async_trait]
impl Reconciler for VersionReconciler {
    fn name(&self) -> &'static str {
        match self.kind {
            CatalogKind::ToolServer => "mcpservercatalog-versions",
            CatalogKind::Agent => "agentcatalog-versions",
            CatalogKind::Skill => "skillcatalog-versions",
            CatalogKind::Model => "modelcatalog-versions",
        }
    }

    #[instrument(skip(self), fields(kind = %self.kind, name = %key.name))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let namespace = key.namespace().unwrap_or(&self.ctx.namespace);
        let entry = crate::store::get_entry(self.ctx.store.as_ref(), self.kind, namespace, &key.name).await?;
        let spec_name = match entry {
            Some(entry) => entry.spec.name().to_string(),
            // A deleted entry may have been the latest; the group is found by
            // scanning since its spec name is gone.
            None => {
                self.refresh_all().await?;
                return Ok(Action::await_change());
            }
        };
        let updated = refresh_latest(&self.ctx, self.kind, &spec_name).await?;
        if updated > 0 {
            debug!(spec_name, updated, "Updated latest version flags");
        }
        Ok(Action::await_change())
    }
}

impl VersionReconciler {
    async fn refresh_all(&self) -> Result<()> {
        let entries = list_entries(self.ctx.store.as_ref(), self.kind, Some(&self.ctx.namespace)).await?;
        let mut names: Vec<&str> = entries.iter().map(|e| e.spec.name()).collect();
        names.sort_unstable();
        names.dedup();
        for name in names {
            refresh_latest(&self.ctx, self.kind, name).await?;
        }
        Ok(())
    }
}
