//! Fallback cascade shared by every handler / 回退搜索级联
//!
//! Per search unit, results unioned across units:
//! 1. name → provider lookup, then a substring crawl when the lookup finds nothing
//! 2. no hit → indexed digest search (md5, then sha1)
//! 3. still no hit → one crawl comparing every crawl-capable digest
//!
//! A failing unit is logged and contributes nothing; the other units still run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{ContainerWalker, FindQuery, HashKind, SearchBackend};
use crate::error::ServiceError;
use crate::storage::{SearchCapability, SearchSupport};
use crate::utils::{basename, contains_ignore_case, normalize_digest};

/// Criteria of one query the backend can actually answer.
struct Plan {
    name: Option<String>,
    indexed: Vec<(HashKind, String)>,
    crawled: Vec<(HashKind, String)>,
}

fn plan<B: SearchBackend>(backend: &B, query: &FindQuery) -> Result<Plan, ServiceError> {
    query.validate()?;
    let cap: SearchCapability = backend.capability();
    let service = backend.service_name();

    let name = query.name_criterion().map(str::to_string);
    let name = match name {
        Some(n) if cap.name == SearchSupport::Unsupported && !backend.crawl_fallback() => {
            tracing::error!("{} does not support name searching ({:?})", service, n);
            None
        }
        other => other,
    };

    let mut indexed = Vec::new();
    let mut crawled = Vec::new();
    let mut refused = Vec::new();
    for (kind, digest) in query.hashes() {
        match cap.hash(kind) {
            SearchSupport::Indexed => indexed.push((kind, digest)),
            SearchSupport::Crawl => crawled.push((kind, digest)),
            SearchSupport::Unsupported => {
                tracing::error!("{} does not support {} hash searching", service, kind);
                refused.push(kind);
            }
        }
    }

    if name.is_none() && indexed.is_empty() && crawled.is_empty() {
        let operation = if refused.is_empty() {
            "name search".to_string()
        } else {
            refused.iter().map(|k| format!("{} search", k)).collect::<Vec<_>>().join(", ")
        };
        return Err(ServiceError::unsupported(service, operation));
    }

    if !crawled.is_empty() {
        tracing::warn!(
            "{} has no indexed digest search; \
             this walks every object under the configured containers",
            service
        );
    }

    Ok(Plan { name, indexed, crawled })
}

/// Crawl one container tree collecting items accepted by `accept`.
async fn crawl<B, P>(
    backend: &B,
    walker: &mut ContainerWalker,
    container: &str,
    first_only: bool,
    accept: P,
) -> Result<Vec<B::Item>>
where
    B: SearchBackend,
    P: Fn(&B::Item) -> bool + Send + Sync,
{
    walker.enqueue(container);
    let mut hits = Vec::new();

    loop {
        let batch = match walker.next_batch(backend).await {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(e) => {
                // only the failing container is dropped; its siblings stay queued
                tracing::warn!("{}: skipping container: {:#}", backend.service_name(), e);
                continue;
            }
        };

        for item in batch {
            if accept(&item) {
                hits.push(item);
                if first_only {
                    walker.abandon();
                    return Ok(hits);
                }
            }
        }
    }

    Ok(hits)
}

fn digest_matches<B: SearchBackend>(
    backend: &B,
    item: &B::Item,
    kind: HashKind,
    digest: &str,
) -> bool {
    backend
        .item_digest(item, kind)
        .map(|d| normalize_digest(&d) == digest)
        .unwrap_or(false)
}

async fn search_unit<B: SearchBackend>(
    backend: &B,
    unit: &str,
    plan: &Plan,
    first_only: bool,
    name_walker: &mut ContainerWalker,
    hash_walker: &mut ContainerWalker,
) -> Result<Vec<B::Item>> {
    let container = backend
        .resolve_unit(unit)
        .await
        .with_context(|| format!("resolving search unit {:?}", unit))?;
    let cap = backend.capability();
    let mut hits = Vec::new();

    if let Some(name) = &plan.name {
        if cap.name != SearchSupport::Unsupported {
            hits = backend
                .lookup_name(&container, name)
                .await
                .with_context(|| format!("name lookup {:?}", name))?;
        }
        if hits.is_empty() && backend.crawl_fallback() {
            tracing::debug!(
                "{}: {:?} not found in {:?}, crawling",
                backend.service_name(),
                name,
                unit
            );
            hits = crawl(backend, name_walker, &container, first_only, |item| {
                contains_ignore_case(&backend.item_path(item), name)
            })
            .await?;
        }
    }

    if hits.is_empty() {
        for (kind, digest) in &plan.indexed {
            let found = backend
                .search_hash(&container, *kind, digest)
                .await
                .with_context(|| format!("{} search", kind))?;
            hits = found
                .into_iter()
                .filter(|item| digest_matches(backend, item, *kind, digest))
                .collect();
            if !hits.is_empty() {
                break;
            }
        }
    }

    if hits.is_empty() && !plan.crawled.is_empty() {
        hits = crawl(backend, hash_walker, &container, first_only, |item| {
            plan.crawled
                .iter()
                .any(|(kind, digest)| digest_matches(backend, item, *kind, digest))
        })
        .await?;
    }

    Ok(hits)
}

/// Run the cascade over every configured unit / 在所有搜索单元中查找
pub async fn find_in_units<B: SearchBackend>(
    backend: &B,
    query: &FindQuery,
) -> Result<Vec<B::Item>, ServiceError> {
    let plan = plan(backend, query)?;
    let mut name_walker = ContainerWalker::new();
    let mut hash_walker = ContainerWalker::new();
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for unit in backend.search_units() {
        let searched = search_unit(
            backend,
            &unit,
            &plan,
            query.first_only,
            &mut name_walker,
            &mut hash_walker,
        )
        .await;
        let hits = match searched {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(
                    "{}: search in {:?} failed, skipping: {:#}",
                    backend.service_name(),
                    unit,
                    e
                );
                continue;
            }
        };

        for item in hits {
            if seen.insert(backend.item_id(&item)) {
                results.push(item);
            }
        }

        if query.first_only && !results.is_empty() {
            results.truncate(1);
            break;
        }
    }

    tracing::info!("{}: {} file(s) found", backend.service_name(), results.len());
    Ok(results)
}

/// Local file name for one hit, unique within a single fetch / 下载目标路径
///
/// The remote basename is kept when free. Hits sharing a basename get the
/// sanitized backend id appended to the stem, then a counter if still taken.
fn download_target(
    dest_dir: &Path,
    path: &str,
    id: &str,
    reserved: &mut HashSet<String>,
) -> PathBuf {
    let name = match basename(path) {
        "" => basename(id),
        n => n,
    };
    let name = if name.is_empty() { "item" } else { name };

    let mut candidate = name.to_string();
    if reserved.contains(&candidate) {
        let (stem, ext) = match name.rfind('.') {
            Some(i) if i > 0 => name.split_at(i),
            _ => (name, ""),
        };
        let tag: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
            .collect();
        candidate = format!("{}_{}{}", stem, tag, ext);
        let mut n = 1;
        while reserved.contains(&candidate) {
            candidate = format!("{}_{}_{}{}", stem, tag, n, ext);
            n += 1;
        }
    }

    reserved.insert(candidate.clone());
    dest_dir.join(candidate)
}

/// Find, then download every hit into `dest_dir` / 查找并下载
pub async fn fetch_matches<B: SearchBackend>(
    backend: &B,
    query: &FindQuery,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, ServiceError> {
    let items = find_in_units(backend, query).await?;
    tokio::fs::create_dir_all(dest_dir).await?;

    let mut paths = Vec::with_capacity(items.len());
    let mut reserved = HashSet::new();
    for item in &items {
        let id = backend.item_id(item);
        let path = backend.item_path(item);
        let dest = download_target(dest_dir, &path, &id, &mut reserved);

        match backend.download(item, &dest).await {
            Ok(()) => paths.push(dest),
            Err(e) => {
                tracing::warn!(
                    "{}: failed to download {} ({}): {:#}",
                    backend.service_name(),
                    path,
                    id,
                    e
                );
                match tokio::fs::remove_file(&dest).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(source) => {
                        let err = ServiceError::Cleanup { path: dest.clone(), source };
                        tracing::error!("{}", err);
                    }
                }
            }
        }
    }

    Ok(paths)
}
