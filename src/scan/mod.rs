//! Content scan pipeline / 内容扫描流水线
//!
//! Every reachable item is copied to a temp file, turned into text, split into
//! lines and matched against each pattern. Only digests of matched text leave
//! this module. The temp copy is removed whatever the outcome.

use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};
use crate::models::{MatchRecord, PatternSet};
use crate::search::{ContainerWalker, SearchBackend};
use crate::utils::basename;

pub mod extract;

pub use extract::{PlainTextExtractor, TextExtractor};

/// Deterministic temp location for one item / 临时文件路径
pub fn temp_name(temp_dir: &Path, native_id: &str) -> PathBuf {
    let name: String = basename(native_id)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let name = if name.is_empty() { "item".to_string() } else { name };
    temp_dir.join(format!("scan_{}", name))
}

/// Removes its file on drop / 临时文件守卫
#[derive(Debug)]
pub struct TempCopy {
    path: PathBuf,
}

impl TempCopy {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempCopy {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                let err = ServiceError::Cleanup {
                    path: self.path.clone(),
                    source,
                };
                tracing::error!("{}", err);
            }
        }
    }
}

/// Match every pattern against every non-empty line of `text`.
///
/// Lines are numbered from 1; only the first hit of a pattern on a line is
/// reported. Offsets count characters, not bytes. Output order is line, then
/// pattern declaration order.
pub fn search_content(file: &Path, text: &str, patterns: &PatternSet) -> Vec<MatchRecord> {
    let mut records = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        for pattern in patterns.iter() {
            if let Some(m) = pattern.regex().find(line) {
                let start = line[..m.start()].chars().count();
                let end = start + m.as_str().chars().count();
                records.push(MatchRecord::new(
                    m.as_str(),
                    pattern.name(),
                    file,
                    idx + 1,
                    start,
                    end,
                ));
            }
        }
    }

    records
}

/// Extract and search one local file, labelling records with `label`.
pub fn scan_file(
    path: &Path,
    label: &Path,
    patterns: &PatternSet,
    extractor: &dyn TextExtractor,
) -> Result<Vec<MatchRecord>> {
    let text = extractor.extract(path)?;
    Ok(search_content(label, &text, patterns))
}

async fn scan_item<B: SearchBackend>(
    backend: &B,
    item: &B::Item,
    temp_dir: &Path,
    patterns: &PatternSet,
    extractor: &dyn TextExtractor,
) -> Result<Vec<MatchRecord>> {
    let id = backend.item_id(item);
    let label = PathBuf::from(backend.item_path(item));
    let copy = TempCopy::new(temp_name(temp_dir, &id));

    backend
        .download(item, copy.path())
        .await
        .map_err(|e| {
            let context = format!("download {}", label.display());
            ServiceError::backend(backend.service_name(), context, e)
        })?;

    scan_file(copy.path(), &label, patterns, extractor)
}

/// Scan every file under the configured units / 扫描所有搜索单元
///
/// Item failures (download, extraction) and container listing failures are
/// logged and skipped; sibling items and containers are still scanned.
pub async fn scan_units<B: SearchBackend>(
    backend: &B,
    temp_dir: &Path,
    patterns: &PatternSet,
    extractor: &dyn TextExtractor,
) -> Result<Vec<MatchRecord>> {
    tokio::fs::create_dir_all(temp_dir).await?;
    let service = backend.service_name();
    let mut walker = ContainerWalker::new();
    let mut records = Vec::new();
    let mut scanned = 0usize;

    for unit in backend.search_units() {
        let container = match backend.resolve_unit(&unit).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("{}: cannot resolve {:?}, skipping: {:#}", service, unit, e);
                continue;
            }
        };
        walker.enqueue(container);

        loop {
            let batch = match walker.next_batch(backend).await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("{}: {:?}: skipping container: {:#}", service, unit, e);
                    continue;
                }
            };

            for item in &batch {
                match scan_item(backend, item, temp_dir, patterns, extractor).await {
                    Ok(found) => {
                        scanned += 1;
                        tracing::debug!(
                            "{}: {} match(es) in {}",
                            service,
                            found.len(),
                            backend.item_path(item)
                        );
                        records.extend(found);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "{}: skipping {} ({}): {}",
                            service,
                            backend.item_path(item),
                            backend.item_id(item),
                            e
                        );
                    }
                }
            }
        }
    }

    tracing::info!("{}: scanned {} file(s), {} match(es)", service, scanned, records.len());
    Ok(records)
}
