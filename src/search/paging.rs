use std::future::Future;

use anyhow::{bail, Result};

/// One page returned by a provider listing / 分页结果
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Sub-containers discovered on this page, walked after the current one
    pub children: Vec<String>,
    /// Continuation cursor; `None` is the provider's explicit "done" signal
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<String>) -> Self {
        Self {
            items,
            children: Vec::new(),
            next,
        }
    }

    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.children = children;
        self
    }
}

/// Next offset for offset/total providers; never inferred from a short page.
pub fn next_offset(offset: u64, received: usize, total: u64) -> Option<String> {
    let next = offset + received as u64;
    if received == 0 || next >= total {
        None
    } else {
        Some(next.to_string())
    }
}

/// Follow continuation cursors until the provider signals completion / 拉取全部分页
pub async fn drain_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = fetch(cursor.clone()).await?;
        all.extend(page.items);

        match page.next {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                bail!("provider returned the same continuation cursor twice: {}", next);
            }
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(all)
}
