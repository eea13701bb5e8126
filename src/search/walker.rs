use std::collections::{HashSet, VecDeque};

use anyhow::{bail, Context, Result};

use super::SearchBackend;

/// Breadth-first container walk with duplicate-work avoidance / 容器遍历
///
/// Containers are identified by the backend's own ids. A container enters the
/// `completed` set once its last page has been read and is never entered again
/// for the lifetime of the walker, even if it is enqueued a second time.
#[derive(Debug, Default)]
pub struct ContainerWalker {
    queue: VecDeque<String>,
    completed: HashSet<String>,
    /// Container being paged and the cursor of its next page
    current: Option<(String, Option<String>)>,
}

impl ContainerWalker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, container: impl Into<String>) {
        let container = container.into();
        if self.completed.contains(&container) || self.queue.contains(&container) {
            return;
        }
        self.queue.push_back(container);
    }

    pub fn is_completed(&self, container: &str) -> bool {
        self.completed.contains(container)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Drop pending work after an early stop; completed containers are kept.
    pub fn abandon(&mut self) {
        self.queue.clear();
        self.current = None;
    }

    /// Fetch the next page of items, `None` once every queued container is done.
    pub async fn next_batch<B>(&mut self, backend: &B) -> Result<Option<Vec<B::Item>>>
    where
        B: SearchBackend + ?Sized,
    {
        let (container, cursor) = loop {
            if let Some(current) = self.current.take() {
                break current;
            }
            match self.queue.pop_front() {
                None => return Ok(None),
                Some(c) if self.completed.contains(&c) => {
                    tracing::debug!(
                        "{}: container {:?} already processed, skipping",
                        backend.service_name(),
                        c
                    );
                }
                Some(c) => break (c, None),
            }
        };

        let page = backend
            .list_page(&container, cursor.clone())
            .await
            .with_context(|| format!("listing container {:?}", container))?;

        for child in page.children {
            self.enqueue(child);
        }

        match page.next {
            None => {
                self.completed.insert(container);
            }
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                bail!("container {:?} returned the same continuation cursor twice", container);
            }
            Some(next) => self.current = Some((container, Some(next))),
        }

        Ok(Some(page.items))
    }
}
