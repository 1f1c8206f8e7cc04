//! Browser-side collaborators: tab lookup and navigation redirects.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::tracker::{TabId, WindowId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TabInfo {
    pub url: Option<String>,
    pub window_id: Option<WindowId>,
}

#[async_trait]
pub trait TabResolver: Send + Sync {
    /// Fails with [`CoreError::TabResolution`] once the tab is gone.
    async fn get_tab(&self, tab_id: TabId) -> CoreResult<TabInfo>;
}

#[async_trait]
pub trait Redirector: Send + Sync {
    async fn redirect_tab(&self, tab_id: TabId, target_url: &str) -> CoreResult<()>;
}

#[async_trait]
impl<T: TabResolver + ?Sized> TabResolver for Arc<T> {
    async fn get_tab(&self, tab_id: TabId) -> CoreResult<TabInfo> {
        (**self).get_tab(tab_id).await
    }
}

#[async_trait]
impl<T: Redirector + ?Sized> Redirector for Arc<T> {
    async fn redirect_tab(&self, tab_id: TabId, target_url: &str) -> CoreResult<()> {
        (**self).redirect_tab(tab_id, target_url).await
    }
}

/// Last known state of each open tab, fed by the events the extension posts.
#[derive(Default)]
pub struct TabRegistry {
    tabs: Mutex<HashMap<TabId, TabInfo>>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `url` for the tab. A missing `window_id` keeps the one
    /// already known.
    pub async fn upsert(&self, tab_id: TabId, url: &str, window_id: Option<WindowId>) {
        let mut tabs = self.tabs.lock().await;
        let entry = tabs.entry(tab_id).or_default();
        entry.url = Some(url.to_string());
        if window_id.is_some() {
            entry.window_id = window_id;
        }
    }

    pub async fn remove(&self, tab_id: TabId) -> bool {
        self.tabs.lock().await.remove(&tab_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.tabs.lock().await.len()
    }
}

#[async_trait]
impl TabResolver for TabRegistry {
    async fn get_tab(&self, tab_id: TabId) -> CoreResult<TabInfo> {
        self.tabs
            .lock()
            .await
            .get(&tab_id)
            .cloned()
            .ok_or(CoreError::TabResolution { tab_id })
    }
}

/// Pending redirects, one per tab; a newer redirect for the same tab
/// replaces the older one.
#[derive(Default)]
pub struct RedirectOutbox {
    pending: Mutex<HashMap<TabId, String>>,
}

impl RedirectOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn take(&self, tab_id: TabId) -> Option<String> {
        self.pending.lock().await.remove(&tab_id)
    }
}

#[async_trait]
impl Redirector for RedirectOutbox {
    async fn redirect_tab(&self, tab_id: TabId, target_url: &str) -> CoreResult<()> {
        self.pending
            .lock()
            .await
            .insert(tab_id, target_url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_resolves_until_removed() {
        let reg = TabRegistry::new();
        reg.upsert(1, "https://a.com/", Some(10)).await;
        reg.upsert(1, "https://b.com/", None).await;
        let tab = reg.get_tab(1).await.unwrap();
        assert_eq!(tab.url.as_deref(), Some("https://b.com/"));
        assert_eq!(tab.window_id, Some(10));

        assert!(reg.remove(1).await);
        assert!(matches!(
            reg.get_tab(1).await,
            Err(CoreError::TabResolution { tab_id: 1 })
        ));
        assert_eq!(reg.len().await, 0);
    }

    #[tokio::test]
    async fn outbox_keeps_one_redirect_per_tab() {
        let outbox = RedirectOutbox::new();
        outbox.redirect_tab(3, "x://blocked").await.unwrap();
        outbox.redirect_tab(3, "x://blocked").await.unwrap();
        assert_eq!(outbox.take(3).await.as_deref(), Some("x://blocked"));
        assert_eq!(outbox.take(3).await, None);
    }
}
