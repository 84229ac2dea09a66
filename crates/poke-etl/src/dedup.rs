//! Process-wide URL claim set
//!
//! A URL is downloaded at most once per run no matter how many entities
//! reference it. The set lives for one pipeline run only; re-runs rely on
//! the downloader's skip-if-exists behaviour instead.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct SeenSet {
    urls: Mutex<HashSet<String>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically record `url`, returning true iff this call claimed it first
    pub fn claim(&self, url: &str) -> bool {
        let mut urls = self.urls.lock().unwrap_or_else(PoisonError::into_inner);
        if urls.contains(url) {
            return false;
        }
        urls.insert(url.to_string())
    }

    pub fn len(&self) -> usize {
        self.urls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
