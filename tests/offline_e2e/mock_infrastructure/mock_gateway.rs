//! In-memory messaging gateway mock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use adbroker::error::EngineError;
use adbroker::telegram::{MessagingGateway, PostSnapshot};

/// Deterministic gateway double: posts live in a map keyed by
/// (channel, post_ref) and can be deleted or edited by the test.
#[derive(Default)]
pub struct MockGateway {
    posts: Mutex<HashMap<(String, String), String>>,
    messages: Mutex<Vec<(String, String)>>,
    ref_counter: AtomicU64,
    unavailable: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every gateway call fails with GatewayUnavailable while set.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Simulate the channel owner deleting the post out-of-band.
    pub fn delete_post(&self, channel_id: &str, post_ref: &str) {
        self.posts
            .lock()
            .unwrap()
            .remove(&(channel_id.to_string(), post_ref.to_string()));
    }

    /// Simulate the post being edited after publication.
    pub fn edit_post(&self, channel_id: &str, post_ref: &str, new_content: &str) {
        self.posts.lock().unwrap().insert(
            (channel_id.to_string(), post_ref.to_string()),
            new_content.to_string(),
        );
    }

    /// Direct messages sent so far, as (user_id, text) pairs.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    fn check_up(&self) -> Result<(), EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(EngineError::GatewayUnavailable("mock: gateway down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessagingGateway for MockGateway {
    async fn publish_post(&self, channel_id: &str, content: &str) -> Result<String, EngineError> {
        self.check_up()?;
        let n = self.ref_counter.fetch_add(1, Ordering::SeqCst);
        let post_ref = format!("msg-{n}");
        self.posts.lock().unwrap().insert(
            (channel_id.to_string(), post_ref.clone()),
            content.to_string(),
        );
        Ok(post_ref)
    }

    async fn get_post(
        &self,
        channel_id: &str,
        post_ref: &str,
    ) -> Result<PostSnapshot, EngineError> {
        self.check_up()?;
        let posts = self.posts.lock().unwrap();
        match posts.get(&(channel_id.to_string(), post_ref.to_string())) {
            Some(content) => Ok(PostSnapshot {
                exists: true,
                content: Some(content.clone()),
            }),
            None => Ok(PostSnapshot {
                exists: false,
                content: None,
            }),
        }
    }

    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), EngineError> {
        self.check_up()?;
        self.messages
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}
