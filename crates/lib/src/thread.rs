//! Thread context resolution: conversation ids and cold-thread prompts.
//!
//! A conversation is keyed by the thread's root post id; the host server's
//! thread id is authoritative, so the key survives bot restarts. When a
//! backend has no session for that id (restart, session expiry) the prior
//! posts are refetched and a bounded window folded into the prompt instead
//! of re-sending unbounded history.

use crate::transport::{Transport, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// What to send to a conversational backend for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    pub conversation_id: String,
    pub prompt: String,
}

/// Resolve conversation id and outgoing prompt.
///
/// - Empty `root_id`: the post starts a new thread; its own id becomes the
///   conversation id and the text passes through unmodified.
/// - `has_session`: the backend already tracks the conversation; the text
///   passes through unmodified and the backend's history stands in for
///   context. The thread is never re-fetched in this case.
/// - Otherwise the thread is cold: fetch it, sort descending by creation
///   time, and join the `max_past` most recent prior posts onto the current
///   message, most recent first, newline separated.
pub async fn resolve(
    transport: &dyn Transport,
    post_id: &str,
    root_id: &str,
    text: &str,
    has_session: bool,
    max_past: usize,
) -> Result<ResolvedContext, TransportError> {
    if root_id.is_empty() {
        return Ok(ResolvedContext {
            conversation_id: post_id.to_string(),
            prompt: text.to_string(),
        });
    }
    if has_session {
        return Ok(ResolvedContext {
            conversation_id: root_id.to_string(),
            prompt: text.to_string(),
        });
    }
    let thread = transport.get_thread(post_id).await?;
    let mut posts: Vec<_> = thread.posts.into_values().collect();
    posts.sort_by(|a, b| b.create_at.cmp(&a.create_at));
    let mut lines = vec![text.to_string()];
    lines.extend(
        posts
            .into_iter()
            .filter(|p| p.id != post_id)
            .take(max_past)
            .map(|p| p.message),
    );
    Ok(ResolvedContext {
        conversation_id: root_id.to_string(),
        prompt: lines.join("\n"),
    })
}

/// Per-conversation locks serializing the session-existence check and
/// dispatch for messages arriving concurrently in the same thread.
#[derive(Default)]
pub struct ConversationLocks {
    inner: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a conversation id, creating it on first use.
    /// The guard is held across the existence check and backend dispatch.
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut g = self.inner.write().await;
            g.entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ThreadPost, ThreadPosts};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeTransport {
        thread: ThreadPosts,
        fetches: AtomicUsize,
    }

    impl FakeTransport {
        fn new(posts: Vec<ThreadPost>) -> Self {
            let order = posts.iter().map(|p| p.id.clone()).collect();
            let posts = posts.into_iter().map(|p| (p.id.clone(), p)).collect();
            Self {
                thread: ThreadPosts { posts, order },
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn create_post(
            &self,
            _channel_id: &str,
            _root_id: &str,
            _message: &str,
            _file_ids: &[String],
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn upload_file(
            &self,
            _channel_id: &str,
            _path: &Path,
        ) -> Result<String, TransportError> {
            Ok("file-id".to_string())
        }

        async fn get_thread(&self, _post_id: &str) -> Result<ThreadPosts, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.thread.clone())
        }
    }

    fn post(id: &str, message: &str, create_at: i64) -> ThreadPost {
        ThreadPost {
            id: id.to_string(),
            message: message.to_string(),
            create_at,
        }
    }

    #[tokio::test]
    async fn new_thread_uses_post_id_and_raw_text() {
        let t = FakeTransport::new(vec![]);
        let r = resolve(&t, "p0", "", "hello", false, 2).await.expect("resolve");
        assert_eq!(r.conversation_id, "p0");
        assert_eq!(r.prompt, "hello");
        assert_eq!(t.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn known_session_forwards_raw_text_without_fetching() {
        let t = FakeTransport::new(vec![post("p0", "current", 40)]);
        let r = resolve(&t, "p0", "r1", "follow-up", true, 2)
            .await
            .expect("resolve");
        assert_eq!(r.conversation_id, "r1");
        assert_eq!(r.prompt, "follow-up");
        assert_eq!(t.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cold_thread_folds_most_recent_posts_first() {
        // t0 > t1 > t2 > t3; current post is p0 at t0
        let t = FakeTransport::new(vec![
            post("p3", "m3", 10),
            post("p2", "m2", 20),
            post("p1", "m1", 30),
            post("p0", "current", 40),
        ]);
        let r = resolve(&t, "p0", "p3", "current", false, 2)
            .await
            .expect("resolve");
        assert_eq!(r.conversation_id, "p3");
        assert_eq!(r.prompt, "current\nm1\nm2");
        assert_eq!(t.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cold_thread_shorter_than_window() {
        let t = FakeTransport::new(vec![post("p1", "m1", 30), post("p0", "current", 40)]);
        let r = resolve(&t, "p0", "p1", "current", false, 5)
            .await
            .expect("resolve");
        assert_eq!(r.prompt, "current\nm1");
    }

    #[tokio::test]
    async fn conversation_lock_serializes_holders() {
        let locks = Arc::new(ConversationLocks::new());
        let guard = locks.acquire("r1").await;
        let second = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("r1").await })
        };
        // held: the second acquire must not complete yet
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("lock released")
            .expect("task");
        // a different conversation is independent
        let _other = locks.acquire("r2").await;
    }
}
