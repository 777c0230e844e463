use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use classline_store::Store;
use classline_types::models::Message;

/// Pull-stream over the store's insert feed.
///
/// Every insert anywhere in the store is yielded exactly once, in
/// insertion order as delivered by the feed. Filtering to the active
/// conversation is the consumer's job.
pub struct InsertFeed {
    rx: Option<broadcast::Receiver<Message>>,
    missed: bool,
}

impl InsertFeed {
    pub fn subscribe(store: &Store) -> Self {
        Self {
            rx: Some(store.subscribe_inserts()),
            missed: false,
        }
    }

    /// Next inserted message, or `None` once unsubscribed or the store
    /// is gone. A lagged receiver is recorded (see [`take_missed`]) and
    /// the stream continues with the oldest retained insert.
    ///
    /// [`take_missed`]: InsertFeed::take_missed
    pub async fn next(&mut self) -> Option<Message> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(n)) => {
                    warn!("insert feed lagged by {} messages", n);
                    self.missed = true;
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// True when deliveries were dropped since the last call; the
    /// consumer should resynchronize from history.
    pub fn take_missed(&mut self) -> bool {
        std::mem::take(&mut self.missed)
    }

    /// Stop delivery. Safe to call any number of times; `next` returns
    /// `None` from here on.
    pub fn unsubscribe(&mut self) {
        self.rx = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.rx.is_some()
    }
}

/// Handle to a callback-driven subscription. `unsubscribe` is idempotent,
/// and dropping the handle cancels the task as well, so a listener can
/// never outlive its owner.
pub struct Subscription {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for the delivery task to finish; afterwards the
    /// callback is guaranteed not to run again.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Drive `on_message` from its own task for every insert in the store,
/// until the returned handle is unsubscribed or dropped.
pub fn spawn_subscription<F>(store: &Store, mut on_message: F) -> Subscription
where
    F: FnMut(Message) + Send + 'static,
{
    let mut feed = InsertFeed::subscribe(store);
    let token = CancellationToken::new();
    let task_token = token.clone();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => break,
                next = feed.next() => match next {
                    Some(message) => on_message(message),
                    None => break,
                },
            }
        }
    });

    Subscription {
        token,
        task: Some(task),
    }
}
