//! Thread storage contract and an in-memory implementation

use async_trait::async_trait;
use murmur_core::{Error, Message, MessageId, Result, ThreadId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Maximum characters in a derived thread title
const TITLE_MAX_CHARS: usize = 48;

/// Listing entry for a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub title: String,
    /// Creation time in Unix milliseconds
    pub created_at: i64,
    pub message_count: usize,
    /// Thread this one was forked from by an edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branched_from: Option<ThreadId>,
}

/// Offset/limit window into the thread list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    /// First page of the given size
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// The `index`th page (0-based) of the given size
    pub fn nth(index: usize, limit: usize) -> Self {
        Self {
            offset: index.saturating_mul(limit),
            limit,
        }
    }
}

/// One page of threads, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPage {
    pub threads: Vec<ThreadSummary>,
    /// Threads in the whole list
    pub total: usize,
    /// Offset of the next page, if there is one
    pub next_offset: Option<usize>,
}

impl ThreadPage {
    /// Cut a page out of a thread list.
    ///
    /// The list is ordered newest first by `created_at`; ties keep their
    /// input order.
    pub fn paginate(mut threads: Vec<ThreadSummary>, request: PageRequest) -> Self {
        threads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = threads.len();
        let end = request.offset.saturating_add(request.limit).min(total);
        let page: Vec<ThreadSummary> = threads
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        Self {
            threads: page,
            total,
            next_offset: (end < total).then_some(end),
        }
    }
}

/// Title for a thread, from the first non-empty line of its first message
pub fn derive_title(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");

    if line.is_empty() {
        return "New chat".to_string();
    }
    if line.chars().count() <= TITLE_MAX_CHARS {
        return line.to_string();
    }
    let mut title: String = line.chars().take(TITLE_MAX_CHARS - 1).collect();
    title.push('…');
    title
}

/// Persistence of threads and their messages
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Create an empty thread
    async fn create_thread(&self, title: Option<String>) -> Result<ThreadSummary>;

    /// Look up a thread
    async fn thread(&self, id: &ThreadId) -> Result<ThreadSummary>;

    /// List threads, newest first
    async fn list_threads(&self, page: PageRequest) -> Result<ThreadPage>;

    /// All messages of a thread in order
    async fn messages(&self, id: &ThreadId) -> Result<Vec<Message>>;

    /// Add a message to the end of a thread
    async fn append_message(&self, id: &ThreadId, message: Message) -> Result<()>;

    /// Replace the message with the same id, or append it
    async fn upsert_message(&self, id: &ThreadId, message: Message) -> Result<()>;

    /// Fork a thread just before `at`: the new thread holds every message
    /// that came before it.
    async fn branch_thread(&self, source: &ThreadId, at: &MessageId) -> Result<ThreadSummary>;
}

struct ThreadRecord {
    summary: ThreadSummary,
    messages: Vec<Message>,
}

impl ThreadRecord {
    fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            message_count: self.messages.len(),
            ..self.summary.clone()
        }
    }
}

/// Thread store that keeps everything in memory
#[derive(Default)]
pub struct InMemoryThreadStore {
    threads: Mutex<Vec<ThreadRecord>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a thread holding the given messages
    pub fn with_thread(&self, title: &str, messages: Vec<Message>) -> ThreadSummary {
        let record = ThreadRecord {
            summary: new_summary(Some(title.to_string()), None),
            messages,
        };
        let summary = record.summary();
        self.threads.lock().push(record);
        summary
    }
}

fn new_summary(title: Option<String>, branched_from: Option<ThreadId>) -> ThreadSummary {
    ThreadSummary {
        id: ThreadId::new(),
        title: title.unwrap_or_else(|| "New chat".to_string()),
        created_at: chrono::Utc::now().timestamp_millis(),
        message_count: 0,
        branched_from,
    }
}

fn not_found(id: &ThreadId) -> Error {
    Error::ThreadNotFound(id.to_string())
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn create_thread(&self, title: Option<String>) -> Result<ThreadSummary> {
        let record = ThreadRecord {
            summary: new_summary(title, None),
            messages: vec![],
        };
        let summary = record.summary();
        self.threads.lock().push(record);
        Ok(summary)
    }

    async fn thread(&self, id: &ThreadId) -> Result<ThreadSummary> {
        self.threads
            .lock()
            .iter()
            .find(|r| &r.summary.id == id)
            .map(ThreadRecord::summary)
            .ok_or_else(|| not_found(id))
    }

    async fn list_threads(&self, page: PageRequest) -> Result<ThreadPage> {
        let summaries: Vec<ThreadSummary> = self
            .threads
            .lock()
            .iter()
            .rev()
            .map(ThreadRecord::summary)
            .collect();
        Ok(ThreadPage::paginate(summaries, page))
    }

    async fn messages(&self, id: &ThreadId) -> Result<Vec<Message>> {
        self.threads
            .lock()
            .iter()
            .find(|r| &r.summary.id == id)
            .map(|r| r.messages.clone())
            .ok_or_else(|| not_found(id))
    }

    async fn append_message(&self, id: &ThreadId, message: Message) -> Result<()> {
        let mut threads = self.threads.lock();
        let record = threads
            .iter_mut()
            .find(|r| &r.summary.id == id)
            .ok_or_else(|| not_found(id))?;
        record.messages.push(message);
        Ok(())
    }

    async fn upsert_message(&self, id: &ThreadId, message: Message) -> Result<()> {
        let mut threads = self.threads.lock();
        let record = threads
            .iter_mut()
            .find(|r| &r.summary.id == id)
            .ok_or_else(|| not_found(id))?;

        match record.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => record.messages.push(message),
        }
        Ok(())
    }

    async fn branch_thread(&self, source: &ThreadId, at: &MessageId) -> Result<ThreadSummary> {
        let mut threads = self.threads.lock();
        let record = threads
            .iter()
            .find(|r| &r.summary.id == source)
            .ok_or_else(|| not_found(source))?;

        let cut = record
            .messages
            .iter()
            .position(|m| &m.id == at)
            .ok_or_else(|| Error::MessageNotFound(at.to_string()))?;

        let branch = ThreadRecord {
            summary: new_summary(Some(record.summary.title.clone()), Some(source.clone())),
            messages: record.messages[..cut].to_vec(),
        };
        let summary = branch.summary();
        tracing::debug!("Branched thread {} into {} at message {}", source, summary.id, at);
        threads.push(branch);
        Ok(summary)
    }
}
