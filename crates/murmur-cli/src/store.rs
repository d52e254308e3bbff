//! Thread persistence in JSONL files

use async_trait::async_trait;
use murmur_chat::{PageRequest, ThreadPage, ThreadStore, ThreadSummary};
use murmur_core::{Error, Message, MessageId, Result, ThreadId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Line types of a thread file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadEntry {
    /// Thread metadata, always the first line
    Metadata {
        id: ThreadId,
        title: String,
        created_at: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branched_from: Option<ThreadId>,
    },
    /// A message. A later line with the same message id replaces it.
    Message { message: Message, timestamp: i64 },
}

impl ThreadEntry {
    fn message(message: Message) -> Self {
        ThreadEntry::Message {
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Stores each thread as `<thread-id>.jsonl` in one directory
pub struct JsonlThreadStore {
    dir: PathBuf,
    /// Serializes file writes
    write_lock: Mutex<()>,
}

impl JsonlThreadStore {
    /// Get the default threads directory
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("murmur")
            .join("threads")
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a thread file. Ids that could escape the directory are
    /// treated as unknown threads.
    fn path(&self, id: &ThreadId) -> Result<PathBuf> {
        let valid = !id.as_str().is_empty()
            && id
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::ThreadNotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.jsonl", id)))
    }

    /// Write a new thread file with its metadata and initial messages
    fn create(
        &self,
        title: String,
        branched_from: Option<ThreadId>,
        messages: &[Message],
    ) -> Result<ThreadSummary> {
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.dir)?;

        let id = ThreadId::new();
        let created_at = chrono::Utc::now().timestamp_millis();
        let file = File::create(self.path(&id)?)?;
        let mut writer = BufWriter::new(file);

        let metadata = ThreadEntry::Metadata {
            id: id.clone(),
            title: title.clone(),
            created_at,
            branched_from: branched_from.clone(),
        };
        writeln!(writer, "{}", serde_json::to_string(&metadata)?)?;
        for message in messages {
            let entry = ThreadEntry::message(message.clone());
            writeln!(writer, "{}", serde_json::to_string(&entry)?)?;
        }
        writer.flush()?;

        Ok(ThreadSummary {
            id,
            title,
            created_at,
            message_count: messages.len(),
            branched_from,
        })
    }

    /// Read a thread file
    fn read(&self, id: &ThreadId) -> Result<(ThreadSummary, Vec<Message>)> {
        let path = self.path(id)?;
        if !path.exists() {
            return Err(Error::ThreadNotFound(id.to_string()));
        }
        read_thread_file(&path)
    }

    fn append_entry(&self, id: &ThreadId, message: Message) -> Result<()> {
        let path = self.path(id)?;
        let _guard = self.write_lock.lock();
        if !path.exists() {
            return Err(Error::ThreadNotFound(id.to_string()));
        }

        let file = File::options().append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        let entry = ThreadEntry::message(message);
        writeln!(writer, "{}", serde_json::to_string(&entry)?)?;
        writer.flush()?;
        Ok(())
    }
}

/// Parse a thread file. Message lines are applied in order, so a rewritten
/// message keeps its original position.
fn read_thread_file(path: &Path) -> Result<(ThreadSummary, Vec<Message>)> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let first = lines
        .next()
        .transpose()?
        .ok_or_else(|| Error::MalformedMessage(format!("{} is empty", path.display())))?;
    let (id, title, created_at, branched_from) = match serde_json::from_str(&first)? {
        ThreadEntry::Metadata {
            id,
            title,
            created_at,
            branched_from,
        } => (id, title, created_at, branched_from),
        ThreadEntry::Message { .. } => {
            return Err(Error::MalformedMessage(format!(
                "{} does not start with thread metadata",
                path.display()
            )));
        }
    };

    let mut messages: Vec<Message> = Vec::new();
    for (n, line) in lines.enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ThreadEntry>(&line) {
            Ok(ThreadEntry::Message { message, .. }) => {
                match messages.iter_mut().find(|m| m.id == message.id) {
                    Some(existing) => *existing = message,
                    None => messages.push(message),
                }
            }
            Ok(ThreadEntry::Metadata { .. }) => {
                tracing::warn!("{}:{}: extra metadata line ignored", path.display(), n + 2);
            }
            // A torn final write
            Err(e) if e.is_syntax() || e.is_eof() => {
                tracing::warn!("{}:{}: skipping truncated line: {}", path.display(), n + 2, e);
            }
            Err(e) => {
                tracing::warn!("{}:{}: unreadable entry: {}", path.display(), n + 2, e);
                return Err(entry_error(&line, e));
            }
        }
    }

    let summary = ThreadSummary {
        id,
        title,
        created_at,
        message_count: messages.len(),
        branched_from,
    };
    Ok((summary, messages))
}

/// Why a JSON line is not a valid entry. Message lines report the message's
/// own decode error, such as an unknown part kind.
fn entry_error(line: &str, e: serde_json::Error) -> Error {
    let message = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|mut entry| entry.get_mut("message").map(serde_json::Value::take));
    match message.map(Message::from_value) {
        Some(Err(decode)) => decode,
        _ => e.into(),
    }
}

#[async_trait]
impl ThreadStore for JsonlThreadStore {
    async fn create_thread(&self, title: Option<String>) -> Result<ThreadSummary> {
        let title = title.unwrap_or_else(|| "New chat".to_string());
        self.create(title, None, &[])
    }

    async fn thread(&self, id: &ThreadId) -> Result<ThreadSummary> {
        self.read(id).map(|(summary, _)| summary)
    }

    async fn list_threads(&self, page: PageRequest) -> Result<ThreadPage> {
        if !self.dir.exists() {
            return Ok(ThreadPage::paginate(vec![], page));
        }

        let mut threads = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
                continue;
            }
            match read_thread_file(&path) {
                Ok((summary, _)) => threads.push(summary),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        Ok(ThreadPage::paginate(threads, page))
    }

    async fn messages(&self, id: &ThreadId) -> Result<Vec<Message>> {
        self.read(id).map(|(_, messages)| messages)
    }

    async fn append_message(&self, id: &ThreadId, message: Message) -> Result<()> {
        self.append_entry(id, message)
    }

    async fn upsert_message(&self, id: &ThreadId, message: Message) -> Result<()> {
        // Readers apply later lines over earlier ones with the same id
        self.append_entry(id, message)
    }

    async fn branch_thread(&self, source: &ThreadId, at: &MessageId) -> Result<ThreadSummary> {
        let (summary, messages) = self.read(source)?;
        let cut = messages
            .iter()
            .position(|m| &m.id == at)
            .ok_or_else(|| Error::MessageNotFound(at.to_string()))?;

        let branch = self.create(summary.title, Some(source.clone()), &messages[..cut])?;
        tracing::debug!("Branched thread {} into {} at message {}", source, branch.id, at);
        Ok(branch)
    }
}
