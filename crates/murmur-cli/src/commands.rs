//! Thread operations behind the command-line flags

use anyhow::Context;
use murmur_chat::{
    PageRequest, ThreadPage, ThreadStore, ThreadSummary, derive_title, pair_messages, pair_slots,
    render_transcript,
};
use murmur_core::{Error, MessageId, ThreadId, decode_message_slots};
use std::path::Path;

use crate::utils::{format_timestamp, truncate_chars};

/// One page of the thread list. `page` is 1-based.
pub async fn list_threads(
    store: &dyn ThreadStore,
    page: usize,
    per_page: usize,
) -> anyhow::Result<ThreadPage> {
    let request = PageRequest::nth(page.saturating_sub(1), per_page);
    Ok(store.list_threads(request).await?)
}

/// Render a thread list page as a table
pub fn format_thread_page(page: &ThreadPage, page_number: usize, per_page: usize) -> String {
    if page.threads.is_empty() {
        return if page.total == 0 {
            "No saved threads found.".to_string()
        } else {
            format!("No threads on page {} ({} threads total).", page_number, page.total)
        };
    }

    let pages = page.total.div_ceil(per_page.max(1));
    let mut out = format!(
        "{:<38} {:<18} {:<6} Title\n{}\n",
        "ID",
        "Created",
        "Msgs",
        "-".repeat(90)
    );
    for thread in &page.threads {
        let mut title = truncate_chars(&thread.title, 40);
        if thread.branched_from.is_some() {
            title.push_str(" (branch)");
        }
        out.push_str(&format!(
            "{:<38} {:<18} {:<6} {}\n",
            thread.id,
            format_timestamp(thread.created_at),
            thread.message_count,
            title
        ));
    }
    out.push_str(&format!("\nPage {} of {}", page_number, pages));
    if page.next_offset.is_some() {
        out.push_str(&format!(" (next: --page {})", page_number + 1));
    }
    out
}

/// Header and pair transcript of one thread
pub async fn show_thread(store: &dyn ThreadStore, id: &ThreadId) -> anyhow::Result<String> {
    let thread = store.thread(id).await?;
    let messages = store.messages(id).await?;

    let mut out = format!("{}\n{}\n", thread.title, "=".repeat(thread.title.chars().count()));
    out.push_str(&format!(
        "id: {}  created: {}\n",
        thread.id,
        format_timestamp(thread.created_at)
    ));
    if let Some(source) = &thread.branched_from {
        out.push_str(&format!("branched from: {}\n", source));
    }
    out.push('\n');

    let pairs = pair_messages(&messages);
    if pairs.is_empty() {
        out.push_str("(no messages)\n");
    } else {
        out.push_str(&render_transcript(&pairs));
    }
    Ok(out)
}

/// Import a JSON array of messages as a new thread.
///
/// `null` entries are skipped; an entry with an unknown part kind fails the
/// whole import.
pub async fn import_thread(
    store: &dyn ThreadStore,
    path: &Path,
    title: Option<String>,
) -> anyhow::Result<ThreadSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let slots = decode_message_slots(value)
        .with_context(|| format!("Failed to decode messages in {}", path.display()))?;

    let empty = slots.iter().filter(|slot| slot.is_none()).count();
    if empty > 0 {
        tracing::warn!("Skipping {} empty message slots", empty);
    }

    let title = title.unwrap_or_else(|| {
        pair_slots(&slots)
            .first()
            .map(|pair| derive_title(&pair.user.text()))
            .unwrap_or_else(|| "Imported chat".to_string())
    });

    let thread = store.create_thread(Some(title)).await?;
    for message in slots.into_iter().flatten() {
        store.append_message(&thread.id, message).await?;
    }
    tracing::debug!("Imported {} into thread {}", path.display(), thread.id);
    Ok(store.thread(&thread.id).await?)
}

/// Fork a thread just before one of its user messages.
///
/// Returns the new thread and the text of the message being edited.
pub async fn branch_thread(
    store: &dyn ThreadStore,
    thread_id: &ThreadId,
    at: &MessageId,
) -> anyhow::Result<(ThreadSummary, String)> {
    let messages = store.messages(thread_id).await?;
    let message = messages
        .iter()
        .find(|m| &m.id == at)
        .ok_or_else(|| Error::MessageNotFound(at.to_string()))?;
    if !message.is_user() {
        return Err(Error::NotEditable(at.to_string()).into());
    }

    let branch = store.branch_thread(thread_id, at).await?;
    Ok((branch, message.text()))
}
