//! Write the replica out as a plain directory.
//!
//! The export is a directory tree mirroring the workspace plus a
//! `chat.txt` transcript. No archive is produced; zip the directory
//! separately if a single file is needed.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use replica_core::{ChatMessage, FileNode};
use std::fmt::Display;
use std::path::Path;
use tokio::fs;
use tracing::info;

pub const CHAT_FILE: &str = "chat.txt";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub files: usize,
    pub directories: usize,
    pub messages: usize,
}

/// `[HH:MM] author: body` in local time. Own messages show as `You`.
pub fn format_chat_line(message: &ChatMessage) -> String {
    format_chat_line_in(message, &Local)
}

pub fn format_chat_line_in<Tz>(message: &ChatMessage, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let time = DateTime::from_timestamp_millis(message.created_at)
        .map(|at| at.with_timezone(tz).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let author = if message.origin_is_local {
        "You"
    } else {
        message.author.as_str()
    };
    format!("[{}] {}: {}", time, author, message.body)
}

/// Recreate every node of `tree` under `dir` and write the chat log to
/// `chat.txt` next to them.
pub async fn export_workspace(
    dir: &Path,
    tree: &[FileNode],
    chat: &[ChatMessage],
) -> Result<ExportReport> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut report = ExportReport::default();
    for node in tree.iter().flat_map(|node| node.walk()) {
        let target = dir.join(&node.path);
        if node.is_dir() {
            fs::create_dir_all(&target)
                .await
                .with_context(|| format!("Failed to create {}", target.display()))?;
            report.directories += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, node.content.as_deref().unwrap_or_default())
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
            report.files += 1;
        }
    }

    let mut transcript: String = chat
        .iter()
        .map(format_chat_line)
        .collect::<Vec<_>>()
        .join("\n");
    if !transcript.is_empty() {
        transcript.push('\n');
    }
    fs::write(dir.join(CHAT_FILE), transcript)
        .await
        .context("Failed to write chat transcript")?;
    report.messages = chat.len();

    info!(
        "Exported {} files, {} directories and {} messages to {}",
        report.files,
        report.directories,
        report.messages,
        dir.display()
    );
    Ok(report)
}
