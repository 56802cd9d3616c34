//! Line-oriented command console.
//!
//! Stands in for an editor: each stdin line is parsed into a
//! [`ConsoleCommand`] and run against the session.

use crate::export::{export_workspace, format_chat_line};
use crate::session::{SessionHandle, SessionView};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use replica_core::FileNode;
use replica_core::node::final_segment;
use replica_core::templates::language_for;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  touch <path>            create a file (and missing parent directories)
  mkdir <path>            create a directory
  rm <path>               delete a file or directory
  mv <path> <new-name>    rename in place
  open <path>             open a buffer
  edit <path> <text>      replace a file's content (\\n for newlines)
  save <path>             save an open buffer
  close <path>            close an open buffer
  say <text>              send a chat message
  tree                    show the file tree
  buffers                 list open buffers
  chat                    show the chat log
  import <file> [path]    copy a local file into the workspace and open it
  export <dir>            write files and chat.txt to a directory
  help                    show this help
  quit                    leave the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Touch(String),
    Mkdir(String),
    Rm(String),
    Mv { path: String, new_name: String },
    Open(String),
    Edit { path: String, content: String },
    Save(String),
    Close(String),
    Say(String),
    Tree,
    Buffers,
    Chat,
    /// Copy a local file in. `dest` defaults to the file's name.
    Import { source: PathBuf, dest: Option<String> },
    Export(PathBuf),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Expand `\n`, `\t` and `\\`. Other escapes are kept verbatim.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn one_arg(rest: &str, usage: &'static str) -> Result<String, ParseError> {
    let mut words = rest.split_whitespace();
    match (words.next(), words.next()) {
        (Some(arg), None) => Ok(arg.to_string()),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn no_args(rest: &str, command: ConsoleCommand, usage: &'static str) -> Result<ConsoleCommand, ParseError> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(ParseError::Usage(usage))
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "touch" => ConsoleCommand::Touch(one_arg(rest, "touch <path>")?),
        "mkdir" => ConsoleCommand::Mkdir(one_arg(rest, "mkdir <path>")?),
        "rm" => ConsoleCommand::Rm(one_arg(rest, "rm <path>")?),
        "mv" => {
            let mut words = rest.split_whitespace();
            match (words.next(), words.next(), words.next()) {
                (Some(path), Some(new_name), None) => ConsoleCommand::Mv {
                    path: path.to_string(),
                    new_name: new_name.to_string(),
                },
                _ => return Err(ParseError::Usage("mv <path> <new-name>")),
            }
        }
        "open" => ConsoleCommand::Open(one_arg(rest, "open <path>")?),
        "edit" => match rest.split_once(char::is_whitespace) {
            Some((path, text)) => ConsoleCommand::Edit {
                path: path.to_string(),
                content: unescape(text.trim_start()),
            },
            // An empty edit clears the file
            None if !rest.is_empty() => ConsoleCommand::Edit {
                path: rest.to_string(),
                content: String::new(),
            },
            None => return Err(ParseError::Usage("edit <path> <text>")),
        },
        "save" => ConsoleCommand::Save(one_arg(rest, "save <path>")?),
        "close" => ConsoleCommand::Close(one_arg(rest, "close <path>")?),
        "say" if !rest.is_empty() => ConsoleCommand::Say(rest.to_string()),
        "say" => return Err(ParseError::Usage("say <text>")),
        "tree" => no_args(rest, ConsoleCommand::Tree, "tree")?,
        "buffers" => no_args(rest, ConsoleCommand::Buffers, "buffers")?,
        "chat" => no_args(rest, ConsoleCommand::Chat, "chat")?,
        "import" => {
            let mut words = rest.split_whitespace();
            match (words.next(), words.next(), words.next()) {
                (Some(source), dest, None) => ConsoleCommand::Import {
                    source: PathBuf::from(source),
                    dest: dest.map(str::to_string),
                },
                _ => return Err(ParseError::Usage("import <file> [path]")),
            }
        }
        "export" => ConsoleCommand::Export(PathBuf::from(one_arg(rest, "export <dir>")?)),
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn render_node(out: &mut String, node: &FileNode, depth: usize) {
    let indent = "  ".repeat(depth);
    if node.is_dir() {
        let _ = writeln!(out, "{}{}/", indent, node.name);
        for child in &node.children {
            render_node(out, child, depth + 1);
        }
    } else {
        let _ = writeln!(out, "{}{} ({} B)", indent, node.name, node.size);
    }
}

pub fn render_tree(tree: &[FileNode]) -> String {
    if tree.is_empty() {
        return "(empty workspace)".to_string();
    }
    let mut out = String::new();
    for node in tree {
        render_node(&mut out, node, 0);
    }
    out.trim_end().to_string()
}

pub fn render_buffers(view: &SessionView) -> String {
    if view.buffers.is_empty() {
        return "(no open buffers)".to_string();
    }
    view.buffers
        .iter()
        .enumerate()
        .map(|(index, buffer)| {
            let marker = if view.active_buffer == Some(index) { '*' } else { ' ' };
            let dirty = if buffer.dirty { " [modified]" } else { "" };
            let language = language_for(final_segment(&buffer.path));
            format!("{} {} ({}){}", marker, buffer.path, language, dirty)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_chat(view: &SessionView) -> String {
    if view.chat.is_empty() {
        return "(no messages)".to_string();
    }
    view.chat
        .iter()
        .map(format_chat_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read a local file into a node at `dest`, keeping its modification time.
pub async fn read_import(source: &Path, dest: Option<&str>) -> Result<FileNode> {
    let dest = match dest {
        Some(dest) => dest.to_string(),
        None => match source.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => bail!("{} has no file name, give a destination path", source.display()),
        },
    };
    let content = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let modified = tokio::fs::metadata(source)
        .await
        .and_then(|meta| meta.modified())
        .with_context(|| format!("Failed to stat {}", source.display()))?;

    let mut node = FileNode::file(&dest, content);
    node.last_modified = Some(DateTime::<Utc>::from(modified).timestamp_millis());
    Ok(node)
}

fn outcome(done: bool, ok: &str, failed: &str) -> String {
    if done { ok.to_string() } else { failed.to_string() }
}

/// Run a command and return the text to show. `Quit` is left to the caller.
pub async fn execute(session: &SessionHandle, command: ConsoleCommand) -> Result<String> {
    let output = match command {
        ConsoleCommand::Touch(path) => outcome(
            session.create_file(&path).await?,
            "created",
            "nothing created (path taken or invalid)",
        ),
        ConsoleCommand::Mkdir(path) => outcome(
            session.create_directory(&path).await?,
            "created",
            "nothing created (path taken or invalid)",
        ),
        ConsoleCommand::Rm(path) => outcome(session.delete(&path).await?, "deleted", "no such path"),
        ConsoleCommand::Mv { path, new_name } => outcome(
            session.rename(&path, &new_name).await?,
            "renamed",
            "rename failed (missing path, bad name or name taken)",
        ),
        ConsoleCommand::Open(path) => match session.open(&path).await? {
            Some(index) => format!("opened buffer {}", index),
            None => "no such file".to_string(),
        },
        ConsoleCommand::Edit { path, content } => {
            outcome(session.edit(&path, &content).await?, "edited", "unchanged")
        }
        ConsoleCommand::Save(path) => {
            outcome(session.save(&path).await?, "saved", "buffer not open")
        }
        ConsoleCommand::Close(path) => {
            outcome(session.close(&path).await?, "closed", "buffer not open")
        }
        ConsoleCommand::Say(text) => outcome(session.send_chat(&text).await?, "sent", "empty message"),
        ConsoleCommand::Tree => render_tree(&session.view().await?.tree),
        ConsoleCommand::Buffers => render_buffers(&session.view().await?),
        ConsoleCommand::Chat => render_chat(&session.view().await?),
        ConsoleCommand::Import { source, dest } => {
            let node = read_import(&source, dest.as_deref()).await?;
            let (path, size) = (node.path.clone(), node.size);
            if !session.create_node(node).await? {
                return Ok("nothing imported (path taken or invalid)".to_string());
            }
            match session.open(&path).await? {
                Some(index) => format!("imported {} ({} B) into buffer {}", path, size, index),
                None => format!("imported {} ({} B)", path, size),
            }
        }
        ConsoleCommand::Export(dir) => {
            let view = session.view().await?;
            let report = export_workspace(&dir, &view.tree, &view.chat).await?;
            format!(
                "exported {} files and {} messages to {}",
                report.files,
                report.messages,
                dir.display()
            )
        }
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => String::new(),
    };
    Ok(output)
}
