use crate::required_str;
use common::channel::Attachment;
use common::response::{Reply, Response};
use router::flow::{unexpected_problem, ANTICIPATION};
use router::{Flow, FlowArgs, FlowContext, FlowError, FlowReply};
use serde_json::{json, Value};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// `!locate`: finds files under `path` whose name (`domain: title`) or contents
/// (`domain: content`) contain `pattern`, ignoring case and hidden entries.
pub struct FileLocator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Domain {
    Title,
    Content,
}

impl Domain {
    fn parse(raw: &str) -> Result<Self, FlowError> {
        match raw {
            "title" => Ok(Self::Title),
            "content" => Ok(Self::Content),
            other => Err(FlowError::new(format!(
                "domain must be title or content, got {other}"
            ))),
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn content_matches(path: &Path, needle: &str) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .to_lowercase()
            .contains(needle),
        Err(err) => {
            tracing::debug!("locate skipped {}: {}", path.display(), err);
            false
        }
    }
}

fn search(root: &Path, pattern: &str, domain: Domain) -> Vec<String> {
    let needle = pattern.to_lowercase();
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("locate walk error: {}", err);
                continue;
            }
        };
        let hit = match domain {
            Domain::Title => {
                entry.depth() > 0
                    && entry
                        .file_name()
                        .to_string_lossy()
                        .to_lowercase()
                        .contains(&needle)
            }
            Domain::Content => entry.file_type().is_file() && content_matches(entry.path(), &needle),
        };
        if hit {
            found.push(entry.path().display().to_string());
        }
    }
    found
}

impl Flow for FileLocator {
    fn name(&self) -> &str {
        "locate"
    }

    fn summary(&self) -> &str {
        "Locates files by name or content. Args: path, pattern, domain (title | content)"
    }

    fn execute(
        &self,
        _: &FlowContext,
        args: FlowArgs,
        _: &[Attachment],
    ) -> Result<Value, FlowError> {
        let path = Path::new(required_str(&args, "path")?);
        let pattern = required_str(&args, "pattern")?;
        let domain = Domain::parse(required_str(&args, "domain")?)?;
        if !path.exists() {
            return Err(FlowError::new(format!(
                "path does not exist: {}",
                path.display()
            )));
        }
        let files = search(path, pattern, domain);
        tracing::info!("locate found {} matches under {}", files.len(), path.display());
        Ok(json!({ "files": files }))
    }

    fn respond(&self, outcome: &Result<Value, FlowError>) -> FlowReply {
        let files: Vec<String> = match outcome {
            Ok(value) => value["files"]
                .as_array()
                .map(|files| {
                    files
                        .iter()
                        .filter_map(|file| file.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            Err(err) => {
                return unexpected_problem([("message", err.message().to_string())]).into()
            }
        };
        if files.is_empty() {
            return Reply::from(Response::info("No file found")).into();
        }
        Reply::new()
            .with(Response::success(ANTICIPATION))
            .with(Response::info("Files found:"))
            .with(Response::general(files.join("\n")))
            .into()
    }
}
