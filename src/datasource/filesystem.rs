//! Local filesystem data source.
//!
//! Queries are `"<op> [path]"` with `op` one of `list`, `search`, `read`,
//! `info`. Every path is resolved under the canonical root; anything that
//! resolves outside of it is rejected.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ignore::gitignore::Gitignore;
use ignore::{Match, WalkBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::{
    DataSource, DataSourceError, DataSourceKind, DataSourceResult, HealthReport, QueryRequest,
    Schema, SourceSettings, check_limit,
};
use crate::schema::sha256_hex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSystemConfig {
    pub root_path: PathBuf,
    /// Largest file `read` returns, in bytes.
    pub max_file_size: u64,
    /// Depth of the schema tree.
    pub max_depth: usize,
    pub include_hidden: bool,
    pub respect_gitignore: bool,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            max_file_size: 1024 * 1024,
            max_depth: 3,
            include_hidden: false,
            respect_gitignore: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    List,
    Search,
    Read,
    Info,
}

impl FsOp {
    fn parse(s: &str) -> DataSourceResult<Self> {
        match s.to_lowercase().as_str() {
            "list" | "ls" => Ok(Self::List),
            "search" | "find" => Ok(Self::Search),
            "read" | "cat" => Ok(Self::Read),
            "info" | "stat" => Ok(Self::Info),
            other => Err(DataSourceError::validation(format!(
                "unknown operation '{}'; expected list, search, read or info",
                other
            ))),
        }
    }
}

/// Split `"<op> [path]"`. The path may contain spaces.
pub fn parse_op(query: &str) -> DataSourceResult<(FsOp, String)> {
    let query = query.trim();
    if query.is_empty() {
        return Err(DataSourceError::validation("operation is required"));
    }
    let (op, path) = match query.split_once(char::is_whitespace) {
        Some((op, path)) => (op, path.trim()),
        None => (query, ""),
    };
    let path = if path.is_empty() { "." } else { path };
    Ok((FsOp::parse(op)?, path.to_string()))
}

/// True when a relative path climbs above its starting directory.
pub fn escapes_root(path: &str) -> bool {
    let mut depth: i64 = 0;
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::CurDir | Component::RootDir => {}
            Component::Prefix(_) => return true,
        }
    }
    false
}

/// Resolve `path` under `root`, following symlinks.
fn resolve(root: &Path, path: &str) -> DataSourceResult<PathBuf> {
    let candidate = root.join(path.trim_start_matches('/'));
    let resolved = std::fs::canonicalize(&candidate).map_err(|_| DataSourceError::NotFound {
        path: path.to_string(),
    })?;
    if !resolved.starts_with(root) {
        return Err(DataSourceError::validation(format!(
            "path '{}' is outside the root directory",
            path
        )));
    }
    Ok(resolved)
}

/// True when any component of `path` is a dotfile or dot directory.
pub fn has_hidden_component(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

const IGNORE_FILES: [&str; 2] = [".ignore", ".gitignore"];

/// Whether an ignore file in `root` or a directory below it excludes `target`.
/// The deepest matching rule wins, as during a directory walk.
fn is_ignored(root: &Path, target: &Path, is_dir: bool) -> bool {
    let Ok(rel) = target.strip_prefix(root) else {
        return false;
    };
    let mut dirs = vec![root.to_path_buf()];
    if let Some(parent) = rel.parent() {
        let mut dir = root.to_path_buf();
        for component in parent.components() {
            dir.push(component);
            dirs.push(dir.clone());
        }
    }

    for dir in dirs.iter().rev() {
        let Ok(sub) = target.strip_prefix(dir) else {
            continue;
        };
        for file in IGNORE_FILES {
            let path = dir.join(file);
            if !path.is_file() {
                continue;
            }
            let (matcher, err) = Gitignore::new(&path);
            if let Some(e) = err {
                debug!(file = %path.display(), error = %e, "ignore file partially parsed");
            }
            match matcher.matched_path_or_any_parents(sub, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }
    }
    false
}

impl FileSystemConfig {
    /// Apply the hidden and ignore rules of a walk to an explicit target.
    fn check_visible(&self, root: &Path, requested: &str, target: &Path) -> DataSourceResult<()> {
        let rel = target.strip_prefix(root).unwrap_or(target);
        if !self.include_hidden
            && (has_hidden_component(Path::new(requested)) || has_hidden_component(rel))
        {
            return Err(DataSourceError::validation(format!(
                "path '{}' is hidden",
                requested
            )));
        }
        if self.respect_gitignore && is_ignored(root, target, target.is_dir()) {
            return Err(DataSourceError::validation(format!(
                "path '{}' is excluded by an ignore file",
                requested
            )));
        }
        Ok(())
    }
}

fn relative(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

fn timestamp(time: std::io::Result<SystemTime>) -> Value {
    time.map(|t| Value::String(DateTime::<Utc>::from(t).to_rfc3339()))
        .unwrap_or(Value::Null)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Guess a MIME type from the file extension.
pub fn detect_mime_type(path: &Path) -> Option<&'static str> {
    let mime = match extension(path)?.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "sh" | "bash" => "text/x-shellscript",
        "js" => "application/javascript",
        "json" => "application/json",
        "yaml" | "yml" => "application/x-yaml",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "sql" => "application/sql",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}

fn entry_json(root: &Path, path: &Path) -> DataSourceResult<Value> {
    let meta = std::fs::metadata(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    Ok(json!({
        "name": name,
        "path": relative(root, path),
        "type": if meta.is_dir() { "directory" } else { "file" },
        "size": meta.len(),
        "modified": timestamp(meta.modified()),
    }))
}

#[derive(Default)]
struct TreeNode {
    size: Option<u64>,
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn insert(&mut self, parts: &[String], size: Option<u64>) {
        match parts.split_first() {
            Some((head, [])) => self.children.entry(head.clone()).or_default().size = size,
            Some((head, rest)) => self.children.entry(head.clone()).or_default().insert(rest, size),
            None => {}
        }
    }

    fn to_json(&self, name: &str) -> Value {
        match self.size {
            Some(size) => json!({ "name": name, "type": "file", "size": size }),
            None => json!({
                "name": name,
                "type": "directory",
                "children": self
                    .children
                    .iter()
                    .map(|(n, child)| child.to_json(n))
                    .collect::<Vec<_>>(),
            }),
        }
    }
}

impl FileSystemConfig {
    fn walker(&self, dir: &Path, max_depth: Option<usize>) -> WalkBuilder {
        let mut builder = WalkBuilder::new(dir);
        builder
            .hidden(!self.include_hidden)
            .git_ignore(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .git_global(false)
            .ignore(self.respect_gitignore)
            .require_git(false)
            .parents(false)
            .max_depth(max_depth)
            .sort_by_file_name(|a, b| a.cmp(b));
        builder
    }

    /// Entries below `dir`, excluding `dir` itself; unreadable ones are skipped.
    fn entries(&self, dir: &Path, max_depth: Option<usize>) -> impl Iterator<Item = ignore::DirEntry> {
        self.walker(dir, max_depth)
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.depth() > 0)
    }
}

fn list_dir(
    config: &FileSystemConfig,
    root: &Path,
    dir: &Path,
    limit: usize,
) -> DataSourceResult<Vec<Value>> {
    if !dir.is_dir() {
        return Err(DataSourceError::validation(format!(
            "'{}' is not a directory",
            relative(root, dir)
        )));
    }
    let mut entries = config
        .entries(dir, Some(1))
        .map(|entry| entry_json(root, entry.path()))
        .collect::<DataSourceResult<Vec<_>>>()?;
    // Directories first, then files, each by name.
    entries.sort_by(|a, b| {
        let key = |v: &Value| (v["type"] != "directory", v["name"].as_str().map(str::to_owned));
        key(a).cmp(&key(b))
    });
    entries.truncate(limit);
    Ok(entries)
}

fn search(
    config: &FileSystemConfig,
    root: &Path,
    dir: &Path,
    request: &QueryRequest,
    limit: usize,
) -> DataSourceResult<Vec<Value>> {
    let term = request.param_str("search_term").map(str::to_lowercase);
    let wanted_ext = request
        .param_str("extension")
        .map(|e| e.trim_start_matches('.').to_lowercase());
    if term.is_none() && wanted_ext.is_none() {
        return Err(DataSourceError::validation(
            "search requires params.search_term or params.extension",
        ));
    }

    let mut found = Vec::new();
    for entry in config.entries(dir, None) {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if term.as_ref().is_some_and(|t| !name.contains(t.as_str())) {
            continue;
        }
        if wanted_ext
            .as_ref()
            .is_some_and(|ext| extension(path).as_deref() != Some(ext.as_str()))
        {
            continue;
        }
        found.push(entry_json(root, path)?);
        if found.len() >= limit {
            break;
        }
    }
    Ok(found)
}

fn read_file(config: &FileSystemConfig, root: &Path, file: &Path) -> DataSourceResult<Vec<Value>> {
    let meta = std::fs::metadata(file)?;
    if !meta.is_file() {
        return Err(DataSourceError::validation(format!(
            "'{}' is not a file",
            relative(root, file)
        )));
    }
    if meta.len() > config.max_file_size {
        return Err(DataSourceError::validation(format!(
            "file is {} bytes, larger than the {} byte limit",
            meta.len(),
            config.max_file_size
        )));
    }
    let bytes = std::fs::read(file)?;
    let hash = sha256_hex(&bytes);
    let content = String::from_utf8(bytes)
        .map_err(|_| DataSourceError::validation("file is not valid UTF-8 text"))?;

    Ok(vec![json!({
        "path": relative(root, file),
        "size": meta.len(),
        "mime_type": detect_mime_type(file),
        "sha256": hash,
        "content": content,
    })])
}

fn file_info(root: &Path, path: &Path) -> DataSourceResult<Vec<Value>> {
    let meta = std::fs::metadata(path)?;
    let mut info = entry_json(root, path)?;
    if let Value::Object(map) = &mut info {
        map.insert("created".into(), timestamp(meta.created()));
        map.insert("readonly".into(), meta.permissions().readonly().into());
        map.insert("extension".into(), json!(extension(path)));
        map.insert("mime_type".into(), json!(detect_mime_type(path)));
    }
    Ok(vec![info])
}

/// Directory tree to `max_depth` plus size and extension statistics.
struct Survey {
    tree: TreeNode,
    files: usize,
    directories: usize,
    total_size: u64,
    extensions: BTreeMap<String, usize>,
}

fn survey(config: &FileSystemConfig, root: &Path) -> Survey {
    let mut survey = Survey {
        tree: TreeNode::default(),
        files: 0,
        directories: 0,
        total_size: 0,
        extensions: BTreeMap::new(),
    };

    for entry in config.entries(root, Some(config.max_depth)) {
        let parts: Vec<String> = entry
            .path()
            .strip_prefix(root)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            survey.directories += 1;
            survey.tree.insert(&parts, None);
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            survey.files += 1;
            survey.total_size += size;
            let ext = extension(entry.path()).unwrap_or_else(|| "(none)".to_string());
            *survey.extensions.entry(ext).or_default() += 1;
            survey.tree.insert(&parts, Some(size));
        }
    }
    survey
}

/// Read-only view of a directory tree.
#[derive(Debug)]
pub struct FileSystemDataSource {
    name: String,
    settings: SourceSettings,
    config: FileSystemConfig,
    root: RwLock<Option<PathBuf>>,
    connected: AtomicBool,
}

impl FileSystemDataSource {
    pub fn new(name: &str, settings: SourceSettings, config: FileSystemConfig) -> Self {
        Self {
            name: name.to_string(),
            settings,
            config,
            root: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    async fn root(&self) -> DataSourceResult<PathBuf> {
        self.connect().await?;
        self.root
            .read()
            .await
            .clone()
            .ok_or_else(|| DataSourceError::connection("filesystem root is not available"))
    }
}

#[async_trait]
impl DataSource for FileSystemDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::Filesystem
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> DataSourceResult<()> {
        let mut root = self.root.write().await;
        if root.is_some() {
            return Ok(());
        }
        let canonical = tokio::fs::canonicalize(&self.config.root_path)
            .await
            .map_err(|e| {
                DataSourceError::connection(format!(
                    "root path '{}' is not accessible: {}",
                    self.config.root_path.display(),
                    e
                ))
            })?;
        if !canonical.is_dir() {
            return Err(DataSourceError::connection(format!(
                "root path '{}' is not a directory",
                canonical.display()
            )));
        }
        info!(data_source = %self.name, root = %canonical.display(), "filesystem root opened");
        *root = Some(canonical);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> DataSourceResult<()> {
        self.root.write().await.take();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(skip(self), fields(data_source = %self.name))]
    async fn get_schema(&self) -> DataSourceResult<Schema> {
        let root = self.root().await?;
        let config = self.config.clone();
        let (root, survey) = tokio::task::spawn_blocking(move || {
            let survey = survey(&config, &root);
            (root, survey)
        })
        .await
        .map_err(|e| DataSourceError::Schema {
            message: format!("schema task failed: {}", e),
        })?;

        Ok(Schema::new(
            &self.name,
            self.kind(),
            &self.settings,
            survey.files + survey.directories,
        )
        .with_detail("root_path", root.to_string_lossy().into_owned())
        .with_detail("max_depth", self.config.max_depth)
        .with_section("structure", survey.tree.to_json("."))
        .with_section(
            "statistics",
            json!({
                "file_count": survey.files,
                "directory_count": survey.directories,
                "total_size": survey.total_size,
                "extensions": survey.extensions,
            }),
        ))
    }

    #[instrument(skip(self, request), fields(data_source = %self.name))]
    async fn query(&self, request: &QueryRequest) -> DataSourceResult<Vec<Value>> {
        let (op, path) = parse_op(&request.query)?;
        if escapes_root(&path) {
            return Err(DataSourceError::validation(format!(
                "path '{}' is outside the root directory",
                path
            )));
        }
        let root = self.root().await?;
        let limit = self.settings.effective_limit(request.limit);
        let config = self.config.clone();
        let request = request.clone();

        tokio::task::spawn_blocking(move || {
            let target = resolve(&root, &path)?;
            config.check_visible(&root, &path, &target)?;
            match op {
                FsOp::List => list_dir(&config, &root, &target, limit),
                FsOp::Search => search(&config, &root, &target, &request, limit),
                FsOp::Read => read_file(&config, &root, &target),
                FsOp::Info => file_info(&root, &target),
            }
        })
        .await
        .map_err(|e| DataSourceError::Io {
            message: format!("filesystem task failed: {}", e),
        })?
    }

    fn validate_query(&self, request: &QueryRequest) -> DataSourceResult<()> {
        let (op, path) = parse_op(&request.query)?;
        if escapes_root(&path) {
            return Err(DataSourceError::validation(format!(
                "path '{}' is outside the root directory",
                path
            )));
        }
        if !self.config.include_hidden && has_hidden_component(Path::new(&path)) {
            return Err(DataSourceError::validation(format!(
                "path '{}' is hidden",
                path
            )));
        }
        if op == FsOp::Search
            && request.param_str("search_term").is_none()
            && request.param_str("extension").is_none()
        {
            return Err(DataSourceError::validation(
                "search requires params.search_term or params.extension",
            ));
        }
        check_limit(&self.settings, request)
    }

    async fn health_check(&self) -> HealthReport {
        match self.root().await {
            Ok(root) => {
                let mut details = Map::new();
                details.insert("root_path".into(), root.to_string_lossy().into_owned().into());
                details.insert("readable".into(), std::fs::read_dir(&root).is_ok().into());
                HealthReport::healthy(&self.name, self.kind(), details)
            }
            Err(e) => HealthReport::unhealthy(&self.name, self.kind(), false, e),
        }
    }

    fn config_summary(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn query_help(&self) -> &'static str {
        "\"list [dir]\", \"search [dir]\" with params.search_term / params.extension, \"read <file>\" or \"info <path>\""
    }
}

#[cfg(test)]
#[path = "filesystem_test.rs"]
mod filesystem_test;
