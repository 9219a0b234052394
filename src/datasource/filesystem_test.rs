use std::fs;

use serde_json::json;
use tempfile::TempDir;

use super::*;

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("docs/guides")).unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::create_dir_all(dir.path().join("target")).unwrap();
    fs::write(dir.path().join("README.md"), "# Readme\n").unwrap();
    fs::write(dir.path().join("docs/setup.md"), "setup steps").unwrap();
    fs::write(dir.path().join("docs/guides/deploy.md"), "deploy").unwrap();
    fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
    fs::write(dir.path().join("src/setup.rs"), "pub fn setup() {}\n").unwrap();
    fs::write(dir.path().join("target/build.log"), "ignored").unwrap();
    fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
    fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
    dir
}

fn source(dir: &TempDir) -> FileSystemDataSource {
    let config = FileSystemConfig {
        root_path: dir.path().to_path_buf(),
        ..Default::default()
    };
    FileSystemDataSource::new("files", SourceSettings::default(), config)
}

#[test]
fn test_parse_op() {
    assert_eq!(parse_op("list").unwrap(), (FsOp::List, ".".to_string()));
    assert_eq!(
        parse_op("read docs/my notes.md").unwrap(),
        (FsOp::Read, "docs/my notes.md".to_string())
    );
    assert!(parse_op("delete x").is_err());
    assert!(parse_op("  ").is_err());
}

#[test]
fn test_escapes_root() {
    assert!(!escapes_root("."));
    assert!(!escapes_root("docs/../src"));
    assert!(!escapes_root("/docs"));
    assert!(escapes_root(".."));
    assert!(escapes_root("docs/../../etc"));
}

#[test]
fn test_detect_mime_type() {
    assert_eq!(detect_mime_type(Path::new("a.md")), Some("text/markdown"));
    assert_eq!(detect_mime_type(Path::new("b.JSON")), Some("application/json"));
    assert_eq!(detect_mime_type(Path::new("noext")), None);
}

#[tokio::test]
async fn test_list_skips_hidden_and_ignored() {
    let dir = fixture();
    let fs_source = source(&dir);

    let rows = fs_source.query(&QueryRequest::new("list")).await.unwrap();
    let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();

    assert_eq!(names, vec!["docs", "src", "README.md"]);
    assert_eq!(rows[0]["type"], "directory");
    assert_eq!(rows[2]["type"], "file");
}

#[tokio::test]
async fn test_list_includes_hidden_when_configured() {
    let dir = fixture();
    let config = FileSystemConfig {
        root_path: dir.path().to_path_buf(),
        include_hidden: true,
        respect_gitignore: false,
        ..Default::default()
    };
    let fs_source = FileSystemDataSource::new("files", SourceSettings::default(), config);

    let rows = fs_source.query(&QueryRequest::new("list")).await.unwrap();
    let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();

    assert!(names.contains(&".env"));
    assert!(names.contains(&"target"));
}

#[tokio::test]
async fn test_search_by_term_and_extension() {
    let dir = fixture();
    let fs_source = source(&dir);

    let by_term = fs_source
        .query(&QueryRequest::new("search").with_param("search_term", "SETUP"))
        .await
        .unwrap();
    let paths: Vec<&str> = by_term.iter().map(|r| r["path"].as_str().unwrap()).collect();
    assert_eq!(paths.len(), 2);
    assert!(paths.contains(&"docs/setup.md"));
    assert!(paths.contains(&"src/setup.rs"));

    let by_both = fs_source
        .query(
            &QueryRequest::new("search")
                .with_param("search_term", "setup")
                .with_param("extension", ".rs"),
        )
        .await
        .unwrap();
    assert_eq!(by_both.len(), 1);
    assert_eq!(by_both[0]["path"], "src/setup.rs");
}

#[tokio::test]
async fn test_search_respects_gitignore() {
    let dir = fixture();
    let fs_source = source(&dir);

    let rows = fs_source
        .query(&QueryRequest::new("search").with_param("extension", "log"))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_read_file() {
    let dir = fixture();
    let fs_source = source(&dir);

    let rows = fs_source
        .query(&QueryRequest::new("read src/main.rs"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["content"], "fn main() {}\n");
    assert_eq!(rows[0]["mime_type"], "text/x-rust");
    assert_eq!(rows[0]["sha256"], sha256_hex("fn main() {}\n"));
}

#[tokio::test]
async fn test_read_rejects_large_files() {
    let dir = fixture();
    fs::write(dir.path().join("big.txt"), vec![b'a'; 64]).unwrap();
    let config = FileSystemConfig {
        root_path: dir.path().to_path_buf(),
        max_file_size: 16,
        ..Default::default()
    };
    let fs_source = FileSystemDataSource::new("files", SourceSettings::default(), config);

    let err = fs_source
        .query(&QueryRequest::new("read big.txt"))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_root_escape_is_rejected() {
    let dir = fixture();
    let fs_source = source(&dir);

    let request = QueryRequest::new("read ../../etc/passwd");
    assert!(fs_source.validate_query(&request).unwrap_err().is_validation());
    assert!(fs_source.query(&request).await.unwrap_err().is_validation());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_escape_is_rejected() {
    let dir = fixture();
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("secret.txt"), "x").unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
    let fs_source = source(&dir);

    let err = fs_source
        .query(&QueryRequest::new("read link/secret.txt"))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_missing_path_is_not_found() {
    let dir = fixture();
    let fs_source = source(&dir);

    let err = fs_source
        .query(&QueryRequest::new("info nope.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, DataSourceError::NotFound { .. }));
}

#[tokio::test]
async fn test_info() {
    let dir = fixture();
    let fs_source = source(&dir);

    let rows = fs_source
        .query(&QueryRequest::new("info README.md"))
        .await
        .unwrap();
    assert_eq!(rows[0]["type"], "file");
    assert_eq!(rows[0]["extension"], "md");
    assert_eq!(rows[0]["size"], json!(9));
}

#[test]
fn test_has_hidden_component() {
    assert!(has_hidden_component(Path::new(".env")));
    assert!(has_hidden_component(Path::new("config/.secrets/key")));
    assert!(!has_hidden_component(Path::new("./docs/setup.md")));
    assert!(!has_hidden_component(Path::new(".")));
}

#[tokio::test]
async fn test_read_and_info_reject_hidden_paths() {
    let dir = fixture();
    let fs_source = source(&dir);

    for query in ["read .env", "info .env", "read ./.env"] {
        let request = QueryRequest::new(query);
        assert!(fs_source.validate_query(&request).unwrap_err().is_validation());
        let err = fs_source.query(&request).await.unwrap_err();
        assert!(err.is_validation(), "{}: {:?}", query, err);
    }
}

#[tokio::test]
async fn test_read_and_info_reject_gitignored_paths() {
    let dir = fixture();
    fs::write(dir.path().join("docs/.gitignore"), "*.draft\n").unwrap();
    fs::write(dir.path().join("docs/notes.draft"), "wip").unwrap();
    let fs_source = source(&dir);

    for query in [
        "read target/build.log",
        "info target",
        "list target",
        "read docs/notes.draft",
    ] {
        let err = fs_source.query(&QueryRequest::new(query)).await.unwrap_err();
        assert!(err.is_validation(), "{}: {:?}", query, err);
    }
    assert!(
        fs_source
            .query(&QueryRequest::new("read docs/setup.md"))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_hidden_and_ignored_readable_when_configured() {
    let dir = fixture();
    let config = FileSystemConfig {
        root_path: dir.path().to_path_buf(),
        include_hidden: true,
        respect_gitignore: false,
        ..Default::default()
    };
    let fs_source = FileSystemDataSource::new("files", SourceSettings::default(), config);

    let env = fs_source
        .query(&QueryRequest::new("read .env"))
        .await
        .unwrap();
    assert_eq!(env[0]["content"], "SECRET=1");

    let log = fs_source
        .query(&QueryRequest::new("read target/build.log"))
        .await
        .unwrap();
    assert_eq!(log[0]["content"], "ignored");
}

#[tokio::test]
async fn test_schema_tree_and_statistics() {
    let dir = fixture();
    let fs_source = source(&dir);

    let schema = fs_source.get_schema().await.unwrap();
    let stats = &schema.body["statistics"];

    assert_eq!(stats["file_count"], 5);
    assert_eq!(stats["directory_count"], 3);
    assert_eq!(stats["extensions"]["md"], 3);
    assert_eq!(stats["extensions"]["rs"], 2);
    assert_eq!(schema.metadata.total_items, 8);

    let children = schema.body["structure"]["children"].as_array().unwrap();
    let names: Vec<&str> = children.iter().map(|c| c["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["README.md", "docs", "src"]);
}

#[tokio::test]
async fn test_schema_respects_max_depth() {
    let dir = fixture();
    let config = FileSystemConfig {
        root_path: dir.path().to_path_buf(),
        max_depth: 1,
        ..Default::default()
    };
    let fs_source = FileSystemDataSource::new("files", SourceSettings::default(), config);

    let schema = fs_source.get_schema().await.unwrap();
    assert_eq!(schema.body["statistics"]["file_count"], 1);
    assert_eq!(schema.body["statistics"]["directory_count"], 2);
}

#[tokio::test]
async fn test_health_check() {
    let dir = fixture();
    let fs_source = source(&dir);
    assert!(fs_source.health_check().await.is_healthy());
    assert!(fs_source.is_connected());

    let missing = FileSystemDataSource::new(
        "gone",
        SourceSettings::default(),
        FileSystemConfig {
            root_path: dir.path().join("does-not-exist"),
            ..Default::default()
        },
    );
    let report = missing.health_check().await;
    assert!(!report.is_healthy());
    assert!(!report.connected);
}
