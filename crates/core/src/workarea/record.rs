//! Persisted per-file synchronization records.
//!
//! A tracked file `dir/name` has its record at `dir/.formsync/i_name.gz`
//! (gzip-compressed JSON) and its backup at `dir/.~name`. Existence of the
//! record file is what makes a file "checked out".

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::errors::{WebError, WorkAreaError};
use crate::repo::RepositoryAccessor;

/// Name of the per-directory metadata directory.
pub const RECORD_DIR: &str = ".formsync";

const RECORD_PREFIX: &str = "i_";
const RECORD_SUFFIX: &str = ".gz";

/// The persisted synchronization state of one tracked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub url: String,
    pub repository_type: String,
    /// Server text as of the last successful sync.
    pub original: String,
    #[serde(default)]
    pub accessor_state: serde_json::Value,
    #[serde(default)]
    pub field: Option<String>,
}

/// `name` inside `dir`, without a leading `./` for the current directory.
pub(crate) fn in_dir(dir: &Path, name: &str) -> PathBuf {
    if dir == Path::new(".") || dir.as_os_str().is_empty() {
        PathBuf::from(name)
    } else {
        dir.join(name)
    }
}

fn sibling(path: &Path, prefix: &str, suffix: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    Some(dir.join(format!("{}{}{}", prefix, name, suffix)))
}

fn record_path(path: &Path) -> Option<PathBuf> {
    let record = sibling(path, RECORD_PREFIX, RECORD_SUFFIX)?;
    let dir = record.parent()?.join(RECORD_DIR);
    Some(dir.join(record.file_name()?))
}

/// Write `contents` to `path` through a temporary file in the same directory.
fn write_replace(path: &Path, contents: &[u8]) -> Result<(), WorkAreaError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// A tracked local file together with its record.
#[derive(Debug)]
pub struct WorkArea {
    path: PathBuf,
    record_path: PathBuf,
    record: Record,
}

impl WorkArea {
    /// Whether `path` is checked out.
    pub fn has(path: &Path) -> bool {
        record_path(path).is_some_and(|p| p.exists())
    }

    /// Every tracked file of `dir`, sorted.
    pub fn each_filename(dir: &Path) -> Result<Vec<PathBuf>, WorkAreaError> {
        let entries = match fs::read_dir(dir.join(RECORD_DIR)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(tracked) = name
                .strip_prefix(RECORD_PREFIX)
                .and_then(|n| n.strip_suffix(RECORD_SUFFIX))
                .filter(|n| !n.is_empty())
            {
                files.push(in_dir(dir, tracked));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Start tracking `path` with the accessor's current text as original.
    /// Nothing is written until [`store`](Self::store).
    pub fn create(
        path: &Path,
        url: &Url,
        repository_type: &str,
        accessor: &dyn RepositoryAccessor,
    ) -> Result<Self, WorkAreaError> {
        let record_path = record_path(path).ok_or_else(|| WorkAreaError::Record {
            path: path.to_path_buf(),
            detail: "not a file name".into(),
        })?;
        if record_path.exists() {
            return Err(WorkAreaError::AlreadyCheckedOut(path.to_path_buf()));
        }
        let record = Record {
            url: url.to_string(),
            repository_type: repository_type.to_string(),
            original: accessor.current_text().to_string(),
            accessor_state: accessor.state()?,
            field: accessor.field(),
        };
        Ok(Self { path: path.to_path_buf(), record_path, record })
    }

    /// Load the record of a checked-out file.
    pub fn open(path: &Path) -> Result<Self, WorkAreaError> {
        let record_path = match record_path(path) {
            Some(p) if p.exists() => p,
            _ => return Err(WorkAreaError::NotCheckedOut(path.to_path_buf())),
        };
        let corrupt = |detail: String| WorkAreaError::Record { path: record_path.clone(), detail };

        let mut json = Vec::new();
        GzDecoder::new(fs::File::open(&record_path)?)
            .read_to_end(&mut json)
            .map_err(|e| corrupt(e.to_string()))?;
        let record: Record = serde_json::from_slice(&json).map_err(|e| corrupt(e.to_string()))?;
        debug!(path = %path.display(), url = %record.url, "record loaded");
        Ok(Self { path: path.to_path_buf(), record_path, record })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn repository_type(&self) -> &str {
        &self.record.repository_type
    }

    pub fn url(&self) -> Result<Url, WorkAreaError> {
        Url::parse(&self.record.url).map_err(|_| WebError::InvalidUrl(self.record.url.clone()).into())
    }

    /// Persist the record and overwrite the local file with the original text.
    pub fn store(&self) -> Result<(), WorkAreaError> {
        self.store_info()?;
        self.set_local_text(&self.record.original)
    }

    /// Persist the record only.
    pub fn store_info(&self) -> Result<(), WorkAreaError> {
        if let Some(dir) = self.record_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec(&self.record).map_err(|e| WorkAreaError::Record {
            path: self.record_path.clone(),
            detail: e.to_string(),
        })?;
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&json)?;
        write_replace(&self.record_path, &gz.finish()?)?;
        debug!(path = %self.record_path.display(), "record stored");
        Ok(())
    }

    /// The user's working copy.
    pub fn local_text(&self) -> Result<String, WorkAreaError> {
        let bytes = fs::read(&self.path)?;
        String::from_utf8(bytes).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{}: {}", self.path.display(), e))
                .into()
        })
    }

    pub fn set_local_text(&self, text: &str) -> Result<(), WorkAreaError> {
        write_replace(&self.path, text.as_bytes())
    }

    pub fn original_text(&self) -> &str {
        &self.record.original
    }

    pub fn set_original_text(&mut self, text: &str) {
        self.record.original = text.to_string();
    }

    /// Remember the accessor's opaque state for the next sync.
    pub fn set_accessor_state(&mut self, accessor: &dyn RepositoryAccessor) -> Result<(), WorkAreaError> {
        self.record.accessor_state = accessor.state()?;
        self.record.field = accessor.field();
        Ok(())
    }

    /// Save `text` beside the tracked file and return the backup path.
    pub fn make_backup(&self, text: &str) -> Result<PathBuf, WorkAreaError> {
        let backup = sibling(&self.path, ".~", "").ok_or_else(|| WorkAreaError::Record {
            path: self.path.clone(),
            detail: "not a file name".into(),
        })?;
        write_replace(&backup, text.as_bytes())?;
        debug!(backup = %backup.display(), "backup written");
        Ok(backup)
    }

    pub fn is_modified(&self) -> Result<bool, WorkAreaError> {
        Ok(self.local_text()? != self.record.original)
    }

    /// The record as pretty-printed JSON.
    pub fn dump(&self) -> Result<String, WorkAreaError> {
        serde_json::to_string_pretty(&self.record).map_err(|e| WorkAreaError::Record {
            path: self.record_path.clone(),
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::errors::RepoError;
    use crate::web::WebClient;

    struct Fixed(String);

    #[async_trait]
    impl RepositoryAccessor for Fixed {
        fn uri(&self) -> &Url {
            unimplemented!()
        }
        fn current_text(&self) -> &str {
            &self.0
        }
        fn replace_text(&mut self, text: &str) {
            self.0 = text.to_string();
        }
        async fn commit(&self, _client: &mut WebClient) -> Result<(), RepoError> {
            Ok(())
        }
        async fn reload(&self, _client: &mut WebClient) -> Result<Box<dyn RepositoryAccessor>, RepoError> {
            Ok(Box::new(Fixed(self.0.clone())))
        }
        fn recommended_filename(&self) -> String {
            "page".into()
        }
        fn state(&self) -> Result<serde_json::Value, RepoError> {
            Ok(serde_json::json!({ "rev": 3 }))
        }
        fn field(&self) -> Option<String> {
            Some("body".into())
        }
    }

    fn url() -> Url {
        Url::parse("http://wiki.example.org/FrontPage").unwrap()
    }

    /// An accessor whose state has map keys JSON cannot represent.
    struct Unencodable(Fixed);

    #[async_trait]
    impl RepositoryAccessor for Unencodable {
        fn uri(&self) -> &Url {
            self.0.uri()
        }
        fn current_text(&self) -> &str {
            self.0.current_text()
        }
        fn replace_text(&mut self, text: &str) {
            self.0.replace_text(text)
        }
        async fn commit(&self, client: &mut WebClient) -> Result<(), RepoError> {
            self.0.commit(client).await
        }
        async fn reload(&self, client: &mut WebClient) -> Result<Box<dyn RepositoryAccessor>, RepoError> {
            self.0.reload(client).await
        }
        fn recommended_filename(&self) -> String {
            self.0.recommended_filename()
        }
        fn state(&self) -> Result<serde_json::Value, RepoError> {
            let revisions = std::collections::BTreeMap::from([((1u8, 2u8), 3u8)]);
            Ok(serde_json::to_value(revisions)?)
        }
    }

    #[test]
    fn test_unencodable_state_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("page.txt");
        let broken = Unencodable(Fixed("A\n".into()));

        assert!(matches!(
            WorkArea::create(&path, &url(), "textarea", &broken),
            Err(WorkAreaError::Repo(RepoError::State(_)))
        ));

        let mut area = WorkArea::create(&path, &url(), "textarea", &Fixed("A\n".into())).unwrap();
        assert!(area.set_accessor_state(&broken).is_err());
        assert_eq!(area.record().accessor_state["rev"], 3);
        assert_eq!(area.record().field.as_deref(), Some("body"));
    }

    #[test]
    fn test_create_store_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("page.txt");
        assert!(!WorkArea::has(&path));

        let area = WorkArea::create(&path, &url(), "textarea", &Fixed("A\nB\n".into())).unwrap();
        area.store().unwrap();
        assert!(WorkArea::has(&path));
        assert!(dir.path().join(".formsync").join("i_page.txt.gz").exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "A\nB\n");

        let area = WorkArea::open(&path).unwrap();
        assert_eq!(area.original_text(), "A\nB\n");
        assert_eq!(area.repository_type(), "textarea");
        assert_eq!(area.url().unwrap(), url());
        assert_eq!(area.record().field.as_deref(), Some("body"));
        assert_eq!(area.record().accessor_state["rev"], 3);
        assert!(!area.is_modified().unwrap());

        assert!(matches!(
            WorkArea::create(&path, &url(), "textarea", &Fixed(String::new())),
            Err(WorkAreaError::AlreadyCheckedOut(_))
        ));
    }

    #[test]
    fn test_open_untracked() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = WorkArea::open(&dir.path().join("nothing.txt"));
        assert!(matches!(result, Err(WorkAreaError::NotCheckedOut(_))));
    }

    #[test]
    fn test_corrupt_record() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir(dir.path().join(RECORD_DIR)).unwrap();
        fs::write(dir.path().join(RECORD_DIR).join("i_x.txt.gz"), b"not gzip").unwrap();
        let result = WorkArea::open(&dir.path().join("x.txt"));
        assert!(matches!(result, Err(WorkAreaError::Record { .. })));
    }

    #[test]
    fn test_store_info_leaves_local_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("p.txt");
        let mut area = WorkArea::create(&path, &url(), "textarea", &Fixed("old\n".into())).unwrap();
        area.store().unwrap();

        fs::write(&path, "edited\n").unwrap();
        area.set_original_text("server\n");
        area.store_info().unwrap();

        let area = WorkArea::open(&path).unwrap();
        assert_eq!(area.local_text().unwrap(), "edited\n");
        assert_eq!(area.original_text(), "server\n");
        assert!(area.is_modified().unwrap());
    }

    #[test]
    fn test_each_filename_and_backup() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(WorkArea::each_filename(dir.path()).unwrap().is_empty());

        for name in ["b.txt", "a.txt"] {
            let path = dir.path().join(name);
            WorkArea::create(&path, &url(), "textarea", &Fixed("x".into())).unwrap().store().unwrap();
        }
        fs::write(dir.path().join(RECORD_DIR).join("stray"), b"").unwrap();
        assert_eq!(
            WorkArea::each_filename(dir.path()).unwrap(),
            vec![dir.path().join("a.txt"), dir.path().join("b.txt")]
        );

        let area = WorkArea::open(&dir.path().join("a.txt")).unwrap();
        let backup = area.make_backup("saved\n").unwrap();
        assert_eq!(backup, dir.path().join(".~a.txt"));
        assert_eq!(fs::read_to_string(backup).unwrap(), "saved\n");
    }

    #[test]
    fn test_in_dir_current_directory() {
        assert_eq!(in_dir(Path::new("."), "a.txt"), PathBuf::from("a.txt"));
        assert_eq!(in_dir(Path::new("/w"), "a.txt"), PathBuf::from("/w/a.txt"));
    }
}
