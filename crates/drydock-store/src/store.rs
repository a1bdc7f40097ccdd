//! In-memory cache of job results backed by JSON files.

use drydock_core::{JobKey, JobRecord, RepoName, ResultRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{StoreError, StoreResult};

/// Results of every job this process has run or read, plus the durable tree
/// under `root`.
///
/// A build's record is mutated only by the worker running that build;
/// readers on other tasks get a snapshot that may lag by a few lines.
pub struct ResultsStore {
    root: PathBuf,
    cache: RwLock<HashMap<JobKey, JobRecord>>,
}

impl ResultsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all job records of a repository.
    pub fn repo_path(&self, repo: &RepoName) -> PathBuf {
        self.root.join(&repo.owner).join(&repo.name)
    }

    /// File holding a job's record.
    pub fn job_path(&self, key: &JobKey) -> PathBuf {
        key.segments()
            .iter()
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Start a fresh in-flight record for one image of a job.
    pub fn begin(&self, key: &JobKey, image: &str) {
        let mut cache = self.cache.write();
        cache
            .entry(key.clone())
            .or_default()
            .insert(image.to_string(), ResultRecord::started(key.clone()));
    }

    /// Replace the record of one image.
    pub fn put(&self, key: &JobKey, image: &str, record: ResultRecord) {
        self.cache
            .write()
            .entry(key.clone())
            .or_default()
            .insert(image.to_string(), record);
    }

    /// Append one output line to an in-flight record.
    pub fn append_line(&self, key: &JobKey, image: &str, line: impl Into<String>) -> bool {
        self.update(key, image, |record| record.output.push(line.into()))
    }

    /// Apply `f` to the record of one image. Returns `false` when no such
    /// record is resident.
    pub fn update<F>(&self, key: &JobKey, image: &str, f: F) -> bool
    where
        F: FnOnce(&mut ResultRecord),
    {
        let mut cache = self.cache.write();
        match cache.get_mut(key).and_then(|job| job.get_mut(image)) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Snapshot of one image's record, if resident.
    pub fn record(&self, key: &JobKey, image: &str) -> Option<ResultRecord> {
        self.cache
            .read()
            .get(key)
            .and_then(|job| job.get(image))
            .cloned()
    }

    /// Persist the resident records of a job, creating parent directories
    /// as needed. The file is replaced atomically.
    pub async fn write(&self, key: &JobKey) -> StoreResult<()> {
        let snapshot = {
            let cache = self.cache.read();
            cache
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotResident(key.clone()))?
        };
        let body = serde_json::to_vec(&snapshot)?;

        let path = self.job_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_file_name(format!(".{}.tmp", key.number));
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(job = %key, path = %path.display(), images = snapshot.len(), "Wrote results");
        Ok(())
    }

    /// Results of a job: the resident record if any, otherwise the persisted
    /// one, which is then cached. `None` when neither exists.
    pub async fn read(&self, key: &JobKey) -> StoreResult<Option<JobRecord>> {
        let resident = self.cache.read().get(key).cloned();
        if resident.is_some() {
            return Ok(resident);
        }

        let path = self.job_path(key);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(job = %key, "No results on disk");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let record: JobRecord =
            serde_json::from_slice(&body).map_err(|source| StoreError::Corrupt {
                key: key.clone(),
                source,
            })?;

        let mut cache = self.cache.write();
        let resident = cache.entry(key.clone()).or_insert(record);
        Ok(Some(resident.clone()))
    }

    /// Numbers of the persisted jobs of a repository, ascending.
    pub async fn job_numbers(&self, repo: &RepoName) -> StoreResult<Vec<u64>> {
        let mut entries = match tokio::fs::read_dir(self.repo_path(repo)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut numbers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(number) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn key(s: &str) -> JobKey {
        s.parse().unwrap()
    }

    fn finished_job(store: &ResultsStore, job: &JobKey, image: &str, lines: &[&str]) {
        store.begin(job, image);
        for line in lines {
            assert!(store.append_line(job, image, *line));
        }
        store.update(job, image, |r| r.finish(0, Duration::from_millis(250)));
    }

    #[test]
    fn test_job_path_mirrors_key() {
        let store = ResultsStore::new("/ci");
        assert_eq!(
            store.job_path(&key("acme/widgets/7")),
            PathBuf::from("/ci/acme/widgets/7")
        );
        assert_eq!(
            store.repo_path(&"acme/widgets".parse().unwrap()),
            PathBuf::from("/ci/acme/widgets")
        );
    }

    #[tokio::test]
    async fn test_round_trip_through_fresh_store() {
        let dir = TempDir::new().unwrap();
        let job = key("acme/widgets/1");

        let store = ResultsStore::new(dir.path());
        finished_job(&store, &job, "base:1.0", &["hello", "world"]);
        finished_job(&store, &job, "base:2.0", &["other"]);
        store.write(&job).await.unwrap();
        let written = store.read(&job).await.unwrap().unwrap();

        let fresh = ResultsStore::new(dir.path());
        let read = fresh.read(&job).await.unwrap().unwrap();
        assert_eq!(read, written);
        assert_eq!(
            read.keys().collect::<Vec<_>>(),
            vec!["base:1.0", "base:2.0"]
        );
        assert_eq!(read["base:1.0"].output[0], "hello");
        assert_eq!(read["base:1.0"].success, Some(true));
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() {
        let dir = TempDir::new().unwrap();
        let job = key("acme/widgets/1");
        let store = ResultsStore::new(dir.path());
        finished_job(&store, &job, "alpine", &["x"]);
        store.write(&job).await.unwrap();

        let fresh = ResultsStore::new(dir.path());
        let first = fresh.read(&job).await.unwrap();
        let second = fresh.read(&job).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_read_missing_job_is_none() {
        let dir = TempDir::new().unwrap();
        let store = ResultsStore::new(dir.path());
        assert!(store.read(&key("acme/widgets/1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_sees_partial_output_of_running_build() {
        let dir = TempDir::new().unwrap();
        let store = ResultsStore::new(dir.path());
        let job = key("acme/widgets/2");

        store.begin(&job, "alpine");
        store.append_line(&job, "alpine", "step 1");

        let partial = store.read(&job).await.unwrap().unwrap();
        assert_eq!(partial["alpine"].output, vec!["step 1"]);
        assert_eq!(partial["alpine"].returncode, None);
        assert_eq!(partial["alpine"].success, None);
        assert!(!store.job_path(&job).exists());
    }

    #[tokio::test]
    async fn test_write_requires_resident_record() {
        let dir = TempDir::new().unwrap();
        let store = ResultsStore::new(dir.path());
        let result = store.write(&key("acme/widgets/1")).await;
        assert!(matches!(result, Err(StoreError::NotResident(_))));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = ResultsStore::new(dir.path());
        let job = key("acme/widgets/1");
        let path = store.job_path(&job);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(
            store.read(&job).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_update_unknown_image_is_rejected() {
        let store = ResultsStore::new("/ci");
        let job = key("acme/widgets/1");
        assert!(!store.append_line(&job, "alpine", "lost"));
        store.begin(&job, "alpine");
        assert!(!store.append_line(&job, "debian", "lost"));
        assert!(store.record(&job, "debian").is_none());
    }

    #[tokio::test]
    async fn test_job_numbers_ignores_other_entries() {
        let dir = TempDir::new().unwrap();
        let store = ResultsStore::new(dir.path());
        let repo: RepoName = "acme/widgets".parse().unwrap();

        assert!(store.job_numbers(&repo).await.unwrap().is_empty());

        for n in [3, 1, 2] {
            let job = JobKey::new(repo.clone(), n).unwrap();
            finished_job(&store, &job, "alpine", &[]);
            store.write(&job).await.unwrap();
        }
        std::fs::write(store.repo_path(&repo).join(".4.tmp"), b"{}").unwrap();

        assert_eq!(store.job_numbers(&repo).await.unwrap(), vec![1, 2, 3]);
    }
}
