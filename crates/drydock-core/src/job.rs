//! Jobs, builds and result records.
//!
//! A job is one CI run for a commit, keyed `owner/repo/number`. It expands
//! into one [`Build`] per configured image; each build produces a
//! [`ResultRecord`]. The persisted form of a job is a [`JobRecord`] mapping
//! image to record, in build order.

use chrono::{DateTime, Utc};
use derive_more::Display;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, ResourceId, Result};

/// Persisted results of a job: image identifier to that build's record.
pub type JobRecord = IndexMap<String, ResultRecord>;

/// A repository on the code host, e.g. `acme/widgets`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{owner}/{name}")]
pub struct RepoName {
    pub owner: String,
    pub name: String,
}

impl RepoName {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();
        validate_segment(&owner)?;
        validate_segment(&name)?;
        Ok(Self { owner, name })
    }
}

impl FromStr for RepoName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (owner, name) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("expected owner/repo, got '{}'", s)))?;
        Self::new(owner, name)
    }
}

/// Path-like job identity: `owner/repo/number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[display("{repo}/{number}")]
#[serde(try_from = "String", into = "String")]
pub struct JobKey {
    pub repo: RepoName,
    pub number: u64,
}

impl JobKey {
    pub fn new(repo: RepoName, number: u64) -> Result<Self> {
        if number == 0 {
            return Err(Error::InvalidInput(
                "build numbers start at 1".to_string(),
            ));
        }
        Ok(Self { repo, number })
    }

    /// Path segments of the key, used to lay out storage.
    pub fn segments(&self) -> [String; 3] {
        [
            self.repo.owner.clone(),
            self.repo.name.clone(),
            self.number.to_string(),
        ]
    }
}

impl FromStr for JobKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (repo, number) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("expected owner/repo/number, got '{}'", s)))?;
        let number = number
            .parse::<u64>()
            .map_err(|_| Error::InvalidInput(format!("invalid build number in '{}'", s)))?;
        Self::new(repo.parse()?, number)
    }
}

impl TryFrom<String> for JobKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<JobKey> for String {
    fn from(key: JobKey) -> Self {
        key.to_string()
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidInput(format!(
            "invalid path segment '{}'",
            segment
        )));
    }
    Ok(())
}

/// Output and outcome of one build.
///
/// While the build runs, `returncode` and `success` are `None` and `output`
/// grows line by line. Once finished, `success == (returncode == 0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job: JobKey,
    pub output: Vec<String>,
    pub returncode: Option<i32>,
    pub success: Option<bool>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ResultRecord {
    /// A fresh in-flight record.
    pub fn started(job: JobKey) -> Self {
        Self {
            job,
            output: Vec::new(),
            returncode: None,
            success: None,
            duration: 0.0,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.returncode.is_some()
    }

    /// Seal the record with the process exit code and elapsed time.
    pub fn finish(&mut self, returncode: i32, elapsed: Duration) {
        let duration = elapsed.as_secs_f64();
        self.output.push(String::new());
        self.output.push(format!("Job finished in {:.2}s", duration));
        self.returncode = Some(returncode);
        self.success = Some(returncode == 0);
        self.duration = duration;
        self.finished_at = Some(Utc::now());
    }
}

/// One unit of work within a job: the job's script run in one image.
#[derive(Debug, Clone)]
pub struct Build {
    pub id: ResourceId,
    pub job: JobKey,
    pub image: String,
    pub script: Vec<String>,
    /// Working directory shared by every build of the job.
    pub root: PathBuf,
    pub result: Option<ResultRecord>,
}

impl Build {
    pub fn new(job: JobKey, image: impl Into<String>, script: Vec<String>, root: PathBuf) -> Self {
        Self {
            id: ResourceId::new(),
            job,
            image: image.into(),
            script,
            root,
            result: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result
            .as_ref()
            .and_then(|r| r.success)
            .unwrap_or(false)
    }
}
