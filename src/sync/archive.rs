//! Remote archive partition discovery.

use crate::config::S3Settings;
use crate::error::{Result, WatchError};
use serde::Deserialize;
use std::process::Command;
use tracing::{debug, warn};

/// One page of a delimited prefix listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Full common prefixes, e.g. `eventstore/2024-05-01/`.
    pub prefixes: Vec<String>,
    pub next_token: Option<String>,
    pub truncated: bool,
}

/// Paginated listing seam for the archive backend.
pub trait ArchiveLister: Send + Sync {
    /// Fetch the page after `continuation`, or the first page.
    fn list_page(&self, continuation: Option<&str>) -> Result<ListPage>;
}

/// List every partition name, sorted lexicographically.
///
/// A name is the last path component of a common prefix.
pub fn list_partitions(lister: &dyn ArchiveLister) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = lister.list_page(token.as_deref())?;
        names.extend(page.prefixes.iter().filter_map(|p| partition_name(p)));
        match (page.truncated, page.next_token) {
            (true, Some(next)) => token = Some(next),
            (true, None) => {
                warn!("truncated listing without continuation token");
                break;
            }
            (false, _) => break,
        }
    }
    names.sort();
    names.dedup();
    debug!(count = names.len(), "listed partitions");
    Ok(names)
}

fn partition_name(prefix: &str) -> Option<String> {
    prefix
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsOutput {
    #[serde(default)]
    common_prefixes: Vec<CommonPrefix>,
    next_continuation_token: Option<String>,
    #[serde(default)]
    is_truncated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommonPrefix {
    prefix: String,
}

/// Lists partitions with `aws s3api list-objects-v2`, one page per call.
#[derive(Clone, Debug)]
pub struct AwsCliLister {
    s3: S3Settings,
    program: String,
}

impl AwsCliLister {
    pub fn new(s3: S3Settings) -> Self {
        Self {
            s3,
            program: "aws".to_string(),
        }
    }

    /// Use a different executable in place of `aws`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments for one page request.
    pub fn args(&self, continuation: Option<&str>) -> Vec<String> {
        let mut prefix = self.s3.prefix.clone();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        let mut args: Vec<String> = [
            "s3api",
            "list-objects-v2",
            "--bucket",
            self.s3.bucket.as_str(),
            "--prefix",
            prefix.as_str(),
            "--delimiter",
            "/",
            "--no-paginate",
            "--output",
            "json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if let Some(token) = continuation {
            args.extend(["--continuation-token".to_string(), token.to_string()]);
        }
        if !self.s3.profile.is_empty() {
            args.extend(["--profile".to_string(), self.s3.profile.clone()]);
        }
        if !self.s3.region.is_empty() {
            args.extend(["--region".to_string(), self.s3.region.clone()]);
        }
        args
    }
}

impl ArchiveLister for AwsCliLister {
    fn list_page(&self, continuation: Option<&str>) -> Result<ListPage> {
        let output = Command::new(&self.program)
            .args(self.args(continuation))
            .output()
            .map_err(|e| WatchError::Listing(format!("{}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(WatchError::Listing(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_list_output(&output.stdout)
    }
}

fn parse_list_output(stdout: &[u8]) -> Result<ListPage> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(ListPage::default());
    }
    let parsed: ListObjectsOutput = serde_json::from_slice(stdout)
        .map_err(|e| WatchError::Listing(format!("unreadable listing: {e}")))?;
    Ok(ListPage {
        prefixes: parsed.common_prefixes.into_iter().map(|p| p.prefix).collect(),
        next_token: parsed.next_continuation_token,
        truncated: parsed.is_truncated,
    })
}
