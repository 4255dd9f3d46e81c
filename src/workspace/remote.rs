//! Commit resolution for triggers that only name a branch or pull request.

use std::path::Path;

use tracing::{info, warn};

use crate::runner::CommandRunner;
use crate::types::{JobRequest, Sha};

/// Asks the remote for the head commit of the job's pull request, or of its
/// default branch when there is none.
pub async fn resolve_commit(runner: &CommandRunner, job: &JobRequest) -> Option<Sha> {
    if let Err(err) = tokio::fs::create_dir_all(job.root()).await {
        warn!(error = %err, root = %job.root().display(), "cannot create workspace root");
        return None;
    }
    let argv = vec!["git".to_string(), "ls-remote".to_string(), job.clone_url()];
    let out = runner.run(Path::new(""), &[], &argv, false).await;
    if !out.success {
        warn!(repo = %job.repo, output = %out.text, "git ls-remote failed");
        return None;
    }

    let wanted = match job.pull {
        Some(pull) => format!("refs/{}", pull.head_ref()),
        None => "HEAD".to_string(),
    };
    let found = find_ref(&out.text, &wanted);
    match &found {
        Some(sha) => info!(repo = %job.repo, %sha, reference = %wanted, "resolved commit"),
        None => warn!(repo = %job.repo, reference = %wanted, "ref not found on remote"),
    }
    found
}

/// Finds `reference` in `git ls-remote` output (`<sha>\t<ref>` lines).
pub fn find_ref(listing: &str, reference: &str) -> Option<Sha> {
    listing.lines().find_map(|line| {
        let (sha, name) = line.split_once('\t')?;
        (name.trim() == reference && !sha.is_empty()).then(|| Sha::new(sha.trim()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
$CI_WORKSPACE $ git ls-remote https://github.com/octo/cat  (exit:0 in 312ms)
1111111111111111111111111111111111111111\tHEAD
1111111111111111111111111111111111111111\trefs/heads/main
2222222222222222222222222222222222222222\trefs/pull/7/head
3333333333333333333333333333333333333333\trefs/pull/17/head
";

    #[test]
    fn finds_head() {
        assert_eq!(
            find_ref(LISTING, "HEAD"),
            Some(Sha::new("1111111111111111111111111111111111111111"))
        );
    }

    #[test]
    fn finds_exact_pull_ref() {
        assert_eq!(
            find_ref(LISTING, "refs/pull/7/head"),
            Some(Sha::new("2222222222222222222222222222222222222222"))
        );
        assert_eq!(find_ref(LISTING, "refs/pull/1/head"), None);
    }
}
