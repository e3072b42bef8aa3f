//! Version-control publishing: one branch and one tag per game version.

use super::{blocking, PublishContext, PublishSink};
use crate::error::PublishError;
use crate::settings::GitSettings;
use futures::future::BoxFuture;
use git2::{
    build::CheckoutBuilder, BranchType, Commit, Cred, Direction, FetchOptions, IndexAddOption,
    PushOptions, RemoteCallbacks, Repository, Signature,
};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::sync::Arc;

const REMOTE: &str = "origin";
const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Snapshots each version onto its own branch of a remote repository.
///
/// The work dir doubles as the clone: `prepare` checks out the version branch
/// and empties the tree, the pipeline fills it, and `publish` commits, tags and
/// pushes whatever is there.
pub struct GitSink {
    settings: Arc<GitSettings>,
}

impl GitSink {
    pub fn new(settings: GitSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl PublishSink for GitSink {
    fn name(&self) -> &str {
        "git"
    }

    fn prepare<'a>(&'a self, ctx: &'a PublishContext) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            log::info!(
                "Cloning {} ({}, {}) into {:?}",
                self.settings.repo_url,
                self.settings.base_branch,
                ctx.safe_name,
                ctx.work_dir
            );
            let settings = self.settings.clone();
            let ctx = ctx.clone();
            blocking(move || checkout_version_branch(&settings, &ctx)).await
        })
    }

    fn publish<'a>(&'a self, ctx: &'a PublishContext) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            log::info!("Pushing changes to remote repo...");
            let settings = self.settings.clone();
            let ctx = ctx.clone();
            blocking(move || commit_tag_and_push(&settings, &ctx)).await
        })
    }
}

fn callbacks(settings: &GitSettings) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    // libgit2 keeps asking while credentials are rejected
    let attempts = Cell::new(0u32);
    callbacks.credentials(move |_url, _username, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > MAX_AUTH_ATTEMPTS {
            return Err(git2::Error::from_str("git authentication failed"));
        }
        if allowed.contains(git2::CredentialType::USER_PASS_PLAINTEXT) {
            return Cred::userpass_plaintext(&settings.email, &settings.password);
        }
        Cred::default()
    });
    callbacks
}

fn remote_commit<'r>(repo: &'r Repository, branch: &str) -> Option<Commit<'r>> {
    repo.find_reference(&format!("refs/remotes/{}/{}", REMOTE, branch))
        .ok()?
        .peel_to_commit()
        .ok()
}

fn signature(settings: &GitSettings) -> Result<Signature<'static>, PublishError> {
    Ok(Signature::now(&settings.committer_name, &settings.email)?)
}

fn checkout_version_branch(settings: &GitSettings, ctx: &PublishContext) -> Result<(), PublishError> {
    let branch = ctx.safe_name.as_str();
    let repo = Repository::init(&ctx.work_dir)?;
    let mut remote = repo.remote(REMOTE, &settings.repo_url)?;

    // Only fetch the branches the remote has; the version branch may not exist yet
    let advertised: Vec<String> = {
        let connection = remote.connect_auth(Direction::Fetch, Some(callbacks(settings)), None)?;
        connection
            .list()?
            .iter()
            .map(|head| head.name().to_string())
            .collect()
    };
    let refspecs: Vec<String> = [settings.base_branch.as_str(), branch]
        .iter()
        .filter(|b| advertised.contains(&format!("refs/heads/{}", b)))
        .map(|b| format!("+refs/heads/{b}:refs/remotes/{REMOTE}/{b}"))
        .collect();
    if !refspecs.is_empty() {
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(callbacks(settings));
        remote.fetch(&refspecs, Some(&mut fetch), None)?;
    }

    let commit = match remote_commit(&repo, branch) {
        Some(existing) => {
            log::info!("Checking out existing branch {}", branch);
            existing
        }
        None => {
            log::info!("Creating new branch {}", branch);
            let parent = remote_commit(&repo, &settings.base_branch);
            let tree = match &parent {
                Some(parent) => parent.tree()?,
                None => repo.find_tree(repo.treebuilder(None)?.write()?)?,
            };
            let parents: Vec<&Commit> = parent.iter().collect();
            let sig = signature(settings)?;
            let oid = repo.commit(
                None,
                &sig,
                &sig,
                &format!("Create new branch for version {}", ctx.safe_name),
                &tree,
                &parents,
            )?;
            repo.find_commit(oid)?
        }
    };

    repo.branch(branch, &commit, true)?;
    repo.set_head(&format!("refs/heads/{}", branch))?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

    // Each run publishes a fresh snapshot, not an overlay of the previous one
    clear_work_tree(&ctx.work_dir)
}

fn clear_work_tree(dir: &Path) -> Result<(), PublishError> {
    let io_err = |path: &Path, source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        let removed = if entry.file_type().map_err(|e| io_err(&path, e))?.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(|e| io_err(&path, e))?;
    }
    Ok(())
}

fn commit_tag_and_push(settings: &GitSettings, ctx: &PublishContext) -> Result<(), PublishError> {
    let repo = Repository::open(&ctx.work_dir)?;

    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    // Picks up deletions
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let parent = repo.head()?.peel_to_commit()?;
    let sig = signature(settings)?;
    let message = format!("Create/Update assets for version {}", ctx.version_id);
    // Committed even when nothing changed so every run leaves a trace
    let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
    log::info!("{}  {}", oid, message);

    let commit = repo.find_commit(oid)?;
    repo.tag_lightweight(ctx.safe_name.as_str(), commit.as_object(), true)?;
    log::info!("refs/tags/{}", ctx.safe_name);

    push(&repo, settings, ctx.safe_name.as_str())
}

fn push(repo: &Repository, settings: &GitSettings, tag: &str) -> Result<(), PublishError> {
    let mut refspecs = Vec::new();
    for branch in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()? {
            refspecs.push(format!("refs/heads/{0}:refs/heads/{0}", name));
        }
    }
    refspecs.push(format!("+refs/tags/{0}:refs/tags/{0}", tag));

    let rejected = RefCell::new(Vec::new());
    let mut callbacks = callbacks(settings);
    callbacks.push_update_reference(|reference, status| {
        if let Some(message) = status {
            log::error!("Remote rejected {}: {}", reference, message);
            rejected
                .borrow_mut()
                .push((reference.to_string(), message.to_string()));
        }
        Ok(())
    });
    let mut options = PushOptions::new();
    options.remote_callbacks(callbacks);

    let mut remote = repo.find_remote(REMOTE)?;
    remote.push(&refspecs, Some(&mut options))?;
    drop(options);

    match rejected.into_inner().into_iter().next() {
        Some((reference, message)) => Err(PublishError::Rejected { reference, message }),
        None => {
            log::info!("Pushed {}", refspecs.join(", "));
            Ok(())
        }
    }
}
