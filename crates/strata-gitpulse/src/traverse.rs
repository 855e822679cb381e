//! Lazy commit traversal over one or more repositories.
//!
//! Commits are listed and ordered up front as cheap [`CommitStub`]s; the
//! expensive part, materializing each commit with its diffs, happens while
//! the caller iterates. With more than one worker the stubs are split into
//! contiguous chunks that a rayon pool materializes concurrently, each
//! worker on its own backend handle, feeding a bounded channel. Commits then
//! arrive in completion order.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::bounded;
use rayon::{ThreadPool, ThreadPoolBuilder};
use strata_core::{Commit, CommitStub, MiningConfig, Result, StrataError};
use tracing::{debug, info};

use crate::backend::{VcsBackend, WalkScope};
use crate::filter::{order_commits, CommitFilter};
use crate::scratch::{open_location, ScratchRepo};

/// Commits waiting in the channel per worker.
const CHANNEL_SLOTS_PER_WORKER: usize = 4;

type CommitIter = Box<dyn Iterator<Item = Result<Commit>> + Send>;

/// The selected commits of one repository.
pub struct RepoCommits {
    commits: CommitIter,
    _pool: Option<ThreadPool>,
    _scratch: Option<Arc<ScratchRepo>>,
}

impl Iterator for RepoCommits {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        self.commits.next()
    }
}

/// Traverse the repositories of `config` in turn.
///
/// Each repository is opened (remote ones cloned) only when the previous
/// one is exhausted. The stream ends after the first error it yields.
///
/// # Errors
///
/// Returns a configuration error if the selectors conflict or no repository
/// is given.
///
/// # Examples
///
/// ```no_run
/// use strata_core::MiningConfig;
/// use strata_gitpulse::traverse::traverse;
///
/// let config = MiningConfig::for_repo(".");
/// for commit in traverse(&config).unwrap() {
///     let commit = commit.unwrap();
///     println!("{} {}", &commit.hash[..8], commit.message.lines().next().unwrap_or(""));
/// }
/// ```
pub fn traverse(config: &MiningConfig) -> Result<CommitStream> {
    config.validate()?;
    if config.repos.is_empty() {
        return Err(StrataError::Config(
            "at least one repository path or URL is required".into(),
        ));
    }
    Ok(CommitStream {
        config: config.clone(),
        pending: config.repos.iter().cloned().collect(),
        current: None,
        finished: false,
    })
}

/// Commits of several repositories, one after the other.
pub struct CommitStream {
    config: MiningConfig,
    pending: VecDeque<String>,
    current: Option<RepoCommits>,
    finished: bool,
}

impl CommitStream {
    fn open_next(&mut self, location: &str) -> Result<RepoCommits> {
        let opened = open_location(location, &self.config)?;
        traverse_with(opened.backend, &self.config, opened.scratch)
    }
}

impl Iterator for CommitStream {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(current) = self.current.as_mut() {
                match current.next() {
                    Some(Ok(commit)) => return Some(Ok(commit)),
                    Some(Err(e)) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }
            let location = self.pending.pop_front()?;
            match self.open_next(&location) {
                Ok(commits) => self.current = Some(commits),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Traverse an already opened backend with the selectors of `config`.
///
/// `config.repos` is ignored.
///
/// # Errors
///
/// Returns an error if the selectors conflict, a named commit or tag does
/// not resolve, or the worker pool cannot be built.
///
/// # Examples
///
/// ```
/// use strata_core::MiningConfig;
/// use strata_gitpulse::memory::{CommitBuilder, MemoryBackend};
/// use strata_gitpulse::traverse::traverse_backend;
///
/// let mut repo = MemoryBackend::new("demo");
/// repo.push(CommitBuilder::new("a").timestamp(1).build());
/// repo.push(CommitBuilder::new("b").parents(&["a"]).timestamp(2).build());
///
/// let hashes: Vec<_> = traverse_backend(repo, &MiningConfig::default())
///     .unwrap()
///     .map(|c| c.unwrap().hash)
///     .collect();
/// assert_eq!(hashes, ["a", "b"]);
/// ```
pub fn traverse_backend<B>(backend: B, config: &MiningConfig) -> Result<RepoCommits>
where
    B: VcsBackend + 'static,
{
    config.validate()?;
    traverse_with(backend, config, None)
}

fn traverse_with<B>(
    backend: B,
    config: &MiningConfig,
    scratch: Option<Arc<ScratchRepo>>,
) -> Result<RepoCommits>
where
    B: VcsBackend + 'static,
{
    let filter = CommitFilter::resolve(config, &backend)?;
    let listed = backend.list_commits(&WalkScope::from_config(config))?;
    let stubs: Vec<CommitStub> = order_commits(listed, config.order)
        .into_iter()
        .filter(|stub| filter.accepts_stub(stub))
        .collect();

    let workers = config.num_workers.max(1);
    info!(
        project = %backend.project_name(),
        commits = stubs.len(),
        workers,
        "traversing repository"
    );

    if workers == 1 || stubs.len() < 2 {
        return Ok(RepoCommits {
            commits: Box::new(Sequential {
                backend,
                stubs: stubs.into_iter(),
                filter,
            }),
            _pool: None,
            _scratch: scratch,
        });
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|idx| format!("strata-worker-{idx}"))
        .build()
        .map_err(|e| StrataError::Config(format!("failed to build worker pool: {e}")))?;

    let (tx, rx) = bounded(workers * CHANNEL_SLOTS_PER_WORKER);
    let filter = Arc::new(filter);
    let chunk_size = stubs.len().div_ceil(workers);
    for (idx, chunk) in stubs.chunks(chunk_size).enumerate() {
        let worker_backend = backend.try_clone()?;
        let chunk = chunk.to_vec();
        let filter = Arc::clone(&filter);
        let scratch = scratch.clone();
        let tx = tx.clone();
        debug!(worker = idx, commits = chunk.len(), "starting worker");
        pool.spawn(move || {
            let _scratch = scratch;
            for stub in chunk {
                let item = match worker_backend.commit(&stub.hash) {
                    Ok(commit) if !filter.accepts_commit(&commit) => continue,
                    other => other,
                };
                if tx.send(item).is_err() {
                    debug!(worker = idx, "receiver gone, stopping");
                    break;
                }
            }
        });
    }

    Ok(RepoCommits {
        commits: Box::new(rx.into_iter()),
        _pool: Some(pool),
        _scratch: scratch,
    })
}

struct Sequential<B> {
    backend: B,
    stubs: std::vec::IntoIter<CommitStub>,
    filter: CommitFilter,
}

impl<B: VcsBackend> Iterator for Sequential<B> {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        for stub in self.stubs.by_ref() {
            match self.backend.commit(&stub.hash) {
                Ok(commit) if self.filter.accepts_commit(&commit) => return Some(Ok(commit)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
