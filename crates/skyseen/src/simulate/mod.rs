//! Session simulation over an ordered record stream.
//!
//! The simulator splits each user's activity into sessions separated by idle
//! gaps, rebuilds the chronological Following feed they would have loaded at
//! session start, and infers which posts they saw from what they did:
//!
//! - a like or repost of the post at position `i` in the feed means they
//!   scrolled past everything above it
//! - a follow means they looked at the followed user's profile
//! - a reply means they read the thread above it
//! - a quote means they saw the quoted post

pub mod feed;
pub mod session;

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::record::{PostBody, Record, RecordBody};
use crate::stream::RecordSource;

pub use session::{Action, ActionKind, Impression, Session, View};

/// What the simulator knows about one user.
#[derive(Debug, Clone, Default)]
pub struct UserState {
    /// Own top-level posts, oldest first.
    pub posts: Vec<String>,
    post_set: HashSet<String>,
    /// Followed DIDs in follow order.
    pub following: Vec<String>,
    following_set: HashSet<String>,
    /// Number of sessions started so far.
    pub session_number: u32,
    /// Time of the latest record by this user.
    pub last_interaction_ms: Option<i64>,
    /// Following feed snapshot taken at the start of the current session.
    pub feed: Vec<String>,
    current: Option<usize>,
}

impl UserState {
    /// Append a top-level post. Returns `false` for a duplicate.
    pub fn push_post(&mut self, uri: String) -> bool {
        if !self.post_set.insert(uri.clone()) {
            return false;
        }
        self.posts.push(uri);
        true
    }

    /// Follow `did`. Returns `false` if already followed.
    pub fn follow(&mut self, did: &str) -> bool {
        if !self.following_set.insert(did.to_string()) {
            return false;
        }
        self.following.push(did.to_string());
        true
    }

    /// Whether `did` is followed.
    #[must_use]
    pub fn is_following(&self, did: &str) -> bool {
        self.following_set.contains(did)
    }
}

/// What the simulator knows about one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostInfo {
    /// DID of the author.
    pub author: String,
    /// Parent post, for replies.
    pub parent: Option<String>,
    /// Thread root, for replies.
    pub root: Option<String>,
    /// Quoted post, for quotes.
    pub quoted: Option<String>,
    /// Set once a tombstone for the post has been replayed.
    pub deleted: bool,
}

impl PostInfo {
    /// A top-level post by `author`.
    #[must_use]
    pub fn new(author: &str) -> Self {
        Self {
            author: author.to_string(),
            parent: None,
            root: None,
            quoted: None,
            deleted: false,
        }
    }
}

/// Counters gathered while replaying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationStats {
    /// Records received.
    pub records: u64,
    /// Records with neither `ts` nor a parseable `createdAt`.
    pub skipped_no_time: u64,
    /// Posts that could not be registered.
    pub posts_without_uri: u64,
    /// Top-level posts replayed more than once.
    pub duplicate_posts: u64,
    /// Follows of an already followed user.
    pub repeat_follows: u64,
    /// Tombstones replayed.
    pub tombstones: u64,
}

/// Replays records and builds sessions.
#[derive(Debug)]
pub struct Simulator {
    config: SessionConfig,
    users: HashMap<String, UserState>,
    posts: HashMap<String, PostInfo>,
    sessions: Vec<Session>,
    stats: SimulationStats,
}

impl Simulator {
    /// Create an empty simulator.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            users: HashMap::new(),
            posts: HashMap::new(),
            sessions: Vec::new(),
            stats: SimulationStats::default(),
        }
    }

    /// Consume every record `source` produces.
    ///
    /// Returns the number of records the source sent. Stopping the source
    /// through its handle ends the replay early with the sessions built so far.
    ///
    /// # Errors
    ///
    /// Returns the source's error if it fails to read its input.
    pub async fn replay<S>(&mut self, source: &mut S, capacity: usize) -> Result<u64>
    where
        S: RecordSource + ?Sized,
    {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        info!(source = source.name(), "Starting replay");

        let producer = source.run(tx);
        let consumer = async {
            while let Some(record) = rx.recv().await {
                self.process(&record);
            }
        };
        let (sent, ()) = tokio::join!(producer, consumer);

        info!(
            records = self.stats.records,
            sessions = self.sessions.len(),
            users = self.users.len(),
            "Replay finished"
        );
        sent
    }

    /// Apply one record.
    pub fn process(&mut self, record: &Record) {
        self.stats.records += 1;
        let Some(now) = record.time_ms() else {
            self.stats.skipped_no_time += 1;
            debug!(did = %record.did, "Skipping record without a time");
            return;
        };
        let did = record.did.as_str();

        let current = self
            .users
            .get(did)
            .filter(|user| !self.is_idle(user, now))
            .and_then(|user| user.current);
        let idx = match current {
            Some(idx) => idx,
            None => self.start_session(did, now),
        };

        match &record.body {
            RecordBody::Post(post) => self.handle_post(record, post, now, idx),
            RecordBody::Like { subject } => {
                self.handle_engagement(ActionKind::Like, record, &subject.uri, now, idx);
            }
            RecordBody::Repost { subject } => {
                self.handle_engagement(ActionKind::Repost, record, &subject.uri, now, idx);
            }
            RecordBody::Follow { subject } => self.handle_follow(record, subject, now, idx),
            RecordBody::Block { subject } => {
                self.sessions[idx].actions.push(Action {
                    kind: ActionKind::Block,
                    ts: now,
                    uri: record.uri.clone(),
                    subject: Some(subject.clone()),
                });
            }
            RecordBody::Profile | RecordBody::Unknown => {}
        }

        if let Some(user) = self.users.get_mut(did) {
            user.last_interaction_ms = Some(now);
        }
        let session = &mut self.sessions[idx];
        session.end_ms = session.end_ms.max(now);
    }

    fn is_idle(&self, user: &UserState, now: i64) -> bool {
        user.last_interaction_ms
            .map_or(true, |last| now - last > self.config.idle_threshold_ms())
    }

    fn start_session(&mut self, did: &str, now: i64) -> usize {
        let feed = feed::following_feed(&self.users, did, &self.config);
        let user = self.users.entry(did.to_string()).or_default();
        user.session_number += 1;
        user.feed = feed;

        self.sessions.push(Session::new(did, user.session_number, now));
        let idx = self.sessions.len() - 1;
        user.current = Some(idx);
        trace!(did, number = user.session_number, feed = user.feed.len(), "Session started");
        idx
    }

    fn handle_post(&mut self, record: &Record, post: &PostBody, now: i64, idx: usize) {
        let did = record.did.as_str();
        let Some(uri) = record.uri.as_deref() else {
            self.stats.posts_without_uri += 1;
            debug!(did, "Skipping post without a uri");
            return;
        };
        if post.deleted {
            self.stats.tombstones += 1;
        }

        let parent = post.reply.as_ref().map(|r| r.parent.uri.clone());
        let root = post.reply.as_ref().map(|r| r.root.uri.clone());
        let quoted = post.quoted_uri().map(str::to_string);

        let info = self
            .posts
            .entry(uri.to_string())
            .or_insert_with(|| PostInfo::new(did));
        info.parent.clone_from(&parent);
        info.root.clone_from(&root);
        info.quoted.clone_from(&quoted);
        info.deleted |= post.deleted;

        let kind = if let (Some(parent), Some(root)) = (&parent, &root) {
            let chain = feed::thread(&self.posts, parent, root);
            self.sessions[idx].mark_all_seen(chain.iter().map(String::as_str), View::Thread);
            ActionKind::Reply
        } else if quoted.is_some() {
            ActionKind::Quote
        } else {
            let user = self.users.entry(did.to_string()).or_default();
            if !user.push_post(uri.to_string()) {
                self.stats.duplicate_posts += 1;
                warn!(uri, "Duplicate post");
            }
            ActionKind::Post
        };
        if let Some(quoted) = &quoted {
            self.sessions[idx].mark_seen(quoted, View::Quote);
        }

        self.sessions[idx].actions.push(Action {
            kind,
            ts: now,
            uri: Some(uri.to_string()),
            subject: parent.or(quoted),
        });
    }

    fn handle_engagement(
        &mut self,
        kind: ActionKind,
        record: &Record,
        subject: &str,
        now: i64,
        idx: usize,
    ) {
        if let Some(user) = self.users.get(&record.did) {
            if let Some(position) = user.feed.iter().position(|uri| uri == subject) {
                self.sessions[idx].mark_all_seen(
                    user.feed[..=position].iter().map(String::as_str),
                    View::Following,
                );
            }
        }
        self.sessions[idx].actions.push(Action {
            kind,
            ts: now,
            uri: record.uri.clone(),
            subject: Some(subject.to_string()),
        });
    }

    fn handle_follow(&mut self, record: &Record, subject: &str, now: i64, idx: usize) {
        self.users.entry(subject.to_string()).or_default();
        let follower = self.users.entry(record.did.clone()).or_default();
        if !follower.follow(subject) {
            self.stats.repeat_follows += 1;
            debug!(did = %record.did, subject, "Repeat follow");
            return;
        }

        self.sessions[idx].actions.push(Action {
            kind: ActionKind::Follow,
            ts: now,
            uri: record.uri.clone(),
            subject: Some(subject.to_string()),
        });
        if let Some(followed) = self.users.get(subject) {
            let profile = feed::profile_feed(followed, &self.config);
            self.sessions[idx].mark_all_seen(profile.iter().map(String::as_str), View::Profile);
        }
    }

    /// Sessions in the order they started.
    #[must_use]
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Take the sessions, dropping the rest of the state.
    #[must_use]
    pub fn into_sessions(self) -> Vec<Session> {
        self.sessions
    }

    /// State of one user.
    #[must_use]
    pub fn user(&self, did: &str) -> Option<&UserState> {
        self.users.get(did)
    }

    /// State of one post.
    #[must_use]
    pub fn post(&self, uri: &str) -> Option<&PostInfo> {
        self.posts.get(uri)
    }

    /// Users seen as authors or follow subjects.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Posts registered so far, tombstones included.
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    /// Posts replayed as tombstones.
    #[must_use]
    pub fn deleted_post_count(&self) -> usize {
        self.posts.values().filter(|p| p.deleted).count()
    }

    /// Replay counters.
    #[must_use]
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }
}
