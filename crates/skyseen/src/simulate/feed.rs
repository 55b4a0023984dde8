//! Reconstructing the views a user could have scrolled through.

use std::collections::{HashMap, HashSet};

use crate::aturi::sort_key;
use crate::config::SessionConfig;

use super::{PostInfo, UserState};

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

/// The chronological Following feed of `did` as of now.
///
/// The latest `max_posts_per_user` posts of the user and of everyone they
/// follow, newest first by record key, capped at `max_posts_per_session`.
#[must_use]
pub fn following_feed(
    users: &HashMap<String, UserState>,
    did: &str,
    config: &SessionConfig,
) -> Vec<String> {
    let Some(user) = users.get(did) else {
        return Vec::new();
    };
    let per_user = config.max_posts_per_user;

    let mut feed: Vec<&str> = tail(&user.posts, per_user)
        .iter()
        .map(String::as_str)
        .collect();
    for followee in &user.following {
        if let Some(followee) = users.get(followee) {
            feed.extend(tail(&followee.posts, per_user).iter().map(String::as_str));
        }
    }

    feed.sort_by(|a, b| sort_key(b).cmp(sort_key(a)));
    let mut unique = HashSet::new();
    feed.retain(|uri| unique.insert(*uri));
    feed.truncate(config.max_posts_per_session());
    feed.into_iter().map(str::to_string).collect()
}

/// The first screen of a user's profile: their latest `refresh_size` posts, newest first.
#[must_use]
pub fn profile_feed(user: &UserState, config: &SessionConfig) -> Vec<String> {
    tail(&user.posts, config.refresh_size)
        .iter()
        .rev()
        .take(config.max_posts_per_session())
        .cloned()
        .collect()
}

/// The ancestors shown above a reply: the parent chain, nearest first, then the root.
///
/// The walk stops at posts it has no record of, and at cycles.
#[must_use]
pub fn thread(posts: &HashMap<String, PostInfo>, parent: &str, root: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(parent.to_string());

    while let Some(uri) = current.take() {
        if uri.is_empty() || !visited.insert(uri.clone()) {
            break;
        }
        current = posts.get(&uri).and_then(|info| info.parent.clone());
        chain.push(uri);
    }

    if !root.is_empty() && !visited.contains(root) {
        chain.push(root.to_string());
    }
    chain
}
