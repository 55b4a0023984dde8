//! Sessions and the impressions predicted within them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The screen a post is predicted to have been seen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// The chronological Following feed.
    Following,
    /// A user's profile timeline.
    Profile,
    /// A reply thread.
    Thread,
    /// A quoted post.
    Quote,
}

impl View {
    /// Parse the storage representation.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "following" => Some(Self::Following),
            "profile" => Some(Self::Profile),
            "thread" => Some(Self::Thread),
            "quote" => Some(Self::Quote),
            _ => None,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Following => "following",
            Self::Profile => "profile",
            Self::Thread => "thread",
            Self::Quote => "quote",
        })
    }
}

/// A post predicted to have been seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impression {
    /// URI of the post.
    pub uri: String,
    /// Where it was seen.
    pub view: View,
}

/// What a user did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Top-level post.
    Post,
    /// Reply to another post.
    Reply,
    /// Quote of another post.
    Quote,
    /// Like.
    Like,
    /// Repost.
    Repost,
    /// Follow.
    Follow,
    /// Block.
    Block,
}

impl ActionKind {
    /// Whether this action proves the subject post was seen.
    #[must_use]
    pub fn is_engagement(self) -> bool {
        matches!(self, Self::Like | Self::Repost)
    }
}

/// One action taken during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Kind of action.
    pub kind: ActionKind,
    /// Time in Unix milliseconds.
    pub ts: i64,
    /// URI of the action's own record.
    pub uri: Option<String>,
    /// Subject post URI or user DID.
    pub subject: Option<String>,
}

/// A burst of activity by one user, separated from the next by an idle gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// `<did>-<number>`.
    pub id: String,
    /// The user.
    pub did: String,
    /// 1-based session number for this user.
    pub number: u32,
    /// Time of the first record.
    pub start_ms: i64,
    /// Time of the latest record.
    pub end_ms: i64,
    /// Predicted impressions, in the order they were inferred.
    pub impressions: Vec<Impression>,
    /// Actions taken.
    pub actions: Vec<Action>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl Session {
    /// Start a session at `start_ms`.
    #[must_use]
    pub fn new(did: &str, number: u32, start_ms: i64) -> Self {
        Self {
            id: format!("{did}-{number}"),
            did: did.to_string(),
            number,
            start_ms,
            end_ms: start_ms,
            impressions: Vec::new(),
            actions: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Record that `uri` was seen on `view`. Returns `false` if it already was.
    pub fn mark_seen(&mut self, uri: &str, view: View) -> bool {
        if !self.seen.insert(uri.to_string()) {
            return false;
        }
        self.impressions.push(Impression {
            uri: uri.to_string(),
            view,
        });
        true
    }

    /// Record several posts seen on the same view. Returns how many were new.
    pub fn mark_all_seen<'a>(&mut self, uris: impl IntoIterator<Item = &'a str>, view: View) -> usize {
        uris.into_iter()
            .filter(|uri| self.mark_seen(uri, view))
            .count()
    }

    /// Whether `uri` is among this session's impressions.
    #[must_use]
    pub fn has_seen(&self, uri: &str) -> bool {
        self.seen.contains(uri)
    }

    /// Subject URIs of likes and reposts.
    pub fn engaged_uris(&self) -> impl Iterator<Item = &str> {
        self.actions
            .iter()
            .filter(|a| a.kind.is_engagement())
            .filter_map(|a| a.subject.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let session = Session::new("did:plc:a", 3, 10);
        assert_eq!(session.id, "did:plc:a-3");
        assert_eq!(session.start_ms, 10);
        assert_eq!(session.end_ms, 10);
    }

    #[test]
    fn test_mark_seen_deduplicates() {
        let mut session = Session::new("did:plc:a", 1, 0);
        assert!(session.mark_seen("at://p/1", View::Following));
        assert!(!session.mark_seen("at://p/1", View::Profile));

        assert_eq!(session.impressions.len(), 1);
        assert_eq!(session.impressions[0].view, View::Following);
        assert!(session.has_seen("at://p/1"));
    }

    #[test]
    fn test_mark_all_seen_counts_new() {
        let mut session = Session::new("did:plc:a", 1, 0);
        session.mark_seen("b", View::Thread);

        let added = session.mark_all_seen(["a", "b", "c"], View::Following);
        assert_eq!(added, 2);
        let uris: Vec<_> = session.impressions.iter().map(|i| i.uri.as_str()).collect();
        assert_eq!(uris, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_engaged_uris() {
        let mut session = Session::new("did:plc:a", 1, 0);
        for (kind, subject) in [
            (ActionKind::Like, "x"),
            (ActionKind::Follow, "did:plc:b"),
            (ActionKind::Repost, "y"),
        ] {
            session.actions.push(Action {
                kind,
                ts: 0,
                uri: None,
                subject: Some(subject.to_string()),
            });
        }

        let engaged: Vec<_> = session.engaged_uris().collect();
        assert_eq!(engaged, vec!["x", "y"]);
    }

    #[test]
    fn test_view_round_trip_names() {
        for view in [View::Following, View::Profile, View::Thread, View::Quote] {
            assert_eq!(View::from_str_opt(&view.to_string()), Some(view));
        }
        assert_eq!(View::from_str_opt("search"), None);
    }
}
