//! Scoring predicted impressions against engagements.
//!
//! A like or repost proves its subject was seen, so the engaged posts of a
//! session are its ground truth. Precision is the share of predicted
//! impressions that were engaged with, recall the share of engaged posts that
//! were predicted.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::simulate::Session;

/// Score of one interactive session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionScore {
    /// Session id.
    pub session_id: String,
    /// Distinct engaged posts.
    pub truth: usize,
    /// Distinct predicted impressions.
    pub predicted: usize,
    /// Engaged posts that were predicted.
    pub hits: usize,
    /// `hits / predicted`, 0 when nothing was predicted.
    pub precision: f64,
    /// `hits / truth`.
    pub recall: f64,
}

/// Mean, population variance and median of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Distribution {
    /// Arithmetic mean.
    pub mean: f64,
    /// Population variance.
    pub variance: f64,
    /// Median.
    pub median: f64,
}

impl Distribution {
    /// Describe `values`. An empty sample is all zeros.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Self {
            mean,
            variance,
            median,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mean {:.4}, variance {:.4}, median {:.4}",
            self.mean, self.variance, self.median
        )
    }
}

/// Aggregate evaluation of a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Sessions replayed.
    pub sessions: usize,
    /// Sessions with enough engagement to score.
    pub interactive: usize,
    /// `interactive / sessions * 100`.
    pub interactive_percent: f64,
    /// Precision across interactive sessions.
    pub precision: Distribution,
    /// Recall across interactive sessions.
    pub recall: Distribution,
    /// Posts known to the replay, tombstones included.
    pub posts: usize,
    /// Posts replayed as tombstones.
    pub deleted_posts: usize,
    /// `deleted_posts / posts * 100`.
    pub deleted_percent: f64,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Score one session, or `None` if it has fewer than `min_interactions` engaged posts.
#[must_use]
pub fn score_session(session: &Session, min_interactions: usize) -> Option<SessionScore> {
    let truth: HashSet<&str> = session.engaged_uris().collect();
    if truth.is_empty() || truth.len() < min_interactions {
        return None;
    }
    let predicted: HashSet<&str> = session.impressions.iter().map(|i| i.uri.as_str()).collect();
    let hits = truth.intersection(&predicted).count();

    Some(SessionScore {
        session_id: session.id.clone(),
        truth: truth.len(),
        predicted: predicted.len(),
        hits,
        precision: ratio(hits, predicted.len()),
        recall: ratio(hits, truth.len()),
    })
}

/// Score every interactive session.
#[must_use]
pub fn score_sessions(sessions: &[Session], min_interactions: usize) -> Vec<SessionScore> {
    sessions
        .iter()
        .filter_map(|s| score_session(s, min_interactions))
        .collect()
}

/// Summarize `sessions`, with `deleted_posts` out of `posts` known to the replay.
#[must_use]
pub fn evaluate(
    sessions: &[Session],
    min_interactions: usize,
    posts: usize,
    deleted_posts: usize,
) -> Summary {
    let scores = score_sessions(sessions, min_interactions);
    summarize(sessions.len(), &scores, posts, deleted_posts)
}

/// Build a summary from precomputed scores.
#[must_use]
pub fn summarize(
    sessions: usize,
    scores: &[SessionScore],
    posts: usize,
    deleted_posts: usize,
) -> Summary {
    let precision: Vec<f64> = scores.iter().map(|s| s.precision).collect();
    let recall: Vec<f64> = scores.iter().map(|s| s.recall).collect();

    Summary {
        sessions,
        interactive: scores.len(),
        interactive_percent: ratio(scores.len(), sessions) * 100.0,
        precision: Distribution::of(&precision),
        recall: Distribution::of(&recall),
        posts,
        deleted_posts,
        deleted_percent: ratio(deleted_posts, posts) * 100.0,
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Sessions:      {} ({} interactive, {:.1}%)",
            self.sessions, self.interactive, self.interactive_percent
        )?;
        writeln!(f, "Precision:     {}", self.precision)?;
        writeln!(f, "Recall:        {}", self.recall)?;
        write!(
            f,
            "Deleted posts: {} of {} ({:.2}%)",
            self.deleted_posts, self.posts, self.deleted_percent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{Action, ActionKind, View};

    fn session(id: u32, seen: &[&str], liked: &[&str]) -> Session {
        let mut session = Session::new("did:plc:a", id, 0);
        session.mark_all_seen(seen.iter().copied(), View::Following);
        for uri in liked {
            session.actions.push(Action {
                kind: ActionKind::Like,
                ts: 0,
                uri: None,
                subject: Some((*uri).to_string()),
            });
        }
        session
    }

    #[test]
    fn test_distribution() {
        let d = Distribution::of(&[1.0, 2.0, 3.0, 4.0]);
        assert!((d.mean - 2.5).abs() < 1e-9);
        assert!((d.variance - 1.25).abs() < 1e-9);
        assert!((d.median - 2.5).abs() < 1e-9);

        let odd = Distribution::of(&[5.0, 1.0, 3.0]);
        assert!((odd.median - 3.0).abs() < 1e-9);

        assert_eq!(Distribution::of(&[]), Distribution::default());
    }

    #[test]
    fn test_score_session() {
        let s = session(1, &["a", "b", "c", "d"], &["b", "x"]);
        let score = score_session(&s, 1).unwrap();
        assert_eq!(score.truth, 2);
        assert_eq!(score.predicted, 4);
        assert_eq!(score.hits, 1);
        assert!((score.precision - 0.25).abs() < 1e-9);
        assert!((score.recall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_score_session_no_predictions() {
        let s = session(1, &[], &["x"]);
        let score = score_session(&s, 1).unwrap();
        assert!(score.precision.abs() < 1e-9);
        assert!(score.recall.abs() < 1e-9);
    }

    #[test]
    fn test_non_interactive_sessions_skipped() {
        let quiet = session(1, &["a"], &[]);
        assert!(score_session(&quiet, 1).is_none());

        let one_like = session(2, &["a"], &["a"]);
        assert!(score_session(&one_like, 2).is_none());
        assert!(score_session(&one_like, 0).is_some());
    }

    #[test]
    fn test_repeated_likes_count_once() {
        let s = session(1, &["a"], &["a", "a"]);
        let score = score_session(&s, 2);
        assert!(score.is_none());
    }

    #[test]
    fn test_evaluate_summary() {
        let sessions = vec![
            session(1, &["a", "b"], &["a"]),
            session(2, &["c"], &["d"]),
            session(3, &["e"], &[]),
        ];
        let summary = evaluate(&sessions, 1, 200, 5);

        assert_eq!(summary.sessions, 3);
        assert_eq!(summary.interactive, 2);
        assert!((summary.interactive_percent - 200.0 / 3.0).abs() < 1e-9);
        assert!((summary.precision.mean - 0.25).abs() < 1e-9);
        assert!((summary.recall.mean - 0.5).abs() < 1e-9);
        assert!((summary.recall.variance - 0.25).abs() < 1e-9);
        assert!((summary.deleted_percent - 2.5).abs() < 1e-9);

        let text = summary.to_string();
        assert!(text.contains("2 interactive"));
        assert!(text.contains("Deleted posts: 5 of 200"));
    }

    #[test]
    fn test_evaluate_empty() {
        let summary = evaluate(&[], 1, 0, 0);
        assert_eq!(summary.interactive, 0);
        assert!(summary.interactive_percent.abs() < 1e-9);
        assert!(summary.deleted_percent.abs() < 1e-9);
    }
}
