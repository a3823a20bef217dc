// Ordering - display order of comments and replies

use std::cmp::Ordering;

use crate::entities::{AbstractComment, Comment, Reply};

/// A comment together with its vote tallies
#[derive(Debug, Clone)]
pub struct RankedComment {
    pub comment: Comment,
    pub up_votes: u64,
    pub down_votes: u64,
}

impl RankedComment {
    pub fn new(comment: Comment, up_votes: u64, down_votes: u64) -> Self {
        Self {
            comment,
            up_votes,
            down_votes,
        }
    }

    pub fn vote_differential(&self) -> i64 {
        self.up_votes as i64 - self.down_votes as i64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderingOptions {
    pub newest_first: bool,
    pub voting: bool,
}

/// Top-level order. With voting: vote differential then up votes, both
/// descending. Creation time follows in the configured direction and the id
/// breaks any remaining tie the same way.
pub fn compare_comments(a: &RankedComment, b: &RankedComment, options: OrderingOptions) -> Ordering {
    let by_votes = if options.voting {
        b.vote_differential()
            .cmp(&a.vote_differential())
            .then_with(|| b.up_votes.cmp(&a.up_votes))
    } else {
        Ordering::Equal
    };

    let chronological = a
        .comment
        .creation_date()
        .cmp(&b.comment.creation_date())
        .then_with(|| a.comment.id().cmp(&b.comment.id()));

    by_votes.then(if options.newest_first {
        chronological.reverse()
    } else {
        chronological
    })
}

pub fn sort_comments(comments: &mut [RankedComment], options: OrderingOptions) {
    comments.sort_by(|a, b| compare_comments(a, b, options));
}

/// Replies are always oldest first
pub fn sort_replies(replies: &mut [Reply]) {
    replies.sort_by(|a, b| {
        a.creation_date()
            .cmp(&b.creation_date())
            .then_with(|| a.id().cmp(&b.id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{timestamp_from_millis, EntityId, Namespace, Page, PageId, PageTitle, User, UserId};
    use crate::entities::EntityMeta;

    fn comment(id: i64, created_millis: i64) -> Comment {
        let page = Page::new(PageId(1), PageTitle::new(Namespace::MAIN, "Subject").unwrap());
        let created = timestamp_from_millis(created_millis).unwrap();
        Comment::new(
            EntityMeta::created_by(EntityId(id), User::new(UserId(1), "Alice"), created),
            format!("Comment {}", id),
            None,
            page,
        )
    }

    fn ids(ranked: &[RankedComment]) -> Vec<i64> {
        ranked.iter().map(|r| r.comment.id().value()).collect()
    }

    fn sample() -> Vec<RankedComment> {
        vec![
            // differential 1, 3 up
            RankedComment::new(comment(1, 1_000), 3, 2),
            // differential 1, 1 up
            RankedComment::new(comment(2, 2_000), 1, 0),
            // differential 2
            RankedComment::new(comment(3, 3_000), 2, 0),
        ]
    }

    #[test]
    fn test_chronological_order_without_voting() {
        let mut ranked = sample();
        sort_comments(&mut ranked, OrderingOptions::default());
        assert_eq!(ids(&ranked), vec![1, 2, 3]);

        sort_comments(
            &mut ranked,
            OrderingOptions {
                newest_first: true,
                voting: false,
            },
        );
        assert_eq!(ids(&ranked), vec![3, 2, 1]);
    }

    #[test]
    fn test_vote_tie_break_chain() {
        let options = OrderingOptions {
            newest_first: false,
            voting: true,
        };
        let mut ranked = sample();
        sort_comments(&mut ranked, options);
        assert_eq!(ids(&ranked), vec![3, 1, 2]);

        // repeated sorts are stable
        let mut again = sample();
        again.reverse();
        sort_comments(&mut again, options);
        assert_eq!(ids(&again), ids(&ranked));
    }

    #[test]
    fn test_equal_votes_fall_back_to_time_direction() {
        let mut ranked = vec![
            RankedComment::new(comment(1, 1_000), 1, 0),
            RankedComment::new(comment(2, 2_000), 1, 0),
        ];
        sort_comments(
            &mut ranked,
            OrderingOptions {
                newest_first: true,
                voting: true,
            },
        );
        assert_eq!(ids(&ranked), vec![2, 1]);
    }
}
