//! Bounded buffer for votes that arrive before their proposal
//!
//! Buckets are keyed by proposal id and keep votes in arrival order. A bucket
//! expires `ttl` after its first vote was buffered; when the number of buckets
//! hits its limit, the bucket buffered earliest is evicted to make room.

use nostr_sdk::prelude::*;
use std::collections::HashMap;

use super::types::{PendingVoteLimits, ProjectionError};

#[derive(Debug, Clone)]
struct PendingBucket {
    first_buffered_at: Timestamp,
    votes: Vec<Event>,
}

#[derive(Debug, Clone, Default)]
pub struct PendingVoteBuffer {
    limits: PendingVoteLimits,
    buckets: HashMap<EventId, PendingBucket>,
}

impl PendingVoteBuffer {
    pub fn new(limits: PendingVoteLimits) -> Self {
        Self {
            limits,
            buckets: HashMap::new(),
        }
    }

    /// Buffer a vote for `proposal_id`, returning any votes evicted to make room
    pub fn push(
        &mut self,
        proposal_id: EventId,
        vote: Event,
        now: Timestamp,
    ) -> Result<Vec<Event>, ProjectionError> {
        if let Some(bucket) = self.buckets.get_mut(&proposal_id) {
            if bucket.votes.len() >= self.limits.max_votes_per_proposal {
                return Err(ProjectionError::PendingBufferFull(proposal_id));
            }
            bucket.votes.push(vote);
            return Ok(Vec::new());
        }

        if self.limits.max_proposals == 0 || self.limits.max_votes_per_proposal == 0 {
            return Err(ProjectionError::PendingBufferFull(proposal_id));
        }

        let mut evicted = Vec::new();
        while self.buckets.len() >= self.limits.max_proposals {
            let Some(oldest) = self.oldest_bucket() else {
                break;
            };
            if let Some(bucket) = self.buckets.remove(&oldest) {
                tracing::warn!(
                    target: "agora::projection::pending_votes",
                    "Pending vote buffer full, evicting {} votes for proposal {}",
                    bucket.votes.len(),
                    oldest.to_hex()
                );
                evicted.extend(bucket.votes);
            }
        }

        self.buckets.insert(
            proposal_id,
            PendingBucket {
                first_buffered_at: now,
                votes: vec![vote],
            },
        );
        Ok(evicted)
    }

    /// Remove and return the votes buffered for `proposal_id`, oldest first
    pub fn take(&mut self, proposal_id: &EventId) -> Vec<Event> {
        self.buckets
            .remove(proposal_id)
            .map(|bucket| bucket.votes)
            .unwrap_or_default()
    }

    /// Drop every bucket older than the configured ttl, returning the dropped votes
    pub fn evict_expired(&mut self, now: Timestamp) -> Vec<Event> {
        let ttl = self.limits.ttl.as_secs();
        let expired: Vec<EventId> = self
            .buckets
            .iter()
            .filter(|(_, bucket)| {
                now.as_u64().saturating_sub(bucket.first_buffered_at.as_u64()) >= ttl
            })
            .map(|(proposal_id, _)| *proposal_id)
            .collect();

        let mut evicted = Vec::new();
        for proposal_id in expired {
            if let Some(bucket) = self.buckets.remove(&proposal_id) {
                tracing::warn!(
                    target: "agora::projection::pending_votes",
                    "Proposal {} never arrived, expiring {} buffered votes",
                    proposal_id.to_hex(),
                    bucket.votes.len()
                );
                evicted.extend(bucket.votes);
            }
        }
        evicted
    }

    /// Total number of buffered votes
    pub fn len(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.votes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn votes_for(&self, proposal_id: &EventId) -> usize {
        self.buckets
            .get(proposal_id)
            .map(|bucket| bucket.votes.len())
            .unwrap_or(0)
    }

    pub fn proposal_count(&self) -> usize {
        self.buckets.len()
    }

    fn oldest_bucket(&self) -> Option<EventId> {
        self.buckets
            .iter()
            .min_by(|(a_id, a), (b_id, b)| {
                a.first_buffered_at
                    .cmp(&b.first_buffered_at)
                    .then(a_id.cmp(b_id))
            })
            .map(|(proposal_id, _)| *proposal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn vote(proposal_id: &EventId) -> Event {
        EventBuilder::new(Kind::from(super::super::kinds::VOTE), "0")
            .tag(Tag::parse(vec!["e".to_string(), proposal_id.to_hex()]).unwrap())
            .sign_with_keys(&Keys::generate())
            .unwrap()
    }

    fn proposal_id() -> EventId {
        EventBuilder::text_note("proposal")
            .sign_with_keys(&Keys::generate())
            .unwrap()
            .id
    }

    fn limits(max_votes_per_proposal: usize, max_proposals: usize, ttl_secs: u64) -> PendingVoteLimits {
        PendingVoteLimits {
            max_votes_per_proposal,
            max_proposals,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    #[test]
    fn test_take_returns_arrival_order() {
        let mut buffer = PendingVoteBuffer::default();
        let p1 = proposal_id();
        let first = vote(&p1);
        let second = vote(&p1);

        buffer.push(p1, first.clone(), Timestamp::from(10)).unwrap();
        buffer.push(p1, second.clone(), Timestamp::from(11)).unwrap();
        assert_eq!(buffer.len(), 2);

        let taken = buffer.take(&p1);
        assert_eq!(taken.iter().map(|e| e.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        assert!(buffer.is_empty());
        assert!(buffer.take(&p1).is_empty());
    }

    #[test]
    fn test_full_bucket_rejects_votes() {
        let mut buffer = PendingVoteBuffer::new(limits(1, 10, 3600));
        let p1 = proposal_id();

        buffer.push(p1, vote(&p1), Timestamp::from(10)).unwrap();
        let result = buffer.push(p1, vote(&p1), Timestamp::from(11));

        assert!(matches!(result, Err(ProjectionError::PendingBufferFull(id)) if id == p1));
        assert_eq!(buffer.votes_for(&p1), 1);
    }

    #[test]
    fn test_oldest_bucket_evicted_at_capacity() {
        let mut buffer = PendingVoteBuffer::new(limits(10, 2, 3600));
        let (p1, p2, p3) = (proposal_id(), proposal_id(), proposal_id());
        let oldest_vote = vote(&p1);

        buffer.push(p1, oldest_vote.clone(), Timestamp::from(10)).unwrap();
        buffer.push(p2, vote(&p2), Timestamp::from(20)).unwrap();
        let evicted = buffer.push(p3, vote(&p3), Timestamp::from(30)).unwrap();

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, oldest_vote.id);
        assert_eq!(buffer.proposal_count(), 2);
        assert_eq!(buffer.votes_for(&p1), 0);
    }

    #[test]
    fn test_expired_buckets_are_evicted() {
        let mut buffer = PendingVoteBuffer::new(limits(10, 10, 100));
        let (p1, p2) = (proposal_id(), proposal_id());

        buffer.push(p1, vote(&p1), Timestamp::from(1_000)).unwrap();
        buffer.push(p2, vote(&p2), Timestamp::from(1_050)).unwrap();

        assert!(buffer.evict_expired(Timestamp::from(1_099)).is_empty());

        let evicted = buffer.evict_expired(Timestamp::from(1_100));
        assert_eq!(evicted.len(), 1);
        assert_eq!(buffer.votes_for(&p1), 0);
        assert_eq!(buffer.votes_for(&p2), 1);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let mut buffer = PendingVoteBuffer::new(limits(10, 0, 100));
        let p1 = proposal_id();
        assert!(buffer.push(p1, vote(&p1), Timestamp::from(1)).is_err());
        assert!(buffer.is_empty());
    }
}
