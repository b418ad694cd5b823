use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use reactor::ExpireQueue;
use tracing::debug;

use crate::wire::{rcode, Message, Question, Record};

/// How long an unanswered upstream query stays alive.
pub const PENDING_TTL: Duration = Duration::from_secs(20);

/// Negative-caching window for NAME_ERROR answers.
pub const NEGATIVE_TTL: Duration = Duration::from_secs(60);

/// Upper bound on how long any answer is cached.
pub const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A client waiting for an upstream answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub id: u16,
    pub client: SocketAddrV4,
}

/// State of one cache entry: either an answer, or the upstream query that
/// will produce it.
#[derive(Debug)]
pub enum EntryState {
    Pending {
        outgoing_id: u16,
        waiting: Vec<IncomingRequest>,
    },
    Ready {
        response_code: u8,
        answers: Vec<Record>,
        authority: Vec<Record>,
        additional: Vec<Record>,
    },
}

#[derive(Debug)]
pub struct Entry {
    pub question: Question,
    pub state: EntryState,
}

/// The resolver cache: at most one [`Entry`] per [`Question`].
pub struct Cache {
    entries: HashMap<Question, Entry>,
    expiry: ExpireQueue<Question>,
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            entries: HashMap::new(),
            expiry: ExpireQueue::new(),
        }
    }

    pub fn get(&self, question: &Question) -> Option<&Entry> {
        self.entries.get(question)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create a pending entry for a question that just went upstream.
    pub fn insert_pending(
        &mut self,
        question: Question,
        outgoing_id: u16,
        first_waiter: IncomingRequest,
        now: Instant,
    ) {
        self.expiry.update(question.clone(), now + PENDING_TTL);
        self.entries.insert(
            question.clone(),
            Entry {
                question,
                state: EntryState::Pending {
                    outgoing_id,
                    waiting: vec![first_waiter],
                },
            },
        );
    }

    /// Queue another client behind an in-flight question, refreshing the
    /// pending deadline. Duplicate requests are dropped.
    pub fn add_waiter(&mut self, question: &Question, request: IncomingRequest, now: Instant) {
        let Some(entry) = self.entries.get_mut(question) else {
            return;
        };
        if let EntryState::Pending { waiting, .. } = &mut entry.state {
            if waiting.contains(&request) {
                return;
            }
            waiting.push(request);
            self.expiry.update(question.clone(), now + PENDING_TTL);
        }
    }

    /// Resolve a pending entry with an upstream answer.
    ///
    /// Returns the clients that were waiting, in arrival order, or `None`
    /// when the answer doesn't match a pending entry with that id. The
    /// entry's deadline becomes the earliest record expiration, bounded by
    /// the negative-caching window for NAME_ERROR and by [`MAX_TTL`].
    pub fn resolve(
        &mut self,
        message: Message,
        now: Instant,
    ) -> Option<(Vec<IncomingRequest>, &Entry)> {
        let entry = self.entries.get_mut(&message.question)?;
        let waiting = match &mut entry.state {
            EntryState::Ready { .. } => {
                debug!(question = %message.question, "answer for a ready entry");
                return None;
            }
            EntryState::Pending { outgoing_id, waiting } => {
                if *outgoing_id != message.header.id {
                    debug!(
                        got = message.header.id,
                        expected = *outgoing_id,
                        "answer with a mismatched id"
                    );
                    return None;
                }
                std::mem::take(waiting)
            }
        };

        let response_code = message.header.response_code();
        let mut deadline = now
            + if response_code == rcode::NAME_ERROR {
                NEGATIVE_TTL
            } else {
                MAX_TTL
            };
        for record in message
            .answers
            .iter()
            .chain(&message.authority)
            .chain(&message.additional)
        {
            if let Some(expires) = record.expires {
                deadline = deadline.min(expires);
            }
        }

        entry.state = EntryState::Ready {
            response_code,
            answers: message.answers,
            authority: message.authority,
            additional: message.additional,
        };
        self.expiry.update(message.question.clone(), deadline);
        Some((waiting, self.entries.get(&message.question).unwrap()))
    }

    /// Drop entries whose deadline has passed. Waiting clients of expired
    /// pending entries are silently dropped; they will retry.
    pub fn expire(&mut self, now: Instant) {
        while let Some(question) = self.expiry.pop_expired(now) {
            debug!(%question, "expiring cache entry");
            self.entries.remove(&question);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.expiry.next_deadline()
    }

    /// Entries in expiration order, for the status table.
    pub fn iter_by_expiration(&self) -> impl Iterator<Item = (Instant, &Question)> {
        self.expiry.iter()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Header;
    use std::net::Ipv4Addr;

    fn waiter(id: u16, port: u16) -> IncomingRequest {
        IncomingRequest {
            id,
            client: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 7), port),
        }
    }

    fn answer(question: &Question, outgoing_id: u16, ttl_secs: u64, now: Instant) -> Message {
        Message {
            header: Header {
                id: outgoing_id,
                flags: 0x8180,
                question_count: 1,
                answer_count: 1,
                ..Header::default()
            },
            question: question.clone(),
            answers: vec![Record {
                name: question.name.clone(),
                rtype: crate::wire::rtype::A,
                rclass: crate::wire::rclass::IN,
                expires: Some(now + Duration::from_secs(ttl_secs)),
                data: vec![93, 184, 216, 34],
            }],
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    #[test]
    fn pending_resolves_in_arrival_order() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let question = Question::a("example.com");

        cache.insert_pending(question.clone(), 0x4000, waiter(1, 1000), now);
        cache.add_waiter(&question, waiter(2, 2000), now);
        cache.add_waiter(&question, waiter(2, 2000), now); // duplicate
        cache.add_waiter(&question, waiter(3, 3000), now);

        let (waiting, entry) = cache
            .resolve(answer(&question, 0x4000, 60, now), now)
            .unwrap();
        assert_eq!(
            waiting,
            vec![waiter(1, 1000), waiter(2, 2000), waiter(3, 3000)]
        );
        assert!(matches!(entry.state, EntryState::Ready { .. }));
    }

    #[test]
    fn mismatched_id_is_ignored() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let question = Question::a("example.com");
        cache.insert_pending(question.clone(), 0x4000, waiter(1, 1000), now);
        assert!(cache.resolve(answer(&question, 0x4001, 60, now), now).is_none());
        // The entry stays pending.
        assert!(matches!(
            cache.get(&question).unwrap().state,
            EntryState::Pending { .. }
        ));
    }

    #[test]
    fn unknown_question_is_ignored() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let question = Question::a("example.com");
        assert!(cache.resolve(answer(&question, 1, 60, now), now).is_none());
    }

    #[test]
    fn ready_deadline_is_min_record_ttl() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let question = Question::a("example.com");
        cache.insert_pending(question.clone(), 7, waiter(1, 1000), now);
        cache.resolve(answer(&question, 7, 60, now), now).unwrap();

        let deadline = cache.next_deadline().unwrap();
        assert!(deadline <= now + Duration::from_secs(61));
        assert!(deadline > now + Duration::from_secs(59));
    }

    #[test]
    fn pending_entries_expire_and_drop_waiters() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let question = Question::a("example.com");
        cache.insert_pending(question.clone(), 7, waiter(1, 1000), now);

        cache.expire(now + PENDING_TTL + Duration::from_secs(1));
        assert!(cache.get(&question).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn name_error_uses_negative_ttl() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let question = Question::a("nope.example.com");
        cache.insert_pending(question.clone(), 7, waiter(1, 1000), now);

        let mut message = answer(&question, 7, 60, now);
        message.header.flags |= rcode::NAME_ERROR as u16;
        message.answers.clear();
        cache.resolve(message, now).unwrap();
        assert_eq!(cache.next_deadline(), Some(now + NEGATIVE_TTL));
    }
}
