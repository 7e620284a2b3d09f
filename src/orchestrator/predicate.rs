//! Completion predicates over the accumulated response list.

use crate::models::envelope::Envelope;

/// Decides when enough responses have arrived to end a session successfully.
///
/// Evaluated after every decoded envelope with the full list received so
/// far, in arrival order. Any `Fn(&[Envelope]) -> bool` closure qualifies.
pub trait CompletionPredicate: Send + Sync {
    /// `true` once the session should complete.
    fn is_complete(&self, responses: &[Envelope]) -> bool;
}

impl<F> CompletionPredicate for F
where
    F: Fn(&[Envelope]) -> bool + Send + Sync,
{
    fn is_complete(&self, responses: &[Envelope]) -> bool {
        self(responses)
    }
}

/// Complete once a response with this id has been received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseWithId(pub i64);

impl CompletionPredicate for ResponseWithId {
    fn is_complete(&self, responses: &[Envelope]) -> bool {
        responses
            .iter()
            .any(|env| env.is_response() && env.id == Some(self.0))
    }
}

/// Complete once every listed id has a response, in any order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllResponded {
    ids: Vec<i64>,
}

impl AllResponded {
    /// Wait for every request in `requests` that carries an id.
    #[must_use]
    pub fn from_requests(requests: &[Envelope]) -> Self {
        Self {
            ids: requests
                .iter()
                .filter(|env| env.is_request())
                .filter_map(|env| env.id)
                .collect(),
        }
    }
}

impl CompletionPredicate for AllResponded {
    fn is_complete(&self, responses: &[Envelope]) -> bool {
        self.ids
            .iter()
            .all(|id| ResponseWithId(*id).is_complete(responses))
    }
}

/// Never complete; the session ends on exit, timeout, or cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Never;

impl CompletionPredicate for Never {
    fn is_complete(&self, _responses: &[Envelope]) -> bool {
        false
    }
}

/// Complete when the last request carrying an id has been answered.
///
/// Falls back to [`Never`] when no request has an id.
#[must_use]
pub fn last_request_answered(requests: &[Envelope]) -> Box<dyn CompletionPredicate> {
    match requests.iter().rev().find_map(|env| env.id) {
        Some(id) => Box::new(ResponseWithId(id)),
        None => Box::new(Never),
    }
}
