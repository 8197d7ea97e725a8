//! Request id ordering.

use crate::bosh::error::{BoshError, BoshResult};

/// Classification of an accepted request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// The next request in order.
    Next(u64),
    /// A resend of a recently answered request.
    Retransmission(u64),
}

/// Tracks the last accepted request id of one session.
///
/// Not synchronized; the owning session serializes access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSequencer {
    last_accepted: Option<u64>,
    window: u64,
}

impl RequestSequencer {
    /// Sequencer whose first observed rid becomes the base.
    pub fn new(window: u64) -> Self {
        Self {
            last_accepted: None,
            window,
        }
    }

    /// Sequencer that has already accepted `rid`.
    pub fn starting_at(rid: u64, window: u64) -> Self {
        Self {
            last_accepted: Some(rid),
            window,
        }
    }

    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }

    pub fn expected(&self) -> Option<u64> {
        self.last_accepted.and_then(|last| last.checked_add(1))
    }

    /// Validate `rid` and advance on success.
    ///
    /// Ids in `(last - window, last]` are retransmissions; anything older is
    /// over-activity, anything beyond `last + 1` is out of order.
    pub fn check(&mut self, rid: u64) -> BoshResult<Sequence> {
        let Some(last) = self.last_accepted else {
            self.last_accepted = Some(rid);
            return Ok(Sequence::Next(rid));
        };

        if Some(rid) == last.checked_add(1) {
            self.last_accepted = Some(rid);
            return Ok(Sequence::Next(rid));
        }

        if rid > last {
            return Err(BoshError::OutOfOrderRequest {
                expected: last.saturating_add(1),
                got: rid,
            });
        }

        if last - rid < self.window {
            Ok(Sequence::Retransmission(rid))
        } else {
            Err(BoshError::OverActivity {
                got: rid,
                last_accepted: last,
            })
        }
    }
}
