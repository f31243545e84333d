//! Per-channel debounce state for inbound replies.
//!
//! A channel moves `Idle -> Collecting -> Flushing -> Idle`. The flush
//! deadline is fixed when the first qualifying reply of a batch arrives;
//! later replies join the batch without moving it. That holds for replies
//! arriving mid-flush too: their window counts from the first of them.

use std::time::Duration;
use tokio::time::Instant;

use relay_transport::{InboundMessage, MessageHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPhase {
    Idle,
    Collecting { flush_at: Instant },
    /// A batch is being forwarded. New replies are buffered for the next
    /// window, which opened when the first of them arrived.
    Flushing { pending_since: Option<Instant> },
}

#[derive(Debug, Clone)]
pub struct ChannelReplyState {
    phase: ReplyPhase,
    buffer: Vec<MessageHandle>,
    last_sent: Option<i64>,
}

impl Default for ChannelReplyState {
    fn default() -> Self {
        Self {
            phase: ReplyPhase::Idle,
            buffer: Vec::new(),
            last_sent: None,
        }
    }
}

impl ChannelReplyState {
    pub fn phase(&self) -> ReplyPhase {
        self.phase
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_sent(&self) -> Option<i64> {
        self.last_sent
    }

    /// Replies to `message_id` qualify from now on.
    pub fn expect_reply(&mut self, message_id: i64) {
        self.last_sent = Some(message_id);
    }

    /// A reply to our last message on this channel, or anything a bot says.
    pub fn qualifies(&self, message: &InboundMessage) -> bool {
        message.is_automated_sender
            || matches!((message.reply_to_id, self.last_sent), (Some(reply), Some(sent)) if reply == sent)
    }

    /// Buffer `message` if it qualifies. Returns whether it was buffered.
    pub fn accept(&mut self, message: &InboundMessage, now: Instant, window: Duration) -> bool {
        if !self.qualifies(message) {
            return false;
        }
        self.buffer.push(message.handle);
        match self.phase {
            ReplyPhase::Idle => {
                self.phase = ReplyPhase::Collecting {
                    flush_at: now + window,
                };
            }
            ReplyPhase::Flushing {
                pending_since: None,
            } => {
                self.phase = ReplyPhase::Flushing {
                    pending_since: Some(now),
                };
            }
            _ => {}
        }
        true
    }

    pub fn flush_at(&self) -> Option<Instant> {
        match self.phase {
            ReplyPhase::Collecting { flush_at } => Some(flush_at),
            _ => None,
        }
    }

    /// Take the batch if its deadline passed, entering `Flushing`.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<MessageHandle>> {
        match self.phase {
            ReplyPhase::Collecting { flush_at } if flush_at <= now => {
                let batch = std::mem::take(&mut self.buffer);
                if batch.is_empty() {
                    self.phase = ReplyPhase::Idle;
                    return None;
                }
                self.phase = ReplyPhase::Flushing {
                    pending_since: None,
                };
                Some(batch)
            }
            _ => None,
        }
    }

    /// Leave `Flushing`. Replies buffered meanwhile keep the window opened
    /// by the first of them, which may already be due.
    pub fn finish_flush(&mut self, window: Duration) {
        let ReplyPhase::Flushing { pending_since } = self.phase else {
            return;
        };
        self.phase = match pending_since {
            Some(first) if !self.buffer.is_empty() => ReplyPhase::Collecting {
                flush_at: first + window,
            },
            _ => ReplyPhase::Idle,
        };
    }

    /// Drop buffered replies without forwarding. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.phase = ReplyPhase::Idle;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(40);

    fn reply(message_id: i64, to: i64) -> InboundMessage {
        InboundMessage::new(-100, message_id).replying_to(to)
    }

    #[test]
    fn ignores_unrelated_messages() {
        let mut state = ChannelReplyState::default();
        state.expect_reply(7);
        let now = Instant::now();

        assert!(!state.accept(&InboundMessage::new(-100, 1), now, WINDOW));
        assert!(!state.accept(&reply(2, 6), now, WINDOW));
        assert_eq!(state.phase(), ReplyPhase::Idle);
        assert_eq!(state.buffered(), 0);
    }

    #[test]
    fn reply_without_prior_send_does_not_qualify() {
        let state = ChannelReplyState::default();
        assert!(!state.qualifies(&reply(2, 0)));
    }

    #[test]
    fn bot_messages_always_qualify() {
        let state = ChannelReplyState::default();
        assert!(state.qualifies(&InboundMessage::new(-100, 3).from_bot()));
    }

    #[test]
    fn deadline_is_fixed_from_first_reply() {
        let mut state = ChannelReplyState::default();
        state.expect_reply(7);
        let start = Instant::now();

        assert!(state.accept(&reply(10, 7), start, WINDOW));
        assert!(state.accept(&reply(11, 7), start + Duration::from_secs(5), WINDOW));
        assert!(state.accept(&reply(12, 7), start + Duration::from_secs(10), WINDOW));

        assert_eq!(state.flush_at(), Some(start + WINDOW));
        assert!(state.take_due(start + Duration::from_secs(39)).is_none());

        let batch = state.take_due(start + WINDOW).unwrap();
        let ids: Vec<i64> = batch.iter().map(|handle| handle.message_id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert!(matches!(state.phase(), ReplyPhase::Flushing { .. }));
    }

    #[test]
    fn replies_during_flush_open_next_window() {
        let mut state = ChannelReplyState::default();
        state.expect_reply(7);
        let start = Instant::now();
        state.accept(&reply(10, 7), start, WINDOW);
        state.take_due(start + WINDOW).unwrap();

        let during = start + WINDOW + Duration::from_secs(1);
        assert!(state.accept(&reply(11, 7), during, WINDOW));
        assert!(state.accept(&reply(12, 7), during + Duration::from_secs(1), WINDOW));
        assert_eq!(
            state.phase(),
            ReplyPhase::Flushing {
                pending_since: Some(during)
            }
        );

        state.finish_flush(WINDOW);
        assert_eq!(state.flush_at(), Some(during + WINDOW));
        assert_eq!(state.buffered(), 2);
    }

    #[test]
    fn window_opened_during_a_long_flush_is_due_when_it_ends() {
        let mut state = ChannelReplyState::default();
        let start = Instant::now();
        state.accept(&InboundMessage::new(-100, 1).from_bot(), start, WINDOW);
        state.take_due(start + WINDOW).unwrap();

        let during = start + WINDOW + Duration::from_secs(1);
        state.accept(&InboundMessage::new(-100, 2).from_bot(), during, WINDOW);
        state.finish_flush(WINDOW);

        let finished = during + WINDOW + Duration::from_secs(5);
        let batch = state.take_due(finished).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn finished_flush_with_empty_buffer_goes_idle() {
        let mut state = ChannelReplyState::default();
        let start = Instant::now();
        state.accept(&InboundMessage::new(-100, 1).from_bot(), start, WINDOW);
        state.take_due(start + WINDOW).unwrap();

        state.finish_flush(WINDOW);

        assert_eq!(state.phase(), ReplyPhase::Idle);
    }

    #[test]
    fn discard_clears_buffer_and_deadline() {
        let mut state = ChannelReplyState::default();
        let start = Instant::now();
        state.accept(&InboundMessage::new(-100, 1).from_bot(), start, WINDOW);
        state.accept(&InboundMessage::new(-100, 2).from_bot(), start, WINDOW);

        assert_eq!(state.discard(), 2);
        assert_eq!(state.flush_at(), None);
        assert!(state.take_due(start + WINDOW).is_none());
    }
}
