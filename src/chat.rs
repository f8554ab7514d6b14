use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::RoomError;
use crate::protocol::ChatMessage;

/// Per-room ordered chat log. Sequence numbers are assigned in apply order
/// (the room actor serializes appends), strictly increasing and gapless for
/// the room's lifetime. Only a bounded tail is retained for snapshots; this
/// is not a durable log.
pub struct ChatSequencer {
    room_id: String,
    next_seq: u64,
    last_assigned: Option<u64>,
    tail: VecDeque<ChatMessage>,
    tail_cap: usize,
}

impl ChatSequencer {
    pub fn new(room_id: String, tail_cap: usize) -> Self {
        Self {
            room_id,
            next_seq: 1,
            last_assigned: None,
            tail: VecDeque::new(),
            tail_cap,
        }
    }

    /// Assigns the next sequence number and records the message in the tail.
    /// A non-increasing assignment would mean the room's ordering guarantee
    /// is already broken, so it surfaces as a room-fatal fault instead of
    /// being papered over.
    pub fn append(
        &mut self,
        participant_id: Uuid,
        text: String,
        sent_at_ms: u64,
    ) -> Result<ChatMessage, RoomError> {
        let seq = self.next_seq;
        if let Some(last) = self.last_assigned {
            if seq <= last {
                return Err(RoomError::SequencerFault(format!(
                    "sequence {seq} not above last assigned {last}"
                )));
            }
        }
        self.next_seq = seq.checked_add(1).ok_or_else(|| {
            RoomError::SequencerFault("sequence counter exhausted".to_string())
        })?;
        self.last_assigned = Some(seq);

        let message = ChatMessage {
            id: Uuid::new_v4(),
            room_id: self.room_id.clone(),
            participant_id,
            text,
            seq,
            sent_at_ms,
        };
        self.tail.push_back(message.clone());
        while self.tail.len() > self.tail_cap {
            self.tail.pop_front();
        }
        Ok(message)
    }

    /// Recent messages, oldest first, for room snapshots.
    pub fn tail(&self) -> Vec<ChatMessage> {
        self.tail.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_strict_gapless_and_receipt_ordered() {
        let mut chat = ChatSequencer::new("101-202".into(), 200);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // Near-simultaneous sends apply in receipt order; every observer
        // sees the same n, n+1.
        let first = chat.append(a, "hi".into(), 1_000).unwrap();
        let second = chat.append(b, "hello".into(), 1_000).unwrap();
        let third = chat.append(a, "ready?".into(), 2_000).unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(third.seq, 3);
        assert_eq!(
            chat.tail().iter().map(|m| m.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn tail_is_bounded_but_sequences_keep_climbing() {
        let mut chat = ChatSequencer::new("101-202".into(), 3);
        let a = Uuid::new_v4();
        for i in 0..10 {
            chat.append(a, format!("msg {i}"), i).unwrap();
        }
        let tail = chat.tail();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![8, 9, 10]);
    }

    #[test]
    fn messages_carry_room_and_sender() {
        let mut chat = ChatSequencer::new("101-202".into(), 200);
        let a = Uuid::new_v4();
        let msg = chat.append(a, "hi".into(), 5_000).unwrap();
        assert_eq!(msg.room_id, "101-202");
        assert_eq!(msg.participant_id, a);
        assert_eq!(msg.sent_at_ms, 5_000);
    }
}
