//! Monotonic sequence stamping for outgoing input commands.

use shared::protocol::InputPayload;

/// Hands out sequence numbers starting at 1, so 0 always means "nothing
/// acknowledged yet" on the server side.
#[derive(Debug, Default)]
pub struct InputSequencer {
    last_sequence: u32,
}

impl InputSequencer {
    pub fn new() -> Self {
        InputSequencer::default()
    }

    pub fn stamp(&mut self, payload: InputPayload) -> (u32, InputPayload) {
        self.last_sequence += 1;
        (self.last_sequence, payload)
    }

    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_start_at_one_and_increase() {
        let mut sequencer = InputSequencer::new();
        assert_eq!(sequencer.last_sequence(), 0);

        let (a, _) = sequencer.stamp(InputPayload::default());
        let (b, _) = sequencer.stamp(InputPayload::default());
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(sequencer.last_sequence(), 2);
    }
}
