//! Turn projection for streaming speech-to-text.
//!
//! Upstream STT sockets report voice activity and interim hypotheses; the
//! gateway projects them onto numbered turns. A turn accumulates finalized
//! segments; interim text rides on top of the finals until it is either
//! finalized or replaced.

use crate::messages::response::StreamEvent;

#[derive(Debug, Default)]
pub(crate) struct TurnState {
    turn_index: u32,
    in_turn: bool,
    accumulated_finals: String,
    interim: String,
}

impl TurnState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn in_turn(&self) -> bool {
        self.in_turn
    }

    /// Open the next turn.
    pub(crate) fn begin(&mut self) -> StreamEvent {
        self.turn_index += 1;
        self.in_turn = true;
        self.accumulated_finals.clear();
        self.interim.clear();

        StreamEvent::TurnStart {
            turn_index: self.turn_index,
        }
    }

    /// Replace the interim hypothesis; the update carries finals + interim.
    pub(crate) fn interim(&mut self, text: &str) -> StreamEvent {
        self.interim = text.to_string();

        StreamEvent::TurnUpdate {
            turn_index: self.turn_index,
            text: format!("{}{}", self.accumulated_finals, self.interim),
        }
    }

    /// Promote a finalized segment onto the accumulated transcript.
    pub(crate) fn finalize(&mut self, text: &str) -> StreamEvent {
        self.accumulated_finals.push_str(text);
        self.interim.clear();

        StreamEvent::TurnUpdate {
            turn_index: self.turn_index,
            text: self.accumulated_finals.clone(),
        }
    }

    /// Close the turn; the end event carries the accumulated finals only.
    pub(crate) fn end(&mut self) -> StreamEvent {
        self.in_turn = false;

        StreamEvent::TurnEnd {
            turn_index: self.turn_index,
            text: self.accumulated_finals.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_increment_and_accumulate() {
        let mut state = TurnState::new();

        assert_eq!(state.begin(), StreamEvent::TurnStart { turn_index: 1 });
        assert!(state.in_turn());

        assert_eq!(
            state.interim("hel"),
            StreamEvent::TurnUpdate {
                turn_index: 1,
                text: "hel".into()
            }
        );

        assert_eq!(
            state.finalize("hello "),
            StreamEvent::TurnUpdate {
                turn_index: 1,
                text: "hello ".into()
            }
        );

        // Interim rides on top of the finals.
        assert_eq!(
            state.interim("wor"),
            StreamEvent::TurnUpdate {
                turn_index: 1,
                text: "hello wor".into()
            }
        );

        // The end event drops the unfinalized interim.
        assert_eq!(
            state.end(),
            StreamEvent::TurnEnd {
                turn_index: 1,
                text: "hello ".into()
            }
        );
        assert!(!state.in_turn());

        assert_eq!(state.begin(), StreamEvent::TurnStart { turn_index: 2 });
        assert_eq!(
            state.end(),
            StreamEvent::TurnEnd {
                turn_index: 2,
                text: String::new()
            }
        );
    }
}
