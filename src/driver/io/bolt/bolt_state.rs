// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use log::debug;

use super::response::ResponseMessage;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub(crate) enum BoltState {
    Connected,
    Ready,
    Streaming,
    TxReady,
    // TxMaybeStreaming is a simplification.
    // The server transitions from TxStreaming to TxReady when *all* current
    // result streams have been consumed. This distinction is not necessary in
    // the driver and allows for much simpler code as the connection does not
    // have to track how many results are still active.
    TxMaybeStreaming,
    Failed,
}

#[derive(Debug)]
pub(crate) struct BoltStateTracker {
    version: (u8, u8),
    state: BoltState,
}

impl BoltStateTracker {
    pub(crate) fn new(version: (u8, u8)) -> Self {
        Self {
            version,
            state: BoltState::Connected,
        }
    }

    pub(crate) fn state(&self) -> BoltState {
        self.state
    }

    /// Apply a SUCCESS summary for `message`.
    /// A summary announcing more records (`has_more`) leaves the stream open
    /// and the state untouched; the caller checks for that.
    pub(crate) fn success(&mut self, message: ResponseMessage) {
        let next = self
            .transition(message)
            .unwrap_or_else(|| panic!("unexpected {message:?} SUCCESS in state {:?}", self.state));
        if next != self.state {
            debug!("bolt state: {:?} > {next:?} ({message:?})", self.state);
            self.state = next;
        }
    }

    pub(crate) fn failure(&mut self) {
        self.state = BoltState::Failed;
    }

    /// The legal state transitions; `None` marks a protocol violation.
    fn transition(&self, message: ResponseMessage) -> Option<BoltState> {
        use BoltState::*;
        use ResponseMessage as Msg;

        Some(match (self.state, message) {
            // authentication is carried by HELLO up to 5.0, by LOGON from 5.1
            (Connected, Msg::Hello) if self.version >= (5, 1) => Connected,
            (Connected, Msg::Hello) | (Connected, Msg::Logon) => Ready,
            (Ready, Msg::Logoff) => Connected,
            // RESET recovers from anything once authenticated
            (Connected, Msg::Reset) => return None,
            (_, Msg::Reset) => Ready,
            (Ready, Msg::Run) => Streaming,
            (TxReady | TxMaybeStreaming, Msg::Run) => TxMaybeStreaming,
            (Streaming, Msg::Pull | Msg::Discard) => Ready,
            (TxMaybeStreaming, Msg::Pull | Msg::Discard) => TxMaybeStreaming,
            (Ready, Msg::Begin) => TxReady,
            (TxReady | TxMaybeStreaming, Msg::Commit | Msg::Rollback) => Ready,
            (Ready, Msg::Route | Msg::Telemetry) => Ready,
            (Failed, Msg::Hello | Msg::Logon) => Failed,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(version: (u8, u8), messages: &[ResponseMessage]) -> BoltStateTracker {
        let mut tracker = BoltStateTracker::new(version);
        for message in messages {
            tracker.success(*message);
        }
        tracker
    }

    #[test]
    fn hello_makes_ready_before_5_1() {
        for version in [(4, 4), (5, 0)] {
            let tracker = tracker(version, &[ResponseMessage::Hello]);
            assert_eq!(tracker.state(), BoltState::Ready);
        }
    }

    #[test]
    fn hello_requires_logon_from_5_1() {
        let mut tracker = tracker((5, 1), &[ResponseMessage::Hello]);
        assert_eq!(tracker.state(), BoltState::Connected);
        tracker.success(ResponseMessage::Logon);
        assert_eq!(tracker.state(), BoltState::Ready);
        tracker.success(ResponseMessage::Logoff);
        assert_eq!(tracker.state(), BoltState::Connected);
    }

    #[test]
    fn auto_commit_stream_cycle() {
        let mut tracker = tracker((5, 0), &[ResponseMessage::Hello, ResponseMessage::Run]);
        assert_eq!(tracker.state(), BoltState::Streaming);
        // PULL with has_more doesn't reach the tracker
        tracker.success(ResponseMessage::Pull);
        assert_eq!(tracker.state(), BoltState::Ready);
    }

    #[test]
    fn transaction_cycle() {
        let mut tracker = tracker((5, 0), &[ResponseMessage::Hello, ResponseMessage::Begin]);
        assert_eq!(tracker.state(), BoltState::TxReady);
        tracker.success(ResponseMessage::Run);
        assert_eq!(tracker.state(), BoltState::TxMaybeStreaming);
        tracker.success(ResponseMessage::Discard);
        assert_eq!(tracker.state(), BoltState::TxMaybeStreaming);
        tracker.success(ResponseMessage::Commit);
        assert_eq!(tracker.state(), BoltState::Ready);
    }

    #[test]
    fn failure_then_reset_recovers() {
        let mut tracker = tracker((5, 0), &[ResponseMessage::Hello, ResponseMessage::Run]);
        tracker.failure();
        assert_eq!(tracker.state(), BoltState::Failed);
        tracker.success(ResponseMessage::Reset);
        assert_eq!(tracker.state(), BoltState::Ready);
    }

    #[test]
    #[should_panic(expected = "unexpected")]
    fn illegal_transition_panics() {
        tracker((5, 0), &[ResponseMessage::Hello, ResponseMessage::Commit]);
    }
}
