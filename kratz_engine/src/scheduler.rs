use std::collections::VecDeque;

use serde::Serialize;

/// One request to arm a script, posted by an input event. Requests are
/// consumed at the start of a scheduling pass, never mid-pass, so a script
/// armed while a pass is iterating does not run until the next pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArmRequest {
    pub script: u32,
    pub key: String,
    pub tick: u64,
}

/// Holds pending arm requests in delivery order. Input callbacks only ever
/// push here; the tick loop drains the queue at pass boundaries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArmQueue {
    pending: VecDeque<ArmRequest>,
    history: Vec<ArmRequest>,
}

impl ArmQueue {
    pub fn new() -> Self {
        ArmQueue {
            pending: VecDeque::new(),
            history: Vec::new(),
        }
    }

    pub fn post(&mut self, request: ArmRequest) {
        self.pending.push_back(request);
    }

    /// Removes every pending request, recording each in the history.
    pub fn drain(&mut self) -> Vec<ArmRequest> {
        let mut drained = Vec::with_capacity(self.pending.len());
        while let Some(request) = self.pending.pop_front() {
            self.history.push(request.clone());
            drained.push(request);
        }
        drained
    }

    pub fn peek(&self) -> Option<&ArmRequest> {
        self.pending.front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl ExactSizeIterator<Item = &ArmRequest> {
        self.pending.iter()
    }

    pub fn history(&self) -> &[ArmRequest] {
        &self.history
    }
}
