use crate::model::HandoffPayload;

/// Carries the reviewed selection from discovery to removal.
///
/// Holds at most one payload; a newer `offer` replaces an unconsumed one.
#[derive(Debug, Default)]
pub struct HandoffContext {
    pending: Option<HandoffPayload>,
}

impl HandoffContext {
    pub fn offer(&mut self, payload: HandoffPayload) -> Option<HandoffPayload> {
        let replaced = self.pending.replace(payload);
        if replaced.is_some() {
            tracing::debug!("pending handoff superseded");
        }
        replaced
    }

    /// Consume the pending payload. A second call returns `None`.
    pub fn take(&mut self) -> Option<HandoffPayload> {
        self.pending.take()
    }

    pub fn peek(&self) -> Option<&HandoffPayload> {
        self.pending.as_ref()
    }
}
