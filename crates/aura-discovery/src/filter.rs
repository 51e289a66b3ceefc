//! Self-message suppression
//!
//! Decides whether a decoded envelope reaches listeners, based only on the
//! sender's identifiers and this endpoint's own.

use crate::envelope::Envelope;
use crate::identity::{InstanceId, ProcessId};

/// Outcome of filtering one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Hand the envelope to listeners
    Deliver,
    /// Sent by another endpoint in this process
    DropSiblingInstance,
    /// Sent by this very endpoint
    DropOwnInstance,
}

impl FilterVerdict {
    /// Whether the envelope should be delivered
    pub fn is_deliver(self) -> bool {
        matches!(self, Self::Deliver)
    }
}

/// Identity-based filter owned by one endpoint
#[derive(Debug, Clone)]
pub struct SelfFilter {
    process_id: ProcessId,
    instance_id: InstanceId,
    ignore_process: bool,
    ignore_instance: bool,
}

impl SelfFilter {
    /// Create a filter for the endpoint identified by `process_id`/`instance_id`
    pub fn new(
        process_id: ProcessId,
        instance_id: InstanceId,
        ignore_process: bool,
        ignore_instance: bool,
    ) -> Self {
        Self {
            process_id,
            instance_id,
            ignore_process,
            ignore_instance,
        }
    }

    /// Classify an envelope.
    ///
    /// The sibling rule runs first and never matches this endpoint's own
    /// instance, so own loopback is governed by `ignore_instance` alone.
    pub fn verdict(&self, envelope: &Envelope) -> FilterVerdict {
        if self.ignore_process
            && envelope.pid == self.process_id
            && envelope.iid != self.instance_id
        {
            FilterVerdict::DropSiblingInstance
        } else if self.ignore_instance && envelope.iid == self.instance_id {
            FilterVerdict::DropOwnInstance
        } else {
            FilterVerdict::Deliver
        }
    }
}
