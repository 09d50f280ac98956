//! Background workers.

pub mod queue_trigger;

pub use queue_trigger::{
    disposition_for, Disposition, QueueTrigger, QueueTriggerHandle, Settlement, TriggerStats,
};
