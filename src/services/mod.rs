pub mod ability;
pub mod confidence;
pub mod fsrs;
pub mod partial_credit;
pub mod phase;
pub mod progress;
pub mod quiz_schedule;
pub mod topic_performance;
pub mod topic_selector;
