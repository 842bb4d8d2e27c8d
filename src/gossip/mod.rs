// Gossip module - HOW CONTENT SPREADS
// Push/pull/sync dissemination over any MessageSender

mod engine;

pub use engine::{GossipConfig, GossipEngine, GossipError, GossipEvent, GossipStats};
