pub mod chunk;
pub mod eviction;
pub mod manager;
pub mod message;
pub mod truncate;

pub use manager::ConversationManager;
pub use message::{Block, Message, Role};
pub use truncate::{Tier, TierBudget};
