//! Database module for the anonymous chat bot
//!
//! This module owns the connection pool, the additive schema migrations,
//! the interest taxonomy reconciliation and all data access operations.

pub mod messages;
pub mod migrations;
pub mod models;
pub mod operations;
pub mod profiles;
pub mod schema;
pub mod taxonomy;

pub use migrations::{MigrationReport, StepOutcome};
pub use models::{
    ActiveChat, ChatId, ChatPair, EndedChat, Gender, LookingFor, MediaContent, Message, MessageId,
    MessageKind, NewMessage, ProfileSetupState, ProfileUpdate, RatingKind, RatingSummary,
    SetupProgress, User, UserId, UserProfile,
};
pub use operations::{DbOperations, DbPoolStatus};
pub use taxonomy::{CanonicalInterest, ReconcileReport};
