//! Topic consistency engine.
//!
//! A library-level transactional engine for the Topic aggregate of a
//! discussion-forum backend: gap-free post numbering under concurrent
//! writers, idempotent recomputation of denormalized statistics, category
//! transitions with per-category counts and featured-topic caches, post
//! migration between topics, per-user topic state, and an invitation
//! workflow. Persistence is SQLite via sqlx; external concerns (identity,
//! rate limiting, job scheduling, notification delivery, text processing,
//! moderator-post authoring) are injected as trait objects.

pub mod category;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod external;
pub mod invites;
pub mod mover;
pub mod posters;
pub mod sequence;
pub mod stats;
pub mod status;
pub mod topic_state;

pub use config::EngineConfig;
pub use db::Database;
pub use engine::{Collaborators, TopicEngine};
pub use error::EngineError;
pub use invites::InviteOutcome;
pub use mover::{MoveDestination, MoveResult};
pub use posters::{PosterRole, PosterSummaryEntry};
pub use status::TopicStatus;
