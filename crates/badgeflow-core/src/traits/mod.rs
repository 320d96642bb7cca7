//! Collaborator traits: the narrow seams through which the engine reaches
//! storage, AI services and publishing.

pub mod generation;
pub mod oracle;
pub mod store;

pub use generation::{BaseUrlBuilder, ContentPublisher, GenerationAdapter, UrlBuilder};
pub use oracle::{QualificationOracle, SpamClassifier};
pub use store::{AchievementStore, AutomationStore, BadgeLookup, ContentStore, UserDirectory};
