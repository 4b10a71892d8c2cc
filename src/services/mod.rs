//! External collaborator seams: synthesis, scene planning, safety
//! classification, object/record storage and the credit ledger.
//!
//! Each collaborator is a trait so the pipeline can be exercised against
//! mocks; the synthesis client ships with a real HTTP implementation.

pub mod memory;
pub mod safety;
pub mod scenes;
pub mod store;
pub mod synthesis;

pub use safety::{Recommendation, SafetyClassifier, SafetyVerdict};
pub use scenes::{KeywordScenePlanner, SceneError, ScenePlanner};
pub use store::{Ledger, ObjectStore, RecordStore};
pub use synthesis::{HttpSynthesisClient, ImageSynthesizer, SynthesisError};
