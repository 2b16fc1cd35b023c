//! Submission intake and grading dispatch.
//!
//! Takes an accepted upload, freezes the deadline tier and language it was
//! accepted under, records it as a durable handin and hands it to the grading
//! workers through a queue. Results flow back through the correlator.

pub mod api;
pub mod artifacts;
pub mod catalog;
pub mod clock;
pub mod correlator;
pub mod deadline;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod intake;
pub mod languages;
pub mod shutdown;

pub use catalog::{Assignment, AssignmentCatalog};
pub use correlator::{Correlation, GradeOutcome, OutcomeStatus, ResultCorrelator, ResultMessage};
pub use deadline::{DeadlineResolver, DeadlineTier};
pub use error::IntakeError;
pub use ids::HandinId;
pub use intake::{SubmissionIntake, SubmitRequest};
pub use languages::{LanguageHandler, LanguageRegistry};
