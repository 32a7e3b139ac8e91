pub mod engagement;
pub mod rating;
pub mod session;

pub use engagement::{EngagementAction, RecommendationEngagement};
pub use rating::Rating;
pub use session::{ClientMeta, CompletionRecord, Session, SessionPatch, StepResponse};
