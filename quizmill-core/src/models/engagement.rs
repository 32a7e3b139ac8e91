use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two independently write-once engagement signals on a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementAction {
    Viewed,
    Clicked,
}

impl EngagementAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewed" => Some(Self::Viewed),
            "clicked" => Some(Self::Clicked),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::Viewed => "viewed_at",
            Self::Clicked => "clicked_at",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationEngagement {
    pub recommendation_id: String,
    pub viewed_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
}
