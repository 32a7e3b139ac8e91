//! Rating aggregation with per-device dedup.
//!
//! Deduplication keys on the device fingerprint, which is weakly unique
//! (see [`crate::identity`]): the guarantee is "this fingerprint rates a
//! quiz once", not "this human rates once". Resubmitting replaces the
//! prior rating instead of rejecting, so devices can revise.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::QuizmillError;
use crate::models::rating::{RATING_MAX, RATING_MIN};
use crate::store::{RatingOutcome, RatingStore};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub average_rating: f64,
    pub total_ratings: i64,
    pub user_rating: Option<i32>,
}

#[derive(Clone)]
pub struct RatingAggregator {
    ratings: Arc<dyn RatingStore>,
}

impl RatingAggregator {
    pub fn new(ratings: Arc<dyn RatingStore>) -> Self {
        Self { ratings }
    }

    pub async fn submit(
        &self,
        quiz_id: &str,
        device_fingerprint: &str,
        rating: i32,
    ) -> Result<RatingOutcome, QuizmillError> {
        if quiz_id.trim().is_empty() {
            return Err(QuizmillError::Validation("quizId is required".into()));
        }
        if device_fingerprint.trim().is_empty() {
            return Err(QuizmillError::Validation(
                "deviceFingerprint is required".into(),
            ));
        }
        if !(RATING_MIN..=RATING_MAX).contains(&rating) {
            return Err(QuizmillError::Validation(format!(
                "rating must be between {RATING_MIN} and {RATING_MAX}"
            )));
        }
        self.ratings
            .put(quiz_id, device_fingerprint, rating, Utc::now())
            .await
    }

    /// Aggregate for a quiz; `average_rating` is 0 when nobody has rated.
    /// `user_rating` is this device's rating, when a fingerprint is given.
    pub async fn aggregate(
        &self,
        quiz_id: &str,
        device_fingerprint: Option<&str>,
    ) -> Result<RatingSummary, QuizmillError> {
        let (average_rating, total_ratings) = self.ratings.aggregate(quiz_id).await?;
        let user_rating = match device_fingerprint {
            Some(fp) if !fp.is_empty() => self.ratings.by_device(quiz_id, fp).await?,
            _ => None,
        };
        Ok(RatingSummary {
            average_rating,
            total_ratings,
            user_rating,
        })
    }
}
