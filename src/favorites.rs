// Favorite-toggle workflow over the `users.favorite_trips` array.
//
// Each toggle is a read-modify-write. The write is conditional on the row
// version seen by the read, so two toggles racing from different screens
// cannot silently overwrite each other: the loser re-reads and re-applies.

use crate::gateway::{Gateway, GatewayError, WriteOutcome};
use crate::models::Trip;
use crate::session::SessionHolder;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FavoriteError {
    #[error("Please sign in to save favorites.")]
    SignInRequired,

    #[error("Favorites changed concurrently {attempts} times, try again")]
    Contended { attempts: u32 },

    #[error("{}", .0.message())]
    Gateway(#[from] GatewayError),
}

// Returns the new list and whether `trip_id` is now a favorite.
// Removal drops every occurrence; remaining ids keep their order.
pub fn toggle_membership(trip_ids: &[Uuid], trip_id: Uuid) -> (Vec<Uuid>, bool) {
    if trip_ids.contains(&trip_id) {
        let remaining = trip_ids.iter().copied().filter(|id| *id != trip_id).collect();
        (remaining, false)
    } else {
        let mut appended = trip_ids.to_vec();
        appended.push(trip_id);
        (appended, true)
    }
}

pub struct FavoritesWorkflow<G: Gateway + ?Sized> {
    gateway: Arc<G>,
    session: SessionHolder,
    max_attempts: u32,
}

impl<G: Gateway + ?Sized> FavoritesWorkflow<G> {
    pub fn new(gateway: Arc<G>, session: SessionHolder) -> Self {
        Self {
            gateway,
            session,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn user_id(&self) -> Result<Uuid, FavoriteError> {
        self.session.user_id().ok_or(FavoriteError::SignInRequired)
    }

    pub async fn is_favorite(&self, trip_id: Uuid) -> Result<bool, FavoriteError> {
        let user_id = self.user_id()?;
        let snapshot = self.gateway.read_favorites(user_id).await?;
        Ok(snapshot.contains(trip_id))
    }

    // Returns the membership state after the write has been applied
    pub async fn toggle(&self, trip_id: Uuid) -> Result<bool, FavoriteError> {
        let user_id = self.user_id()?;

        for attempt in 1..=self.max_attempts {
            let snapshot = self.gateway.read_favorites(user_id).await?;
            let (updated, now_favorite) = toggle_membership(&snapshot.trip_ids, trip_id);

            match self
                .gateway
                .write_favorites(user_id, &updated, Some(snapshot.version))
                .await?
            {
                WriteOutcome::Applied => {
                    info!(%user_id, %trip_id, favorite = now_favorite, attempt, "favorite toggled");
                    return Ok(now_favorite);
                }
                WriteOutcome::Conflict => {
                    debug!(%user_id, %trip_id, attempt, "favorites changed since read, retrying");
                }
            }
        }

        warn!(%user_id, %trip_id, attempts = self.max_attempts, "favorite toggle gave up");
        Err(FavoriteError::Contended {
            attempts: self.max_attempts,
        })
    }

    // Full trips in the order they were favorited; ids whose trip no longer
    // exists are skipped
    pub async fn list_favorite_trips(&self) -> Result<Vec<Trip>, FavoriteError> {
        let user_id = self.user_id()?;
        let snapshot = self.gateway.read_favorites(user_id).await?;
        if snapshot.trip_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<Uuid, Trip> = self
            .gateway
            .trips_by_ids(&snapshot.trip_ids)
            .await?
            .into_iter()
            .map(|trip| (trip.id, trip))
            .collect();

        Ok(snapshot
            .trip_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryGateway, Operation};
    use crate::session::{AuthUser, Session};
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn signed_in(gateway: &InMemoryGateway) -> (SessionHolder, Uuid) {
        let user_id = gateway.register_user("ana@example.com", "pw", "Ana", "Silva");
        let session = SessionHolder::with_session(Session {
            access_token: "token".to_string(),
            user: AuthUser {
                id: user_id,
                email: None,
            },
        });
        (session, user_id)
    }

    #[test]
    fn test_toggle_membership_round_trip_restores_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let original = vec![a, b];

        let (added, now) = toggle_membership(&original, c);
        assert!(now);
        assert_eq!(added, vec![a, b, c]);

        let (removed, now) = toggle_membership(&added, c);
        assert!(!now);
        assert_eq!(removed, original);
    }

    #[test]
    fn test_toggle_membership_removes_duplicates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (list, now) = toggle_membership(&[a, b, a], a);
        assert!(!now);
        assert_eq!(list, vec![b]);
    }

    #[tokio::test]
    async fn test_toggle_twice_returns_to_original() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (session, user_id) = signed_in(&gateway);
        let existing = Uuid::new_v4();
        let trip = Uuid::new_v4();
        gateway
            .write_favorites(user_id, &[existing], None)
            .await
            .unwrap();
        let workflow = FavoritesWorkflow::new(gateway.clone(), session);

        assert!(workflow.toggle(trip).await.unwrap());
        assert!(workflow.is_favorite(trip).await.unwrap());
        assert!(!workflow.toggle(trip).await.unwrap());

        let snapshot = gateway.read_favorites(user_id).await.unwrap();
        assert_eq!(snapshot.trip_ids, vec![existing]);
    }

    #[tokio::test]
    async fn test_write_error_leaves_favorites_unchanged() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (session, user_id) = signed_in(&gateway);
        gateway.fail_next(
            Operation::WriteFavorites,
            GatewayError::Api {
                status_code: 500,
                message: "Internal Server Error".to_string(),
                is_retryable: true,
            },
        );
        let workflow = FavoritesWorkflow::new(gateway.clone(), session);

        let err = workflow.toggle(Uuid::new_v4()).await.unwrap_err();

        assert_eq!(err.to_string(), "Internal Server Error");
        assert!(gateway.read_favorites(user_id).await.unwrap().trip_ids.is_empty());
    }

    #[tokio::test]
    async fn test_signed_out_toggle_is_rejected() {
        let gateway = Arc::new(InMemoryGateway::new());
        let workflow = FavoritesWorkflow::new(gateway.clone(), SessionHolder::new());

        let err = workflow.toggle(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err, FavoriteError::SignInRequired);
        assert!(gateway.calls().is_empty());
    }

    // Two screens toggle different trips using the unconditional protocol:
    // both read the same list, and the second write clobbers the first.
    #[tokio::test]
    async fn test_unconditional_read_modify_write_loses_update() {
        let gateway = InMemoryGateway::new();
        let (_, user_id) = signed_in(&gateway);
        let from_card = Uuid::new_v4();
        let from_details = Uuid::new_v4();

        let card_read = gateway.read_favorites(user_id).await.unwrap();
        let details_read = gateway.read_favorites(user_id).await.unwrap();

        let (card_list, _) = toggle_membership(&card_read.trip_ids, from_card);
        let (details_list, _) = toggle_membership(&details_read.trip_ids, from_details);
        gateway
            .write_favorites(user_id, &card_list, None)
            .await
            .unwrap();
        gateway
            .write_favorites(user_id, &details_list, None)
            .await
            .unwrap();

        let stored = gateway.read_favorites(user_id).await.unwrap().trip_ids;
        assert_eq!(stored, vec![from_details]);
        assert!(!stored.contains(&from_card), "card toggle was lost");
    }

    #[tokio::test]
    async fn test_concurrent_toggles_both_survive() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (session, user_id) = signed_in(&gateway);
        // Both reads complete before either write
        gateway.set_latency(Duration::from_millis(5));
        let card = FavoritesWorkflow::new(gateway.clone(), session.clone());
        let details = FavoritesWorkflow::new(gateway.clone(), session);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let (a, b) = tokio::join!(card.toggle(first), details.toggle(second));
        assert!(a.unwrap());
        assert!(b.unwrap());

        let stored = gateway.read_favorites(user_id).await.unwrap().trip_ids;
        assert_eq!(stored.len(), 2);
        assert!(stored.contains(&first) && stored.contains(&second));
        assert!(gateway.call_count(Operation::WriteFavorites) >= 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (session, _) = signed_in(&gateway);
        let workflow = FavoritesWorkflow::new(gateway.clone(), session).with_max_attempts(1);
        let rival =
            FavoritesWorkflow::new(gateway.clone(), workflow.session.clone()).with_max_attempts(1);
        gateway.set_latency(Duration::from_millis(5));

        let (mine, theirs) = tokio::join!(
            workflow.toggle(Uuid::new_v4()),
            rival.toggle(Uuid::new_v4())
        );

        // Exactly one of the racing single-attempt toggles wins
        let outcomes = [mine, theirs];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| *r == Err(FavoriteError::Contended { attempts: 1 })));
    }

    #[tokio::test]
    async fn test_list_follows_favorite_order() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (session, user_id) = signed_in(&gateway);
        let destination = gateway.add_destination("Cusco", "Peru");
        let first = gateway.add_trip("Machu Picchu", destination.id, Some(Decimal::from(900)));
        let second = gateway.add_trip("Sacred Valley", destination.id, None);
        let deleted = Uuid::new_v4();
        gateway
            .write_favorites(user_id, &[second.id, deleted, first.id], None)
            .await
            .unwrap();
        let workflow = FavoritesWorkflow::new(gateway, session);

        let trips = workflow.list_favorite_trips().await.unwrap();

        let names: Vec<&str> = trips.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Sacred Valley", "Machu Picchu"]);
        assert_eq!(
            trips[0].destination.as_ref().map(|d| d.name.as_str()),
            Some("Cusco")
        );
    }

    #[tokio::test]
    async fn test_empty_favorites_skip_trip_lookup() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (session, _) = signed_in(&gateway);
        let workflow = FavoritesWorkflow::new(gateway.clone(), session);

        assert!(workflow.list_favorite_trips().await.unwrap().is_empty());
        assert_eq!(gateway.call_count(Operation::TripsByIds), 0);
    }
}
