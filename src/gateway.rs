// Gateway seam: the hosted auth + table store every workflow talks to

use crate::models::{
    Addon, Booking, BookingAddon, Destination, FavoritesSnapshot, NewBooking, NewBookingAddon,
    ProfileUpdate, Trip, UserProfile,
};
use crate::session::{Session, SignUp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status_code} - {message}")]
    Api {
        status_code: u16,
        message: String,
        is_retryable: bool,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    // The raw message shown to the user in a failure alert
    pub fn message(&self) -> String {
        match self {
            GatewayError::Api { message, .. } => message.clone(),
            GatewayError::Network(message)
            | GatewayError::NotFound(message)
            | GatewayError::Unauthorized(message)
            | GatewayError::Decode(message)
            | GatewayError::Config(message) => message.clone(),
            GatewayError::Timeout(_) => self.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Network(_) | GatewayError::Timeout(_) => true,
            GatewayError::Api { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }
}

// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    // The row changed since it was read; nothing was written
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripOrder {
    NameAscending,
    NewestFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripFilter {
    pub destination_id: Option<Uuid>,
    pub order: TripOrder,
    pub limit: Option<usize>,
}

impl Default for TripFilter {
    fn default() -> Self {
        Self {
            destination_id: None,
            order: TripOrder::NameAscending,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationFilter {
    pub order_by_name: bool,
    pub limit: Option<usize>,
}

// Table-level operations used by the workflows. Implementations must not
// retry writes: a retried insert can create a second booking.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    async fn get_trip(&self, trip_id: Uuid) -> Result<Trip, GatewayError>;

    async fn list_trips(&self, filter: TripFilter) -> Result<Vec<Trip>, GatewayError>;

    // Rows come back in gateway order, not in the order of `trip_ids`
    async fn trips_by_ids(&self, trip_ids: &[Uuid]) -> Result<Vec<Trip>, GatewayError>;

    async fn get_destination(&self, destination_id: Uuid) -> Result<Destination, GatewayError>;

    async fn list_destinations(
        &self,
        filter: DestinationFilter,
    ) -> Result<Vec<Destination>, GatewayError>;

    async fn list_addons(&self) -> Result<Vec<Addon>, GatewayError>;

    // Returns the stored row, including the generated id
    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, GatewayError>;

    async fn insert_booking_addons(
        &self,
        addons: Vec<NewBookingAddon>,
    ) -> Result<Vec<BookingAddon>, GatewayError>;

    async fn delete_booking(&self, booking_id: Uuid) -> Result<(), GatewayError>;

    async fn get_booking(&self, booking_id: Uuid) -> Result<Booking, GatewayError>;

    // Newest first, trip embedded
    async fn list_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, GatewayError>;

    async fn booking_addons(&self, booking_id: Uuid) -> Result<Vec<BookingAddon>, GatewayError>;

    async fn count_bookings_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<usize, GatewayError>;

    async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, GatewayError>;

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<UserProfile, GatewayError>;

    async fn read_favorites(&self, user_id: Uuid) -> Result<FavoritesSnapshot, GatewayError>;

    // `expected_version: None` overwrites unconditionally
    async fn write_favorites(
        &self,
        user_id: Uuid,
        trip_ids: &[Uuid],
        expected_version: Option<DateTime<Utc>>,
    ) -> Result<WriteOutcome, GatewayError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError>;

    async fn sign_up(&self, request: &SignUp) -> Result<Session, GatewayError>;

    async fn sign_out(&self) -> Result<(), GatewayError>;
}
