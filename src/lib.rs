// Client library for the OnPoint travel booking backend

pub mod account;
pub mod booking;
pub mod catalog;
pub mod config;
pub mod favorites;
pub mod gateway;
pub mod memory;
pub mod models;
pub mod pricing;
pub mod rest;
pub mod session;

// Re-export key types for convenience
pub use account::{Account, AccountError};
pub use booking::{BookingError, BookingRequest, BookingWorkflow, ConfirmedBooking, Quote};
pub use catalog::{search_destinations, search_trips, Catalog, TripListing};
pub use config::{ClientConfig, ClientError, RetryConfig};
pub use favorites::{FavoriteError, FavoritesWorkflow};
pub use gateway::{DestinationFilter, Gateway, GatewayError, TripFilter, TripOrder, WriteOutcome};
pub use memory::InMemoryGateway;
pub use models::{
    Addon, Booking, BookingAddon, BookingDetails, BookingStatus, Destination, FavoritesSnapshot,
    PaymentStatus, Trip, UserProfile,
};
pub use pricing::{PriceBreakdown, PriceOverflow};
pub use rest::RestGateway;
pub use session::{AuthUser, Session, SessionError, SessionHolder, SignUp};
