// In-memory gateway with failure injection and a call log.
// Backs the test suites and offline demos; not a persistence layer.

use crate::gateway::{
    DestinationFilter, Gateway, GatewayError, TripFilter, TripOrder, WriteOutcome,
};
use crate::models::{
    Addon, Booking, BookingAddon, Destination, EmbeddedDestination, FavoritesSnapshot, NewBooking,
    NewBookingAddon, ProfileUpdate, Trip, UserProfile,
};
use crate::session::{AuthUser, Session, SignUp};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetTrip,
    ListTrips,
    TripsByIds,
    GetDestination,
    ListDestinations,
    ListAddons,
    InsertBooking,
    InsertBookingAddons,
    DeleteBooking,
    GetBooking,
    ListBookings,
    BookingAddons,
    CountBookings,
    GetProfile,
    UpdateProfile,
    ReadFavorites,
    WriteFavorites,
    SignIn,
    SignUp,
    SignOut,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::InsertBooking
                | Operation::InsertBookingAddons
                | Operation::DeleteBooking
                | Operation::UpdateProfile
                | Operation::WriteFavorites
        )
    }
}

struct Credentials {
    password: String,
    user_id: Uuid,
}

pub struct InMemoryGateway {
    destinations: DashMap<Uuid, Destination>,
    trips: DashMap<Uuid, Trip>,
    addons: DashMap<Uuid, Addon>,
    bookings: DashMap<Uuid, Booking>,
    booking_addons: DashMap<Uuid, BookingAddon>,
    users: DashMap<Uuid, UserProfile>,
    credentials: DashMap<String, Credentials>,
    failures: Mutex<HashMap<Operation, VecDeque<GatewayError>>>,
    calls: Mutex<Vec<Operation>>,
    latency: Mutex<Duration>,
    // Seed rows get strictly increasing timestamps so ordering is stable
    clock_ms: AtomicI64,
    epoch: DateTime<Utc>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            destinations: DashMap::new(),
            trips: DashMap::new(),
            addons: DashMap::new(),
            bookings: DashMap::new(),
            booking_addons: DashMap::new(),
            users: DashMap::new(),
            credentials: DashMap::new(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            clock_ms: AtomicI64::new(0),
            epoch: Utc::now(),
        }
    }

    fn tick(&self) -> DateTime<Utc> {
        let offset = self.clock_ms.fetch_add(1, Ordering::SeqCst) + 1;
        self.epoch + ChronoDuration::milliseconds(offset)
    }

    pub fn add_destination(&self, name: &str, location: &str) -> Destination {
        let destination = Destination {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: format!("{} in {}", name, location),
            location: location.to_string(),
            main_image_url: format!("https://img.example.com/{}.jpg", name.to_lowercase()),
            is_featured: Some(false),
            slug: None,
            created_at: self.tick(),
        };
        self.destinations
            .insert(destination.id, destination.clone());
        destination
    }

    pub fn add_trip(&self, name: &str, destination_id: Uuid, price: Option<Decimal>) -> Trip {
        let trip = Trip {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: format!("{} itinerary", name),
            short_description: name.to_string(),
            price,
            destination_id,
            main_featured_image_url: String::new(),
            extra_featured_images: Vec::new(),
            rating: None,
            is_featured: Some(false),
            created_at: self.tick(),
            destination: None,
        };
        self.trips.insert(trip.id, trip.clone());
        trip
    }

    pub fn add_addon(&self, addon_type: &str, price: Decimal) -> Addon {
        let addon = Addon {
            id: Uuid::new_v4(),
            addon_type: addon_type.to_string(),
            description: format!("{} add-on", addon_type),
            price,
        };
        self.addons.insert(addon.id, addon.clone());
        addon
    }

    pub fn register_user(&self, email: &str, password: &str, first: &str, last: &str) -> Uuid {
        let user_id = Uuid::new_v4();
        self.users.insert(
            user_id,
            UserProfile {
                id: user_id,
                email: email.to_string(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                logo_url: None,
                favorite_trips: Vec::new(),
                role: Some("user".to_string()),
                updated_at: self.tick(),
            },
        );
        self.credentials.insert(
            email.to_string(),
            Credentials {
                password: password.to_string(),
                user_id,
            },
        );
        user_id
    }

    // Backdate a booking, e.g. to test the recent-bookings window
    pub fn set_booked_at(&self, booking_id: Uuid, booked_at: DateTime<Utc>) {
        if let Some(mut booking) = self.bookings.get_mut(&booking_id) {
            booking.booked_at = booked_at;
        }
    }

    // Queue an error for the next call of `operation`
    pub fn fail_next(&self, operation: Operation, error: GatewayError) {
        self.failures
            .lock()
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    // Every call sleeps this long before touching the tables
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.calls.lock().iter().filter(|op| **op == operation).count()
    }

    pub fn write_calls(&self) -> usize {
        self.calls.lock().iter().filter(|op| op.is_write()).count()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn booking_addon_count(&self) -> usize {
        self.booking_addons.len()
    }

    async fn enter(&self, operation: Operation) -> Result<(), GatewayError> {
        self.calls.lock().push(operation);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .failures
            .lock()
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front());
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn embed_destination(&self, mut trip: Trip) -> Trip {
        trip.destination = self
            .destinations
            .get(&trip.destination_id)
            .map(|d| EmbeddedDestination::from(d.value()));
        trip
    }

    fn embed_trip(&self, mut booking: Booking) -> Booking {
        booking.trip = self
            .trips
            .get(&booking.trip_id)
            .map(|t| self.embed_destination(t.value().clone()));
        booking
    }

    fn profile(&self, user_id: Uuid) -> Result<UserProfile, GatewayError> {
        self.users
            .get(&user_id)
            .map(|u| u.value().clone())
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", user_id)))
    }

    fn session_for(&self, user_id: Uuid, email: &str) -> Session {
        Session {
            access_token: format!("token-{}", Uuid::new_v4()),
            user: AuthUser {
                id: user_id,
                email: Some(email.to_string()),
            },
        }
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    async fn get_trip(&self, trip_id: Uuid) -> Result<Trip, GatewayError> {
        self.enter(Operation::GetTrip).await?;
        self.trips
            .get(&trip_id)
            .map(|t| self.embed_destination(t.value().clone()))
            .ok_or_else(|| GatewayError::NotFound(format!("trip {}", trip_id)))
    }

    async fn list_trips(&self, filter: TripFilter) -> Result<Vec<Trip>, GatewayError> {
        self.enter(Operation::ListTrips).await?;
        let mut trips: Vec<Trip> = self
            .trips
            .iter()
            .filter(|t| filter.destination_id.map_or(true, |d| t.destination_id == d))
            .map(|t| self.embed_destination(t.value().clone()))
            .collect();
        match filter.order {
            TripOrder::NameAscending => trips.sort_by(|a, b| a.name.cmp(&b.name)),
            TripOrder::NewestFirst => trips.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        if let Some(limit) = filter.limit {
            trips.truncate(limit);
        }
        Ok(trips)
    }

    async fn trips_by_ids(&self, trip_ids: &[Uuid]) -> Result<Vec<Trip>, GatewayError> {
        self.enter(Operation::TripsByIds).await?;
        // Arbitrary order, like the real store
        Ok(self
            .trips
            .iter()
            .filter(|t| trip_ids.contains(t.key()))
            .map(|t| self.embed_destination(t.value().clone()))
            .collect())
    }

    async fn get_destination(&self, destination_id: Uuid) -> Result<Destination, GatewayError> {
        self.enter(Operation::GetDestination).await?;
        self.destinations
            .get(&destination_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| GatewayError::NotFound(format!("destination {}", destination_id)))
    }

    async fn list_destinations(
        &self,
        filter: DestinationFilter,
    ) -> Result<Vec<Destination>, GatewayError> {
        self.enter(Operation::ListDestinations).await?;
        let mut destinations: Vec<Destination> =
            self.destinations.iter().map(|d| d.value().clone()).collect();
        if filter.order_by_name {
            destinations.sort_by(|a, b| a.name.cmp(&b.name));
        } else {
            destinations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        }
        if let Some(limit) = filter.limit {
            destinations.truncate(limit);
        }
        Ok(destinations)
    }

    async fn list_addons(&self) -> Result<Vec<Addon>, GatewayError> {
        self.enter(Operation::ListAddons).await?;
        Ok(self.addons.iter().map(|a| a.value().clone()).collect())
    }

    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, GatewayError> {
        self.enter(Operation::InsertBooking).await?;
        if !self.trips.contains_key(&booking.trip_id) {
            return Err(GatewayError::Api {
                status_code: 409,
                message: "insert or update on table \"bookings\" violates foreign key constraint"
                    .to_string(),
                is_retryable: false,
            });
        }
        let stored = Booking {
            id: Uuid::new_v4(),
            user_id: booking.user_id,
            trip_id: booking.trip_id,
            start_date: booking.start_date,
            end_date: booking.end_date,
            number_of_people: booking.number_of_people,
            total_price: booking.total_price,
            status: booking.status,
            payment_status: booking.payment_status,
            booked_at: self.tick(),
            notes: None,
            special_requests: None,
            trip: None,
        };
        self.bookings.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn insert_booking_addons(
        &self,
        addons: Vec<NewBookingAddon>,
    ) -> Result<Vec<BookingAddon>, GatewayError> {
        self.enter(Operation::InsertBookingAddons).await?;
        // Bulk insert is all-or-nothing, as with a single statement
        if let Some(missing) = addons
            .iter()
            .find(|a| !self.bookings.contains_key(&a.booking_id))
        {
            return Err(GatewayError::Api {
                status_code: 409,
                message: format!("booking {} does not exist", missing.booking_id),
                is_retryable: false,
            });
        }
        let created_at = self.tick();
        let rows: Vec<BookingAddon> = addons
            .into_iter()
            .map(|a| BookingAddon {
                id: Uuid::new_v4(),
                booking_id: a.booking_id,
                addon_type: a.addon_type,
                description: a.description,
                price: a.price,
                quantity: a.quantity,
                created_at,
            })
            .collect();
        for row in &rows {
            self.booking_addons.insert(row.id, row.clone());
        }
        Ok(rows)
    }

    async fn delete_booking(&self, booking_id: Uuid) -> Result<(), GatewayError> {
        self.enter(Operation::DeleteBooking).await?;
        self.bookings.remove(&booking_id);
        // Add-on rows are owned by the booking
        self.booking_addons.retain(|_, a| a.booking_id != booking_id);
        Ok(())
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Booking, GatewayError> {
        self.enter(Operation::GetBooking).await?;
        self.bookings
            .get(&booking_id)
            .map(|b| self.embed_trip(b.value().clone()))
            .ok_or_else(|| GatewayError::NotFound(format!("booking {}", booking_id)))
    }

    async fn list_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, GatewayError> {
        self.enter(Operation::ListBookings).await?;
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| b.user_id == user_id)
            .map(|b| self.embed_trip(b.value().clone()))
            .collect();
        bookings.sort_by(|a, b| b.booked_at.cmp(&a.booked_at));
        Ok(bookings)
    }

    async fn booking_addons(&self, booking_id: Uuid) -> Result<Vec<BookingAddon>, GatewayError> {
        self.enter(Operation::BookingAddons).await?;
        let mut rows: Vec<BookingAddon> = self
            .booking_addons
            .iter()
            .filter(|a| a.booking_id == booking_id)
            .map(|a| a.value().clone())
            .collect();
        rows.sort_by(|a, b| a.addon_type.cmp(&b.addon_type));
        Ok(rows)
    }

    async fn count_bookings_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<usize, GatewayError> {
        self.enter(Operation::CountBookings).await?;
        Ok(self
            .bookings
            .iter()
            .filter(|b| b.user_id == user_id && b.booked_at >= since)
            .count())
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, GatewayError> {
        self.enter(Operation::GetProfile).await?;
        self.profile(user_id)
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<UserProfile, GatewayError> {
        self.enter(Operation::UpdateProfile).await?;
        let updated_at = self.tick();
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", user_id)))?;
        user.first_name = update.first_name;
        user.last_name = update.last_name;
        user.logo_url = update.logo_url;
        user.updated_at = updated_at;
        Ok(user.clone())
    }

    async fn read_favorites(&self, user_id: Uuid) -> Result<FavoritesSnapshot, GatewayError> {
        self.enter(Operation::ReadFavorites).await?;
        let profile = self.profile(user_id)?;
        Ok(FavoritesSnapshot {
            trip_ids: profile.favorite_trips,
            version: profile.updated_at,
        })
    }

    async fn write_favorites(
        &self,
        user_id: Uuid,
        trip_ids: &[Uuid],
        expected_version: Option<DateTime<Utc>>,
    ) -> Result<WriteOutcome, GatewayError> {
        self.enter(Operation::WriteFavorites).await?;
        let updated_at = self.tick();
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", user_id)))?;
        if let Some(expected) = expected_version {
            if user.updated_at != expected {
                return Ok(WriteOutcome::Conflict);
            }
        }
        user.favorite_trips = trip_ids.to_vec();
        user.updated_at = updated_at;
        Ok(WriteOutcome::Applied)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        self.enter(Operation::SignIn).await?;
        match self.credentials.get(email) {
            Some(c) if c.password == password => Ok(self.session_for(c.user_id, email)),
            _ => Err(GatewayError::Api {
                status_code: 400,
                message: "Invalid login credentials".to_string(),
                is_retryable: false,
            }),
        }
    }

    async fn sign_up(&self, request: &SignUp) -> Result<Session, GatewayError> {
        self.enter(Operation::SignUp).await?;
        if self.credentials.contains_key(&request.email) {
            return Err(GatewayError::Api {
                status_code: 422,
                message: "User already registered".to_string(),
                is_retryable: false,
            });
        }
        let user_id = self.register_user(
            &request.email,
            &request.password,
            &request.first_name,
            &request.last_name,
        );
        Ok(self.session_for(user_id, &request.email))
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        self.enter(Operation::SignOut).await
    }
}
