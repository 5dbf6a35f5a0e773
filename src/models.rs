// Row types for the gateway tables the client reads and writes

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

// Nullable array columns come back as `null` rather than `[]`
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub location: String,
    pub main_image_url: String,
    #[serde(default)]
    pub is_featured: Option<bool>,
    #[serde(default)]
    pub slug: Option<String>,
    pub created_at: DateTime<Utc>,
}

// Destination columns embedded into a trip row by a join select
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedDestination {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl From<&Destination> for EmbeddedDestination {
    fn from(destination: &Destination) -> Self {
        Self {
            id: Some(destination.id),
            name: destination.name.clone(),
            location: Some(destination.location.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub short_description: String,
    // USD, per person. Null on trips that have not been priced yet.
    #[serde(default)]
    pub price: Option<Decimal>,
    pub destination_id: Uuid,
    #[serde(default)]
    pub main_featured_image_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub extra_featured_images: Vec<String>,
    #[serde(default)]
    pub rating: Option<Decimal>,
    #[serde(default)]
    pub is_featured: Option<bool>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<EmbeddedDestination>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub addon_type: String,
    pub description: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Other(String),
}

impl From<String> for BookingStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => BookingStatus::Pending,
            "confirmed" => BookingStatus::Confirmed,
            _ => BookingStatus::Other(value),
        }
    }
}

impl From<BookingStatus> for String {
    fn from(status: BookingStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Pending => f.write_str("pending"),
            BookingStatus::Confirmed => f.write_str("confirmed"),
            BookingStatus::Other(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Other(String),
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "unpaid" => PaymentStatus::Unpaid,
            "paid" => PaymentStatus::Paid,
            _ => PaymentStatus::Other(value),
        }
    }
}

impl From<PaymentStatus> for String {
    fn from(status: PaymentStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Unpaid => f.write_str("unpaid"),
            PaymentStatus::Paid => f.write_str("paid"),
            PaymentStatus::Other(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub trip_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub number_of_people: u32,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub booked_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub special_requests: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip: Option<Trip>,
}

// Insert payload for `bookings`; the gateway assigns id and booked_at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBooking {
    pub user_id: Uuid,
    pub trip_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub number_of_people: u32,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingAddon {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub addon_type: String,
    pub description: String,
    pub price: Decimal,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBookingAddon {
    pub booking_id: Uuid,
    pub addon_type: String,
    pub description: String,
    pub price: Decimal,
    pub quantity: u32,
}

impl NewBookingAddon {
    // Add-ons are priced per traveler, so quantity follows the party size
    pub fn for_booking(booking_id: Uuid, addon: &Addon, people_count: u32) -> Self {
        Self {
            booking_id,
            addon_type: addon.addon_type.clone(),
            description: addon.description.clone(),
            price: addon.price,
            quantity: people_count,
        }
    }
}

// A booking together with the add-on rows recorded for it
#[derive(Debug, Clone, PartialEq)]
pub struct BookingDetails {
    pub booking: Booking,
    pub addons: Vec<BookingAddon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub favorite_trips: Vec<Uuid>,
    #[serde(default)]
    pub role: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub logo_url: Option<String>,
}

// The favorites array as read, plus the row version it was read at.
// Writing back conditionally on `version` detects concurrent toggles.
#[derive(Debug, Clone, PartialEq)]
pub struct FavoritesSnapshot {
    pub trip_ids: Vec<Uuid>,
    pub version: DateTime<Utc>,
}

impl FavoritesSnapshot {
    pub fn contains(&self, trip_id: Uuid) -> bool {
        self.trip_ids.contains(&trip_id)
    }
}
