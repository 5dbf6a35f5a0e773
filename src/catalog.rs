// Read-only browsing of destinations, trips and add-ons

use crate::gateway::{DestinationFilter, Gateway, GatewayError, TripFilter, TripOrder};
use crate::models::{Addon, Destination, Trip};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const FEATURED_DESTINATIONS: usize = 6;
pub const LATEST_TRIPS: usize = 10;

// Trips listed for one destination, or for all of them
#[derive(Debug, Clone, PartialEq)]
pub struct TripListing {
    pub destination_name: Option<String>,
    pub trips: Vec<Trip>,
}

pub struct Catalog<G: Gateway + ?Sized> {
    gateway: Arc<G>,
}

impl<G: Gateway + ?Sized> Catalog<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    pub async fn featured_destinations(&self) -> Result<Vec<Destination>, GatewayError> {
        self.gateway
            .list_destinations(DestinationFilter {
                order_by_name: false,
                limit: Some(FEATURED_DESTINATIONS),
            })
            .await
    }

    pub async fn all_destinations(&self) -> Result<Vec<Destination>, GatewayError> {
        self.gateway
            .list_destinations(DestinationFilter {
                order_by_name: true,
                limit: None,
            })
            .await
    }

    pub async fn latest_trips(&self) -> Result<Vec<Trip>, GatewayError> {
        self.gateway
            .list_trips(TripFilter {
                destination_id: None,
                order: TripOrder::NewestFirst,
                limit: Some(LATEST_TRIPS),
            })
            .await
    }

    // Alphabetical; narrowed to one destination when given
    pub async fn trips(&self, destination_id: Option<Uuid>) -> Result<TripListing, GatewayError> {
        let filter = TripFilter {
            destination_id,
            order: TripOrder::NameAscending,
            limit: None,
        };
        match destination_id {
            Some(id) => {
                let (destination, trips) = futures::try_join!(
                    self.gateway.get_destination(id),
                    self.gateway.list_trips(filter)
                )?;
                debug!(destination_id = %id, trips = trips.len(), "listed destination trips");
                Ok(TripListing {
                    destination_name: Some(destination.name),
                    trips,
                })
            }
            None => Ok(TripListing {
                destination_name: None,
                trips: self.gateway.list_trips(filter).await?,
            }),
        }
    }

    pub async fn trip_details(&self, trip_id: Uuid) -> Result<Trip, GatewayError> {
        self.gateway.get_trip(trip_id).await
    }

    pub async fn addons(&self) -> Result<Vec<Addon>, GatewayError> {
        self.gateway.list_addons().await
    }
}

fn matches(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

// Case-insensitive match on trip name or destination name. A blank query
// keeps everything.
pub fn search_trips(trips: &[Trip], query: &str) -> Vec<Trip> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return trips.to_vec();
    }
    trips
        .iter()
        .filter(|trip| {
            matches(&trip.name, &needle)
                || trip
                    .destination
                    .as_ref()
                    .map_or(false, |d| matches(&d.name, &needle))
        })
        .cloned()
        .collect()
}

// Case-insensitive match on destination name or location
pub fn search_destinations(destinations: &[Destination], query: &str) -> Vec<Destination> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return destinations.to_vec();
    }
    destinations
        .iter()
        .filter(|d| matches(&d.name, &needle) || matches(&d.location, &needle))
        .cloned()
        .collect()
}
