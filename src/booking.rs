// Booking workflow: selections -> priced reservation with add-ons

use crate::gateway::{Gateway, GatewayError};
use crate::models::{
    Addon, Booking, BookingAddon, BookingStatus, NewBooking, NewBookingAddon, PaymentStatus, Trip,
};
use crate::pricing::{self, PriceBreakdown, PriceOverflow};
use crate::session::SessionHolder;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingError {
    #[error("Please sign in to book a trip.")]
    SignInRequired,

    #[error("Please select a travel date.")]
    SelectionRequired,

    #[error("Invalid travel date: {0}")]
    InvalidDate(String),

    #[error("{0}")]
    Pricing(#[from] PriceOverflow),

    #[error("{}", .0.message())]
    Gateway(#[from] GatewayError),

    // The booking row was written but its add-ons were not
    #[error("{}", .source.message())]
    AddonsFailed {
        booking_id: Uuid,
        source: GatewayError,
        rolled_back: bool,
    },
}

impl BookingError {
    pub fn alert_title(&self) -> &'static str {
        match self {
            BookingError::SignInRequired => "Sign In Required",
            BookingError::SelectionRequired | BookingError::InvalidDate(_) => {
                "Selection Required"
            }
            BookingError::Pricing(_)
            | BookingError::Gateway(_)
            | BookingError::AddonsFailed { .. } => "Booking Failed",
        }
    }

    // True when the attempt left a booking row without its add-ons
    pub fn left_orphan(&self) -> bool {
        matches!(
            self,
            BookingError::AddonsFailed {
                rolled_back: false,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub trip_id: Uuid,
    // Calendar day as picked, `YYYY-MM-DD`
    pub selected_date: String,
    pub people_count: u32,
    pub addon_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub trip: Trip,
    pub addons: Vec<Addon>,
    pub breakdown: PriceBreakdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedBooking {
    pub booking: Booking,
    pub addons: Vec<BookingAddon>,
    pub breakdown: PriceBreakdown,
}

pub struct BookingWorkflow<G: Gateway + ?Sized> {
    gateway: Arc<G>,
    session: SessionHolder,
}

impl<G: Gateway + ?Sized> BookingWorkflow<G> {
    pub fn new(gateway: Arc<G>, session: SessionHolder) -> Self {
        Self { gateway, session }
    }

    fn parse_date(selected_date: &str) -> Result<NaiveDate, BookingError> {
        let selected_date = selected_date.trim();
        if selected_date.is_empty() {
            return Err(BookingError::SelectionRequired);
        }
        NaiveDate::parse_from_str(selected_date, "%Y-%m-%d")
            .map_err(|_| BookingError::InvalidDate(selected_date.to_string()))
    }

    // Trip and add-on catalog are independent reads
    async fn load(&self, request: &BookingRequest) -> Result<Quote, BookingError> {
        let (trip, catalog) = futures::try_join!(
            self.gateway.get_trip(request.trip_id),
            self.gateway.list_addons()
        )?;

        let addons: Vec<Addon> = pricing::select_addons(&catalog, &request.addon_ids)
            .into_iter()
            .cloned()
            .collect();
        if addons.len() < request.addon_ids.len() {
            warn!(
                trip_id = %request.trip_id,
                requested = request.addon_ids.len(),
                matched = addons.len(),
                "ignoring unknown or repeated add-on ids"
            );
        }

        let refs: Vec<&Addon> = addons.iter().collect();
        let breakdown = pricing::compute(trip.price, request.people_count, &refs)?;
        Ok(Quote {
            trip,
            addons,
            breakdown,
        })
    }

    // Price shown on the booking screen; reads only
    pub async fn quote(&self, request: &BookingRequest) -> Result<Quote, BookingError> {
        self.load(request).await
    }

    pub async fn book(&self, request: BookingRequest) -> Result<ConfirmedBooking, BookingError> {
        let user_id = self.session.user_id().ok_or(BookingError::SignInRequired)?;
        let travel_date = Self::parse_date(&request.selected_date)?;

        let quote = self.load(&request).await?;
        let people_count = quote.breakdown.people_count;

        let booking = self
            .gateway
            .insert_booking(NewBooking {
                user_id,
                trip_id: quote.trip.id,
                start_date: travel_date,
                end_date: travel_date,
                number_of_people: people_count,
                total_price: quote.breakdown.final_total,
                status: BookingStatus::Pending,
                payment_status: PaymentStatus::Unpaid,
            })
            .await
            .map_err(|e| {
                error!(%user_id, trip_id = %quote.trip.id, error = %e, "booking insert failed");
                e
            })?;

        let addons = if quote.addons.is_empty() {
            Vec::new()
        } else {
            let rows = quote
                .addons
                .iter()
                .map(|addon| NewBookingAddon::for_booking(booking.id, addon, people_count))
                .collect();
            match self.gateway.insert_booking_addons(rows).await {
                Ok(addons) => addons,
                Err(source) => return Err(self.compensate(booking.id, source).await),
            }
        };

        info!(
            booking_id = %booking.id,
            %user_id,
            total = %quote.breakdown.final_total,
            addons = addons.len(),
            "booking created"
        );
        Ok(ConfirmedBooking {
            booking,
            addons,
            breakdown: quote.breakdown,
        })
    }

    // Undo the booking row so the user is not left with a booking whose
    // total includes add-ons that were never recorded
    async fn compensate(&self, booking_id: Uuid, source: GatewayError) -> BookingError {
        warn!(%booking_id, error = %source, "add-on insert failed, deleting booking");
        let rolled_back = match self.gateway.delete_booking(booking_id).await {
            Ok(()) => true,
            Err(e) => {
                error!(%booking_id, error = %e, "compensating delete failed, booking orphaned");
                false
            }
        };
        BookingError::AddonsFailed {
            booking_id,
            source,
            rolled_back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryGateway, Operation};
    use crate::session::{AuthUser, Session};
    use rust_decimal::Decimal;

    struct Fixture {
        gateway: Arc<InMemoryGateway>,
        workflow: BookingWorkflow<InMemoryGateway>,
        trip: Trip,
        catalog: Vec<Addon>,
        user_id: Uuid,
    }

    fn fixture(trip_price: i64, addon_prices: &[i64]) -> Fixture {
        let gateway = Arc::new(InMemoryGateway::new());
        let user_id = gateway.register_user("ana@example.com", "pw", "Ana", "Silva");
        let destination = gateway.add_destination("Kyoto", "Japan");
        let trip = gateway.add_trip("Temples", destination.id, Some(Decimal::from(trip_price)));
        let catalog = addon_prices
            .iter()
            .enumerate()
            .map(|(i, p)| gateway.add_addon(&format!("Addon {}", i), Decimal::from(*p)))
            .collect();
        let session = SessionHolder::with_session(Session {
            access_token: "token".to_string(),
            user: AuthUser {
                id: user_id,
                email: None,
            },
        });
        Fixture {
            workflow: BookingWorkflow::new(gateway.clone(), session),
            gateway,
            trip,
            catalog,
            user_id,
        }
    }

    fn request(f: &Fixture, people: u32, addon_ids: Vec<Uuid>) -> BookingRequest {
        BookingRequest {
            trip_id: f.trip.id,
            selected_date: "2025-06-01".to_string(),
            people_count: people,
            addon_ids,
        }
    }

    #[tokio::test]
    async fn test_books_trip_with_addons_per_traveler() {
        let f = fixture(500, &[50, 30]);
        let ids = f.catalog.iter().map(|a| a.id).collect();

        let confirmed = f.workflow.book(request(&f, 2, ids)).await.unwrap();

        assert_eq!(confirmed.breakdown.final_total, Decimal::from(1160));
        assert_eq!(confirmed.booking.total_price, Decimal::from(1160));
        assert_eq!(confirmed.booking.user_id, f.user_id);
        assert_eq!(confirmed.booking.status, BookingStatus::Pending);
        assert_eq!(confirmed.booking.payment_status, PaymentStatus::Unpaid);
        assert_eq!(confirmed.booking.start_date, confirmed.booking.end_date);
        assert_eq!(confirmed.addons.len(), 2);
        assert!(confirmed
            .addons
            .iter()
            .all(|a| a.quantity == 2 && a.booking_id == confirmed.booking.id));
    }

    #[tokio::test]
    async fn test_no_addons_means_no_addon_insert() {
        let f = fixture(200, &[25]);

        let confirmed = f.workflow.book(request(&f, 1, vec![])).await.unwrap();

        assert_eq!(confirmed.booking.total_price, Decimal::from(200));
        assert_eq!(f.gateway.call_count(Operation::InsertBookingAddons), 0);
        assert_eq!(f.gateway.booking_addon_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_date_short_circuits_before_network() {
        let f = fixture(200, &[25]);
        let mut req = request(&f, 1, vec![f.catalog[0].id]);
        req.selected_date = "  ".to_string();

        let err = f.workflow.book(req).await.unwrap_err();

        assert_eq!(err, BookingError::SelectionRequired);
        assert_eq!(err.alert_title(), "Selection Required");
        assert_eq!(err.to_string(), "Please select a travel date.");
        assert!(f.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_date_is_rejected() {
        let f = fixture(200, &[]);
        let mut req = request(&f, 1, vec![]);
        req.selected_date = "06/01/2025".to_string();

        let err = f.workflow.book(req).await.unwrap_err();
        assert_eq!(err, BookingError::InvalidDate("06/01/2025".to_string()));
        assert_eq!(f.gateway.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_user_is_sent_to_sign_in() {
        let f = fixture(200, &[]);
        let workflow = BookingWorkflow::new(f.gateway.clone(), SessionHolder::new());

        let err = workflow.book(request(&f, 1, vec![])).await.unwrap_err();

        assert_eq!(err, BookingError::SignInRequired);
        assert!(f.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_people_count_is_clamped_to_one() {
        let f = fixture(300, &[20]);

        let confirmed = f
            .workflow
            .book(request(&f, 0, vec![f.catalog[0].id]))
            .await
            .unwrap();

        assert_eq!(confirmed.booking.number_of_people, 1);
        assert_eq!(confirmed.booking.total_price, Decimal::from(320));
        assert_eq!(confirmed.addons[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_unknown_addon_ids_are_filtered() {
        let f = fixture(100, &[10]);

        let confirmed = f
            .workflow
            .book(request(&f, 2, vec![Uuid::new_v4(), f.catalog[0].id]))
            .await
            .unwrap();

        assert_eq!(confirmed.addons.len(), 1);
        assert_eq!(confirmed.booking.total_price, Decimal::from(220));
    }

    #[tokio::test]
    async fn test_booking_insert_failure_writes_no_addons() {
        let f = fixture(500, &[50, 30]);
        f.gateway.fail_next(
            Operation::InsertBooking,
            GatewayError::Api {
                status_code: 500,
                message: "Internal Server Error".to_string(),
                is_retryable: true,
            },
        );
        let ids = f.catalog.iter().map(|a| a.id).collect();

        let err = f.workflow.book(request(&f, 2, ids)).await.unwrap_err();

        assert_eq!(err.alert_title(), "Booking Failed");
        assert_eq!(err.to_string(), "Internal Server Error");
        assert_eq!(f.gateway.booking_count(), 0);
        assert_eq!(f.gateway.booking_addon_count(), 0);
        assert_eq!(f.gateway.call_count(Operation::InsertBookingAddons), 0);
        // never retried
        assert_eq!(f.gateway.call_count(Operation::InsertBooking), 1);
    }

    #[tokio::test]
    async fn test_addon_failure_deletes_booking() {
        let f = fixture(500, &[50]);
        f.gateway.fail_next(
            Operation::InsertBookingAddons,
            GatewayError::Network("connection reset".to_string()),
        );

        let err = f
            .workflow
            .book(request(&f, 2, vec![f.catalog[0].id]))
            .await
            .unwrap_err();

        match &err {
            BookingError::AddonsFailed { rolled_back, .. } => assert!(*rolled_back),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.left_orphan());
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(f.gateway.booking_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_compensation_reports_orphan() {
        let f = fixture(500, &[50]);
        f.gateway.fail_next(
            Operation::InsertBookingAddons,
            GatewayError::Timeout(30_000),
        );
        f.gateway
            .fail_next(Operation::DeleteBooking, GatewayError::Network("offline".into()));

        let err = f
            .workflow
            .book(request(&f, 1, vec![f.catalog[0].id]))
            .await
            .unwrap_err();

        assert!(err.left_orphan());
        assert_eq!(f.gateway.booking_count(), 1);
        assert_eq!(f.gateway.booking_addon_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_trip_surfaces_gateway_error() {
        let f = fixture(100, &[]);
        let mut req = request(&f, 1, vec![]);
        req.trip_id = Uuid::new_v4();

        let err = f.workflow.book(req).await.unwrap_err();

        assert!(matches!(err, BookingError::Gateway(GatewayError::NotFound(_))));
        assert_eq!(f.gateway.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_total_fails_without_writing() {
        let f = fixture(100, &[]);
        let huge = f.gateway.add_trip("Moon Base", f.trip.destination_id, Some(Decimal::MAX));
        let mut req = request(&f, 3, vec![]);
        req.trip_id = huge.id;

        let err = f.workflow.book(req).await.unwrap_err();

        assert_eq!(err, BookingError::Pricing(PriceOverflow));
        assert_eq!(err.alert_title(), "Booking Failed");
        assert_eq!(f.gateway.write_calls(), 0);
        assert_eq!(f.gateway.booking_count(), 0);
    }

    #[tokio::test]
    async fn test_quote_does_not_write() {
        let f = fixture(500, &[50, 30]);
        let ids = f.catalog.iter().map(|a| a.id).collect();

        let quote = f.workflow.quote(&request(&f, 2, ids)).await.unwrap();

        assert_eq!(quote.breakdown.final_total, Decimal::from(1160));
        assert_eq!(quote.addons.len(), 2);
        assert_eq!(f.gateway.write_calls(), 0);
    }
}
