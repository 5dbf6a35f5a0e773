// Profile and booking history for the signed-in user

use crate::gateway::{Gateway, GatewayError};
use crate::models::{Booking, BookingDetails, ProfileUpdate, UserProfile};
use crate::session::SessionHolder;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub const RECENT_BOOKINGS_DAYS: i64 = 30;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccountError {
    #[error("Please sign in to view your account.")]
    SignInRequired,

    #[error("First name and last name are required")]
    NameRequired,

    #[error("{}", .0.message())]
    Gateway(#[from] GatewayError),
}

impl AccountError {
    pub fn alert_title(&self) -> &'static str {
        match self {
            AccountError::NameRequired => "Validation Error",
            _ => "Error",
        }
    }
}

pub struct Account<G: Gateway + ?Sized> {
    gateway: Arc<G>,
    session: SessionHolder,
}

impl<G: Gateway + ?Sized> Account<G> {
    pub fn new(gateway: Arc<G>, session: SessionHolder) -> Self {
        Self { gateway, session }
    }

    fn user_id(&self) -> Result<Uuid, AccountError> {
        self.session.user_id().ok_or(AccountError::SignInRequired)
    }

    pub async fn profile(&self) -> Result<UserProfile, AccountError> {
        let user_id = self.user_id()?;
        Ok(self.gateway.get_profile(user_id).await?)
    }

    // Names are required after trimming; a blank avatar URL clears it
    pub async fn update_profile(
        &self,
        first_name: &str,
        last_name: &str,
        logo_url: &str,
    ) -> Result<UserProfile, AccountError> {
        let user_id = self.user_id()?;
        let first_name = first_name.trim();
        let last_name = last_name.trim();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(AccountError::NameRequired);
        }
        let logo_url = Some(logo_url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        let profile = self
            .gateway
            .update_profile(
                user_id,
                ProfileUpdate {
                    first_name: first_name.to_string(),
                    last_name: last_name.to_string(),
                    logo_url,
                },
            )
            .await?;
        info!(%user_id, "profile updated");
        Ok(profile)
    }

    pub async fn bookings(&self) -> Result<Vec<Booking>, AccountError> {
        let user_id = self.user_id()?;
        Ok(self.gateway.list_bookings(user_id).await?)
    }

    pub async fn booking_details(&self, booking_id: Uuid) -> Result<BookingDetails, AccountError> {
        self.user_id()?;
        let (booking, addons) = futures::try_join!(
            self.gateway.get_booking(booking_id),
            self.gateway.booking_addons(booking_id)
        )?;
        Ok(BookingDetails { booking, addons })
    }

    // Bookings made in the thirty days up to `now`
    pub async fn recent_bookings_count(&self, now: DateTime<Utc>) -> Result<usize, AccountError> {
        let user_id = self.user_id()?;
        let since = now - Duration::days(RECENT_BOOKINGS_DAYS);
        Ok(self.gateway.count_bookings_since(user_id, since).await?)
    }
}
