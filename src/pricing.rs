// Booking price computation
//
// Trip price is per person and add-ons are priced per traveler:
//
//   addons_unit_total = sum(selected add-on prices)
//   subtotal          = trip_price * people
//   addons_total      = addons_unit_total * people
//   final_total       = subtotal + addons_total
//
// All amounts are exact decimals; nothing is rounded. A total that does
// not fit in a `Decimal` is an error rather than a panic.

use crate::models::Addon;
use rust_decimal::Decimal;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("The booking total is too large to compute.")]
pub struct PriceOverflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub unit_price: Decimal,
    pub people_count: u32,
    pub addons_unit_total: Decimal,
    pub subtotal: Decimal,
    pub addons_total: Decimal,
    pub final_total: Decimal,
}

// Party size is floor-clamped to one traveler; there is no upper bound
pub fn clamp_people(people_count: u32) -> u32 {
    people_count.max(1)
}

// Catalog add-ons whose id was selected, in catalog order. Unknown ids are
// dropped and a repeated id counts once.
pub fn select_addons<'a>(catalog: &'a [Addon], selected_ids: &[Uuid]) -> Vec<&'a Addon> {
    let selected: HashSet<&Uuid> = selected_ids.iter().collect();
    catalog
        .iter()
        .filter(|addon| selected.contains(&addon.id))
        .collect()
}

pub fn compute(
    trip_price: Option<Decimal>,
    people_count: u32,
    addons: &[&Addon],
) -> Result<PriceBreakdown, PriceOverflow> {
    let people_count = clamp_people(people_count);
    let people = Decimal::from(people_count);
    let unit_price = trip_price.unwrap_or(Decimal::ZERO);

    let addons_unit_total = addons
        .iter()
        .try_fold(Decimal::ZERO, |sum, addon| sum.checked_add(addon.price))
        .ok_or(PriceOverflow)?;
    let subtotal = unit_price.checked_mul(people).ok_or(PriceOverflow)?;
    let addons_total = addons_unit_total.checked_mul(people).ok_or(PriceOverflow)?;
    let final_total = subtotal.checked_add(addons_total).ok_or(PriceOverflow)?;

    Ok(PriceBreakdown {
        unit_price,
        people_count,
        addons_unit_total,
        subtotal,
        addons_total,
        final_total,
    })
}
