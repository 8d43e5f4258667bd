use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use partsledger_core::{DomainError, DomainResult, Entity, ProductId, SaleId, SaleItemId, UserId};

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleStatus {
    Pending,
    Processing,
    #[serde(rename = "Out for Delivery")]
    OutForDelivery,
    Completed,
    Cancelled,
    Returned,
    #[serde(rename = "Partially Returned")]
    PartiallyReturned,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "Pending",
            SaleStatus::Processing => "Processing",
            SaleStatus::OutForDelivery => "Out for Delivery",
            SaleStatus::Completed => "Completed",
            SaleStatus::Cancelled => "Cancelled",
            SaleStatus::Returned => "Returned",
            SaleStatus::PartiallyReturned => "Partially Returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(SaleStatus::Pending),
            "Processing" => Some(SaleStatus::Processing),
            "Out for Delivery" => Some(SaleStatus::OutForDelivery),
            "Completed" => Some(SaleStatus::Completed),
            "Cancelled" => Some(SaleStatus::Cancelled),
            "Returned" => Some(SaleStatus::Returned),
            "Partially Returned" => Some(SaleStatus::PartiallyReturned),
            _ => None,
        }
    }

    /// Terminal sales reject every further update or cancellation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Completed | SaleStatus::Cancelled)
    }

    /// Statuses only the return flow may set.
    fn is_derived_from_returns(&self) -> bool {
        matches!(self, SaleStatus::Returned | SaleStatus::PartiallyReturned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
    #[serde(rename = "Partially Refunded")]
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "Unpaid",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Refunded => "Refunded",
            PaymentStatus::PartiallyRefunded => "Partially Refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Unpaid" => Some(PaymentStatus::Unpaid),
            "Paid" => Some(PaymentStatus::Paid),
            "Refunded" => Some(PaymentStatus::Refunded),
            "Partially Refunded" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    CashOnDelivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentMethod {
    InStorePickup,
    CompanyDelivery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub fulfillment: FulfillmentMethod,
    /// Amount tendered in smallest currency unit.
    pub amount_paid: u64,
}

/// Initial (order, payment) status for a new sale.
///
/// - cash on delivery → Pending / Unpaid
/// - pickup, paid in full → Completed / Paid
/// - company delivery, paid in full → Processing / Paid
/// - anything not paid in full → Pending / Unpaid
pub fn initial_status(payment: &PaymentInfo, total: u64) -> (SaleStatus, PaymentStatus) {
    if payment.method == PaymentMethod::CashOnDelivery {
        return (SaleStatus::Pending, PaymentStatus::Unpaid);
    }
    if payment.amount_paid < total {
        return (SaleStatus::Pending, PaymentStatus::Unpaid);
    }
    match payment.fulfillment {
        FulfillmentMethod::InStorePickup => (SaleStatus::Completed, PaymentStatus::Paid),
        FulfillmentMethod::CompanyDelivery => (SaleStatus::Processing, PaymentStatus::Paid),
    }
}

/// Human-readable sale number, e.g. `SO-20261019-000042`.
pub fn format_sale_number(date: NaiveDate, sequence: u64) -> String {
    format!("SO-{}-{:06}", date.format("%Y%m%d"), sequence)
}

/// One line of a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleItem {
    pub id: SaleItemId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit, captured from the catalog at sale time.
    pub unit_price: u64,
    pub serial_tracked: bool,
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub returned_quantity: i64,
    #[serde(default)]
    pub returned_serials: Vec<String>,
}

impl SaleItem {
    pub fn new(
        product_id: ProductId,
        quantity: i64,
        unit_price: u64,
        serial_tracked: bool,
        serial_numbers: Vec<String>,
    ) -> Self {
        Self {
            id: SaleItemId::new(),
            product_id,
            quantity,
            unit_price,
            serial_tracked,
            serial_numbers,
            returned_quantity: 0,
            returned_serials: Vec::new(),
        }
    }

    pub fn subtotal(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity.max(0) as u64)
    }

    pub fn remaining_returnable(&self) -> i64 {
        self.quantity - self.returned_quantity
    }

    /// Serials consumed by this line that have not come back yet.
    pub fn outstanding_serials(&self) -> impl Iterator<Item = &String> {
        self.serial_numbers
            .iter()
            .filter(move |s| !self.returned_serials.contains(*s))
    }

    pub fn is_fully_returned(&self) -> bool {
        self.returned_quantity >= self.quantity
    }
}

/// Result of applying a manual status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub previous: SaleStatus,
    pub status: SaleStatus,
    pub payment_status: PaymentStatus,
}

impl StatusUpdate {
    /// Cancellation hands outstanding units back to inventory.
    pub fn is_cancellation(&self) -> bool {
        self.status == SaleStatus::Cancelled && self.previous != SaleStatus::Cancelled
    }
}

/// Order header with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub sale_number: String,
    pub customer: CustomerInfo,
    pub payment: PaymentInfo,
    pub status: SaleStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<SaleItem>,
    pub total: u64,
    /// Set once the sale reaches `Completed`; survives the return statuses.
    #[serde(default)]
    pub fulfilled: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// Build a new sale; status follows [`initial_status`].
    pub fn new(
        sale_number: String,
        customer: CustomerInfo,
        payment: PaymentInfo,
        items: Vec<SaleItem>,
        created_by: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if items.is_empty() {
            return Err(DomainError::validation("a sale needs at least one item"));
        }
        if customer.name.trim().is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }
        let total = items.iter().map(SaleItem::subtotal).fold(0u64, u64::saturating_add);
        let (status, payment_status) = initial_status(&payment, total);
        Ok(Self {
            id: SaleId::new(),
            sale_number,
            customer,
            payment,
            status,
            payment_status,
            items,
            total,
            fulfilled: status == SaleStatus::Completed,
            created_by,
            created_at: at,
            updated_at: at,
        })
    }

    pub fn item(&self, id: SaleItemId) -> Option<&SaleItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: SaleItemId) -> Option<&mut SaleItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    pub fn references_product(&self, product_id: ProductId) -> bool {
        self.items.iter().any(|i| i.product_id == product_id)
    }

    pub fn has_returns(&self) -> bool {
        self.items.iter().any(|i| i.returned_quantity > 0)
    }

    /// A completed sale stays closed after returns move it to a return status;
    /// from then on only the return flow changes it.
    pub fn ensure_mutable(&self) -> DomainResult<()> {
        if self.status.is_terminal() || self.fulfilled {
            return Err(DomainError::transition(format!(
                "sale {} is {} and can no longer be changed",
                self.sale_number,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Manual status/payment update from the order desk.
    pub fn update_status(
        &mut self,
        status: Option<SaleStatus>,
        payment_status: Option<PaymentStatus>,
        at: DateTime<Utc>,
    ) -> DomainResult<StatusUpdate> {
        self.ensure_mutable()?;

        let next_status = status.unwrap_or(self.status);
        let next_payment = payment_status.unwrap_or(self.payment_status);

        if status.is_some_and(|s| s.is_derived_from_returns()) {
            return Err(DomainError::transition(
                "returned statuses are set by processing a return",
            ));
        }
        if next_status == SaleStatus::Completed && next_payment != PaymentStatus::Paid {
            return Err(DomainError::transition(
                "a sale can only be completed once it is paid",
            ));
        }

        let previous = self.status;
        self.status = next_status;
        self.payment_status = next_payment;
        self.fulfilled |= next_status == SaleStatus::Completed;
        self.updated_at = at;

        Ok(StatusUpdate {
            previous,
            status: next_status,
            payment_status: next_payment,
        })
    }

    /// Recompute order and payment status after a return has been recorded.
    pub fn recompute_after_return(&mut self, at: DateTime<Utc>) {
        let fully = self.items.iter().all(SaleItem::is_fully_returned);
        let any = self.has_returns();
        if !any {
            return;
        }

        self.status = if fully {
            SaleStatus::Returned
        } else {
            SaleStatus::PartiallyReturned
        };

        if matches!(
            self.payment_status,
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded
        ) {
            self.payment_status = if fully {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            };
        }
        self.updated_at = at;
    }
}

impl Entity for Sale {
    type Id = SaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> CustomerInfo {
        CustomerInfo {
            name: "Garage Nord".to_string(),
            phone: Some("555-0100".to_string()),
            address: None,
        }
    }

    fn payment(method: PaymentMethod, fulfillment: FulfillmentMethod, amount_paid: u64) -> PaymentInfo {
        PaymentInfo {
            method,
            fulfillment,
            amount_paid,
        }
    }

    fn line(quantity: i64, unit_price: u64) -> SaleItem {
        SaleItem::new(ProductId::new(), quantity, unit_price, false, vec![])
    }

    fn sale_with(payment: PaymentInfo) -> Sale {
        Sale::new(
            "SO-20261019-000001".to_string(),
            customer(),
            payment,
            vec![line(2, 1_500), line(1, 4_000)],
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn total_is_sum_of_line_subtotals() {
        let sale = sale_with(payment(PaymentMethod::Cash, FulfillmentMethod::InStorePickup, 7_000));
        assert_eq!(sale.total, 7_000);
    }

    #[test]
    fn initial_status_follows_payment_and_channel() {
        let cod = payment(PaymentMethod::CashOnDelivery, FulfillmentMethod::CompanyDelivery, 0);
        assert_eq!(initial_status(&cod, 100), (SaleStatus::Pending, PaymentStatus::Unpaid));

        let pickup = payment(PaymentMethod::Card, FulfillmentMethod::InStorePickup, 100);
        assert_eq!(initial_status(&pickup, 100), (SaleStatus::Completed, PaymentStatus::Paid));

        let delivery = payment(PaymentMethod::BankTransfer, FulfillmentMethod::CompanyDelivery, 150);
        assert_eq!(initial_status(&delivery, 100), (SaleStatus::Processing, PaymentStatus::Paid));

        let short = payment(PaymentMethod::Cash, FulfillmentMethod::InStorePickup, 99);
        assert_eq!(initial_status(&short, 100), (SaleStatus::Pending, PaymentStatus::Unpaid));
    }

    #[test]
    fn empty_sale_is_rejected() {
        let err = Sale::new(
            "SO-1".to_string(),
            customer(),
            payment(PaymentMethod::Cash, FulfillmentMethod::InStorePickup, 0),
            vec![],
            UserId::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn sale_number_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(format_sale_number(date, 42), "SO-20261019-000042");
    }

    #[test]
    fn terminal_sales_cannot_be_updated() {
        let mut sale = sale_with(payment(PaymentMethod::Cash, FulfillmentMethod::InStorePickup, 7_000));
        assert_eq!(sale.status, SaleStatus::Completed);
        let err = sale
            .update_status(Some(SaleStatus::Cancelled), None, Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state_transition");
        assert_eq!(sale.status, SaleStatus::Completed);
    }

    #[test]
    fn completion_requires_payment() {
        let mut sale = sale_with(payment(
            PaymentMethod::CashOnDelivery,
            FulfillmentMethod::CompanyDelivery,
            0,
        ));
        assert!(sale.update_status(Some(SaleStatus::Completed), None, Utc::now()).is_err());

        sale.update_status(Some(SaleStatus::OutForDelivery), None, Utc::now())
            .unwrap();
        let update = sale
            .update_status(Some(SaleStatus::Completed), Some(PaymentStatus::Paid), Utc::now())
            .unwrap();
        assert_eq!(update.previous, SaleStatus::OutForDelivery);
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(sale.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn return_statuses_cannot_be_set_manually() {
        let mut sale = sale_with(payment(PaymentMethod::CashOnDelivery, FulfillmentMethod::CompanyDelivery, 0));
        assert!(sale.update_status(Some(SaleStatus::Returned), None, Utc::now()).is_err());
    }

    #[test]
    fn cancellation_is_reported_once() {
        let mut sale = sale_with(payment(PaymentMethod::CashOnDelivery, FulfillmentMethod::CompanyDelivery, 0));
        let update = sale
            .update_status(Some(SaleStatus::Cancelled), None, Utc::now())
            .unwrap();
        assert!(update.is_cancellation());
        assert!(sale.ensure_mutable().is_err());
    }

    #[test]
    fn recompute_tracks_partial_and_full_returns() {
        let mut sale = sale_with(payment(PaymentMethod::Card, FulfillmentMethod::InStorePickup, 7_000));
        sale.items[0].returned_quantity = 1;
        sale.recompute_after_return(Utc::now());
        assert_eq!(sale.status, SaleStatus::PartiallyReturned);
        assert_eq!(sale.payment_status, PaymentStatus::PartiallyRefunded);

        sale.items[0].returned_quantity = 2;
        sale.items[1].returned_quantity = 1;
        sale.recompute_after_return(Utc::now());
        assert_eq!(sale.status, SaleStatus::Returned);
        assert_eq!(sale.payment_status, PaymentStatus::Refunded);
    }

    #[test]
    fn completed_sale_stays_closed_after_a_return() {
        let mut sale = sale_with(payment(PaymentMethod::Card, FulfillmentMethod::InStorePickup, 7_000));
        assert!(sale.fulfilled);
        sale.items[0].returned_quantity = 1;
        sale.recompute_after_return(Utc::now());
        assert_eq!(sale.status, SaleStatus::PartiallyReturned);

        let err = sale
            .update_status(Some(SaleStatus::Cancelled), None, Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state_transition");
        assert_eq!(sale.status, SaleStatus::PartiallyReturned);
    }

    #[test]
    fn completing_later_marks_the_sale_fulfilled() {
        let mut sale = sale_with(payment(PaymentMethod::CashOnDelivery, FulfillmentMethod::CompanyDelivery, 0));
        assert!(!sale.fulfilled);
        sale.update_status(Some(SaleStatus::Completed), Some(PaymentStatus::Paid), Utc::now())
            .unwrap();
        assert!(sale.fulfilled);
    }

    #[test]
    fn unpaid_sales_keep_payment_status_on_return() {
        let mut sale = sale_with(payment(PaymentMethod::CashOnDelivery, FulfillmentMethod::CompanyDelivery, 0));
        sale.items[1].returned_quantity = 1;
        sale.recompute_after_return(Utc::now());
        assert_eq!(sale.status, SaleStatus::PartiallyReturned);
        assert_eq!(sale.payment_status, PaymentStatus::Unpaid);
    }

    #[test]
    fn statuses_serialize_with_display_labels() {
        let json = serde_json::to_value(SaleStatus::OutForDelivery).unwrap();
        assert_eq!(json, serde_json::json!("Out for Delivery"));
        assert_eq!(SaleStatus::parse("Partially Returned"), Some(SaleStatus::PartiallyReturned));
        assert_eq!(PaymentStatus::parse(PaymentStatus::PartiallyRefunded.as_str()), Some(PaymentStatus::PartiallyRefunded));
    }
}
