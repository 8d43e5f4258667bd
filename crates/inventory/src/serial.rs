use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partsledger_core::{DomainError, DomainResult, ProductId, SupplierId};

/// Lifecycle state of one tracked unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialStatus {
    Available,
    Sold,
    Defective,
    Returned,
}

impl SerialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerialStatus::Available => "available",
            SerialStatus::Sold => "sold",
            SerialStatus::Defective => "defective",
            SerialStatus::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(SerialStatus::Available),
            "sold" => Some(SerialStatus::Sold),
            "defective" => Some(SerialStatus::Defective),
            "returned" => Some(SerialStatus::Returned),
            _ => None,
        }
    }

    /// `returned` units are back on the shelf: same edges as `available`,
    /// different label for the audit trail.
    pub fn is_on_hand(&self) -> bool {
        matches!(self, SerialStatus::Available | SerialStatus::Returned)
    }

    /// Sold and defective units are evidence and may never be discarded.
    pub fn is_immutable_evidence(&self) -> bool {
        matches!(self, SerialStatus::Sold | SerialStatus::Defective)
    }
}

impl core::fmt::Display for SerialStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-status tally of serial numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialCounts {
    pub available: u64,
    pub sold: u64,
    pub defective: u64,
    pub returned: u64,
}

impl SerialCounts {
    pub fn record(&mut self, status: SerialStatus) {
        self.add(status, 1);
    }

    pub fn add(&mut self, status: SerialStatus, n: u64) {
        match status {
            SerialStatus::Available => self.available += n,
            SerialStatus::Sold => self.sold += n,
            SerialStatus::Defective => self.defective += n,
            SerialStatus::Returned => self.returned += n,
        }
    }

    pub fn merge(&mut self, other: &SerialCounts) {
        self.available += other.available;
        self.sold += other.sold;
        self.defective += other.defective;
        self.returned += other.returned;
    }

    /// Units that can still be sold or sent back to a supplier.
    pub fn on_hand(&self) -> u64 {
        self.available + self.returned
    }

    pub fn total(&self) -> u64 {
        self.available + self.sold + self.defective + self.returned
    }
}

/// The only edges a serial may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialTransition {
    /// available|returned → sold (a sale consumed the unit).
    Sell,
    /// available|returned → defective (unit sent back to the supplier).
    ReturnToSupplier,
    /// sold → returned (customer return, restocked).
    CustomerReturnRestocked,
    /// sold → defective (customer return, not restocked).
    CustomerReturnDefective,
    /// sold → available (the sale itself was reversed).
    ReverseSale,
}

impl SerialTransition {
    pub fn target(&self) -> SerialStatus {
        match self {
            SerialTransition::Sell => SerialStatus::Sold,
            SerialTransition::ReturnToSupplier => SerialStatus::Defective,
            SerialTransition::CustomerReturnRestocked => SerialStatus::Returned,
            SerialTransition::CustomerReturnDefective => SerialStatus::Defective,
            SerialTransition::ReverseSale => SerialStatus::Available,
        }
    }

    pub fn allowed_from(&self, from: SerialStatus) -> bool {
        match self {
            SerialTransition::Sell | SerialTransition::ReturnToSupplier => from.is_on_hand(),
            SerialTransition::CustomerReturnRestocked
            | SerialTransition::CustomerReturnDefective
            | SerialTransition::ReverseSale => from == SerialStatus::Sold,
        }
    }
}

/// One individually tracked unit. Never deleted, only marked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialNumber {
    pub serial: String,
    pub product_id: ProductId,
    pub status: SerialStatus,
    pub notes: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canonical form of a serial string: surrounding whitespace removed.
pub fn normalize_serial(raw: &str) -> DomainResult<String> {
    let serial = raw.trim();
    if serial.is_empty() {
        return Err(DomainError::serial_mismatch("serial number cannot be empty"));
    }
    Ok(serial.to_string())
}

impl SerialNumber {
    /// A freshly registered unit, `available`.
    pub fn register(
        serial: &str,
        product_id: ProductId,
        supplier_id: Option<SupplierId>,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            serial: normalize_serial(serial)?,
            product_id,
            status: SerialStatus::Available,
            notes,
            supplier_id,
            created_at: at,
            updated_at: at,
        })
    }

    pub fn ensure_belongs_to(&self, product_id: ProductId) -> DomainResult<()> {
        if self.product_id != product_id {
            return Err(DomainError::serial_mismatch(format!(
                "serial {} does not belong to product {}",
                self.serial, product_id
            )));
        }
        Ok(())
    }

    /// Move along one edge of the state machine, or fail with
    /// `SerialNotAvailable` leaving the unit untouched.
    pub fn transition(&mut self, transition: SerialTransition, at: DateTime<Utc>) -> DomainResult<SerialStatus> {
        if !transition.allowed_from(self.status) {
            return Err(DomainError::SerialNotAvailable {
                serial: self.serial.clone(),
                status: self.status.to_string(),
            });
        }
        self.status = transition.target();
        self.updated_at = at;
        Ok(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit() -> SerialNumber {
        SerialNumber::register("ALT-0001", ProductId::new(), None, None, Utc::now()).unwrap()
    }

    #[test]
    fn registration_trims_and_starts_available() {
        let serial = SerialNumber::register("  ALT-9 ", ProductId::new(), None, None, Utc::now()).unwrap();
        assert_eq!(serial.serial, "ALT-9");
        assert_eq!(serial.status, SerialStatus::Available);
    }

    #[test]
    fn blank_serial_is_a_mismatch() {
        let err = SerialNumber::register("   ", ProductId::new(), None, None, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "serial_mismatch");
    }

    #[test]
    fn full_customer_lifecycle() {
        let mut serial = unit();
        serial.transition(SerialTransition::Sell, Utc::now()).unwrap();
        serial.transition(SerialTransition::CustomerReturnRestocked, Utc::now()).unwrap();
        assert_eq!(serial.status, SerialStatus::Returned);

        // Returned behaves like available.
        serial.transition(SerialTransition::Sell, Utc::now()).unwrap();
        assert_eq!(serial.status, SerialStatus::Sold);
    }

    #[test]
    fn sold_unit_cannot_go_back_to_supplier() {
        let mut serial = unit();
        serial.transition(SerialTransition::Sell, Utc::now()).unwrap();
        let err = serial.transition(SerialTransition::ReturnToSupplier, Utc::now()).unwrap_err();
        match err {
            DomainError::SerialNotAvailable { serial: s, status } => {
                assert_eq!(s, "ALT-0001");
                assert_eq!(status, "sold");
            }
            other => panic!("expected SerialNotAvailable, got {other:?}"),
        }
        assert_eq!(serial.status, SerialStatus::Sold);
    }

    #[test]
    fn available_cannot_jump_to_returned() {
        let mut serial = unit();
        assert!(serial.transition(SerialTransition::CustomerReturnRestocked, Utc::now()).is_err());
        assert_eq!(serial.status, SerialStatus::Available);
    }

    #[test]
    fn ownership_is_checked() {
        let serial = unit();
        assert!(serial.ensure_belongs_to(serial.product_id).is_ok());
        assert_eq!(serial.ensure_belongs_to(ProductId::new()).unwrap_err().code(), "serial_mismatch");
    }

    #[test]
    fn status_round_trips_through_labels() {
        for status in [
            SerialStatus::Available,
            SerialStatus::Sold,
            SerialStatus::Defective,
            SerialStatus::Returned,
        ] {
            assert_eq!(SerialStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SerialStatus::parse("lost"), None);
    }

    #[test]
    fn counts_treat_returned_as_on_hand() {
        let mut counts = SerialCounts::default();
        for status in [
            SerialStatus::Available,
            SerialStatus::Returned,
            SerialStatus::Sold,
            SerialStatus::Defective,
            SerialStatus::Sold,
        ] {
            counts.record(status);
        }
        assert_eq!(counts.on_hand(), 2);
        assert_eq!(counts.sold, 2);
        assert_eq!(counts.total(), 5);
    }

    fn any_transition() -> impl Strategy<Value = SerialTransition> {
        prop_oneof![
            Just(SerialTransition::Sell),
            Just(SerialTransition::ReturnToSupplier),
            Just(SerialTransition::CustomerReturnRestocked),
            Just(SerialTransition::CustomerReturnDefective),
            Just(SerialTransition::ReverseSale),
        ]
    }

    proptest! {
        /// Property: whatever is attempted, defective is terminal and no
        /// observed step goes directly from available to returned.
        #[test]
        fn state_machine_never_escapes_terminal_states(
            attempts in prop::collection::vec(any_transition(), 1..40)
        ) {
            let mut serial = unit();
            for attempt in attempts {
                let before = serial.status;
                let result = serial.transition(attempt, Utc::now());
                let after = serial.status;

                if before == SerialStatus::Defective {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(after, SerialStatus::Defective);
                }
                prop_assert!(!(before == SerialStatus::Available && after == SerialStatus::Returned));
                if result.is_err() {
                    prop_assert_eq!(before, after);
                }
            }
        }
    }
}
