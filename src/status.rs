//! Derived temporal status.
//!
//! The one place that decides whether a reservation is upcoming, active or
//! expired. Display and the cancel/extend gates both call [`derive`]; nothing
//! else re-derives it.

use serde::Serialize;

use crate::model::{LedgerStatus, Ms, Reservation, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedStatus {
    Upcoming,
    Active,
    Expired,
    Cancelled,
    Completed,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedStatus::Upcoming => "upcoming",
            DerivedStatus::Active => "active",
            DerivedStatus::Expired => "expired",
            DerivedStatus::Cancelled => "cancelled",
            DerivedStatus::Completed => "completed",
        }
    }
}

/// `now` must already be on the storage wall clock.
pub fn derive(ledger: LedgerStatus, span: Span, now: Ms) -> DerivedStatus {
    match ledger {
        LedgerStatus::Cancelled => DerivedStatus::Cancelled,
        LedgerStatus::Completed => DerivedStatus::Completed,
        LedgerStatus::Active if now < span.start => DerivedStatus::Upcoming,
        LedgerStatus::Active if now <= span.end => DerivedStatus::Active,
        LedgerStatus::Active => DerivedStatus::Expired,
    }
}

pub fn of(reservation: &Reservation, now: Ms) -> DerivedStatus {
    derive(reservation.status, reservation.span, now)
}

/// Cancellable while still ledger-active and not yet past its end.
pub fn can_cancel(reservation: &Reservation, now: Ms) -> bool {
    reservation.is_active()
        && matches!(of(reservation, now), DerivedStatus::Upcoming | DerivedStatus::Active)
}

/// Extendable only while it is running; an upcoming booking cannot be extended.
pub fn can_extend(reservation: &Reservation, now: Ms) -> bool {
    reservation.is_active() && of(reservation, now) == DerivedStatus::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PaymentStatus;
    use proptest::prelude::*;
    use ulid::Ulid;

    const START: Ms = 10_000;
    const END: Ms = 20_000;

    fn reservation(status: LedgerStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user_id: Ulid::new(),
            spot_id: Ulid::new(),
            span: Span::new(START, END),
            total_cost: 1_000,
            status,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            transaction_id: None,
            created_at: 0,
        }
    }

    #[test]
    fn active_ledger_follows_the_clock() {
        let span = Span::new(START, END);
        assert_eq!(derive(LedgerStatus::Active, span, START - 1), DerivedStatus::Upcoming);
        assert_eq!(derive(LedgerStatus::Active, span, START), DerivedStatus::Active);
        assert_eq!(derive(LedgerStatus::Active, span, END), DerivedStatus::Active); // end inclusive
        assert_eq!(derive(LedgerStatus::Active, span, END + 1), DerivedStatus::Expired);
    }

    #[test]
    fn closed_ledger_passes_through() {
        let span = Span::new(START, END);
        for now in [0, START, END, END + 1_000_000] {
            assert_eq!(derive(LedgerStatus::Cancelled, span, now), DerivedStatus::Cancelled);
            assert_eq!(derive(LedgerStatus::Completed, span, now), DerivedStatus::Completed);
        }
    }

    #[test]
    fn cancel_gate() {
        let r = reservation(LedgerStatus::Active);
        assert!(can_cancel(&r, START - 1));
        assert!(can_cancel(&r, START + 1));
        assert!(!can_cancel(&r, END + 1));
        assert!(!can_cancel(&reservation(LedgerStatus::Cancelled), START));
        assert!(!can_cancel(&reservation(LedgerStatus::Completed), START));
    }

    #[test]
    fn extend_gate() {
        let r = reservation(LedgerStatus::Active);
        assert!(!can_extend(&r, START - 1));
        assert!(can_extend(&r, START));
        assert!(can_extend(&r, END));
        assert!(!can_extend(&r, END + 1));
        assert!(!can_extend(&reservation(LedgerStatus::Cancelled), START + 1));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&DerivedStatus::Upcoming).unwrap();
        assert_eq!(json, "\"upcoming\"");
        assert_eq!(DerivedStatus::Expired.as_str(), "expired");
    }

    proptest! {
        #[test]
        fn derivation_depends_only_on_inputs(start in 0i64..1_000_000, len in 1i64..1_000_000, now in 0i64..3_000_000) {
            let span = Span::new(start, start + len);
            let a = derive(LedgerStatus::Active, span, now);
            let b = of(&Reservation { span, ..reservation(LedgerStatus::Active) }, now);
            prop_assert_eq!(a, b);
            let expected = if now < span.start {
                DerivedStatus::Upcoming
            } else if now <= span.end {
                DerivedStatus::Active
            } else {
                DerivedStatus::Expired
            };
            prop_assert_eq!(a, expected);
        }

        #[test]
        fn overlap_is_symmetric(s1 in 0i64..1_000, l1 in 1i64..500, s2 in 0i64..1_000, l2 in 1i64..500) {
            let a = Span::new(s1, s1 + l1);
            let b = Span::new(s2, s2 + l2);
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }
    }
}
