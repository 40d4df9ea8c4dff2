use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::error::BookingError;
use crate::models::{Booking, BookingStatus, ClassInstance};

/// Studio rules consumed by booking and scheduling.
#[derive(Debug, Clone)]
pub struct StudioPolicy {
    pub cancellation: CancellationPolicy,
    pub hours: OperatingHours,
    /// Active bookings a client may hold at once; `None` means unlimited.
    pub max_bookings_per_user: Option<u32>,
}

impl Default for StudioPolicy {
    fn default() -> Self {
        Self {
            cancellation: CancellationPolicy::new(24),
            hours: OperatingHours::default(),
            max_bookings_per_user: Some(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationPolicy {
    notice: Duration,
}

impl CancellationPolicy {
    pub fn new(notice_hours: u32) -> Self {
        Self {
            notice: Duration::hours(i64::from(notice_hours)),
        }
    }

    pub fn notice(&self) -> Duration {
        self.notice
    }

    /// Whether `booking` may still be cancelled at `now`. Pure, so it is also
    /// used to decide whether to offer cancellation at all.
    pub fn can_cancel(&self, class: &ClassInstance, booking: &Booking, now: NaiveDateTime) -> bool {
        if booking.status == BookingStatus::Cancelled {
            return false;
        }
        let start = class.starts_at();
        if start <= now {
            return false;
        }
        start - now >= self.notice
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatingHours {
    pub open_days: Vec<Weekday>,
    pub opens: NaiveTime,
    pub closes: NaiveTime,
    pub holidays: Vec<NaiveDate>,
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            open_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            opens: NaiveTime::MIN + Duration::hours(7),
            closes: NaiveTime::MIN + Duration::hours(20),
            holidays: Vec::new(),
        }
    }
}

impl OperatingHours {
    /// Rejects a class that would start on a closed day or run outside
    /// opening hours.
    pub fn admits(&self, date: NaiveDate, time: NaiveTime, duration_min: u32) -> Result<(), BookingError> {
        if self.holidays.contains(&date) {
            return Err(BookingError::Validation(format!(
                "the studio is closed on {date} (holiday)"
            )));
        }
        if !self.open_days.contains(&date.weekday()) {
            return Err(BookingError::Validation(format!(
                "the studio is closed on {}",
                date.weekday()
            )));
        }
        let start = date.and_time(time);
        let end = start + Duration::minutes(i64::from(duration_min));
        if time < self.opens || end > date.and_time(self.closes) {
            return Err(BookingError::Validation(format!(
                "classes must run between {} and {}",
                self.opens.format("%H:%M"),
                self.closes.format("%H:%M")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassStatus, PaymentStatus};

    fn class_at(start: NaiveDateTime) -> ClassInstance {
        ClassInstance {
            id: "c1".into(),
            class_type_id: "t1".into(),
            instructor_id: "i1".into(),
            date: start.date(),
            time: start.time(),
            duration_min: 55,
            equipment_id: "e1".into(),
            max_participants: 6,
            current_participants: vec!["a".into()],
            waiting_list: vec![],
            status: ClassStatus::Scheduled,
            notes: None,
            price: 18.0,
        }
    }

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: "b1".into(),
            class_id: "c1".into(),
            client_id: "a".into(),
            booking_date: NaiveDate::from_ymd_opt(2025, 11, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            status,
            payment_status: PaymentStatus::Pending,
            notes: None,
            cancellation_reason: None,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 20)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_cancellation_window_boundary() {
        let policy = CancellationPolicy::new(24);
        let confirmed = booking(BookingStatus::Confirmed);

        let later = class_at(now() + Duration::hours(24) + Duration::minutes(1));
        assert!(policy.can_cancel(&later, &confirmed, now()));

        let exactly = class_at(now() + Duration::hours(24));
        assert!(policy.can_cancel(&exactly, &confirmed, now()));

        let sooner = class_at(now() + Duration::hours(23) + Duration::minutes(59));
        assert!(!policy.can_cancel(&sooner, &confirmed, now()));
    }

    #[test]
    fn test_started_class_is_never_cancellable() {
        let policy = CancellationPolicy::new(0);
        let confirmed = booking(BookingStatus::Confirmed);
        assert!(!policy.can_cancel(&class_at(now()), &confirmed, now()));
        assert!(!policy.can_cancel(&class_at(now() - Duration::minutes(10)), &confirmed, now()));
        assert!(policy.can_cancel(&class_at(now() + Duration::minutes(1)), &confirmed, now()));
    }

    #[test]
    fn test_cancelled_booking_is_not_cancellable() {
        let policy = CancellationPolicy::new(24);
        let class = class_at(now() + Duration::days(7));
        assert!(!policy.can_cancel(&class, &booking(BookingStatus::Cancelled), now()));
        assert!(policy.can_cancel(&class, &booking(BookingStatus::Waiting), now()));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let policy = CancellationPolicy::new(12);
        let class = class_at(now() + Duration::hours(13));
        assert!(policy.can_cancel(&class, &booking(BookingStatus::Confirmed), now()));
        assert!(!CancellationPolicy::new(24).can_cancel(&class, &booking(BookingStatus::Confirmed), now()));
    }

    #[test]
    fn test_default_hours_span_seven_to_eight() {
        let hours = OperatingHours::default();
        assert_eq!(hours.opens, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(hours.closes, NaiveTime::from_hms_opt(20, 0, 0).unwrap());
        assert_eq!(hours.open_days.len(), 5);
    }

    #[test]
    fn test_operating_hours() {
        let hours = OperatingHours {
            holidays: vec![NaiveDate::from_ymd_opt(2025, 12, 8).unwrap()],
            ..OperatingHours::default()
        };
        // Monday 24 Nov 2025
        let monday = NaiveDate::from_ymd_opt(2025, 11, 24).unwrap();
        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();

        assert!(hours.admits(monday, at(9, 0), 60).is_ok());
        assert!(hours.admits(monday, at(19, 0), 60).is_ok());
        assert!(hours.admits(monday, at(19, 30), 60).is_err());
        assert!(hours.admits(monday, at(6, 30), 60).is_err());

        let saturday = NaiveDate::from_ymd_opt(2025, 11, 29).unwrap();
        assert!(hours.admits(saturday, at(9, 0), 60).is_err());

        let holiday = NaiveDate::from_ymd_opt(2025, 12, 8).unwrap();
        assert!(matches!(
            hours.admits(holiday, at(9, 0), 60),
            Err(BookingError::Validation(_))
        ));
    }
}
