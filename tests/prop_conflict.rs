use chrono::NaiveDate;
use proptest::prelude::*;

use hallslot::duration::duration;
use hallslot::engine::{check_conflict, EngineError};
use hallslot::model::{Interval, TimeOfDay};

fn time_of_day() -> impl Strategy<Value = TimeOfDay> {
    (0u32..24, 0u32..60).prop_map(|(h, m)| TimeOfDay::new(h, m).unwrap())
}

fn interval() -> impl Strategy<Value = Interval> {
    (0i64..3, time_of_day(), time_of_day())
        .prop_filter("non-empty", |(_, s, e)| s != e)
        .prop_map(|(offset, start, end)| {
            let date = NaiveDate::from_ymd_opt(2030, 1, 10).unwrap() + chrono::Duration::days(offset);
            Interval::new(date, start, end).unwrap()
        })
}

proptest! {
    #[test]
    fn overlap_is_symmetric(a in interval(), b in interval()) {
        prop_assert_eq!(
            check_conflict(&a, &[b]).is_conflict(),
            check_conflict(&b, &[a]).is_conflict()
        );
    }

    #[test]
    fn interval_conflicts_with_itself(a in interval()) {
        prop_assert!(check_conflict(&a, &[a]).is_conflict());
    }

    #[test]
    fn conflict_matches_absolute_spans(a in interval(), b in interval()) {
        prop_assert_eq!(check_conflict(&a, &[b]).is_conflict(), a.span().overlaps(&b.span()));
    }

    #[test]
    fn back_to_back_never_conflicts(a in interval(), len in 1i64..600) {
        let end_minutes = a.end.minutes();
        let next_end = (end_minutes + len) % 1440;
        prop_assume!(next_end != end_minutes);
        let next = Interval::new(
            a.end_date(),
            a.end,
            TimeOfDay::new((next_end / 60) as u32, (next_end % 60) as u32).unwrap(),
        ).unwrap();
        prop_assert!(!check_conflict(&next, &[a]).is_conflict());
    }

    #[test]
    fn conflict_reports_first_hit(a in interval(), b in interval(), c in interval()) {
        let result = check_conflict(&a, &[b, c]);
        if check_conflict(&a, &[b]).is_conflict() {
            prop_assert_eq!(result.available_after(), Some(b.end));
        } else if check_conflict(&a, &[c]).is_conflict() {
            prop_assert_eq!(result.available_after(), Some(c.end));
        } else {
            prop_assert!(!result.is_conflict());
        }
    }

    #[test]
    fn conflict_check_is_idempotent(a in interval(), existing in proptest::collection::vec(interval(), 0..8)) {
        let first = check_conflict(&a, &existing);
        let second = check_conflict(&a, &existing);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn duration_is_positive_and_under_a_day(s in time_of_day(), e in time_of_day()) {
        match duration(s, e) {
            Ok(d) => {
                prop_assert!(d.total_minutes > 0 && d.total_minutes < 1440);
                prop_assert_eq!(d.whole_hours * 60 + d.minutes, d.total_minutes);
            }
            Err(err) => {
                prop_assert_eq!(s, e);
                prop_assert_eq!(err, EngineError::EmptyInterval);
            }
        }
    }

    #[test]
    fn time_of_day_display_parses_back(t in time_of_day()) {
        prop_assert_eq!(t.to_string().parse::<TimeOfDay>().unwrap(), t);
    }
}
