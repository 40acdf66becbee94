/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Saturating age cutoffs for retention sweeps and historical queries

use chrono::{DateTime, Duration, Utc};

/// `days` as a duration, saturating at the largest representable span
pub(crate) fn days(days: u32) -> Duration {
    Duration::try_days(i64::from(days)).unwrap_or(Duration::MAX)
}

/// `hours` as a duration, saturating at the largest representable span
pub(crate) fn hours(hours: u32) -> Duration {
    Duration::try_hours(i64::from(hours)).unwrap_or(Duration::MAX)
}

/// The instant `age` ago. Ages reaching past the earliest representable
/// instant select everything.
pub(crate) fn cutoff(age: Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
