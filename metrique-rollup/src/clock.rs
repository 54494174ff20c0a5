// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::UNIX_EPOCH;

use metrique_timesource::TimeSource;

/// Milliseconds since the Unix epoch according to `time_source`. Times before the epoch read as 0.
pub(crate) fn now_millis(time_source: &TimeSource) -> u64 {
    time_source
        .system_time()
        .as_std()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
