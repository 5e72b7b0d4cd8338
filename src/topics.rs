//! Well-known topics and the payload type published under each.

use crate::bus::Topic;
use crate::model::{ArrayStatus, CollectorStateEvent, SystemInfo, UpsStatus};

pub const SYSTEM_UPDATE: Topic<SystemInfo> = Topic::new("system_update");
pub const ARRAY_STATUS_UPDATE: Topic<ArrayStatus> = Topic::new("array_status_update");
pub const UPS_STATUS_UPDATE: Topic<UpsStatus> = Topic::new("ups_status_update");
pub const COLLECTOR_STATE_CHANGE: Topic<CollectorStateEvent> = Topic::new("collector_state_change");

/// Names of every topic above, for subscribers that want them all.
pub const ALL: [&str; 4] = [
    SYSTEM_UPDATE.name(),
    ARRAY_STATUS_UPDATE.name(),
    UPS_STATUS_UPDATE.name(),
    COLLECTOR_STATE_CHANGE.name(),
];
