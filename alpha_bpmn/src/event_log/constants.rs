/// Key for the activity name of an event (`concept:name`)
pub const ACTIVITY_NAME: &str = "concept:name";

/// Key for the resource executing an event (`org:resource`)
pub const RESOURCE_NAME: &str = "org:resource";

/// Key for the timestamp of an event (`time:timestamp`)
pub const TIMESTAMP_NAME: &str = "time:timestamp";
