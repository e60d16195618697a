//! MQTT topic builders.
//!
//! Meter readings publish under `rtlamr/<id>/...`; decoded sensor events
//! arrive on `rtl_433/<model>/events`.

/// Topic namespace for meter readings.
pub const METER_PREFIX: &str = "rtlamr";

/// Topic namespace used by the demodulator for sensor events.
pub const SENSOR_PREFIX: &str = "rtl_433";

/// Subscription filter matching every device's event stream.
pub const SENSOR_EVENTS_FILTER: &str = "rtl_433/+/events";

/// Topic carrying a reading's protocol variant.
///
/// # Example
/// ```
/// use rfbridge_common::topics::meter_message_type;
///
/// assert_eq!(meter_message_type("123"), "rtlamr/123/message_type");
/// ```
pub fn meter_message_type(id: &str) -> String {
    format!("{}/{}/message_type", METER_PREFIX, id)
}

/// Topic carrying a reading's meter type label (SCM and SCM+ only).
///
/// # Example
/// ```
/// use rfbridge_common::topics::meter_type;
///
/// assert_eq!(meter_type("123"), "rtlamr/123/type");
/// ```
pub fn meter_type(id: &str) -> String {
    format!("{}/{}/type", METER_PREFIX, id)
}

/// Topic carrying a reading's consumption value.
///
/// # Example
/// ```
/// use rfbridge_common::topics::meter_consumption;
///
/// assert_eq!(meter_consumption("123"), "rtlamr/123/consumption");
/// ```
pub fn meter_consumption(id: &str) -> String {
    format!("{}/{}/consumption", METER_PREFIX, id)
}

/// Check whether a concrete topic matches the sensor event filter.
///
/// rumqttc delivers the concrete topic with each publish; this mirrors the
/// single-level `+` wildcard in [`SENSOR_EVENTS_FILTER`].
///
/// # Example
/// ```
/// use rfbridge_common::topics::is_sensor_event_topic;
///
/// assert!(is_sensor_event_topic("rtl_433/Acurite-Tower/events"));
/// assert!(!is_sensor_event_topic("rtl_433/Acurite-Tower/states"));
/// ```
pub fn is_sensor_event_topic(topic: &str) -> bool {
    let mut parts = topic.split('/');

    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(SENSOR_PREFIX), Some(device), Some("events"), None) if !device.is_empty()
    )
}
