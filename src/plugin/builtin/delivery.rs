//! Delivery scheduling capabilities (`delivery-*`).
//!
//! Slots are simulated: two candidates per day, of which a random subset is
//! offered. Scheduling requires the caller's identity to have been verified
//! earlier in the same session.

use async_trait::async_trait;
use rand::Rng;
use rand::seq::index;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};

use crate::plugin::capabilities::{
    Capability, CapabilityRef, PluginError, ToolContext, ToolError, ToolPlugin, object_schema,
    required_str,
};

pub const DELIVERY_NAMESPACE: &str = "delivery";

pub const DEFAULT_RANGE_IN_DAYS: i64 = 7;
/// Upper bound on the look-ahead window.
pub const MAX_RANGE_IN_DAYS: i64 = 90;
/// Most slots offered in one listing.
pub const MAX_SLOTS: usize = 10;

const SLOT_TIMES: [&str; 2] = ["T08:00:00.046Z", "T10:00:00.046Z"];

pub const IDENTITY_NOT_VERIFIED: &str =
    "Customer identity must be verified before scheduling a delivery.";

/// Delivery scheduling tools.
#[derive(Debug, Default)]
pub struct DeliveryPlugin;

#[async_trait]
impl ToolPlugin for DeliveryPlugin {
    fn namespace(&self) -> &str {
        DELIVERY_NAMESPACE
    }

    async fn connect(&self) -> Result<Vec<CapabilityRef>, PluginError> {
        Ok(vec![
            Arc::new(VerifyCustomerIdentity),
            Arc::new(GetAvailableSlots),
            Arc::new(ScheduleDelivery),
        ])
    }
}

/// One bookable delivery window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverySlot {
    pub id: String,
    pub start_time: String,
}

// =============================================================================
// Slot generation
// =============================================================================

pub fn parse_iso_date(text: &str) -> Result<Date, ToolError> {
    Date::parse(text.trim(), format_description!("[year]-[month]-[day]")).map_err(|e| {
        ToolError::InvalidArguments(format!("start_date '{text}' is not an ISO date: {e}"))
    })
}

fn format_iso_date(date: Date) -> Option<String> {
    date.format(format_description!("[year]-[month]-[day]")).ok()
}

fn today_iso() -> String {
    format_iso_date(OffsetDateTime::now_utc().date()).unwrap_or_default()
}

/// Two candidate start times per day, in chronological order.
pub fn candidate_times(start: Date, days: i64) -> Vec<String> {
    let days = days.clamp(0, MAX_RANGE_IN_DAYS);
    let mut candidates = Vec::with_capacity(days as usize * SLOT_TIMES.len());
    for offset in 0..days {
        let Some(day) = start.checked_add(Duration::days(offset)) else {
            break;
        };
        let Some(day) = format_iso_date(day) else {
            break;
        };
        for time in SLOT_TIMES {
            candidates.push(format!("{day}{time}"));
        }
    }
    candidates
}

/// Pick between zero and [`MAX_SLOTS`] distinct candidates, keep them in
/// chronological order and number them from 1.
pub fn generate_slots<R: Rng>(start: Date, days: i64, rng: &mut R) -> Vec<DeliverySlot> {
    let candidates = candidate_times(start, days);
    if candidates.is_empty() {
        return Vec::new();
    }

    let max_n = MAX_SLOTS.min(candidates.len());
    let n = rng.gen_range(0..=max_n);
    let mut chosen = index::sample(rng, candidates.len(), n).into_vec();
    chosen.sort_unstable();

    chosen
        .into_iter()
        .enumerate()
        .map(|(i, idx)| DeliverySlot {
            id: (i + 1).to_string(),
            start_time: candidates[idx].clone(),
        })
        .collect()
}

fn integer_argument(value: &Value, name: &str) -> Result<i64, ToolError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| ToolError::InvalidArguments(format!("'{name}' is out of range"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ToolError::InvalidArguments(format!("'{name}' must be an integer"))),
        other => Err(ToolError::InvalidArguments(format!(
            "'{name}' must be an integer, got {other}"
        ))),
    }
}

fn object_arguments(arguments: &Value) -> Result<Map<String, Value>, ToolError> {
    match arguments {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

// =============================================================================
// verify_customer_identity
// =============================================================================

pub struct VerifyCustomerIdentity;

#[async_trait]
impl Capability for VerifyCustomerIdentity {
    fn plugin(&self) -> &str {
        DELIVERY_NAMESPACE
    }

    fn name(&self) -> &str {
        "verify_customer_identity"
    }

    fn description(&self) -> &str {
        "Verify the caller owns the order before any changes are made to it."
    }

    fn parameters(&self) -> Value {
        object_schema(
            &[
                ("order_number", "string", "The order number given by the caller."),
                (
                    "phone_number",
                    "string",
                    "The caller's phone number, as returned by call-get_caller_phone_number.",
                ),
            ],
            &["order_number", "phone_number"],
        )
    }

    async fn execute(&self, arguments: &Value, context: &ToolContext) -> Result<Value, ToolError> {
        let order_number = required_str(arguments, "order_number")?.trim();
        let phone_number = required_str(arguments, "phone_number")?.trim();
        if order_number.is_empty() || phone_number.is_empty() {
            return Err(ToolError::InvalidArguments(
                "order_number and phone_number must not be empty".to_string(),
            ));
        }

        context.state.verify(order_number);
        tracing::info!(
            session_id = %context.session_id,
            "Customer identity verified for order {}",
            order_number
        );
        Ok(json!(format!(
            "Customer identity verified for order {order_number}."
        )))
    }
}

// =============================================================================
// get_available_slots_for_delivery
// =============================================================================

pub struct GetAvailableSlots;

#[async_trait]
impl Capability for GetAvailableSlots {
    fn plugin(&self) -> &str {
        DELIVERY_NAMESPACE
    }

    fn name(&self) -> &str {
        "get_available_slots_for_delivery"
    }

    fn description(&self) -> &str {
        "Get the slots that are available for delivery."
    }

    fn parameters(&self) -> Value {
        object_schema(
            &[
                ("order_number", "string", "The order number to get delivery slots for."),
                (
                    "start_date",
                    "string",
                    "The start date for the delivery slots in ISO format, defaulting to today. Use for pagination.",
                ),
                (
                    "range_in_days",
                    "integer",
                    "The number of days to look ahead for delivery slots.",
                ),
            ],
            &["order_number"],
        )
    }

    fn bind_arguments(&self, arguments: &Value) -> Result<Value, ToolError> {
        let mut bound = object_arguments(arguments)?;
        required_str(arguments, "order_number")?;

        let start_date = match bound.get("start_date") {
            None | Some(Value::Null) => today_iso(),
            Some(Value::String(s)) => {
                parse_iso_date(s)?;
                s.trim().to_string()
            }
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!(
                    "'start_date' must be a string, got {other}"
                )));
            }
        };
        let range_in_days = match bound.get("range_in_days") {
            None | Some(Value::Null) => DEFAULT_RANGE_IN_DAYS,
            Some(value) => integer_argument(value, "range_in_days")?,
        };

        bound.insert("start_date".to_string(), json!(start_date));
        bound.insert("range_in_days".to_string(), json!(range_in_days));
        Ok(Value::Object(bound))
    }

    async fn execute(&self, arguments: &Value, context: &ToolContext) -> Result<Value, ToolError> {
        let order_number = required_str(arguments, "order_number")?;
        let start = parse_iso_date(required_str(arguments, "start_date")?)?;
        let range_in_days = arguments
            .get("range_in_days")
            .map(|v| integer_argument(v, "range_in_days"))
            .transpose()?
            .unwrap_or(DEFAULT_RANGE_IN_DAYS);

        let slots = generate_slots(start, range_in_days, &mut rand::thread_rng());
        tracing::info!(
            session_id = %context.session_id,
            "Offering {} delivery slots for order {} from {} over {} days",
            slots.len(),
            order_number,
            start,
            range_in_days
        );
        serde_json::to_value(slots).map_err(|e| ToolError::Execution(e.to_string()))
    }
}

// =============================================================================
// schedule_delivery
// =============================================================================

pub struct ScheduleDelivery;

#[async_trait]
impl Capability for ScheduleDelivery {
    fn plugin(&self) -> &str {
        DELIVERY_NAMESPACE
    }

    fn name(&self) -> &str {
        "schedule_delivery"
    }

    fn description(&self) -> &str {
        "Schedule a delivery for the customer's order."
    }

    fn parameters(&self) -> Value {
        object_schema(
            &[(
                "slot_id",
                "string",
                "The ID of the delivery slot to schedule, retrieved from available slots.",
            )],
            &["slot_id"],
        )
    }

    fn bind_arguments(&self, arguments: &Value) -> Result<Value, ToolError> {
        let mut bound = object_arguments(arguments)?;
        if let Some(Value::Number(n)) = bound.get("slot_id") {
            let slot_id = n.to_string();
            bound.insert("slot_id".to_string(), Value::String(slot_id));
        }
        Ok(Value::Object(bound))
    }

    async fn execute(&self, arguments: &Value, context: &ToolContext) -> Result<Value, ToolError> {
        let slot_id = required_str(arguments, "slot_id")?;
        let Some(order_number) = context.state.verified_order() else {
            tracing::warn!(
                session_id = %context.session_id,
                "Refusing to schedule slot {} before identity verification",
                slot_id
            );
            return Err(ToolError::Precondition(IDENTITY_NOT_VERIFIED.to_string()));
        };

        tracing::info!(
            session_id = %context.session_id,
            "Scheduled slot {} for order {}",
            slot_id,
            order_number
        );
        Ok(json!(format!("Delivery has been scheduled for slot {slot_id}.")))
    }
}
