//! Business payloads carried in `Envelope::data`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::{require_non_empty, require_positive, ValidationError};

/// A table reservation.
///
/// Clients usually send only the booking fields; `id`, `createdAt` and
/// `lastModifiedAt` are stamped by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(with = "slot_time")]
    pub reservation_date_time: NaiveDateTime,
    #[serde(default)]
    pub number_of_guests: i32,
    #[serde(default)]
    pub special_requests: Option<String>,
    #[serde(default)]
    pub table_number: i32,
    #[serde(default)]
    pub is_confirmed: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn new(
        customer_name: impl Into<String>,
        reservation_date_time: NaiveDateTime,
        number_of_guests: i32,
        table_number: i32,
    ) -> Self {
        Self {
            id: 0,
            customer_name: customer_name.into(),
            phone_number: String::new(),
            reservation_date_time,
            number_of_guests,
            special_requests: None,
            table_number,
            is_confirmed: false,
            created_at: DateTime::<Utc>::default(),
            last_modified_at: None,
        }
    }

    /// The `(date-time, table)` pair that must be unique across the store.
    pub fn slot(&self) -> (NaiveDateTime, i32) {
        (self.reservation_date_time, self.table_number)
    }

    pub fn conflicts_with(&self, other: &Reservation) -> bool {
        self.id != other.id && self.slot() == other.slot()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("customerName", &self.customer_name)?;
        require_positive("numberOfGuests", self.number_of_guests)?;
        require_positive("tableNumber", self.table_number)?;
        Ok(())
    }
}

/// Payload of `get` and `delete` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdLookup {
    pub id: i64,
}

/// Structured error body returned instead of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: bool,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of a bool and a string always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"error":true,"message":""}"#))
    }

    /// Parse `body` as an error body, returning `None` for anything else.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .filter(|b| b.error)
    }
}

/// Date-time format of `reservationDateTime`.
///
/// Accepts minutes or seconds precision on input and always writes seconds.
pub mod slot_time {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
    const SHORT_FORMAT: &str = "%Y-%m-%dT%H:%M";

    pub fn parse(s: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(s, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, SHORT_FORMAT))
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok()
    }

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid reservationDateTime: {raw}")))
    }
}
