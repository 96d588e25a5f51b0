use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Request body for `POST /api/attendance/scan`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// JPEG frame as a `data:image/jpeg;base64,...` URL.
    pub image_base64: String,
}

/// Response body as sent by the recognition endpoint. Every field is
/// optional on the wire; `ScanResult::from_json` decides what is required.
/// Only `ok` is strict, a display field of the wrong JSON type is dropped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    ok: Option<bool>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_code")]
    employee_code: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    reason: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    message: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Employee codes may arrive as bare numbers.
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(code) => Some(code),
        serde_json::Value::Number(code) => Some(code.to_string()),
        _ => None,
    })
}

/// Outcome of one scan attempt as reported by the endpoint. Never mutated
/// after parsing; only classified for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub employee_code: Option<String>,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub scanned_at: DateTime<Utc>,
    /// Full response body, kept for the debug view.
    pub raw: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanParseError {
    #[error("response is not valid JSON: {0}")]
    Json(String),
    #[error("response has no boolean `ok` field")]
    MissingOk,
}

impl ScanResult {
    pub fn from_slice(body: &[u8], scanned_at: DateTime<Utc>) -> Result<Self, ScanParseError> {
        let raw: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| ScanParseError::Json(e.to_string()))?;
        Self::from_json(raw, scanned_at)
    }

    pub fn from_json(
        raw: serde_json::Value,
        scanned_at: DateTime<Utc>,
    ) -> Result<Self, ScanParseError> {
        let wire: WireResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ScanParseError::Json(e.to_string()))?;
        let ok = wire.ok.ok_or(ScanParseError::MissingOk)?;
        Ok(Self {
            ok,
            kind: wire.kind,
            employee_code: wire.employee_code,
            confidence: wire.confidence,
            reason: wire.reason,
            message: wire.message,
            scanned_at,
            raw,
        })
    }

    pub fn classification(&self) -> Classification {
        if !self.ok {
            return Classification::InvalidEntry;
        }
        match &self.kind {
            Some(kind) if kind.starts_with("OUT") => Classification::RecordedOut,
            _ => Classification::RecordedIn,
        }
    }

    /// The endpoint already had a record for this direction today.
    pub fn is_duplicate(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|k| k.ends_with("_DUPLICATE"))
    }

    /// Reason text for a rejected scan.
    pub fn reason_or_unknown(&self) -> &str {
        self.reason.as_deref().unwrap_or("unknown")
    }

    pub fn confidence_percent(&self) -> Option<u32> {
        self.confidence.map(confidence_percent)
    }

    pub fn confidence_tone(&self) -> Option<Tone> {
        self.confidence.map(Tone::for_confidence)
    }
}

/// Human-facing label derived from a scan response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    RecordedIn,
    RecordedOut,
    InvalidEntry,
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Classification::RecordedIn => "Recorded IN",
            Classification::RecordedOut => "Recorded OUT",
            Classification::InvalidEntry => "Invalid Entry",
        }
    }

    /// Color the preview border flashes after a result.
    pub fn flash(self) -> Tone {
        match self {
            Classification::RecordedIn => Tone::Success,
            Classification::RecordedOut => Tone::Caution,
            Classification::InvalidEntry => Tone::Alarm,
        }
    }
}

/// Display tone shared by the result flash and the confidence badge.
/// Purely cosmetic: acceptance is decided by the endpoint's `ok` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Success,
    Caution,
    Alarm,
}

impl Tone {
    pub fn for_confidence(confidence: f64) -> Self {
        match confidence_percent(confidence) {
            p if p >= 60 => Tone::Success,
            p if p >= 45 => Tone::Caution,
            _ => Tone::Alarm,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Tone::Success => "emerald",
            Tone::Caution => "amber",
            Tone::Alarm => "red",
        }
    }
}

fn confidence_percent(confidence: f64) -> u32 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u32
}

/// Supported auto-scan periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoScanInterval {
    Fast,
    #[default]
    Medium,
    Slow,
}

impl AutoScanInterval {
    pub const ALL: [AutoScanInterval; 3] = [
        AutoScanInterval::Fast,
        AutoScanInterval::Medium,
        AutoScanInterval::Slow,
    ];

    pub fn as_millis(self) -> u64 {
        match self {
            AutoScanInterval::Fast => 2500,
            AutoScanInterval::Medium => 3500,
            AutoScanInterval::Slow => 5000,
        }
    }

    pub fn period(self) -> Duration {
        Duration::from_millis(self.as_millis())
    }
}

impl TryFrom<u64> for AutoScanInterval {
    type Error = IntervalError;

    fn try_from(ms: u64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_millis() == ms)
            .ok_or(IntervalError(ms))
    }
}

impl Serialize for AutoScanInterval {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(self.as_millis())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported auto-scan interval {0}ms, expected 2500, 3500 or 5000")]
pub struct IntervalError(pub u64);
