use crate::proto;
use serde::{Deserialize, Serialize};

/// Maximum metric key length in characters.
pub const MAX_KEY_LEN: usize = 63;

/// Metric kind, as carried in the `type` field on the wire.
///
/// # Examples
///
/// ```
/// use telemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(MetricKind::Gauge.to_string(), "gauge");
/// assert!("Counter".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(MetricError::NonExistentType(other.to_string())),
        }
    }
}

/// A stored metric value: a counter total or a gauge reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Counter(v) => write!(f, "{v}"),
            MetricValue::Gauge(v) => write!(f, "{v}"),
        }
    }
}

/// Validation failures for metric payloads.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("metric key is empty")]
    EmptyKey,

    #[error("metric key is {0} characters long, limit is {MAX_KEY_LEN}")]
    KeyTooLong(usize),

    #[error("non-existent metric type '{0}'")]
    NonExistentType(String),

    #[error("wrong value type for {kind} metric '{id}'")]
    WrongValueType { id: String, kind: MetricKind },

    #[error("non-finite value for gauge '{0}'")]
    NonFinite(String),
}

/// Checks the key constraints shared by every ingress path.
pub fn validate_key(key: &str) -> Result<(), MetricError> {
    if key.is_empty() {
        return Err(MetricError::EmptyKey);
    }
    let len = key.chars().count();
    if len > MAX_KEY_LEN {
        return Err(MetricError::KeyTooLong(len));
    }
    Ok(())
}

/// Rejects NaN and infinities for gauges.
pub fn validate_gauge(key: &str, value: f64) -> Result<(), MetricError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MetricError::NonFinite(key.to_string()))
    }
}

/// A metric as it travels over HTTP.
///
/// Exactly one of `delta` (counters) and `value` (gauges) is set on updates;
/// fetch requests carry neither.
///
/// # Examples
///
/// ```
/// use telemon_common::types::Metric;
///
/// let json = serde_json::to_string(&Metric::counter("hits", 3)).unwrap();
/// assert_eq!(json, r#"{"id":"hits","type":"counter","delta":3}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Counter.to_string(),
            delta: Some(delta),
            value: None,
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Gauge.to_string(),
            delta: None,
            value: Some(value),
        }
    }

    pub fn from_value(id: impl Into<String>, value: MetricValue) -> Self {
        match value {
            MetricValue::Counter(v) => Self::counter(id, v),
            MetricValue::Gauge(v) => Self::gauge(id, v),
        }
    }

    pub fn kind(&self) -> Result<MetricKind, MetricError> {
        self.mtype.parse()
    }

    /// Validates a fetch request: key and kind only.
    pub fn query(&self) -> Result<MetricKind, MetricError> {
        validate_key(&self.id)?;
        self.kind()
    }

    /// Validates an update and returns its key and value.
    ///
    /// ```
    /// use telemon_common::types::{Metric, MetricError, MetricValue};
    ///
    /// let (key, value) = Metric::gauge("Alloc", 1.5).into_update().unwrap();
    /// assert_eq!(key, "Alloc");
    /// assert_eq!(value, MetricValue::Gauge(1.5));
    ///
    /// let bad = Metric { value: Some(1.0), ..Metric::counter("hits", 1) };
    /// assert!(matches!(bad.into_update(), Err(MetricError::WrongValueType { .. })));
    /// ```
    pub fn into_update(self) -> Result<(String, MetricValue), MetricError> {
        let kind = self.query()?;
        let value = match (kind, self.delta, self.value) {
            (MetricKind::Counter, Some(delta), None) => MetricValue::Counter(delta),
            (MetricKind::Gauge, None, Some(value)) => {
                validate_gauge(&self.id, value)?;
                MetricValue::Gauge(value)
            }
            _ => {
                return Err(MetricError::WrongValueType { id: self.id, kind });
            }
        };
        Ok((self.id, value))
    }
}

impl TryFrom<&Metric> for proto::Metric {
    type Error = MetricError;

    fn try_from(m: &Metric) -> Result<Self, Self::Error> {
        let kind = match m.kind()? {
            MetricKind::Counter => proto::metric::Type::Counter,
            MetricKind::Gauge => proto::metric::Type::Gauge,
        };
        Ok(proto::Metric {
            id: m.id.clone(),
            r#type: kind as i32,
            value: m.value,
            delta: m.delta,
        })
    }
}

impl From<proto::Metric> for Metric {
    fn from(m: proto::Metric) -> Self {
        let mtype = match proto::metric::Type::try_from(m.r#type) {
            Ok(proto::metric::Type::Counter) => MetricKind::Counter.to_string(),
            Ok(proto::metric::Type::Gauge) => MetricKind::Gauge.to_string(),
            Err(_) => m.r#type.to_string(),
        };
        Metric {
            id: m.id,
            mtype,
            delta: m.delta,
            value: m.value,
        }
    }
}
