use crate::value::Value;
use std::{fmt, sync::Arc};
use time::OffsetDateTime;

///
/// DefaultValue
///
/// Tagged default provider. `Computed` closures are invoked at mutation time,
/// never at declaration time, so a "current timestamp" default yields the
/// actual insert-time value on every call.
///

#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Computed(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    #[must_use]
    pub fn computed(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(f))
    }

    /// Millisecond-precision current-time default.
    #[must_use]
    pub fn now() -> Self {
        Self::computed(|| Value::Timestamp(now_millis()))
    }

    /// Produce the value for one mutation.
    #[must_use]
    pub fn materialize(&self) -> Value {
        match self {
            Self::Static(value) => value.clone(),
            Self::Computed(f) => f(),
        }
    }

    #[must_use]
    pub const fn is_computed(&self) -> bool {
        matches!(self, Self::Computed(_))
    }
}

impl From<Value> for DefaultValue {
    fn from(value: Value) -> Self {
        Self::Static(value)
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Computed(_) => f.debug_tuple("Computed").field(&"<fn>").finish(),
        }
    }
}

/// Current wall-clock time in unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn static_default_copies_value() {
        let default = DefaultValue::from(Value::Int(7));
        assert_eq!(default.materialize(), Value::Int(7));
        assert!(!default.is_computed());
    }

    #[test]
    fn computed_default_is_invoked_per_call() {
        static COUNTER: AtomicI64 = AtomicI64::new(0);
        let default =
            DefaultValue::computed(|| Value::Int(COUNTER.fetch_add(1, Ordering::SeqCst)));

        assert_eq!(default.materialize(), Value::Int(0));
        assert_eq!(default.materialize(), Value::Int(1));
    }

    #[test]
    fn now_default_yields_timestamp() {
        match DefaultValue::now().materialize() {
            Value::Timestamp(ms) => assert!(ms > 0),
            other => panic!("expected timestamp, got {other:?}"),
        }
    }
}
