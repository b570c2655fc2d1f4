//! Delivery contracts for lifecycle-gated subscriptions

use std::fmt;

/// How a gated subscription behaves when its owner becomes active again
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DeliveryMode {
    /// On every activation, deliver the most recent value, even if this
    /// subscriber already saw it
    #[default]
    RedeliverOnStart,

    /// Deliver only values that differ from the last value delivered to a
    /// subscription with the same id
    ///
    /// The id outlives the subscription, so a recreated view using the same
    /// id does not see a value it already rendered.
    UniqueOnly(String),
}

impl DeliveryMode {
    pub fn unique_only(subscription_id: impl Into<String>) -> Self {
        DeliveryMode::UniqueOnly(subscription_id.into())
    }

    pub fn is_unique_only(&self) -> bool {
        matches!(self, DeliveryMode::UniqueOnly(_))
    }

    /// The bookkeeping id of a `UniqueOnly` contract
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            DeliveryMode::RedeliverOnStart => None,
            DeliveryMode::UniqueOnly(id) => Some(id),
        }
    }

    /// Scope a `UniqueOnly` id to a set of selected property names
    ///
    /// Two selections from the same view can then share a base id without
    /// colliding. `RedeliverOnStart` is returned unchanged.
    pub fn scoped_to_properties(&self, names: &[&str]) -> Self {
        match self {
            DeliveryMode::RedeliverOnStart => DeliveryMode::RedeliverOnStart,
            DeliveryMode::UniqueOnly(id) => {
                DeliveryMode::UniqueOnly(format!("{id}_{}", names.join(",")))
            }
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::RedeliverOnStart => f.write_str("redeliver-on-start"),
            DeliveryMode::UniqueOnly(id) => write!(f, "unique-only({id})"),
        }
    }
}
