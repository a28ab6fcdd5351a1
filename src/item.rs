//! The in-band end-of-stream marker.

/// One slot on a queue: either a payload value or the end-of-stream marker.
///
/// Every queue in the pipeline carries `StreamItem<T>` internally, even
/// though the public `Queue::put`/`Queue::get` API deals in the unwrapped
/// `T` and `Eos` is pushed/observed through dedicated methods. Representing
/// end-of-stream as a variant (rather than a reserved `T` value) means a
/// caller's item type never needs a sentinel value carved out of its own
/// domain.
#[derive(Debug, Clone)]
pub enum StreamItem<T> {
    Value(T),
    Eos,
}

impl<T> StreamItem<T> {
    pub fn is_eos(&self) -> bool {
        matches!(self, StreamItem::Eos)
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            StreamItem::Value(v) => Some(v),
            StreamItem::Eos => None,
        }
    }
}
