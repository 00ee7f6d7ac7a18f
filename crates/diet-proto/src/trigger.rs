use bytes::Bytes;

/// Broadcast "run" event. The payload is the bare token with no envelope,
/// which is what the crawl consumers match on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerSignal;

impl TriggerSignal {
    pub const TOKEN: &'static str = "run";

    pub fn encode(&self) -> Bytes {
        Bytes::from_static(Self::TOKEN.as_bytes())
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        (payload == Self::TOKEN.as_bytes()).then_some(TriggerSignal)
    }
}
