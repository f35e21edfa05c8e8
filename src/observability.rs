use biometrics::{Collector, Counter, Moments};

pub(crate) static CHAT_REQUESTS: Counter = Counter::new("chatgate.chat.requests");
pub(crate) static CHAT_REQUEST_ERRORS: Counter = Counter::new("chatgate.chat.request_errors");
pub(crate) static CHAT_INTERRUPTS: Counter = Counter::new("chatgate.chat.interrupts");
pub(crate) static CHAT_REQUEST_DURATION: Moments =
    Moments::new("chatgate.chat.request_duration_seconds");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("chatgate.stream.chunks");
pub(crate) static STREAM_SKIPPED_LINES: Counter = Counter::new("chatgate.stream.skipped_lines");
pub(crate) static STREAM_BYTES: Counter = Counter::new("chatgate.stream.bytes");

pub(crate) static PROBE_REQUESTS: Counter = Counter::new("chatgate.probe.requests");

pub(crate) static SYNC_ATTEMPTS: Counter = Counter::new("chatgate.sync.attempts");
pub(crate) static SYNC_FAILURES: Counter = Counter::new("chatgate.sync.failures");
pub(crate) static SYNC_SKIPPED: Counter = Counter::new("chatgate.sync.skipped");

pub(crate) static KEYMAP_LOOKUPS: Counter = Counter::new("chatgate.keymap.lookups");
pub(crate) static KEYMAP_HITS: Counter = Counter::new("chatgate.keymap.hits");
pub(crate) static KEYMAP_MISSES: Counter = Counter::new("chatgate.keymap.misses");
pub(crate) static KEYMAP_LOAD_ERRORS: Counter = Counter::new("chatgate.keymap.load_errors");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CHAT_REQUESTS);
    collector.register_counter(&CHAT_REQUEST_ERRORS);
    collector.register_counter(&CHAT_INTERRUPTS);
    collector.register_moments(&CHAT_REQUEST_DURATION);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_SKIPPED_LINES);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&PROBE_REQUESTS);

    collector.register_counter(&SYNC_ATTEMPTS);
    collector.register_counter(&SYNC_FAILURES);
    collector.register_counter(&SYNC_SKIPPED);

    collector.register_counter(&KEYMAP_LOOKUPS);
    collector.register_counter(&KEYMAP_HITS);
    collector.register_counter(&KEYMAP_MISSES);
    collector.register_counter(&KEYMAP_LOAD_ERRORS);
}
