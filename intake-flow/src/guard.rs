use regex::Regex;
use std::sync::LazyLock;

static BARE_ACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(ok|okay|oki|okey|dale|👍)[.!]*$").expect("ack pattern")
});

/// Decides whether a candidate reply should reach the client.
///
/// Suppressed: blank replies, bare acknowledgements, and exact repeats of the last
/// delivered reply (compared after trimming).
pub fn should_send(candidate: &str, last_reply: &str) -> bool {
    let candidate = candidate.trim();
    !candidate.is_empty() && !BARE_ACK.is_match(candidate) && candidate != last_reply.trim()
}
